//! Error types for port allocation

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PortError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bind error on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Lock timeout: {} still locked after {attempts} attempts", .path.display())]
    LockTimeout { path: PathBuf, attempts: u32 },

    #[error("Invalid lock file: {0}")]
    InvalidLockFile(String),

    #[error("No free port: {0}")]
    NoFreePort(String),

    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, PortError>;
