/**
 * config.rs
 * Allocator configuration and ledger path resolution
 *
 * Format (when embedded in a host's JSON/YAML config):
 * ```json
 * {
 *   "lockFileEnv": "PORT_LEDGER_FILE",
 *   "lockFile": "/tmp/ports.lock",
 *   "debounceWindowMs": 10000,
 *   "reservationTtlMs": 30000,
 *   "lockRetryAttempts": 200,
 *   "lockRetryIntervalMs": 10,
 *   "bindAddress": "0.0.0.0"
 * }
 * ```
 *
 * Every field is optional. The ledger path comes from the environment
 * variable named by `lockFileEnv` first, then from `lockFile`.
 */

use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use crate::debounce::DEFAULT_DEBOUNCE_WINDOW_MS;
use crate::errors::{PortError, Result};
use crate::ledger::lock::{LockPolicy, DEFAULT_LOCK_ATTEMPTS};
use crate::ledger::DEFAULT_RESERVATION_TTL_MS;

/// Name of the environment variable (and property) holding the ledger path
pub const LOCK_FILE_ENV: &str = "PORT_LEDGER_FILE";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AllocatorConfig {
    pub lock_file_env: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_file: Option<PathBuf>,
    pub debounce_window_ms: i64,
    pub reservation_ttl_ms: i64,
    pub lock_retry_attempts: u32,
    pub lock_retry_interval_ms: u64,
    pub bind_address: IpAddr,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        AllocatorConfig {
            lock_file_env: LOCK_FILE_ENV.to_string(),
            lock_file: None,
            debounce_window_ms: DEFAULT_DEBOUNCE_WINDOW_MS,
            reservation_ttl_ms: DEFAULT_RESERVATION_TTL_MS,
            lock_retry_attempts: DEFAULT_LOCK_ATTEMPTS,
            lock_retry_interval_ms: 10,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        }
    }
}

impl AllocatorConfig {
    pub fn lock_policy(&self) -> LockPolicy {
        LockPolicy {
            attempts: self.lock_retry_attempts,
            interval: Duration::from_millis(self.lock_retry_interval_ms),
        }
    }

    /// Check values a host config could get wrong
    pub fn validate(&self) -> Result<()> {
        if self.lock_file_env.is_empty() {
            return Err(PortError::Config(
                "lockFileEnv must not be empty".to_string(),
            ));
        }
        if self.debounce_window_ms < 0 {
            return Err(PortError::Config(format!(
                "debounceWindowMs must not be negative: {}",
                self.debounce_window_ms
            )));
        }
        if self.reservation_ttl_ms < 0 {
            return Err(PortError::Config(format!(
                "reservationTtlMs must not be negative: {}",
                self.reservation_ttl_ms
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Resolution {
    Unresolved,
    Disabled,
    Enabled(PathBuf),
}

/// Resolves the ledger path once and remembers the answer
#[derive(Debug)]
pub struct LedgerPathResolver {
    env_var: String,
    property: Option<PathBuf>,
    cached: Resolution,
}

impl LedgerPathResolver {
    pub fn new(env_var: impl Into<String>, property: Option<PathBuf>) -> Self {
        LedgerPathResolver {
            env_var: env_var.into(),
            property,
            cached: Resolution::Unresolved,
        }
    }

    pub fn from_config(config: &AllocatorConfig) -> Self {
        Self::new(config.lock_file_env.clone(), config.lock_file.clone())
    }

    /// Ledger path, or None when the ledger is disabled
    ///
    /// The first call looks at the environment, then the property, and
    /// creates the file if needed. Later calls reuse that outcome.
    pub fn resolve(&mut self) -> Option<&Path> {
        if self.cached == Resolution::Unresolved {
            self.cached = self.lookup();
        }

        match &self.cached {
            Resolution::Enabled(path) => Some(path.as_path()),
            _ => None,
        }
    }

    /// Replace the property value; the next `resolve` looks again
    pub fn set_property(&mut self, path: Option<PathBuf>) {
        self.property = path;
        self.cached = Resolution::Unresolved;
    }

    /// Forget the property and the cached path
    pub fn clear(&mut self) {
        self.set_property(None);
    }

    pub fn env_var(&self) -> &str {
        &self.env_var
    }

    fn lookup(&self) -> Resolution {
        let configured = std::env::var_os(&self.env_var)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(|| self.property.clone());

        let Some(path) = configured else {
            return Resolution::Disabled;
        };

        match prepare_lock_file(&path) {
            Ok(()) => {
                info!(path = %path.display(), "Port reservation ledger enabled");
                Resolution::Enabled(path)
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Unusable port ledger file, falling back to bind probe only"
                );
                Resolution::Disabled
            }
        }
    }
}

/// Create the ledger file if missing and make sure it is a regular file
fn prepare_lock_file(path: &Path) -> Result<()> {
    if !path.exists() {
        OpenOptions::new().write(true).create(true).open(path)?;
    }

    if !path.is_file() {
        return Err(PortError::InvalidLockFile(format!(
            "{} is not a regular file",
            path.display()
        )));
    }
    Ok(())
}
