//! Process-wide allocator installation
//!
//! Runs as its own test binary so the global allocator starts out empty.
//! Everything lives in one test because the order of installs matters.

use port_ledger::{AllocatorConfig, PortAllocator, PortError};
use tempfile::TempDir;

#[test]
fn test_init_global_installs_once() {
    let temp_dir = TempDir::new().unwrap();
    let ledger = temp_dir.path().join("ports.lock");

    // Invalid config is refused before anything is installed
    let invalid = AllocatorConfig {
        reservation_ttl_ms: -1,
        ..Default::default()
    };
    match PortAllocator::init_global(invalid) {
        Err(PortError::Config(msg)) => assert!(msg.contains("reservationTtlMs")),
        other => panic!("Expected Config error, got {:?}", other),
    }

    let config = AllocatorConfig {
        lock_file_env: "PORT_LEDGER_TEST_GLOBAL_1".to_string(),
        lock_file: Some(ledger.clone()),
        debounce_window_ms: 2_500,
        ..Default::default()
    };
    let installed = PortAllocator::init_global(config).unwrap();
    assert_eq!(installed.config().debounce_window_ms, 2_500);
    assert!(std::ptr::eq(installed, PortAllocator::global()));

    // A second install keeps the first allocator
    match PortAllocator::init_global(AllocatorConfig::default()) {
        Err(PortError::Config(msg)) => assert!(msg.contains("already initialised")),
        other => panic!("Expected Config error, got {:?}", other),
    }
    assert_eq!(PortAllocator::global().config().debounce_window_ms, 2_500);
    assert_eq!(PortAllocator::global().ledger_path(), Some(ledger));
}
