//! Integration tests for the cross-process reservation ledger
//!
//! Each allocator here stands in for a separate process: it has its own
//! debounce set and opens the ledger file independently, so the only thing
//! coordinating them is the file and its advisory lock.
//! - Racing allocators on one port
//! - Lock wait bound
//! - Stale reservation purge
//! - Disabling the ledger

use port_ledger::ledger::properties::Properties;
use port_ledger::{AllocatorConfig, Clock, PortAllocator, SystemClock};
use std::fs;
use std::net::{Ipv4Addr, TcpListener};
use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn ledger_config(env_var: &str, path: &Path) -> AllocatorConfig {
    AllocatorConfig {
        lock_file_env: env_var.to_string(),
        lock_file: Some(path.to_path_buf()),
        ..Default::default()
    }
}

fn free_port() -> u16 {
    TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0))
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

#[test]
fn test_racing_allocators_single_port_exactly_one_wins() {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("ports.lock");
    let port = free_port();
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = ["PORT_LEDGER_IT_RACE_A", "PORT_LEDGER_IT_RACE_B"]
        .into_iter()
        .map(|env_var| {
            let allocator = PortAllocator::with_config(ledger_config(env_var, &path));
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                allocator.next_available_port_in(port, port, &[])
            })
        })
        .collect();

    let results: Vec<Option<u16>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let winners: Vec<u16> = results.iter().flatten().copied().collect();
    assert_eq!(winners, vec![port], "results: {:?}", results);
}

#[test]
fn test_racing_allocators_over_range_get_distinct_ports() {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("ports.lock");
    let barrier = Arc::new(Barrier::new(4));

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let env_var = format!("PORT_LEDGER_IT_RANGE_{}", i);
            let allocator = PortAllocator::with_config(ledger_config(&env_var, &path));
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                allocator.next_available_port_in(43000, 43200, &[])
            })
        })
        .collect();

    let mut ports: Vec<u16> = handles
        .into_iter()
        .map(|h| h.join().unwrap().expect("range should not be exhausted"))
        .collect();
    ports.sort_unstable();
    ports.dedup();
    assert_eq!(ports.len(), 4);

    // Every winner is recorded in the shared ledger
    let ledger = Properties::parse(&fs::read_to_string(&path).unwrap());
    for port in &ports {
        assert!(ledger.contains_key(&port.to_string()));
    }
}

#[test]
fn test_reservation_blocks_second_allocator_after_first_released_socket() {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("ports.lock");
    let port = free_port();

    let first = PortAllocator::with_config(ledger_config("PORT_LEDGER_IT_SEQ_A", &path));
    let second = PortAllocator::with_config(ledger_config("PORT_LEDGER_IT_SEQ_B", &path));

    assert_eq!(first.next_available_port_from(&[port]), Some(port));

    // The probe socket is closed, so only the ledger stops the second allocator
    assert_eq!(second.next_available_port_from(&[port]), None);
    assert!(second.debounced_ports().is_empty());
}

#[test]
#[cfg(unix)]
fn test_held_lock_gives_up_within_wait_bound() {
    use port_ledger::{LockFileHandle, LockPolicy};

    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("ports.lock");
    let port = free_port();

    let _held = LockFileHandle::acquire(&path, &LockPolicy::default()).unwrap();

    let allocator = PortAllocator::with_config(ledger_config("PORT_LEDGER_IT_LOCK", &path));

    let started = Instant::now();
    let result = allocator.next_available_port_from(&[port]);
    let elapsed = started.elapsed();

    assert_eq!(result, None);
    assert!(elapsed >= Duration::from_millis(1_900), "gave up after {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(5), "waited {:?}", elapsed);
    assert!(allocator.debounced_ports().is_empty());
}

#[test]
fn test_stale_reservation_does_not_block_and_is_replaced() {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("ports.lock");
    let port = free_port();
    let now = SystemClock.now_millis();

    fs::write(
        &path,
        format!("#Port reservations\n{}={}\n1={}\n", port, now - 31_000, now - 60_000),
    )
    .unwrap();

    let allocator = PortAllocator::with_config(ledger_config("PORT_LEDGER_IT_TTL", &path));
    assert_eq!(allocator.next_available_port_from(&[port]), Some(port));

    let ledger = Properties::parse(&fs::read_to_string(&path).unwrap());
    assert_eq!(ledger.len(), 1);
    assert!(ledger.get("1").is_none());

    let reserved_at: i64 = ledger.get(&port.to_string()).unwrap().parse().unwrap();
    assert!(reserved_at >= now);
}

#[test]
fn test_cleared_config_never_touches_ledger() {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("ports.lock");
    let port = free_port();
    let now = SystemClock.now_millis();

    // A live reservation that would block the port if the ledger were consulted
    let original = format!("# kept verbatim\n{}={}\n", port, now);
    fs::write(&path, &original).unwrap();

    let allocator = PortAllocator::with_config(ledger_config("PORT_LEDGER_IT_CLEAR", &path));
    allocator.clear_lock_file_config();
    allocator.clear_lock_file_config();

    assert_eq!(allocator.ledger_path(), None);
    assert_eq!(allocator.next_available_port_from(&[port]), Some(port));
    assert_eq!(fs::read_to_string(&path).unwrap(), original);
}

#[test]
fn test_env_var_enables_ledger() {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("from-env.lock");
    std::env::set_var("PORT_LEDGER_IT_ENV", &path);

    let allocator = PortAllocator::with_config(AllocatorConfig {
        lock_file_env: "PORT_LEDGER_IT_ENV".to_string(),
        ..Default::default()
    });
    let port = allocator.next_available_port_in(44000, 44100, &[]).unwrap();

    assert!(path.is_file());
    let ledger = Properties::parse(&fs::read_to_string(&path).unwrap());
    assert!(ledger.contains_key(&port.to_string()));

    std::env::remove_var("PORT_LEDGER_IT_ENV");
}

#[test]
fn test_unusable_ledger_path_falls_back_to_bind_probe() {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();

    // A directory is not a usable ledger
    let allocator =
        PortAllocator::with_config(ledger_config("PORT_LEDGER_IT_BAD_PATH", temp_dir.path()));

    assert_eq!(allocator.ledger_path(), None);
    assert!(allocator.next_available_port_in(45000, 45100, &[]).is_some());
}
