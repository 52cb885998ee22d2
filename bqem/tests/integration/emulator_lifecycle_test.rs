use std::time::Duration;

use bqem::emulator::{PortPair, is_port_bound};
use bqem::error::ErrorKind;
use bqem::manager::Manager;
use bqem::test_utils::{FakeEmulatorListener, fake_manager_config};
use bqem::with_manager;
use telemetry::init_test_tracing;
use tokio::net::TcpListener;

const READY_AFTER: Duration = Duration::from_millis(150);

/// Returns whether a process with `pid` still exists.
fn process_exists(pid: u32) -> bool {
    std::path::Path::new(&format!("/proc/{pid}")).exists()
}

#[tokio::test(flavor = "multi_thread")]
async fn manager_launches_and_stops_the_emulator_test() {
    init_test_tracing();
    let _ready = FakeEmulatorListener::bind_after(43_050, READY_AFTER);

    let mut manager = Manager::start(fake_manager_config(43_050, 43_060, "exec sleep 30"))
        .await
        .unwrap();

    assert_eq!(manager.ports(), Some(PortPair::new(43_050, 43_060)));
    assert_eq!(manager.project_id(), "test");
    assert!(manager.datasets().is_empty());

    manager.shutdown().await;
    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn contended_ports_are_skipped_test() {
    init_test_tracing();
    let _other_run = TcpListener::bind(("127.0.0.1", 43_150)).await.unwrap();
    let _ready = FakeEmulatorListener::bind_after(43_151, READY_AFTER);

    let ports = with_manager(
        fake_manager_config(43_150, 43_160, "exec sleep 30"),
        async |manager: &mut Manager| Ok(manager.ports()),
    )
    .await
    .unwrap();

    assert_eq!(ports, Some(PortPair::new(43_151, 43_161)));
}

#[tokio::test(flavor = "multi_thread")]
async fn exhausted_port_range_is_reported_test() {
    init_test_tracing();
    let _blockers = [
        TcpListener::bind(("127.0.0.1", 43_250)).await.unwrap(),
        TcpListener::bind(("127.0.0.1", 43_251)).await.unwrap(),
    ];
    let mut config = fake_manager_config(43_250, 43_260, "exec sleep 30");
    config.max_port_attempts = 2;

    let err = Manager::start(config).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NoAvailablePort);
    assert!(err.detail().unwrap().contains("43250..=43251"));
}

#[tokio::test(flavor = "multi_thread")]
async fn emulator_that_never_listens_fails_startup_test() {
    init_test_tracing();
    let mut config = fake_manager_config(43_350, 43_360, "exec sleep 30");
    config.emulator.readiness_timeout_ms = 300;

    let err = Manager::start(config).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::EmulatorStartupFailed);
    assert!(!is_port_bound(43_350).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn emulator_is_stopped_when_the_body_fails_test() {
    init_test_tracing();
    let _ready = FakeEmulatorListener::bind_after(43_450, READY_AFTER);
    let mut pid = None;

    let result = with_manager(
        fake_manager_config(43_450, 43_460, "exec sleep 30"),
        async |manager: &mut Manager| {
            pid = manager_pid(manager);
            manager.load(Vec::new(), "not-a-table-path").await
        },
    )
    .await;

    assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidTablePath);
    let pid = pid.unwrap();
    assert!(!process_exists(pid), "emulator process {pid} is still running");
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_configuration_is_rejected_test() {
    init_test_tracing();
    let mut config = fake_manager_config(43_550, 43_550, "exec sleep 30");
    config.project = String::new();

    let err = Manager::start(config).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConfigError);
}

fn manager_pid(manager: &Manager) -> Option<u32> {
    manager.emulator().and_then(|emulator| emulator.id())
}
