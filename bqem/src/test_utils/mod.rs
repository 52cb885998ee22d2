//! Test doubles for the emulator process and the database client.
//!
//! The fake emulator is `sh -c <script>`: the emulator flags appended by the supervisor become
//! positional shell parameters and are ignored. Since the script never listens on a port,
//! readiness is simulated with a [`FakeEmulatorListener`].

use std::time::Duration;

use config::shared::{EmulatorConfig, ManagerConfig, RemoteSchemaConfig};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::emulator::{LogLevel, SupervisorConfig};

mod memory_client;

pub use memory_client::MemoryClient;

/// Emulator settings that run `script` through `sh` with short timeouts.
pub fn fake_emulator_config(script: &str) -> EmulatorConfig {
    EmulatorConfig {
        binary: "sh".to_string(),
        binary_args: vec![
            "-c".to_string(),
            script.to_string(),
            "fake-emulator".to_string(),
        ],
        readiness_timeout_ms: 2_000,
        readiness_poll_interval_ms: 50,
        stop_timeout_ms: 1_000,
        query_timeout_ms: 5_000,
    }
}

/// Supervisor settings for a fake emulator running `script`.
pub fn fake_supervisor_config(script: &str) -> SupervisorConfig {
    let emulator = fake_emulator_config(script);

    SupervisorConfig {
        project_id: "test".to_string(),
        log_level: LogLevel::Info,
        binary: emulator.binary,
        binary_args: emulator.binary_args,
        readiness_timeout: Duration::from_millis(emulator.readiness_timeout_ms),
        readiness_poll_interval: Duration::from_millis(emulator.readiness_poll_interval_ms),
        stop_timeout: Duration::from_millis(emulator.stop_timeout_ms),
    }
}

/// Manager settings launching a fake emulator on `port`/`grpc_port`, without a cache file or a
/// remote schema source.
pub fn fake_manager_config(port: u16, grpc_port: u16, script: &str) -> ManagerConfig {
    ManagerConfig {
        port,
        grpc_port,
        schema_path: None,
        emulator: fake_emulator_config(script),
        remote: RemoteSchemaConfig {
            enabled: false,
            ..RemoteSchemaConfig::default()
        },
        ..ManagerConfig::default()
    }
}

/// Accepts connections on a port after a delay, standing in for an emulator becoming ready.
///
/// The listener is closed when this value is dropped.
#[derive(Debug)]
pub struct FakeEmulatorListener {
    task: JoinHandle<()>,
}

impl FakeEmulatorListener {
    /// Starts listening on `127.0.0.1:port` once `delay` has elapsed.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind_after(port: u16, delay: Duration) -> Self {
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let listener = match TcpListener::bind(("127.0.0.1", port)).await {
                Ok(listener) => listener,
                Err(err) => {
                    debug!(port, error = %err, "fake emulator could not bind");
                    return;
                }
            };

            while listener.accept().await.is_ok() {}
        });

        Self { task }
    }
}

impl Drop for FakeEmulatorListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}
