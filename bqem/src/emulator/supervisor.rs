use std::fmt;
use std::process::Stdio;
use std::time::Duration;

use config::shared::ManagerConfig;
use tokio::process::{Child, Command};
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::emulator::is_port_bound;
use crate::error::{BqemResult, ErrorKind};
use crate::{bail, bqem_error};

/// Verbosity passed to the emulator through `--log-level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
        }
    }
}

/// Launch settings of one emulator process.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub project_id: String,
    pub log_level: LogLevel,
    pub binary: String,
    pub binary_args: Vec<String>,
    pub readiness_timeout: Duration,
    pub readiness_poll_interval: Duration,
    pub stop_timeout: Duration,
}

impl SupervisorConfig {
    pub fn from_manager_config(config: &ManagerConfig) -> Self {
        let emulator = &config.emulator;

        Self {
            project_id: config.project.clone(),
            log_level: if config.debug_mode {
                LogLevel::Debug
            } else {
                LogLevel::Info
            },
            binary: emulator.binary.clone(),
            binary_args: emulator.binary_args.clone(),
            readiness_timeout: Duration::from_millis(emulator.readiness_timeout_ms),
            readiness_poll_interval: Duration::from_millis(emulator.readiness_poll_interval_ms),
            stop_timeout: Duration::from_millis(emulator.stop_timeout_ms),
        }
    }
}

/// Data (HTTP) and control (gRPC) port of one emulator instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortPair {
    pub data_port: u16,
    pub control_port: u16,
}

impl PortPair {
    pub fn new(data_port: u16, control_port: u16) -> Self {
        Self {
            data_port,
            control_port,
        }
    }

    /// Returns both ports shifted by `offset`, or `None` if either leaves the port range.
    pub fn offset(&self, offset: u16) -> Option<PortPair> {
        Some(PortPair {
            data_port: self.data_port.checked_add(offset)?,
            control_port: self.control_port.checked_add(offset)?,
        })
    }
}

impl fmt::Display for PortPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.data_port, self.control_port)
    }
}

/// Lifecycle state of a supervised emulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmulatorState {
    NotStarted,
    Starting,
    Ready,
    Terminated,
}

/// Owns one emulator child process bound to a [`PortPair`].
///
/// The child is killed when the supervisor is dropped while still running, so an abandoned
/// supervisor never leaks a process.
#[derive(Debug)]
pub struct ProcessSupervisor {
    config: SupervisorConfig,
    ports: PortPair,
    state: EmulatorState,
    child: Option<Child>,
}

impl ProcessSupervisor {
    pub fn new(config: SupervisorConfig, ports: PortPair) -> Self {
        Self {
            config,
            ports,
            state: EmulatorState::NotStarted,
            child: None,
        }
    }

    pub fn state(&self) -> EmulatorState {
        self.state
    }

    pub fn ports(&self) -> PortPair {
        self.ports
    }

    /// Returns the OS process id while the child is running.
    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Launches the emulator and waits until its data port accepts connections.
    ///
    /// Fails with [`ErrorKind::PortOccupied`] before spawning anything if either port is already
    /// bound. Fails with [`ErrorKind::EmulatorStartupFailed`] if the process cannot be spawned,
    /// exits early, or does not become ready within the readiness timeout; the child is killed
    /// and reaped before that error is returned.
    pub async fn start(&mut self) -> BqemResult<()> {
        if self.state != EmulatorState::NotStarted {
            bail!(
                ErrorKind::InvalidState,
                "Emulator supervisor can only be started once",
                format!("{:?}", self.state)
            );
        }

        for port in [self.ports.data_port, self.ports.control_port] {
            if is_port_bound(port).await {
                bail!(ErrorKind::PortOccupied, "Port is already bound", port);
            }
        }

        let child = self.spawn()?;
        info!(
            pid = child.id(),
            ports = %self.ports,
            project_id = %self.config.project_id,
            "emulator process spawned"
        );
        self.child = Some(child);
        self.state = EmulatorState::Starting;

        match self.wait_until_ready().await {
            Ok(()) => {
                self.state = EmulatorState::Ready;
                info!(ports = %self.ports, "emulator is ready");

                Ok(())
            }
            Err(err) => {
                self.kill().await;
                self.state = EmulatorState::Terminated;

                Err(err)
            }
        }
    }

    /// Stops a ready emulator, gracefully first and forcibly after the stop timeout.
    ///
    /// Does nothing unless the emulator is [`EmulatorState::Ready`]. Never fails; problems are
    /// logged.
    pub async fn stop(&mut self) {
        if self.state != EmulatorState::Ready {
            return;
        }
        self.state = EmulatorState::Terminated;

        let Some(mut child) = self.child.take() else {
            return;
        };

        request_termination(&mut child);

        match timeout(self.config.stop_timeout, child.wait()).await {
            Ok(Ok(status)) => info!(ports = %self.ports, %status, "emulator stopped"),
            Ok(Err(err)) => error!(ports = %self.ports, error = %err, "waiting for emulator exit failed"),
            Err(_) => {
                warn!(
                    ports = %self.ports,
                    timeout = ?self.config.stop_timeout,
                    "emulator did not exit in time, killing it"
                );
                if let Err(err) = child.kill().await {
                    error!(ports = %self.ports, error = %err, "killing emulator failed");
                }
            }
        }
    }

    fn spawn(&self) -> BqemResult<Child> {
        let data_port = self.ports.data_port.to_string();
        let control_port = self.ports.control_port.to_string();

        let mut command = Command::new(&self.config.binary);
        command
            .args(&self.config.binary_args)
            .args(["--project", &self.config.project_id])
            .args(["--port", &data_port])
            .args(["--grpc-port", &control_port])
            .args(["--log-level", self.config.log_level.as_str()])
            .stdin(Stdio::null())
            .kill_on_drop(true);

        if self.config.log_level == LogLevel::Info {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }

        command.spawn().map_err(|err| {
            bqem_error!(
                ErrorKind::EmulatorStartupFailed,
                "Emulator process could not be spawned",
                format!("{}: {err}", self.config.binary),
                source: err
            )
        })
    }

    async fn wait_until_ready(&mut self) -> BqemResult<()> {
        let deadline = Instant::now() + self.config.readiness_timeout;
        let data_port = self.ports.data_port;

        loop {
            let Some(child) = self.child.as_mut() else {
                bail!(ErrorKind::InvalidState, "Emulator process is not running");
            };

            if let Some(status) = child.try_wait()? {
                bail!(
                    ErrorKind::EmulatorStartupFailed,
                    "Emulator process exited before becoming ready",
                    status
                );
            }

            if is_port_bound(data_port).await {
                return Ok(());
            }

            if Instant::now() >= deadline {
                bail!(
                    ErrorKind::EmulatorStartupFailed,
                    "Emulator did not become ready in time",
                    format!(
                        "port {data_port} not accepting connections after {:?}",
                        self.config.readiness_timeout
                    )
                );
            }

            debug!(port = data_port, "waiting for emulator readiness");
            sleep(self.config.readiness_poll_interval).await;
        }
    }

    async fn kill(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        if let Err(err) = child.kill().await {
            warn!(ports = %self.ports, error = %err, "killing emulator failed");
        }
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        let Some(child) = self.child.as_mut() else {
            return;
        };

        warn!(ports = %self.ports, "emulator supervisor dropped while running, killing process");
        if let Err(err) = child.start_kill() {
            error!(ports = %self.ports, error = %err, "killing emulator failed");
        }
    }
}

#[cfg(unix)]
fn request_termination(child: &mut Child) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };

    if let Err(err) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        warn!(pid, error = %err, "sending SIGTERM to emulator failed");
    }
}

#[cfg(not(unix))]
fn request_termination(child: &mut Child) {
    if let Err(err) = child.start_kill() {
        warn!(error = %err, "terminating emulator failed");
    }
}
