use tracing::{info, warn};

use crate::bail;
use crate::emulator::{PortPair, ProcessSupervisor, SupervisorConfig};
use crate::error::{BqemResult, ErrorKind};

/// Finds a free port pair by starting emulators on consecutive offsets of a base pair.
///
/// Contention with other test runs on the same machine is expected: a pair reported as
/// occupied is skipped and the next offset is tried. Any other startup failure ends the scan,
/// so at most one process is ever left running by [`PortAllocator::acquire`].
#[derive(Debug, Clone)]
pub struct PortAllocator {
    config: SupervisorConfig,
    base: PortPair,
    max_attempts: u16,
}

impl PortAllocator {
    pub fn new(
        config: SupervisorConfig,
        base_port: u16,
        base_control_port: u16,
        max_attempts: u16,
    ) -> Self {
        Self {
            config,
            base: PortPair::new(base_port, base_control_port),
            max_attempts,
        }
    }

    /// Returns a ready supervisor on the first offset whose ports were free.
    ///
    /// Fails with [`ErrorKind::NoAvailablePort`] naming the scanned range when every offset was
    /// occupied or the ports ran past `65535`.
    pub async fn acquire(&self) -> BqemResult<ProcessSupervisor> {
        for offset in 0..self.max_attempts {
            let Some(ports) = self.base.offset(offset) else {
                warn!(base = %self.base, offset, "port scan reached the end of the port range");
                break;
            };

            let mut supervisor = ProcessSupervisor::new(self.config.clone(), ports);
            match supervisor.start().await {
                Ok(()) => {
                    info!(%ports, offset, "emulator ports acquired");
                    return Ok(supervisor);
                }
                Err(err) if err.kind() == ErrorKind::PortOccupied => {
                    warn!(%ports, port = err.detail(), "port pair occupied, trying next offset");
                }
                Err(err) => return Err(err),
            }
        }

        bail!(
            ErrorKind::NoAvailablePort,
            "No free emulator port pair found",
            self.scanned_range()
        )
    }

    fn scanned_range(&self) -> String {
        if self.max_attempts == 0 {
            return format!(
                "no port pairs scanned from {}: max attempts is 0",
                self.base
            );
        }

        let last = self.max_attempts - 1;
        format!(
            "data ports {}..={}, control ports {}..={}",
            self.base.data_port,
            self.base.data_port.saturating_add(last),
            self.base.control_port,
            self.base.control_port.saturating_add(last)
        )
    }
}
