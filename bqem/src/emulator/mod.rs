//! Emulator process and port lifecycle.

mod allocator;
mod probe;
mod supervisor;

pub use allocator::PortAllocator;
pub use probe::{PROBE_TIMEOUT, is_port_bound};
pub use supervisor::{EmulatorState, LogLevel, PortPair, ProcessSupervisor, SupervisorConfig};
