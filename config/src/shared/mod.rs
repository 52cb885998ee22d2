//! Shared configuration types for emulator-backed test runs.

mod base;
mod emulator;
mod manager;
mod remote;

pub use base::ValidationError;
pub use emulator::EmulatorConfig;
pub use manager::ManagerConfig;
pub use remote::RemoteSchemaConfig;
