use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The data port and the gRPC port would collide on every scanned offset.
    #[error("`port` and `grpc_port` must differ, both are {0}")]
    PortsCollide(u16),
    /// A field holds a value outside of its allowed range.
    #[error("Invalid value for `{field}`: {constraint}")]
    InvalidFieldValue { field: String, constraint: String },
}
