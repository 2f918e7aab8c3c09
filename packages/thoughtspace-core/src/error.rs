use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds per the propagation policy: the engine surfaces only store-level failures.
/// Logical conflicts (cycles, duplicates, tombstoning) are resolved internally and never
/// reach this type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("storage error: {0}")]
    Storage(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    #[error("integrity violation: {0}")]
    IntegrityViolation(String),
    #[error("missing dependency: {0}")]
    MissingDependency(String),
}
