use thiserror::Error;

pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Core(#[from] thoughtspace_core::Error),
    #[error("malformed client request: {0}")]
    Protocol(String),
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}
