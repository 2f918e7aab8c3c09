use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Core(#[from] thoughtspace_core::Error),
    #[error("transport error: {0}")]
    Transport(String),
}
