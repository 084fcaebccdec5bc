use thiserror::Error;

pub type Result<T> = std::result::Result<T, CasterError>;

#[derive(Error, Debug)]
pub enum CasterError {
    #[error(transparent)]
    Core(#[from] graflo_core::GrafloError),

    #[error(transparent)]
    Storage(#[from] graflo_storage::StorageError),

    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("invalid source pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CasterError {
    pub fn config<E: std::fmt::Display>(e: E) -> Self {
        Self::Config(e.to_string())
    }
}
