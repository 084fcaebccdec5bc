use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("sink already holds a schema (pass recreate_schema to replace it)")]
    SchemaExists,

    #[error("sink rejected a write: {0}")]
    SinkWrite(String),

    #[error(transparent)]
    Core(#[from] graflo_core::GrafloError),

    #[error("writer task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl StorageError {
    pub fn write<E: std::fmt::Display>(e: E) -> Self {
        Self::SinkWrite(e.to_string())
    }
}
