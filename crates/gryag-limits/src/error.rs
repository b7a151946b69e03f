use thiserror::Error;

#[derive(Debug, Error)]
pub enum LimitError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("storage error: {0}")]
    Storage(#[from] gryag_memory::MemoryError),
}

pub type Result<T> = std::result::Result<T, LimitError>;
