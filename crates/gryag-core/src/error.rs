use thiserror::Error;

#[derive(Debug, Error)]
pub enum GryagError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("schema incompatible: {0}")]
    SchemaIncompatible(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, GryagError>;
