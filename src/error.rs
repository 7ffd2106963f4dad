use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbedixError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Index artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("Corrupt index artifact: {0}")]
    CorruptData(String),

    #[error("Unsupported artifact version: expected {expected}, got {actual}")]
    UnsupportedVersion { expected: u32, actual: u32 },

    #[error("Service not ready: initialize() has not completed")]
    NotReady,

    #[error("Search cancelled by caller")]
    Cancelled,

    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, EmbedixError>;

impl From<bincode::Error> for EmbedixError {
    fn from(err: bincode::Error) -> Self {
        EmbedixError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for EmbedixError {
    fn from(err: serde_json::Error) -> Self {
        EmbedixError::Serialization(err.to_string())
    }
}
