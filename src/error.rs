use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Unknown dataset: {0}")]
    UnknownDataset(String),

    #[error("Invalid dataset spec '{dataset}': {reason}")]
    InvalidDatasetSpec { dataset: String, reason: String },

    #[error("Missing column '{column}' in dataset '{dataset}'")]
    MissingColumn { dataset: String, column: String },

    #[error("Malformed row key '{key}': {reason}")]
    MalformedRowKey { key: String, reason: String },

    #[error("Invalid chunk count {count} for dataset '{dataset}' (must be >= 1)")]
    InvalidChunkCount { dataset: String, count: usize },

    #[error("Invalid chunk plan for dataset '{dataset}': {reason}")]
    InvalidChunkPlan { dataset: String, reason: String },

    #[error("Invalid state change for chunk {index} of dataset '{dataset}': {reason}")]
    InvalidTransition {
        dataset: String,
        index: usize,
        reason: String,
    },

    #[error("Chunk {index} of dataset '{dataset}' contains no rows")]
    EmptyChunk { dataset: String, index: usize },

    #[error("Chunk {index} of dataset '{dataset}' skipped {skipped} of {read} rows (limit {max_ratio})")]
    SkipThresholdExceeded {
        dataset: String,
        index: usize,
        skipped: u64,
        read: u64,
        max_ratio: f64,
    },

    #[error("Sink write error: {0}")]
    SinkWrite(String),

    #[error("Import cancelled")]
    Cancelled,

    #[error("Background task failed: {0}")]
    Task(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ImportError {
    /// Row-level errors are counted as skipped rows instead of failing the chunk.
    pub fn is_row_level(&self) -> bool {
        match self {
            ImportError::MissingColumn { .. } => true,
            ImportError::Csv(e) => !matches!(e.kind(), csv::ErrorKind::Io(_)),
            _ => false,
        }
    }
}

impl From<tokio::task::JoinError> for ImportError {
    fn from(e: tokio::task::JoinError) -> Self {
        ImportError::Task(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ImportError>;
