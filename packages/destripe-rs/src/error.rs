use thiserror::Error;

#[derive(Error, Debug)]
pub enum DestripeError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("recording not found: {0}")]
    FileNotFound(String),

    #[error("recording metadata error: {0}")]
    Metadata(String),

    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("append mode cannot resume: {0}")]
    ResumeState(String),

    #[error("worker {worker_id} failed at byte offset {byte_offset}: {source}")]
    WorkerFailed {
        worker_id: usize,
        byte_offset: u64,
        #[source]
        source: Box<DestripeError>,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DestripeError>;
