use crate::types::DocumentStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("payload too large: {size} bytes (limit {limit})")]
    PayloadTooLarge { size: u64, limit: u64 },

    #[error("OCR unavailable: {0}")]
    OcrUnavailable(String),

    #[error("OCR timed out")]
    OcrTimeout,

    #[error("incomplete document: missing {0}")]
    IncompleteDocument(&'static str),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidStateTransition {
        from: DocumentStatus,
        to: DocumentStatus,
    },

    #[error("document is {status}, fields are frozen")]
    DocumentLocked { status: DocumentStatus },

    #[error("vendor already exists: {0}")]
    VendorConflict(String),

    #[error("document {0} not found")]
    DocumentNotFound(i64),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
