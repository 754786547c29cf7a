//! Receipt and invoice ingestion pipeline: OCR text recognition, heuristic
//! field extraction, fuzzy vendor resolution, confidence scoring and a
//! confirm-or-discard lifecycle ending in an immutable ledger.

pub mod confidence;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod lifecycle;
pub mod ocr;
pub mod pipeline;
pub mod services;
pub mod types;
pub mod vendor;

pub use confidence::ConfidenceBand;
pub use config::Settings;
pub use error::{PipelineError, Result};
pub use ocr::{HttpOcrEngine, OcrEngine};
pub use pipeline::Pipeline;
pub use types::{
    Category, Confirmation, Document, DocumentStatus, DocumentType, DraftPatch, EntryDirection,
    Extraction, LedgerEntry, OcrOutput, Vendor, VendorResolution,
};
