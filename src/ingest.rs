//! Upload validation and draft creation. The caller gets a document id back
//! immediately; OCR and extraction happen on the worker thread.

use crate::config::Settings;
use crate::db::Db;
use crate::error::{PipelineError, Result};
use crate::services::extraction_worker::ExtractionQueue;
use crate::types::DocumentType;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

pub const ALLOWED_MEDIA_TYPES: &[&str] =
    &["image/jpeg", "image/png", "image/webp", "application/pdf"];

pub struct IngestionGateway {
    db: Arc<Db>,
    queue: ExtractionQueue,
    upload_dir: PathBuf,
    max_upload_size: u64,
    default_currency: String,
}

impl IngestionGateway {
    pub fn new(db: Arc<Db>, queue: ExtractionQueue, settings: &Settings) -> Self {
        IngestionGateway {
            db,
            queue,
            upload_dir: settings.upload_dir.clone(),
            max_upload_size: settings.max_upload_size,
            default_currency: settings.default_currency.clone(),
        }
    }

    /// Validate and persist an uploaded artifact, create the draft document
    /// and enqueue its extraction. Rejected uploads leave no trace; accepted
    /// ones always leave a reviewable draft, even if extraction later fails.
    pub fn upload(&self, bytes: &[u8], media_type: &str) -> Result<i64> {
        let essence = media_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        let extension = match essence.as_str() {
            "image/jpeg" => ".jpg",
            "image/png" => ".png",
            "image/webp" => ".webp",
            "application/pdf" => ".pdf",
            _ => return Err(PipelineError::UnsupportedMediaType(media_type.to_string())),
        };
        if bytes.len() as u64 > self.max_upload_size {
            return Err(PipelineError::PayloadTooLarge {
                size: bytes.len() as u64,
                limit: self.max_upload_size,
            });
        }

        let digest = Sha256::digest(bytes);
        let mut hash = String::with_capacity(64);
        for byte in digest {
            hash.push_str(&format!("{byte:02x}"));
        }

        std::fs::create_dir_all(&self.upload_dir)?;
        let artifact_path = self.upload_dir.join(format!("{hash}{extension}"));
        std::fs::write(&artifact_path, bytes)?;

        let doc_type = if essence == "application/pdf" {
            DocumentType::Invoice
        } else {
            DocumentType::Receipt
        };
        let id = self.db.insert_draft(
            doc_type,
            &self.default_currency,
            &artifact_path.to_string_lossy(),
            &hash,
        )?;
        info!(document_id = id, media_type = %essence, size = bytes.len(), "artifact ingested");

        if !self.queue.submit(id) {
            // The draft still exists and can be filled in manually.
            warn!(document_id = id, "extraction could not be enqueued");
        }
        Ok(id)
    }
}
