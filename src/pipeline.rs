//! Composition root: wires storage, the OCR engine, the extraction worker
//! and the lifecycle manager into one façade.

use crate::config::Settings;
use crate::db::Db;
use crate::error::Result;
use crate::extract::FieldExtractor;
use crate::ingest::IngestionGateway;
use crate::lifecycle::DocumentLifecycle;
use crate::ocr::{HttpOcrEngine, OcrEngine};
use crate::services::extraction_worker::{ExtractionQueue, ExtractionWorker};
use crate::types::{
    Category, Confirmation, Document, DocumentStatus, DraftPatch, LedgerEntry, Vendor,
};
use crate::vendor::VendorResolver;
use std::sync::Arc;

pub struct Pipeline {
    db: Arc<Db>,
    gateway: IngestionGateway,
    lifecycle: DocumentLifecycle,
    queue: ExtractionQueue,
    worker: ExtractionWorker,
}

impl Pipeline {
    /// Build the full pipeline from settings, using the HTTP OCR engine.
    pub fn new(settings: &Settings) -> Result<Self> {
        let engine: Arc<dyn OcrEngine> = Arc::new(HttpOcrEngine::from_settings(settings)?);
        let db = Arc::new(Db::new(&settings.db_path)?);
        Self::with_parts(db, engine, settings)
    }

    /// Build the pipeline around an existing store and engine. Tests inject
    /// an in-memory store and a stub engine here.
    pub fn with_parts(
        db: Arc<Db>,
        engine: Arc<dyn OcrEngine>,
        settings: &Settings,
    ) -> Result<Self> {
        let extractor = Arc::new(FieldExtractor::new(settings));
        let resolver = VendorResolver::new(db.clone(), settings.vendor_match_threshold);
        let (worker, queue) = ExtractionWorker::spawn(
            db.clone(),
            engine,
            extractor,
            resolver,
            settings.ocr_retries,
        );
        let gateway = IngestionGateway::new(db.clone(), queue.clone(), settings);
        let lifecycle = DocumentLifecycle::new(db.clone());
        Ok(Pipeline {
            db,
            gateway,
            lifecycle,
            queue,
            worker,
        })
    }

    /// Accept an uploaded artifact and return the new draft's id. Extraction
    /// runs asynchronously; poll `document` for the populated fields.
    pub fn upload(&self, bytes: &[u8], media_type: &str) -> Result<i64> {
        self.gateway.upload(bytes, media_type)
    }

    /// Re-run extraction for a draft, e.g. after an OCR outage. Returns
    /// false while a prior extraction for the same document is still
    /// running.
    pub fn resubmit_extraction(&self, document_id: i64) -> bool {
        self.queue.submit(document_id)
    }

    pub fn confirm(&self, document_id: i64, confirmation: &Confirmation) -> Result<Document> {
        self.lifecycle.confirm(document_id, confirmation)
    }

    pub fn cancel(&self, document_id: i64) -> Result<Document> {
        self.lifecycle.cancel(document_id)
    }

    pub fn update_draft(&self, document_id: i64, patch: &DraftPatch) -> Result<Document> {
        self.lifecycle.update_draft(document_id, patch)
    }

    pub fn document(&self, document_id: i64) -> Result<Document> {
        self.db.get_document(document_id)
    }

    pub fn documents(
        &self,
        status: Option<DocumentStatus>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Document>> {
        self.db.list_documents(status, limit, offset)
    }

    pub fn drafts(&self) -> Result<Vec<Document>> {
        self.db.list_documents(Some(DocumentStatus::Draft), u32::MAX, 0)
    }

    pub fn vendor(&self, vendor_id: i64) -> Result<Option<Vendor>> {
        self.db.get_vendor(vendor_id)
    }

    pub fn vendors(&self) -> Result<Vec<Vendor>> {
        self.db.all_vendors()
    }

    pub fn ledger_entries(&self) -> Result<Vec<LedgerEntry>> {
        self.db.ledger_entries()
    }

    pub fn entries_for_vendor(&self, vendor_id: i64) -> Result<Vec<LedgerEntry>> {
        self.db.entries_for_vendor(vendor_id)
    }

    pub fn entry_for_document(&self, document_id: i64) -> Result<Option<LedgerEntry>> {
        self.db.entry_for_document(document_id)
    }

    pub fn create_category(&self, name: &str) -> Result<i64> {
        self.db.create_category(name)
    }

    pub fn category(&self, category_id: i64) -> Result<Option<Category>> {
        self.db.get_category(category_id)
    }

    /// Stop accepting work, drain the extraction queue and join the worker.
    pub fn shutdown(self) {
        let Pipeline {
            db: _,
            gateway,
            lifecycle: _,
            queue,
            worker,
        } = self;
        drop(gateway);
        drop(queue);
        worker.join();
    }
}
