#![allow(dead_code)]

use receipt_ledger::db::Db;
use receipt_ledger::ocr::OcrEngine;
use receipt_ledger::{Document, OcrOutput, Pipeline, PipelineError, Settings};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// OCR engine returning canned text, so tests exercise the pipeline without
/// a recognizer.
pub struct StubOcr {
    pub text: String,
    pub quality: Option<f64>,
}

impl StubOcr {
    pub fn new(text: &str, quality: Option<f64>) -> Arc<Self> {
        Arc::new(StubOcr {
            text: text.to_string(),
            quality,
        })
    }
}

impl OcrEngine for StubOcr {
    fn recognize(&self, _bytes: &[u8]) -> receipt_ledger::Result<OcrOutput> {
        Ok(OcrOutput {
            text: self.text.clone(),
            quality: self.quality,
        })
    }
}

/// OCR engine that blocks until the test sends on the returned channel, for
/// observing behavior while an extraction is still in flight. Dropping the
/// sender makes further recognitions fail.
pub struct GatedOcr {
    text: String,
    gate: Mutex<Receiver<()>>,
}

impl GatedOcr {
    pub fn new(text: &str) -> (Arc<Self>, Sender<()>) {
        let (tx, rx) = mpsc::channel();
        let engine = Arc::new(GatedOcr {
            text: text.to_string(),
            gate: Mutex::new(rx),
        });
        (engine, tx)
    }
}

impl OcrEngine for GatedOcr {
    fn recognize(&self, _bytes: &[u8]) -> receipt_ledger::Result<OcrOutput> {
        let gate = self.gate.lock().unwrap_or_else(|e| e.into_inner());
        match gate.recv() {
            Ok(()) => Ok(OcrOutput {
                text: self.text.clone(),
                quality: None,
            }),
            Err(_) => Err(PipelineError::OcrUnavailable(
                "recognizer gone".to_string(),
            )),
        }
    }
}

/// OCR engine that always fails, for exercising the degraded path.
pub struct FailingOcr;

impl OcrEngine for FailingOcr {
    fn recognize(&self, _bytes: &[u8]) -> receipt_ledger::Result<OcrOutput> {
        Err(PipelineError::OcrUnavailable("recognizer down".to_string()))
    }
}

pub fn test_settings(dir: &TempDir) -> Settings {
    let mut settings = Settings::default();
    settings.upload_dir = dir.path().join("uploads");
    settings.db_path = dir.path().join("test.db");
    settings.ocr_retries = 1;
    settings
}

/// Pipeline over an in-memory store. The returned Db handle shares the
/// store, for direct setup and assertions.
pub fn test_pipeline(engine: Arc<dyn OcrEngine>, dir: &TempDir) -> (Pipeline, Arc<Db>) {
    let db = Arc::new(Db::open_in_memory().expect("in-memory db"));
    let pipeline =
        Pipeline::with_parts(db.clone(), engine, &test_settings(dir)).expect("pipeline");
    (pipeline, db)
}

/// Poll until the deferred extraction has finalized the document.
pub fn wait_for_extraction(pipeline: &Pipeline, document_id: i64) -> Document {
    for _ in 0..500 {
        let document = pipeline.document(document_id).expect("document");
        if document.confidence_score.is_some() {
            return document;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("extraction did not complete for document {document_id}");
}
