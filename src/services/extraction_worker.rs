//! Deferred extraction: a worker thread pulls document ids off a channel,
//! runs OCR plus field extraction, and writes the result back onto the
//! draft. The uploading caller is never blocked on OCR latency.

use crate::confidence;
use crate::db::Db;
use crate::error::Result;
use crate::extract::FieldExtractor;
use crate::ocr::OcrEngine;
use crate::types::{DocumentStatus, VendorResolution};
use crate::vendor::VendorResolver;
use std::collections::HashSet;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

/// Handle for enqueueing extraction work. Cheap to clone; all clones feed
/// the same worker.
#[derive(Clone)]
pub struct ExtractionQueue {
    tx: Sender<i64>,
    in_flight: Arc<Mutex<HashSet<i64>>>,
}

impl ExtractionQueue {
    /// Enqueue a document for extraction. Returns false when an extraction
    /// for this id is already queued or running (a document must never have
    /// two extractions racing on its fields), or when the worker is gone.
    pub fn submit(&self, document_id: i64) -> bool {
        {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            if !in_flight.insert(document_id) {
                debug!(document_id, "extraction already in flight, rejecting");
                return false;
            }
        }
        if self.tx.send(document_id).is_err() {
            self.in_flight
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&document_id);
            return false;
        }
        true
    }
}

pub struct ExtractionWorker {
    handle: JoinHandle<()>,
}

impl ExtractionWorker {
    /// Spawn the worker thread. Dropping every ExtractionQueue clone closes
    /// the channel and lets the thread drain and exit.
    pub fn spawn(
        db: Arc<Db>,
        engine: Arc<dyn OcrEngine>,
        extractor: Arc<FieldExtractor>,
        resolver: VendorResolver,
        ocr_retries: u32,
    ) -> (ExtractionWorker, ExtractionQueue) {
        let (tx, rx) = mpsc::channel();
        let in_flight = Arc::new(Mutex::new(HashSet::new()));
        let queue = ExtractionQueue {
            tx,
            in_flight: in_flight.clone(),
        };
        let handle = std::thread::spawn(move || {
            run_loop(rx, in_flight, db, engine, extractor, resolver, ocr_retries);
        });
        (ExtractionWorker { handle }, queue)
    }

    /// Wait for the worker to finish its queue and exit. Call after all
    /// queue handles are dropped.
    pub fn join(self) {
        let _ = self.handle.join();
    }
}

#[allow(clippy::too_many_arguments)]
fn run_loop(
    rx: Receiver<i64>,
    in_flight: Arc<Mutex<HashSet<i64>>>,
    db: Arc<Db>,
    engine: Arc<dyn OcrEngine>,
    extractor: Arc<FieldExtractor>,
    resolver: VendorResolver,
    ocr_retries: u32,
) {
    while let Ok(document_id) = rx.recv() {
        if let Err(e) = process(&db, engine.as_ref(), &extractor, &resolver, ocr_retries, document_id)
        {
            warn!(document_id, error = %e, "extraction failed");
            if let Err(e) = db.finalize_failed_extraction(document_id) {
                warn!(document_id, error = %e, "could not finalize failed extraction");
            }
        }
        in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&document_id);
    }
    debug!("extraction worker shutting down");
}

fn process(
    db: &Db,
    engine: &dyn OcrEngine,
    extractor: &FieldExtractor,
    resolver: &VendorResolver,
    ocr_retries: u32,
    document_id: i64,
) -> Result<()> {
    let document = db.get_document(document_id)?;
    if document.status != DocumentStatus::Draft {
        debug!(document_id, status = %document.status, "skipping non-draft document");
        return Ok(());
    }
    let image_ref = match document.image_ref {
        Some(ref path) => path.clone(),
        None => {
            warn!(document_id, "document has no stored artifact");
            db.finalize_failed_extraction(document_id)?;
            return Ok(());
        }
    };
    let bytes = std::fs::read(&image_ref)?;

    // Bounded retries; each attempt is itself bounded by the engine's HTTP
    // timeout and poll deadline.
    let mut output = None;
    for attempt in 0..=ocr_retries {
        match engine.recognize(&bytes) {
            Ok(o) => {
                output = Some(o);
                break;
            }
            Err(e) => {
                warn!(document_id, attempt, error = %e, "OCR attempt failed");
            }
        }
    }
    let output = match output {
        Some(o) => o,
        None => {
            // Every attempt failed: finalize at confidence 0 for review.
            db.finalize_failed_extraction(document_id)?;
            info!(document_id, "OCR exhausted retries, draft routed to manual review");
            return Ok(());
        }
    };

    let extraction = extractor.extract(&output.text);
    let resolution = match resolver.resolve(
        extraction.vendor_name.as_deref(),
        extraction.tax_id.as_deref(),
    ) {
        Ok(r) => r,
        Err(e) => {
            warn!(document_id, error = %e, "vendor resolution failed");
            VendorResolution::Unresolved
        }
    };
    let score = confidence::aggregate(
        output.quality,
        extraction.field_confidence.mean(),
        &resolution,
    );

    let applied = db.apply_extraction(
        document_id,
        &output.text,
        &extraction,
        resolution.vendor_id(),
        score,
    )?;
    if applied {
        info!(document_id, score, "extraction complete");
    } else {
        debug!(document_id, "document left draft during extraction, result dropped");
    }
    Ok(())
}
