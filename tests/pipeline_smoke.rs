mod common;

use common::{test_pipeline, test_settings, wait_for_extraction, FailingOcr, GatedOcr, StubOcr};
use receipt_ledger::db::Db;
use receipt_ledger::{DocumentStatus, Pipeline, PipelineError};
use std::sync::Arc;
use std::time::Duration;

const RECEIPT_TEXT: &str = "MIGROS TICARET A.S.\nFIS NO: 1234\n15.03.2024\nTOPLAM 123.45\nKDV %8 9,14";

#[test]
fn upload_creates_draft_and_extraction_populates_it() {
    let dir = tempfile::tempdir().unwrap();
    let engine = StubOcr::new(RECEIPT_TEXT, Some(90.0));
    let (pipeline, _db) = test_pipeline(engine, &dir);

    // 2 MB JPEG within the 10 MiB ceiling.
    let bytes = vec![0xEAu8; 2 * 1024 * 1024];
    let id = pipeline.upload(&bytes, "image/jpeg").unwrap();

    let document = wait_for_extraction(&pipeline, id);
    assert_eq!(document.status, DocumentStatus::Draft);
    assert_eq!(document.total_gross, Some("123.45".parse().unwrap()));
    assert_eq!(
        document.doc_date,
        chrono::NaiveDate::from_ymd_opt(2024, 3, 15)
    );
    assert_eq!(document.doc_no.as_deref(), Some("1234"));
    assert!(document.confidence_score.unwrap() > 0);
    assert!(document.raw_ocr_text.as_deref().unwrap().contains("TOPLAM"));
    // The extracted vendor line resolved to a newly created vendor.
    assert!(document.vendor_id.is_some());
    assert!(document.image_ref.is_some());
    assert_eq!(document.image_sha256.as_ref().map(String::len), Some(64));

    pipeline.shutdown();
}

#[test]
fn unsupported_media_type_leaves_no_document() {
    let dir = tempfile::tempdir().unwrap();
    let engine = StubOcr::new(RECEIPT_TEXT, None);
    let (pipeline, _db) = test_pipeline(engine, &dir);

    let err = pipeline.upload(b"GIF89a", "image/gif").unwrap_err();
    assert!(matches!(err, PipelineError::UnsupportedMediaType(_)));
    assert!(pipeline.documents(None, 100, 0).unwrap().is_empty());

    pipeline.shutdown();
}

#[test]
fn oversized_payload_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = test_settings(&dir);
    settings.max_upload_size = 1024;
    let db = Arc::new(Db::open_in_memory().unwrap());
    let pipeline =
        Pipeline::with_parts(db, StubOcr::new(RECEIPT_TEXT, None), &settings).unwrap();

    let err = pipeline.upload(&vec![0u8; 2048], "image/png").unwrap_err();
    assert!(matches!(
        err,
        PipelineError::PayloadTooLarge { size: 2048, .. }
    ));
    assert!(pipeline.documents(None, 100, 0).unwrap().is_empty());

    pipeline.shutdown();
}

#[test]
fn empty_ocr_text_finalizes_at_confidence_zero() {
    let dir = tempfile::tempdir().unwrap();
    let engine = StubOcr::new("", None);
    let (pipeline, _db) = test_pipeline(engine, &dir);

    let id = pipeline.upload(b"not really a jpeg", "image/jpeg").unwrap();
    let document = wait_for_extraction(&pipeline, id);

    assert_eq!(document.confidence_score, Some(0));
    assert_eq!(document.status, DocumentStatus::Draft);
    assert!(document.total_gross.is_none());
    assert!(document.vendor_id.is_none());
    assert!(document.doc_date.is_none());

    pipeline.shutdown();
}

#[test]
fn ocr_failure_degrades_to_reviewable_draft() {
    let dir = tempfile::tempdir().unwrap();
    let (pipeline, _db) = test_pipeline(Arc::new(FailingOcr), &dir);

    let id = pipeline.upload(b"bytes", "image/webp").unwrap();
    let document = wait_for_extraction(&pipeline, id);

    // The upload is never discarded: a confidence-0 draft remains for
    // manual entry.
    assert_eq!(document.status, DocumentStatus::Draft);
    assert_eq!(document.confidence_score, Some(0));
    assert!(document.raw_ocr_text.is_none());

    pipeline.shutdown();
}

#[test]
fn repeated_uploads_share_one_vendor_row() {
    let dir = tempfile::tempdir().unwrap();
    let engine = StubOcr::new(RECEIPT_TEXT, Some(85.0));
    let (pipeline, db) = test_pipeline(engine, &dir);

    let first = pipeline.upload(b"receipt one", "image/jpeg").unwrap();
    let second = pipeline.upload(b"receipt two", "image/jpeg").unwrap();

    let first = wait_for_extraction(&pipeline, first);
    let second = wait_for_extraction(&pipeline, second);

    assert!(first.vendor_id.is_some());
    assert_eq!(first.vendor_id, second.vendor_id);
    assert_eq!(db.all_vendors().unwrap().len(), 1);

    pipeline.shutdown();
}

#[test]
fn extraction_in_flight_blocks_resubmission() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, gate) = GatedOcr::new(RECEIPT_TEXT);
    let (pipeline, _db) = test_pipeline(engine, &dir);

    let id = pipeline.upload(b"receipt", "image/jpeg").unwrap();
    // The upload's own extraction is still queued or running; a second
    // writer on the same draft is refused.
    assert!(!pipeline.resubmit_extraction(id));

    gate.send(()).unwrap();
    wait_for_extraction(&pipeline, id);

    // Once the first extraction has finished, re-extraction is accepted.
    let mut accepted = false;
    for _ in 0..500 {
        if pipeline.resubmit_extraction(id) {
            accepted = true;
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(accepted);

    drop(gate);
    pipeline.shutdown();
}

#[test]
fn pdf_upload_is_classified_as_invoice() {
    let dir = tempfile::tempdir().unwrap();
    let engine = StubOcr::new(RECEIPT_TEXT, Some(80.0));
    let (pipeline, _db) = test_pipeline(engine, &dir);

    let id = pipeline.upload(b"%PDF-1.4", "application/pdf").unwrap();
    let document = wait_for_extraction(&pipeline, id);
    assert_eq!(
        document.doc_type,
        receipt_ledger::DocumentType::Invoice
    );

    pipeline.shutdown();
}
