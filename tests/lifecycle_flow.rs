mod common;

use common::{test_pipeline, wait_for_extraction, StubOcr};
use receipt_ledger::{Confirmation, DocumentStatus, DraftPatch, EntryDirection, PipelineError};
use rust_decimal::Decimal;

const RECEIPT_TEXT: &str = "KARDESLER BAKKAL\n02.05.2024\nTOPLAM *118,00\nKDV %18 *18,00";

fn gross() -> Decimal {
    "118.00".parse().unwrap()
}

fn tax() -> Decimal {
    "18.00".parse().unwrap()
}

#[test]
fn confirm_posts_document_and_creates_exactly_one_entry() {
    let dir = tempfile::tempdir().unwrap();
    let (pipeline, _db) = test_pipeline(StubOcr::new(RECEIPT_TEXT, Some(88.0)), &dir);

    let id = pipeline.upload(b"receipt", "image/jpeg").unwrap();
    let draft = wait_for_extraction(&pipeline, id);
    let vendor_id = draft.vendor_id.expect("vendor resolved from extraction");
    let doc_date = draft.doc_date.expect("date extracted");

    let confirmation = Confirmation {
        vendor_id: Some(vendor_id),
        doc_date: Some(doc_date),
        total_gross: Some(gross()),
        total_tax: Some(tax()),
        ..Confirmation::default()
    };
    let posted = pipeline.confirm(id, &confirmation).unwrap();

    assert_eq!(posted.status, DocumentStatus::Posted);
    assert_eq!(posted.total_gross, Some(gross()));
    assert_eq!(posted.total_tax, Some(tax()));
    assert_eq!(posted.total_net, Some("100.00".parse().unwrap()));

    // Exactly one ledger entry, mirroring the frozen amounts.
    let entries = pipeline.ledger_entries().unwrap();
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.document_id, id);
    assert_eq!(entry.vendor_id, Some(vendor_id));
    assert_eq!(entry.amount, posted.total_gross.unwrap());
    assert_eq!(entry.tax_amount, posted.total_tax);
    assert_eq!(entry.entry_date, doc_date);
    assert_eq!(entry.direction, EntryDirection::Expense);

    // Confirm is not idempotent.
    let err = pipeline.confirm(id, &confirmation).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::InvalidStateTransition {
            from: DocumentStatus::Posted,
            ..
        }
    ));
    assert_eq!(pipeline.ledger_entries().unwrap().len(), 1);

    pipeline.shutdown();
}

#[test]
fn confirm_without_vendor_fails_and_keeps_draft() {
    let dir = tempfile::tempdir().unwrap();
    let (pipeline, _db) = test_pipeline(StubOcr::new("", None), &dir);

    let id = pipeline.upload(b"receipt", "image/jpeg").unwrap();
    wait_for_extraction(&pipeline, id);

    let confirmation = Confirmation {
        vendor_id: None,
        doc_date: chrono::NaiveDate::from_ymd_opt(2024, 5, 2),
        total_gross: Some(gross()),
        ..Confirmation::default()
    };
    let err = pipeline.confirm(id, &confirmation).unwrap_err();
    assert!(matches!(err, PipelineError::IncompleteDocument("vendor_id")));

    let document = pipeline.document(id).unwrap();
    assert_eq!(document.status, DocumentStatus::Draft);
    assert!(pipeline.ledger_entries().unwrap().is_empty());

    pipeline.shutdown();
}

#[test]
fn confirm_without_date_fails() {
    let dir = tempfile::tempdir().unwrap();
    let (pipeline, db) = test_pipeline(StubOcr::new("", None), &dir);

    let id = pipeline.upload(b"receipt", "image/jpeg").unwrap();
    wait_for_extraction(&pipeline, id);
    let vendor_id = db.insert_vendor("Manual Vendor", "manual vendor", None).unwrap();

    let confirmation = Confirmation {
        vendor_id: Some(vendor_id),
        doc_date: None,
        total_gross: Some(gross()),
        ..Confirmation::default()
    };
    let err = pipeline.confirm(id, &confirmation).unwrap_err();
    assert!(matches!(err, PipelineError::IncompleteDocument("doc_date")));

    pipeline.shutdown();
}

#[test]
fn edits_are_rejected_after_posting() {
    let dir = tempfile::tempdir().unwrap();
    let (pipeline, db) = test_pipeline(StubOcr::new("", None), &dir);

    let id = pipeline.upload(b"receipt", "image/jpeg").unwrap();
    wait_for_extraction(&pipeline, id);
    let vendor_id = db.insert_vendor("Manual Vendor", "manual vendor", None).unwrap();

    let confirmation = Confirmation {
        vendor_id: Some(vendor_id),
        doc_date: chrono::NaiveDate::from_ymd_opt(2024, 5, 2),
        total_gross: Some(gross()),
        ..Confirmation::default()
    };
    pipeline.confirm(id, &confirmation).unwrap();

    let patch = DraftPatch {
        total_gross: Some("999.99".parse().unwrap()),
        ..DraftPatch::default()
    };
    let err = pipeline.update_draft(id, &patch).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::DocumentLocked {
            status: DocumentStatus::Posted
        }
    ));

    // The frozen amounts are untouched.
    let document = pipeline.document(id).unwrap();
    assert_eq!(document.total_gross, Some(gross()));

    pipeline.shutdown();
}

#[test]
fn cancelled_draft_is_terminal_and_creates_no_entry() {
    let dir = tempfile::tempdir().unwrap();
    let (pipeline, db) = test_pipeline(StubOcr::new(RECEIPT_TEXT, Some(80.0)), &dir);

    let id = pipeline.upload(b"receipt", "image/jpeg").unwrap();
    wait_for_extraction(&pipeline, id);

    let cancelled = pipeline.cancel(id).unwrap();
    assert_eq!(cancelled.status, DocumentStatus::Cancelled);
    // Artifact and raw text are retained for audit.
    assert!(cancelled.image_ref.is_some());
    assert!(cancelled.raw_ocr_text.is_some());
    assert!(pipeline.ledger_entries().unwrap().is_empty());

    let vendor_id = db.insert_vendor("Manual Vendor", "manual vendor", None).unwrap();
    let confirmation = Confirmation {
        vendor_id: Some(vendor_id),
        doc_date: chrono::NaiveDate::from_ymd_opt(2024, 5, 2),
        total_gross: Some(gross()),
        ..Confirmation::default()
    };
    let err = pipeline.confirm(id, &confirmation).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::InvalidStateTransition {
            from: DocumentStatus::Cancelled,
            ..
        }
    ));

    let err = pipeline.cancel(id).unwrap_err();
    assert!(matches!(err, PipelineError::InvalidStateTransition { .. }));

    let patch = DraftPatch {
        notes: Some("late note".to_string()),
        ..DraftPatch::default()
    };
    let err = pipeline.update_draft(id, &patch).unwrap_err();
    assert!(matches!(err, PipelineError::DocumentLocked { .. }));

    pipeline.shutdown();
}

#[test]
fn draft_patch_updates_fields_and_derives_net() {
    let dir = tempfile::tempdir().unwrap();
    let (pipeline, db) = test_pipeline(StubOcr::new("", None), &dir);

    let id = pipeline.upload(b"receipt", "image/jpeg").unwrap();
    wait_for_extraction(&pipeline, id);
    let vendor_id = db.insert_vendor("Manual Vendor", "manual vendor", None).unwrap();

    let patch = DraftPatch {
        vendor_id: Some(vendor_id),
        doc_date: chrono::NaiveDate::from_ymd_opt(2024, 5, 2),
        total_gross: Some("100.00".parse().unwrap()),
        total_tax: Some("18.00".parse().unwrap()),
        notes: Some("hand-entered".to_string()),
        ..DraftPatch::default()
    };
    let updated = pipeline.update_draft(id, &patch).unwrap();

    assert_eq!(updated.status, DocumentStatus::Draft);
    assert_eq!(updated.vendor_id, Some(vendor_id));
    assert_eq!(updated.total_net, Some("82.00".parse().unwrap()));
    assert_eq!(updated.notes.as_deref(), Some("hand-entered"));

    pipeline.shutdown();
}

#[test]
fn confirm_with_income_direction_and_category() {
    let dir = tempfile::tempdir().unwrap();
    let (pipeline, db) = test_pipeline(StubOcr::new("", None), &dir);

    let id = pipeline.upload(b"invoice", "application/pdf").unwrap();
    wait_for_extraction(&pipeline, id);
    let vendor_id = db.insert_vendor("Client Co", "client co", None).unwrap();
    let category_id = pipeline.create_category("Sales").unwrap();

    let confirmation = Confirmation {
        vendor_id: Some(vendor_id),
        doc_date: chrono::NaiveDate::from_ymd_opt(2024, 6, 1),
        total_gross: Some("5000.00".parse().unwrap()),
        total_tax: None,
        direction: EntryDirection::Income,
        category_id: Some(category_id),
    };
    pipeline.confirm(id, &confirmation).unwrap();

    let entry = pipeline.entry_for_document(id).unwrap().unwrap();
    assert_eq!(entry.direction, EntryDirection::Income);
    assert_eq!(entry.category_id, Some(category_id));
    assert!(entry.tax_amount.is_none());

    let category = pipeline.category(category_id).unwrap().unwrap();
    assert_eq!(category.name, "Sales");

    pipeline.shutdown();
}
