//! Document state machine: draft -> posted, draft -> cancelled. Posting is
//! the only way a ledger entry comes into existence.

use crate::db::Db;
use crate::error::{PipelineError, Result};
use crate::types::{Confirmation, Document, DraftPatch, LedgerEntry};
use std::sync::Arc;
use tracing::info;

pub struct DocumentLifecycle {
    db: Arc<Db>,
}

impl DocumentLifecycle {
    pub fn new(db: Arc<Db>) -> Self {
        DocumentLifecycle { db }
    }

    /// Confirm a draft with the caller's final field values. Overwrites the
    /// document's fields, freezes them, and creates exactly one ledger entry
    /// in the same transaction. Not idempotent: confirming a posted document
    /// fails with InvalidStateTransition.
    pub fn confirm(&self, id: i64, confirmation: &Confirmation) -> Result<Document> {
        let vendor_id = confirmation
            .vendor_id
            .ok_or(PipelineError::IncompleteDocument("vendor_id"))?;
        let doc_date = confirmation
            .doc_date
            .ok_or(PipelineError::IncompleteDocument("doc_date"))?;
        let total_gross = confirmation
            .total_gross
            .ok_or(PipelineError::IncompleteDocument("total_gross"))?;

        let (document, entry) =
            self.db
                .confirm_and_post(id, confirmation, vendor_id, doc_date, total_gross)?;
        info!(
            document_id = id,
            entry_id = entry.id,
            amount = %entry.amount,
            "document posted"
        );
        Ok(document)
    }

    /// Discard a draft. No ledger entry is created; the artifact and raw OCR
    /// text are kept for audit.
    pub fn cancel(&self, id: i64) -> Result<Document> {
        let document = self.db.cancel_document(id)?;
        info!(document_id = id, "document cancelled");
        Ok(document)
    }

    /// Partial field edit, permitted only while the document is a draft.
    pub fn update_draft(&self, id: i64, patch: &DraftPatch) -> Result<Document> {
        self.db.patch_draft(id, patch)
    }

    /// The ledger entry created when the document was posted, if any.
    pub fn ledger_entry(&self, document_id: i64) -> Result<Option<LedgerEntry>> {
        self.db.entry_for_document(document_id)
    }
}
