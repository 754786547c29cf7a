use crate::error::{PipelineError, Result};
use crate::types::{
    Category, Confirmation, Document, DocumentStatus, DocumentType, DraftPatch, EntryDirection,
    Extraction, LedgerEntry, Vendor,
};
use chrono::NaiveDate;
use rusqlite::{params, Connection, Row};
use rust_decimal::Decimal;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

pub struct Db {
    conn: Mutex<Connection>,
}

impl Db {
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        init_schema(&conn)?;
        Ok(Db {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Db {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ---- documents ----

    pub fn insert_draft(
        &self,
        doc_type: DocumentType,
        currency: &str,
        image_ref: &str,
        image_sha256: &str,
    ) -> Result<i64> {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO documents (status, doc_type, currency, image_ref, image_sha256, created_at, updated_at)
             VALUES ('draft', ?1, ?2, ?3, ?4, ?5, ?5)",
            params![doc_type.as_str(), currency, image_ref, image_sha256, now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_document(&self, id: i64) -> Result<Document> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("{} WHERE id = ?1", SELECT_DOCUMENT))?;
        let mut rows = stmt.query_map(params![id], row_to_document)?;
        match rows.next() {
            Some(doc) => Ok(doc?),
            None => Err(PipelineError::DocumentNotFound(id)),
        }
    }

    pub fn list_documents(
        &self,
        status: Option<DocumentStatus>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Document>> {
        let conn = self.conn();
        let (sql, params): (String, Vec<Box<dyn rusqlite::ToSql>>) = match status {
            None => (
                format!(
                    "{} ORDER BY created_at DESC LIMIT ?1 OFFSET ?2",
                    SELECT_DOCUMENT
                ),
                vec![Box::new(limit), Box::new(offset)],
            ),
            Some(s) => (
                format!(
                    "{} WHERE status = ?1 ORDER BY created_at DESC LIMIT ?2 OFFSET ?3",
                    SELECT_DOCUMENT
                ),
                vec![Box::new(s.as_str()), Box::new(limit), Box::new(offset)],
            ),
        };
        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let rows = stmt.query_map(rusqlite::params_from_iter(param_refs), row_to_document)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Write an extraction result onto a draft. Fields the user already
    /// filled in are kept (COALESCE), and raw_ocr_text is only ever written
    /// once. Returns false when the document is no longer a draft.
    pub fn apply_extraction(
        &self,
        id: i64,
        raw_text: &str,
        extraction: &Extraction,
        vendor_id: Option<i64>,
        score: u8,
    ) -> Result<bool> {
        let extraction_json = serde_json::to_string(extraction)?;
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.conn();
        let affected = conn.execute(
            "UPDATE documents SET
                raw_ocr_text = COALESCE(raw_ocr_text, ?2),
                extraction_json = ?3,
                doc_date = COALESCE(doc_date, ?4),
                doc_no = COALESCE(doc_no, ?5),
                vendor_id = COALESCE(vendor_id, ?6),
                total_gross = COALESCE(total_gross, ?7),
                total_tax = COALESCE(total_tax, ?8),
                total_net = COALESCE(total_net, ?9),
                currency = ?10,
                confidence_score = ?11,
                updated_at = ?12
             WHERE id = ?1 AND status = 'draft'",
            params![
                id,
                raw_text,
                extraction_json,
                extraction.doc_date.map(date_to_sql),
                extraction.doc_no,
                vendor_id,
                extraction.total_gross.map(|d| d.to_string()),
                extraction.total_tax.map(|d| d.to_string()),
                extraction.total_net.map(|d| d.to_string()),
                extraction.currency,
                score,
                now,
            ],
        )?;
        Ok(affected > 0)
    }

    /// Extraction gave up (OCR failure or timeout): score the draft 0 and
    /// route it to manual review.
    pub fn finalize_failed_extraction(&self, id: i64) -> Result<bool> {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.conn();
        let affected = conn.execute(
            "UPDATE documents SET confidence_score = 0, updated_at = ?2
             WHERE id = ?1 AND status = 'draft' AND confidence_score IS NULL",
            params![id, now],
        )?;
        Ok(affected > 0)
    }

    /// Apply a partial edit to a draft. Fails with DocumentLocked when the
    /// document has left the draft state.
    pub fn patch_draft(&self, id: i64, patch: &DraftPatch) -> Result<Document> {
        {
            let conn = self.conn();
            let current = query_document(&conn, id)?;
            if current.status != DocumentStatus::Draft {
                return Err(PipelineError::DocumentLocked {
                    status: current.status,
                });
            }

            let doc_type = patch.doc_type.unwrap_or(current.doc_type);
            let doc_date = patch.doc_date.or(current.doc_date);
            let doc_no = patch.doc_no.clone().or(current.doc_no);
            let vendor_id = patch.vendor_id.or(current.vendor_id);
            let total_gross = patch.total_gross.or(current.total_gross);
            let total_tax = patch.total_tax.or(current.total_tax);
            let total_net = derive_net(total_gross, total_tax);
            let currency = patch.currency.clone().unwrap_or(current.currency);
            let notes = patch.notes.clone().or(current.notes);
            let now = chrono::Utc::now().to_rfc3339();

            let affected = conn.execute(
                "UPDATE documents SET
                    doc_type = ?2, doc_date = ?3, doc_no = ?4, vendor_id = ?5,
                    total_gross = ?6, total_tax = ?7, total_net = ?8,
                    currency = ?9, notes = ?10, updated_at = ?11
                 WHERE id = ?1 AND status = 'draft'",
                params![
                    id,
                    doc_type.as_str(),
                    doc_date.map(date_to_sql),
                    doc_no,
                    vendor_id,
                    total_gross.map(|d| d.to_string()),
                    total_tax.map(|d| d.to_string()),
                    total_net.map(|d| d.to_string()),
                    currency,
                    notes,
                    now,
                ],
            )?;
            if affected == 0 {
                let current = query_document(&conn, id)?;
                return Err(PipelineError::DocumentLocked {
                    status: current.status,
                });
            }
        }
        self.get_document(id)
    }

    /// Confirm a draft: overwrite its fields with the supplied final values,
    /// freeze them, and insert the matching ledger entry. One transaction;
    /// a posted document without its entry cannot exist.
    pub fn confirm_and_post(
        &self,
        id: i64,
        confirmation: &Confirmation,
        vendor_id: i64,
        doc_date: NaiveDate,
        total_gross: Decimal,
    ) -> Result<(Document, LedgerEntry)> {
        let total_tax = confirmation.total_tax;
        let total_net = derive_net(Some(total_gross), total_tax);
        let now = chrono::Utc::now().to_rfc3339();
        let entry_id;
        {
            let mut conn = self.conn();
            let tx = conn.transaction()?;
            let current = query_document(&tx, id)?;
            if current.status != DocumentStatus::Draft {
                return Err(PipelineError::InvalidStateTransition {
                    from: current.status,
                    to: DocumentStatus::Posted,
                });
            }
            tx.execute(
                "UPDATE documents SET
                    vendor_id = ?2, doc_date = ?3, total_gross = ?4, total_tax = ?5,
                    total_net = ?6, status = 'posted', updated_at = ?7
                 WHERE id = ?1 AND status = 'draft'",
                params![
                    id,
                    vendor_id,
                    date_to_sql(doc_date),
                    total_gross.to_string(),
                    total_tax.map(|d| d.to_string()),
                    total_net.map(|d| d.to_string()),
                    now,
                ],
            )?;
            tx.execute(
                "INSERT INTO ledger_entries
                    (document_id, vendor_id, category_id, direction, amount, tax_amount,
                     currency, entry_date, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    id,
                    vendor_id,
                    confirmation.category_id,
                    confirmation.direction.as_str(),
                    total_gross.to_string(),
                    total_tax.map(|d| d.to_string()),
                    current.currency,
                    date_to_sql(doc_date),
                    now,
                ],
            )?;
            entry_id = tx.last_insert_rowid();
            tx.commit()?;
        }
        let document = self.get_document(id)?;
        let entry = self
            .entry_for_document(id)?
            .ok_or(PipelineError::DocumentNotFound(entry_id))?;
        Ok((document, entry))
    }

    /// Discard a draft. The artifact and raw OCR text are retained for audit.
    pub fn cancel_document(&self, id: i64) -> Result<Document> {
        {
            let conn = self.conn();
            let current = query_document(&conn, id)?;
            if current.status != DocumentStatus::Draft {
                return Err(PipelineError::InvalidStateTransition {
                    from: current.status,
                    to: DocumentStatus::Cancelled,
                });
            }
            let now = chrono::Utc::now().to_rfc3339();
            conn.execute(
                "UPDATE documents SET status = 'cancelled', updated_at = ?2
                 WHERE id = ?1 AND status = 'draft'",
                params![id, now],
            )?;
        }
        self.get_document(id)
    }

    // ---- vendors ----

    /// Insert a new vendor. A concurrent insert of the same normalized name
    /// surfaces as VendorConflict for the caller to retry as a lookup.
    pub fn insert_vendor(
        &self,
        display_name: &str,
        normalized_name: &str,
        tax_id: Option<&str>,
    ) -> Result<i64> {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.conn();
        let result = conn.execute(
            "INSERT INTO vendors (display_name, normalized_name, tax_id, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![display_name, normalized_name, tax_id, now],
        );
        match result {
            Ok(_) => Ok(conn.last_insert_rowid()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(PipelineError::VendorConflict(normalized_name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_vendor(&self, id: i64) -> Result<Option<Vendor>> {
        self.query_vendor("SELECT id, display_name, normalized_name, tax_id, phone, address, created_at FROM vendors WHERE id = ?1", params![id])
    }

    pub fn vendor_by_normalized(&self, normalized_name: &str) -> Result<Option<Vendor>> {
        self.query_vendor("SELECT id, display_name, normalized_name, tax_id, phone, address, created_at FROM vendors WHERE normalized_name = ?1", params![normalized_name])
    }

    pub fn vendor_by_tax_id(&self, tax_id: &str) -> Result<Option<Vendor>> {
        self.query_vendor("SELECT id, display_name, normalized_name, tax_id, phone, address, created_at FROM vendors WHERE tax_id = ?1", params![tax_id])
    }

    fn query_vendor(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Option<Vendor>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query_map(params, row_to_vendor)?;
        match rows.next() {
            Some(v) => Ok(Some(v?)),
            None => Ok(None),
        }
    }

    pub fn all_vendors(&self) -> Result<Vec<Vendor>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, display_name, normalized_name, tax_id, phone, address, created_at
             FROM vendors ORDER BY id",
        )?;
        let rows = stmt.query_map([], row_to_vendor)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// How many ledger entries reference this vendor. Used to break ties
    /// between equally scored fuzzy matches.
    pub fn ledger_count_for_vendor(&self, vendor_id: i64) -> Result<i64> {
        let conn = self.conn();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM ledger_entries WHERE vendor_id = ?1",
            params![vendor_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ---- ledger ----

    pub fn ledger_entries(&self) -> Result<Vec<LedgerEntry>> {
        self.query_entries(
            &format!("{} ORDER BY entry_date DESC, id DESC", SELECT_ENTRY),
            params![],
        )
    }

    pub fn entries_for_vendor(&self, vendor_id: i64) -> Result<Vec<LedgerEntry>> {
        self.query_entries(
            &format!(
                "{} WHERE vendor_id = ?1 ORDER BY entry_date DESC, id DESC",
                SELECT_ENTRY
            ),
            params![vendor_id],
        )
    }

    pub fn entry_for_document(&self, document_id: i64) -> Result<Option<LedgerEntry>> {
        let mut entries = self.query_entries(
            &format!("{} WHERE document_id = ?1", SELECT_ENTRY),
            params![document_id],
        )?;
        Ok(entries.pop())
    }

    fn query_entries(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<LedgerEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, row_to_entry)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // ---- categories ----

    pub fn create_category(&self, name: &str) -> Result<i64> {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO categories (name, created_at) VALUES (?1, ?2)",
            params![name.trim(), now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_category(&self, id: i64) -> Result<Option<Category>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT id, name, created_at FROM categories WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], |row| {
            Ok(Category {
                id: row.get(0)?,
                name: row.get(1)?,
                created_at: row.get(2)?,
            })
        })?;
        match rows.next() {
            Some(c) => Ok(Some(c?)),
            None => Ok(None),
        }
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS vendors (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            display_name TEXT NOT NULL,
            normalized_name TEXT NOT NULL UNIQUE,
            tax_id TEXT,
            phone TEXT,
            address TEXT,
            created_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS categories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS documents (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            status TEXT NOT NULL DEFAULT 'draft',
            doc_type TEXT NOT NULL DEFAULT 'receipt',
            doc_date TEXT,
            doc_no TEXT,
            vendor_id INTEGER REFERENCES vendors(id),
            total_gross TEXT,
            total_tax TEXT,
            total_net TEXT,
            currency TEXT NOT NULL,
            raw_ocr_text TEXT,
            extraction_json TEXT,
            confidence_score INTEGER,
            image_ref TEXT,
            image_sha256 TEXT,
            notes TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS ledger_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            document_id INTEGER NOT NULL UNIQUE REFERENCES documents(id),
            vendor_id INTEGER REFERENCES vendors(id),
            category_id INTEGER REFERENCES categories(id),
            direction TEXT NOT NULL DEFAULT 'expense',
            amount TEXT NOT NULL,
            tax_amount TEXT,
            currency TEXT NOT NULL,
            entry_date TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status);
        CREATE INDEX IF NOT EXISTS idx_documents_vendor ON documents(vendor_id);
        CREATE INDEX IF NOT EXISTS idx_ledger_vendor ON ledger_entries(vendor_id);
        ",
    )?;
    Ok(())
}

const SELECT_DOCUMENT: &str = "SELECT id, status, doc_type, doc_date, doc_no, vendor_id,
    total_gross, total_tax, total_net, currency, raw_ocr_text, extraction_json,
    confidence_score, image_ref, image_sha256, notes, created_at, updated_at
    FROM documents";

const SELECT_ENTRY: &str = "SELECT id, document_id, vendor_id, category_id, direction,
    amount, tax_amount, currency, entry_date, created_at
    FROM ledger_entries";

fn query_document(conn: &Connection, id: i64) -> Result<Document> {
    let mut stmt = conn.prepare(&format!("{} WHERE id = ?1", SELECT_DOCUMENT))?;
    let mut rows = stmt.query_map(params![id], row_to_document)?;
    match rows.next() {
        Some(doc) => Ok(doc?),
        None => Err(PipelineError::DocumentNotFound(id)),
    }
}

fn date_to_sql(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn derive_net(gross: Option<Decimal>, tax: Option<Decimal>) -> Option<Decimal> {
    match (gross, tax) {
        (Some(g), Some(t)) => Some(g - t),
        _ => None,
    }
}

fn conversion_err(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}

fn sql_to_decimal(idx: usize, value: Option<String>) -> rusqlite::Result<Option<Decimal>> {
    match value {
        Some(s) => s.parse().map(Some).map_err(|e| conversion_err(idx, e)),
        None => Ok(None),
    }
}

fn sql_decimal_required(idx: usize, value: String) -> rusqlite::Result<Decimal> {
    value.parse().map_err(|e| conversion_err(idx, e))
}

fn sql_date_required(idx: usize, value: String) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(&value, "%Y-%m-%d").map_err(|e| conversion_err(idx, e))
}

fn sql_to_date(idx: usize, value: Option<String>) -> rusqlite::Result<Option<NaiveDate>> {
    match value {
        Some(s) => NaiveDate::parse_from_str(&s, "%Y-%m-%d")
            .map(Some)
            .map_err(|e| conversion_err(idx, e)),
        None => Ok(None),
    }
}

fn sql_to_status(idx: usize, value: String) -> rusqlite::Result<DocumentStatus> {
    DocumentStatus::parse(&value).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unknown document status '{value}'").into(),
        )
    })
}

fn row_to_document(row: &Row<'_>) -> rusqlite::Result<Document> {
    let extraction_json: Option<String> = row.get(11)?;
    let extraction_json = match extraction_json {
        Some(s) => Some(serde_json::from_str(&s).map_err(|e| conversion_err(11, e))?),
        None => None,
    };
    Ok(Document {
        id: row.get(0)?,
        status: sql_to_status(1, row.get(1)?)?,
        doc_type: DocumentType::parse(&row.get::<_, String>(2)?),
        doc_date: sql_to_date(3, row.get(3)?)?,
        doc_no: row.get(4)?,
        vendor_id: row.get(5)?,
        total_gross: sql_to_decimal(6, row.get(6)?)?,
        total_tax: sql_to_decimal(7, row.get(7)?)?,
        total_net: sql_to_decimal(8, row.get(8)?)?,
        currency: row.get(9)?,
        raw_ocr_text: row.get(10)?,
        extraction_json,
        confidence_score: row.get(12)?,
        image_ref: row.get(13)?,
        image_sha256: row.get(14)?,
        notes: row.get(15)?,
        created_at: row.get(16)?,
        updated_at: row.get(17)?,
    })
}

fn row_to_vendor(row: &Row<'_>) -> rusqlite::Result<Vendor> {
    Ok(Vendor {
        id: row.get(0)?,
        display_name: row.get(1)?,
        normalized_name: row.get(2)?,
        tax_id: row.get(3)?,
        phone: row.get(4)?,
        address: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<LedgerEntry> {
    let direction: String = row.get(4)?;
    let direction = EntryDirection::parse(&direction).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("unknown entry direction '{direction}'").into(),
        )
    })?;
    let amount = sql_decimal_required(5, row.get(5)?)?;
    let entry_date = sql_date_required(8, row.get(8)?)?;
    Ok(LedgerEntry {
        id: row.get(0)?,
        document_id: row.get(1)?,
        vendor_id: row.get(2)?,
        category_id: row.get(3)?,
        direction,
        amount,
        tax_amount: sql_to_decimal(6, row.get(6)?)?,
        currency: row.get(7)?,
        entry_date,
        created_at: row.get(9)?,
    })
}
