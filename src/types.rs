use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Draft,
    Posted,
    Cancelled,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Draft => "draft",
            DocumentStatus::Posted => "posted",
            DocumentStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(DocumentStatus::Draft),
            "posted" => Some(DocumentStatus::Posted),
            "cancelled" => Some(DocumentStatus::Cancelled),
            _ => None,
        }
    }

    /// Posted and cancelled documents accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DocumentStatus::Draft)
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Receipt,
    Invoice,
    Other,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Receipt => "receipt",
            DocumentType::Invoice => "invoice",
            DocumentType::Other => "other",
        }
    }

    /// Unknown classifications fall back to Other.
    pub fn parse(s: &str) -> Self {
        match s {
            "receipt" => DocumentType::Receipt,
            "invoice" => DocumentType::Invoice,
            _ => DocumentType::Other,
        }
    }
}

impl Default for DocumentType {
    fn default() -> Self {
        DocumentType::Receipt
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryDirection {
    Income,
    Expense,
}

impl EntryDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryDirection::Income => "income",
            EntryDirection::Expense => "expense",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "income" => Some(EntryDirection::Income),
            "expense" => Some(EntryDirection::Expense),
            _ => None,
        }
    }
}

impl Default for EntryDirection {
    fn default() -> Self {
        EntryDirection::Expense
    }
}

/// One uploaded source artifact and its extracted interpretation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: i64,
    pub status: DocumentStatus,
    pub doc_type: DocumentType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_no: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_gross: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tax: Option<Decimal>,
    /// Derived as gross - tax when both are present, never read from OCR.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_net: Option<Decimal>,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_ocr_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction_json: Option<serde_json::Value>,
    /// 0-100, None while extraction is still pending.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A resolved counterparty. Vendors are only ever created or referenced by
/// the pipeline, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vendor {
    pub id: i64,
    pub display_name: String,
    pub normalized_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tax_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub created_at: String,
}

/// An immutable financial fact, created exactly once per confirmed document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub id: i64,
    pub document_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_id: Option<i64>,
    pub direction: EntryDirection,
    pub amount: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tax_amount: Option<Decimal>,
    pub currency: String,
    pub entry_date: NaiveDate,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub created_at: String,
}

/// Raw recognizer output: full text plus the recognizer-reported quality
/// signal in [0,100] when it provides one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrOutput {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<f64>,
}

/// Per-field extraction confidences in [0,1]. Zero means no extractable
/// signal for that field.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldConfidence {
    pub vendor_name: f64,
    pub tax_id: f64,
    pub doc_date: f64,
    pub doc_no: f64,
    pub total_gross: f64,
    pub total_tax: f64,
    pub currency: f64,
}

impl FieldConfidence {
    pub fn mean(&self) -> f64 {
        (self.vendor_name
            + self.tax_id
            + self.doc_date
            + self.doc_no
            + self.total_gross
            + self.total_tax
            + self.currency)
            / 7.0
    }
}

/// Structured result of parsing raw OCR text. Unresolved fields stay None;
/// an empty input produces an all-None result with zero confidences.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Extraction {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tax_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_no: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_gross: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tax: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_net: Option<Decimal>,
    pub currency: String,
    pub field_confidence: FieldConfidence,
}

/// Outcome of vendor resolution for one extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum VendorResolution {
    /// An existing vendor scored at or above the acceptance threshold.
    Matched { vendor_id: i64 },
    /// No close match existed; a new vendor row was created.
    Created { vendor_id: i64 },
    /// Empty candidate; vendor assignment is left to the reviewer.
    Unresolved,
}

impl VendorResolution {
    pub fn vendor_id(&self) -> Option<i64> {
        match self {
            VendorResolution::Matched { vendor_id } | VendorResolution::Created { vendor_id } => {
                Some(*vendor_id)
            }
            VendorResolution::Unresolved => None,
        }
    }
}

/// Final field values supplied by the caller when confirming a draft.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Confirmation {
    pub vendor_id: Option<i64>,
    pub doc_date: Option<NaiveDate>,
    pub total_gross: Option<Decimal>,
    #[serde(default)]
    pub total_tax: Option<Decimal>,
    #[serde(default)]
    pub direction: EntryDirection,
    #[serde(default)]
    pub category_id: Option<i64>,
}

/// Partial update applied to a draft. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftPatch {
    #[serde(default)]
    pub doc_type: Option<DocumentType>,
    #[serde(default)]
    pub doc_date: Option<NaiveDate>,
    #[serde(default)]
    pub doc_no: Option<String>,
    #[serde(default)]
    pub vendor_id: Option<i64>,
    #[serde(default)]
    pub total_gross: Option<Decimal>,
    #[serde(default)]
    pub total_tax: Option<Decimal>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}
