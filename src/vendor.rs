//! Vendor resolution: map a free-form OCR name candidate onto the vendor
//! registry, creating a row when nothing is close enough.

use crate::db::Db;
use crate::error::{PipelineError, Result};
use crate::types::VendorResolution;
use std::sync::Arc;
use tracing::{debug, info};

/// Trailing legal-form tokens dropped during normalization (folded form).
const SUFFIX_TOKENS: &[&str] = &[
    "ltd", "sti", "as", "tic", "san", "org", "holding", "group", "sirket", "sirketi", "market",
    "marketi", "ticaret", "sanayi",
];

#[derive(Clone)]
pub struct VendorResolver {
    db: Arc<Db>,
    threshold: f64,
}

impl VendorResolver {
    pub fn new(db: Arc<Db>, threshold: f64) -> Self {
        VendorResolver { db, threshold }
    }

    /// Best-effort resolution, never blocking on user input. The result is
    /// always revisable while the document is a draft.
    ///
    /// Match ladder: exact tax id, exact normalized name, fuzzy match at or
    /// above the threshold, then creation from the original candidate.
    pub fn resolve(
        &self,
        candidate: Option<&str>,
        tax_id: Option<&str>,
    ) -> Result<VendorResolution> {
        if let Some(tax_id) = tax_id.map(str::trim).filter(|t| !t.is_empty()) {
            if let Some(vendor) = self.db.vendor_by_tax_id(tax_id)? {
                return Ok(VendorResolution::Matched {
                    vendor_id: vendor.id,
                });
            }
        }

        let candidate = match candidate.map(str::trim).filter(|c| !c.is_empty()) {
            Some(c) => c,
            None => return Ok(VendorResolution::Unresolved),
        };
        let normalized = normalize_name(candidate);
        if normalized.is_empty() {
            return Ok(VendorResolution::Unresolved);
        }

        if let Some(vendor) = self.db.vendor_by_normalized(&normalized)? {
            return Ok(VendorResolution::Matched {
                vendor_id: vendor.id,
            });
        }

        if let Some(vendor_id) = self.best_fuzzy_match(&normalized)? {
            return Ok(VendorResolution::Matched { vendor_id });
        }

        self.create_vendor(candidate, &normalized, tax_id)
    }

    /// Highest-scoring existing vendor at or above the threshold. Equal
    /// scores are broken in favor of the vendor with the most ledger
    /// entries.
    fn best_fuzzy_match(&self, normalized: &str) -> Result<Option<i64>> {
        let mut best: Option<(i64, f64)> = None;
        for vendor in self.db.all_vendors()? {
            let score = similarity(normalized, &vendor.normalized_name);
            if score < self.threshold {
                continue;
            }
            match best {
                None => best = Some((vendor.id, score)),
                Some((best_id, best_score)) => {
                    if score > best_score {
                        best = Some((vendor.id, score));
                    } else if (score - best_score).abs() < f64::EPSILON {
                        let current = self.db.ledger_count_for_vendor(vendor.id)?;
                        let incumbent = self.db.ledger_count_for_vendor(best_id)?;
                        if current > incumbent {
                            best = Some((vendor.id, score));
                        }
                    }
                }
            }
        }
        Ok(best.map(|(id, _)| id))
    }

    /// Creation races on the same normalized name are resolved through the
    /// uniqueness constraint: the loser re-reads the winner's row.
    fn create_vendor(
        &self,
        display_name: &str,
        normalized: &str,
        tax_id: Option<&str>,
    ) -> Result<VendorResolution> {
        match self.db.insert_vendor(display_name, normalized, tax_id) {
            Ok(vendor_id) => {
                info!(vendor_id, display_name, "created new vendor");
                Ok(VendorResolution::Created { vendor_id })
            }
            Err(PipelineError::VendorConflict(_)) => {
                debug!(normalized, "lost vendor creation race, re-reading");
                match self.db.vendor_by_normalized(normalized)? {
                    Some(vendor) => Ok(VendorResolution::Matched {
                        vendor_id: vendor.id,
                    }),
                    None => Err(PipelineError::VendorConflict(normalized.to_string())),
                }
            }
            Err(e) => Err(e),
        }
    }
}

/// Normalize a vendor name for matching: case-fold, strip diacritics and
/// punctuation, drop trailing legal-form tokens, collapse whitespace.
pub fn normalize_name(name: &str) -> String {
    let mut cleaned = String::with_capacity(name.len());
    for c in name.to_lowercase().chars() {
        match c {
            'ç' => cleaned.push('c'),
            'ğ' => cleaned.push('g'),
            'ı' => cleaned.push('i'),
            'ö' => cleaned.push('o'),
            'ş' => cleaned.push('s'),
            'ü' => cleaned.push('u'),
            '\u{307}' => {}
            c if c.is_alphanumeric() => cleaned.push(c),
            c if c.is_whitespace() => cleaned.push(' '),
            _ => {}
        }
    }

    let mut tokens: Vec<&str> = cleaned.split_whitespace().collect();
    while let Some(last) = tokens.last() {
        if tokens.len() > 1 && SUFFIX_TOKENS.contains(last) {
            tokens.pop();
        } else {
            break;
        }
    }
    tokens.join(" ")
}

/// Edit-distance ratio in [0,1]. Empty input never matches anything.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let distance = levenshtein(&a_chars, &b_chars);
    let max_len = a_chars.len().max(b_chars.len());
    1.0 - distance as f64 / max_len as f64
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(prev[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut prev, &mut current);
    }
    prev[b.len()]
}
