//! Field extraction from raw OCR text. Tuned for Turkish receipts and
//! invoices, with English keyword fallbacks.

use crate::config::Settings;
use crate::types::{Extraction, FieldConfidence};
use chrono::NaiveDate;
use regex::Regex;
use rust_decimal::Decimal;

/// Strong anchors: the line almost certainly carries the grand total.
const TOTAL_KEYWORDS_STRONG: &[&str] = &["toplam", "genel toplam", "total", "grand total", "yekun"];

/// Weak anchors: lines that often repeat the payable amount.
const TOTAL_KEYWORDS_WEAK: &[&str] = &[
    "odenecek tutar",
    "tutar",
    "odenen",
    "nakit",
    "kredi karti",
];

const TAX_KEYWORDS: &[&str] = &["kdv", "k.d.v", "vergi", "tax"];

/// Lines that look like street addresses, not merchant names.
const ADDRESS_KEYWORDS: &[&str] = &["sok", "cad", "mah", "no:", "apt", "bulvar", "street"];

/// Legal-form tokens raise confidence that a line is a company name.
const LEGAL_FORM_TOKENS: &[&str] = &["ltd", "sti", "a.s", "as", "tic", "san", "market"];

const TURKISH_MONTHS: &[(&str, u32)] = &[
    ("ocak", 1),
    ("subat", 2),
    ("mart", 3),
    ("nisan", 4),
    ("mayis", 5),
    ("haziran", 6),
    ("temmuz", 7),
    ("agustos", 8),
    ("eylul", 9),
    ("ekim", 10),
    ("kasim", 11),
    ("aralik", 12),
];

pub struct FieldExtractor {
    tr_amount_re: Regex,
    dot_amount_re: Regex,
    rate_re: Regex,
    date_dmy_re: Regex,
    date_dmy_dash_re: Regex,
    date_ymd_re: Regex,
    date_month_name_re: Regex,
    vkn_re: Regex,
    standalone_id_re: Regex,
    doc_no_res: Vec<Regex>,
    numeric_line_re: Regex,
    currency_try_re: Regex,
    currency_usd_re: Regex,
    currency_eur_re: Regex,
    default_currency: String,
    date_epoch: NaiveDate,
}

impl FieldExtractor {
    pub fn new(settings: &Settings) -> Self {
        FieldExtractor {
            // Turkish decimal format: 1.234,56 with optional * receipt prefix
            tr_amount_re: Regex::new(r"(\d{1,3}(?:\.\d{3})*,\d{2})").unwrap(),
            // Plain dot-decimal amounts: 123.45
            dot_amount_re: Regex::new(r"\b(\d+\.\d{2})\b").unwrap(),
            rate_re: Regex::new(r"%\s*\d+").unwrap(),
            date_dmy_re: Regex::new(r"\b(\d{1,2})[./](\d{1,2})[./](20\d{2})\b").unwrap(),
            date_dmy_dash_re: Regex::new(r"\b(\d{1,2})-(\d{1,2})-(20\d{2})\b").unwrap(),
            date_ymd_re: Regex::new(r"\b(20\d{2})[./](\d{1,2})[./](\d{1,2})\b").unwrap(),
            date_month_name_re: Regex::new(
                r"\b(\d{1,2})\s+(ocak|subat|mart|nisan|mayis|haziran|temmuz|agustos|eylul|ekim|kasim|aralik)\s+(20\d{2})\b",
            )
            .unwrap(),
            vkn_re: Regex::new(r"(?:vkn|v\.k\.n|vergi\s*(?:kimlik)?\s*(?:no|numarasi)?)[:.\s]*(\d{10,11})\b")
                .unwrap(),
            standalone_id_re: Regex::new(r"\b(\d{10,11})\b").unwrap(),
            doc_no_res: vec![
                Regex::new(r"(?:fis|belge|fatura)\s*(?:no|numarasi?)[:.\s]*([a-z0-9\-]+)").unwrap(),
                Regex::new(r"(?:no|numara)[:.\s]*([a-z0-9\-]+)").unwrap(),
            ],
            numeric_line_re: Regex::new(r"^[\d\s\-./:*,]+$").unwrap(),
            currency_try_re: Regex::new(r"₺|\btl\b|\btry\b").unwrap(),
            currency_usd_re: Regex::new(r"\$|\busd\b").unwrap(),
            currency_eur_re: Regex::new(r"€|\beur\b").unwrap(),
            default_currency: settings.default_currency.clone(),
            date_epoch: settings.date_epoch,
        }
    }

    /// Parse raw OCR text into candidate fields. Empty or unparsable input
    /// is a valid result: every field unresolved with confidence 0.
    pub fn extract(&self, text: &str) -> Extraction {
        let mut result = Extraction {
            currency: self.default_currency.clone(),
            ..Extraction::default()
        };
        if text.trim().is_empty() {
            return result;
        }

        let lines: Vec<&str> = text.lines().collect();
        let folded: Vec<String> = lines.iter().map(|l| fold(l)).collect();
        let folded_text = folded.join("\n");
        let mut conf = FieldConfidence::default();

        if let Some((name, c)) = self.extract_vendor_name(&lines, &folded) {
            result.vendor_name = Some(name);
            conf.vendor_name = c;
        }
        if let Some((vkn, c)) = self.extract_tax_id(&folded_text) {
            result.tax_id = Some(vkn);
            conf.tax_id = c;
        }
        if let Some((date, c)) = self.extract_date(&folded_text) {
            result.doc_date = Some(date);
            conf.doc_date = c;
        }
        if let Some((no, c)) = self.extract_doc_no(&folded_text) {
            result.doc_no = Some(no);
            conf.doc_no = c;
        }
        if let Some((gross, c)) = self.extract_gross(&lines, &folded) {
            result.total_gross = Some(gross);
            conf.total_gross = c;
        }
        if let Some((tax, c)) = self.extract_tax(&lines, &folded) {
            // A tax larger than the gross total is a contradiction; the
            // field stays unresolved.
            match result.total_gross {
                Some(gross) if tax > gross => {}
                _ => {
                    result.total_tax = Some(tax);
                    conf.total_tax = c;
                }
            }
        }
        if let Some((currency, c)) = self.detect_currency(&folded_text) {
            result.currency = currency;
            conf.currency = c;
        }

        if let (Some(gross), Some(tax)) = (result.total_gross, result.total_tax) {
            result.total_net = Some(gross - tax);
        }

        result.field_confidence = conf;
        result
    }

    /// The merchant name is conventionally the first printed line. Skip
    /// empties, number runs and address lines among the top five.
    fn extract_vendor_name(&self, lines: &[&str], folded: &[String]) -> Option<(String, f64)> {
        for (line, folded_line) in lines.iter().zip(folded).take(5) {
            let trimmed = line.trim();
            if trimmed.len() < 3 {
                continue;
            }
            if self.numeric_line_re.is_match(trimmed) {
                continue;
            }
            if ADDRESS_KEYWORDS.iter().any(|k| folded_line.contains(k)) {
                continue;
            }
            let mut confidence = 0.6;
            if folded_line
                .split_whitespace()
                .any(|w| LEGAL_FORM_TOKENS.contains(&w.trim_end_matches('.')))
            {
                confidence += 0.15;
            }
            return Some((trimmed.to_string(), confidence));
        }
        None
    }

    fn extract_tax_id(&self, folded_text: &str) -> Option<(String, f64)> {
        if let Some(caps) = self.vkn_re.captures(folded_text) {
            let vkn = caps[1].to_string();
            if vkn.len() == 10 || vkn.len() == 11 {
                return Some((vkn, 0.9));
            }
        }
        // Standalone 10-11 digit number shortly after a tax-office word.
        for word in ["vergi", "vkn", "dairesi"] {
            if let Some(idx) = folded_text.find(word) {
                let window_end = (idx + 50).min(folded_text.len());
                let window = slice_at_char_boundaries(folded_text, idx, window_end);
                if let Some(caps) = self.standalone_id_re.captures(window) {
                    return Some((caps[1].to_string(), 0.6));
                }
            }
        }
        None
    }

    /// First well-formed date within [epoch, today].
    fn extract_date(&self, folded_text: &str) -> Option<(NaiveDate, f64)> {
        let today = chrono::Utc::now().date_naive();
        let in_range = |d: NaiveDate| d >= self.date_epoch && d <= today;

        for caps in self
            .date_dmy_re
            .captures_iter(folded_text)
            .chain(self.date_dmy_dash_re.captures_iter(folded_text))
        {
            if let Some(date) = build_date(&caps[3], &caps[2], &caps[1]) {
                if in_range(date) {
                    return Some((date, 0.85));
                }
            }
        }
        for caps in self.date_ymd_re.captures_iter(folded_text) {
            if let Some(date) = build_date(&caps[1], &caps[2], &caps[3]) {
                if in_range(date) {
                    return Some((date, 0.85));
                }
            }
        }
        for caps in self.date_month_name_re.captures_iter(folded_text) {
            let month = TURKISH_MONTHS
                .iter()
                .find(|(name, _)| *name == &caps[2])
                .map(|(_, n)| *n)?;
            let day: u32 = caps[1].parse().ok()?;
            let year: i32 = caps[3].parse().ok()?;
            if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
                if in_range(date) {
                    return Some((date, 0.85));
                }
            }
        }
        None
    }

    fn extract_doc_no(&self, folded_text: &str) -> Option<(String, f64)> {
        for (i, re) in self.doc_no_res.iter().enumerate() {
            for caps in re.captures_iter(folded_text) {
                let token = &caps[1];
                // Pure-letter tokens after a bare "no" anchor are usually
                // words, not document numbers.
                if !token.chars().any(|c| c.is_ascii_digit()) {
                    continue;
                }
                let confidence = if i == 0 { 0.7 } else { 0.5 };
                return Some((token.to_uppercase(), confidence));
            }
        }
        None
    }

    /// Gross total: the numerically largest amount on a total-anchored line,
    /// falling back to the largest amount anywhere with reduced confidence.
    fn extract_gross(&self, lines: &[&str], folded: &[String]) -> Option<(Decimal, f64)> {
        let mut anchored: Vec<(Decimal, f64)> = Vec::new();
        for (line, folded_line) in lines.iter().zip(folded) {
            let strength = if TOTAL_KEYWORDS_STRONG.iter().any(|k| folded_line.contains(k)) {
                1.0
            } else if TOTAL_KEYWORDS_WEAK.iter().any(|k| folded_line.contains(k)) {
                0.6
            } else {
                continue;
            };
            for (amount, clean) in self.amounts_in(line) {
                let mut confidence: f64 = 0.55 + 0.3 * strength;
                if clean {
                    confidence += 0.1;
                }
                anchored.push((amount, confidence.min(0.95)));
            }
        }
        if let Some(best) = anchored
            .into_iter()
            .max_by(|a, b| a.0.cmp(&b.0))
        {
            return Some(best);
        }

        // No anchor found: the largest amount on the page is often the total.
        lines
            .iter()
            .flat_map(|line| self.amounts_in(line))
            .map(|(amount, _)| amount)
            .max()
            .map(|amount| (amount, 0.4))
    }

    /// Tax (KDV) amount from a tax-anchored line. Rate lines like
    /// "KDV %18 *12,34" yield the amount following the rate.
    fn extract_tax(&self, lines: &[&str], folded: &[String]) -> Option<(Decimal, f64)> {
        for (line, folded_line) in lines.iter().zip(folded) {
            if !TAX_KEYWORDS.iter().any(|k| folded_line.contains(k)) {
                continue;
            }
            let search_from = match self.rate_re.find(line) {
                Some(m) => m.end(),
                None => 0,
            };
            let tail = slice_at_char_boundaries(line, search_from, line.len());
            if let Some((amount, clean)) = self.amounts_in(tail).into_iter().next() {
                let mut confidence: f64 = 0.7;
                if folded_line.contains("kdv") {
                    confidence += 0.1;
                }
                if clean {
                    confidence += 0.05;
                }
                return Some((amount, confidence.min(0.95)));
            }
        }
        None
    }

    /// All parseable amounts in a line, each flagged as cleanly formatted
    /// (proper thousands grouping) or not.
    fn amounts_in(&self, line: &str) -> Vec<(Decimal, bool)> {
        let mut out = Vec::new();
        for caps in self.tr_amount_re.captures_iter(line) {
            if let Some(amount) = parse_turkish_amount(&caps[1]) {
                if amount > Decimal::ZERO {
                    out.push((amount, true));
                }
            }
        }
        if out.is_empty() {
            for caps in self.dot_amount_re.captures_iter(line) {
                let group = match caps.get(1) {
                    Some(g) => g,
                    None => continue,
                };
                // Skip date fragments: 15.03 inside 15.03.2024, 03.15 inside
                // 2024.03.15.
                if followed_by_date_part(line, group.end())
                    || preceded_by_date_part(line, group.start())
                {
                    continue;
                }
                if let Ok(amount) = group.as_str().parse::<Decimal>() {
                    if amount > Decimal::ZERO {
                        out.push((amount, false));
                    }
                }
            }
        }
        out
    }

    fn detect_currency(&self, folded_text: &str) -> Option<(String, f64)> {
        if self.currency_try_re.is_match(folded_text) {
            return Some(("TRY".to_string(), 0.9));
        }
        if self.currency_usd_re.is_match(folded_text) {
            return Some(("USD".to_string(), 0.9));
        }
        if self.currency_eur_re.is_match(folded_text) {
            return Some(("EUR".to_string(), 0.9));
        }
        None
    }
}

/// Lowercase and strip Turkish diacritics so keyword anchors match the
/// uppercase, accent-heavy text receipts actually carry.
fn fold(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.to_lowercase().chars() {
        match c {
            'ç' => out.push('c'),
            'ğ' => out.push('g'),
            'ı' => out.push('i'),
            'ö' => out.push('o'),
            'ş' => out.push('s'),
            'ü' => out.push('u'),
            // Combining dot left over from lowercasing 'İ'
            '\u{307}' => {}
            _ => out.push(c),
        }
    }
    out
}

fn followed_by_date_part(line: &str, end: usize) -> bool {
    let bytes = line.as_bytes();
    end + 1 < bytes.len()
        && (bytes[end] == b'.' || bytes[end] == b'/')
        && bytes[end + 1].is_ascii_digit()
}

fn preceded_by_date_part(line: &str, start: usize) -> bool {
    let bytes = line.as_bytes();
    start >= 2
        && (bytes[start - 1] == b'.' || bytes[start - 1] == b'/')
        && bytes[start - 2].is_ascii_digit()
}

/// Parse Turkish-formatted 1.234,56 into a Decimal.
fn parse_turkish_amount(token: &str) -> Option<Decimal> {
    let cleaned = token.replace('.', "").replace(',', ".");
    cleaned.parse().ok()
}

fn build_date(year: &str, month: &str, day: &str) -> Option<NaiveDate> {
    let year: i32 = year.parse().ok()?;
    let month: u32 = month.parse().ok()?;
    let day: u32 = day.parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Slice by byte offsets, widening to the nearest char boundaries.
fn slice_at_char_boundaries(s: &str, start: usize, end: usize) -> &str {
    let mut start = start.min(s.len());
    while !s.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = end.min(s.len());
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[start..end]
}
