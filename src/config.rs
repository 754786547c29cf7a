use chrono::NaiveDate;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration, resolved once at startup and passed explicitly to
/// the components that need it.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base URL of the OCR service. None means OCR is not configured and
    /// every extraction finalizes as a low-confidence draft.
    pub ocr_endpoint: Option<String>,
    pub ocr_api_key: Option<String>,
    pub db_path: PathBuf,
    pub upload_dir: PathBuf,
    /// Upload ceiling in bytes.
    pub max_upload_size: u64,
    /// Applied when no currency can be recognized in the OCR text.
    pub default_currency: String,
    /// Acceptance threshold for fuzzy vendor matching, in [0,1].
    pub vendor_match_threshold: f64,
    /// Extracted dates before this are treated as OCR noise.
    pub date_epoch: NaiveDate,
    /// Additional OCR attempts after the first failure.
    pub ocr_retries: u32,
    pub ocr_poll_interval: Duration,
    pub ocr_poll_attempts: u32,
    pub ocr_http_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("receipt-ledger");
        Settings {
            ocr_endpoint: None,
            ocr_api_key: None,
            db_path: data_dir.join("receipt_ledger.db"),
            upload_dir: data_dir.join("uploads"),
            max_upload_size: 10 * 1024 * 1024,
            default_currency: "TRY".to_string(),
            vendor_match_threshold: 0.85,
            date_epoch: NaiveDate::from_ymd_opt(2000, 1, 1).unwrap(),
            ocr_retries: 2,
            ocr_poll_interval: Duration::from_secs(2),
            ocr_poll_attempts: 60,
            ocr_http_timeout: Duration::from_secs(120),
        }
    }
}

impl Settings {
    /// Build settings from the environment, reading a `.env` file if one is
    /// present. Unset or malformed variables keep their defaults.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let mut settings = Settings::default();

        if let Ok(v) = std::env::var("OCR_ENDPOINT") {
            if !v.trim().is_empty() {
                settings.ocr_endpoint = Some(v.trim().trim_end_matches('/').to_string());
            }
        }
        if let Ok(v) = std::env::var("OCR_API_KEY") {
            if !v.trim().is_empty() {
                settings.ocr_api_key = Some(v.trim().to_string());
            }
        }
        if let Ok(v) = std::env::var("DB_PATH") {
            if !v.trim().is_empty() {
                settings.db_path = PathBuf::from(v);
            }
        }
        if let Ok(v) = std::env::var("UPLOAD_DIR") {
            if !v.trim().is_empty() {
                settings.upload_dir = PathBuf::from(v);
            }
        }
        if let Some(v) = parse_env::<u64>("MAX_UPLOAD_SIZE") {
            settings.max_upload_size = v;
        }
        if let Ok(v) = std::env::var("DEFAULT_CURRENCY") {
            let v = v.trim().to_uppercase();
            if v.len() == 3 && v.chars().all(|c| c.is_ascii_alphabetic()) {
                settings.default_currency = v;
            }
        }
        if let Some(v) = parse_env::<f64>("VENDOR_MATCH_THRESHOLD") {
            if (0.0..=1.0).contains(&v) {
                settings.vendor_match_threshold = v;
            }
        }
        if let Some(v) = parse_env::<u32>("OCR_RETRIES") {
            settings.ocr_retries = v;
        }
        if let Some(v) = parse_env::<u64>("OCR_POLL_INTERVAL_SECS") {
            settings.ocr_poll_interval = Duration::from_secs(v);
        }
        if let Some(v) = parse_env::<u32>("OCR_POLL_ATTEMPTS") {
            settings.ocr_poll_attempts = v;
        }
        if let Some(v) = parse_env::<u64>("OCR_HTTP_TIMEOUT_SECS") {
            settings.ocr_http_timeout = Duration::from_secs(v);
        }

        settings
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
