use crate::config::Settings;
use crate::error::{PipelineError, Result};
use crate::types::OcrOutput;
use reqwest::blocking::Client;
use std::time::Duration;

/// External text recognition capability. Implementations may fail or return
/// empty text; callers treat both as a low-confidence result, not a fatal
/// error.
pub trait OcrEngine: Send + Sync {
    fn recognize(&self, bytes: &[u8]) -> Result<OcrOutput>;
}

/// OCR over a document-intelligence style HTTP API: submit the raw bytes,
/// then poll the returned operation URL until the analysis finishes.
pub struct HttpOcrEngine {
    client: Client,
    analyze_url: String,
    api_key: String,
    poll_interval: Duration,
    poll_attempts: u32,
}

impl HttpOcrEngine {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let endpoint = settings
            .ocr_endpoint
            .as_deref()
            .ok_or_else(|| PipelineError::OcrUnavailable("OCR_ENDPOINT not set".to_string()))?;
        let api_key = settings
            .ocr_api_key
            .clone()
            .ok_or_else(|| PipelineError::OcrUnavailable("OCR_API_KEY not set".to_string()))?;
        let client = Client::builder()
            .timeout(settings.ocr_http_timeout)
            .build()
            .map_err(|e| PipelineError::OcrUnavailable(e.to_string()))?;
        let analyze_url = format!(
            "{}/documentintelligence/documentModels/prebuilt-read:analyze?api-version=2024-11-30",
            endpoint.trim_end_matches('/')
        );
        Ok(HttpOcrEngine {
            client,
            analyze_url,
            api_key,
            poll_interval: settings.ocr_poll_interval,
            poll_attempts: settings.ocr_poll_attempts,
        })
    }

    fn poll_result(&self, result_url: &str) -> Result<OcrOutput> {
        for _ in 0..self.poll_attempts {
            std::thread::sleep(self.poll_interval);
            let poll_resp = self
                .client
                .get(result_url)
                .header("Ocp-Apim-Subscription-Key", &self.api_key)
                .send()
                .map_err(request_error)?;
            let poll_json: serde_json::Value = poll_resp
                .json()
                .map_err(|e| PipelineError::OcrUnavailable(format!("invalid JSON: {e}")))?;
            let status = poll_json
                .get("status")
                .and_then(|s| s.as_str())
                .unwrap_or("");
            if status == "succeeded" {
                let result = poll_json.get("analyzeResult").ok_or_else(|| {
                    PipelineError::OcrUnavailable("no analyzeResult in response".to_string())
                })?;
                return Ok(collect_output(result));
            }
            if status == "failed" {
                let message = poll_json
                    .get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown error");
                return Err(PipelineError::OcrUnavailable(message.to_string()));
            }
        }
        Err(PipelineError::OcrTimeout)
    }
}

impl OcrEngine for HttpOcrEngine {
    fn recognize(&self, bytes: &[u8]) -> Result<OcrOutput> {
        let response = self
            .client
            .post(&self.analyze_url)
            .header("Ocp-Apim-Subscription-Key", &self.api_key)
            .header("Content-Type", "application/octet-stream")
            .body(bytes.to_vec())
            .send()
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(PipelineError::OcrUnavailable(format!(
                "analysis rejected ({status}): {body}"
            )));
        }

        let result_url = response
            .headers()
            .get("Operation-Location")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                PipelineError::OcrUnavailable("no Operation-Location in response".to_string())
            })?
            .to_string();

        self.poll_result(&result_url)
    }
}

fn request_error(e: reqwest::Error) -> PipelineError {
    if e.is_timeout() {
        PipelineError::OcrTimeout
    } else {
        PipelineError::OcrUnavailable(e.to_string())
    }
}

/// Join recognized lines into one text block and average the per-line
/// confidences into a [0,100] quality signal, when the recognizer reports
/// them.
fn collect_output(analyze_result: &serde_json::Value) -> OcrOutput {
    let empty: Vec<serde_json::Value> = Vec::new();
    let pages = analyze_result
        .get("pages")
        .and_then(|p| p.as_array())
        .unwrap_or(&empty);

    let mut lines: Vec<String> = Vec::new();
    let mut confidences: Vec<f64> = Vec::new();
    for page in pages {
        let page_lines = page.get("lines").and_then(|l| l.as_array()).unwrap_or(&empty);
        for line in page_lines {
            let text = line.get("content").and_then(|c| c.as_str()).unwrap_or("");
            lines.push(text.to_string());
            if let Some(conf) = line.get("confidence").and_then(|c| c.as_f64()) {
                confidences.push(conf);
            }
        }
    }

    let quality = if confidences.is_empty() {
        None
    } else {
        let mean = confidences.iter().sum::<f64>() / confidences.len() as f64;
        Some((mean * 100.0).clamp(0.0, 100.0))
    };

    OcrOutput {
        text: lines.join("\n"),
        quality,
    }
}
