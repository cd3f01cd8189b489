use std::path::PathBuf;
use std::time::Duration;

use crate::config::Config;

use super::retry::RetryPolicy;

/// Everything a [`Pipeline`](super::Pipeline) needs from the configuration,
/// resolved once at start-up.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub storage_root: PathBuf,
    pub min_text_chars: usize,
    pub pdftotext_enabled: bool,
    pub ocr_enabled: bool,
    pub ocr_languages: Vec<String>,
    pub ocr_dpi: u32,
    /// On expiry the attempt fails and the extraction is cancelled. A
    /// strategy already running finishes its current unit of work first
    /// (one `pdftotext` call or one OCR page).
    pub extraction_timeout: Duration,
    pub evaluation_timeout: Duration,
    pub max_concurrent_evaluations: usize,
    pub retry: RetryPolicy,
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            storage_root: config.storage_root(),
            min_text_chars: config.extraction.min_text_chars,
            pdftotext_enabled: config.extraction.pdftotext_enabled,
            ocr_enabled: config.extraction.ocr.enabled,
            ocr_languages: config.extraction.ocr.languages.clone(),
            ocr_dpi: config.extraction.ocr.dpi,
            extraction_timeout: Duration::from_secs(config.extraction.timeout_secs),
            evaluation_timeout: Duration::from_secs(config.evaluation.timeout_secs),
            max_concurrent_evaluations: config.evaluation.max_concurrent_requests.max(1),
            retry: RetryPolicy::from_config(&config.retry),
        }
    }
}
