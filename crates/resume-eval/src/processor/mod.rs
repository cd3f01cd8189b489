//! Text extraction from resume PDFs.
//!
//! An [`ExtractionChain`] tries its strategies in order (embedded text layer,
//! `pdftotext`, OCR) and returns the first output that passes the quality
//! gate. Text that is empty, too short or garbled is a rejection, not a weak
//! success; when every strategy is rejected the chain fails with the
//! per-strategy reasons.

pub mod ocr;
pub mod pdf;
pub mod poppler;

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info_span, warn};

use crate::error::{ExtractionError, ProcessError};

pub use ocr::{OcrProcessor, OcrStrategy};
pub use pdf::TextLayerStrategy;
pub use poppler::PdftotextStrategy;

/// The strategy that produced a candidate's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    TextLayer,
    Pdftotext,
    Ocr,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::TextLayer => "text_layer",
            ExtractionMethod::Pdftotext => "pdftotext",
            ExtractionMethod::Ocr => "ocr",
        }
    }
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExtractionMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text_layer" => Ok(ExtractionMethod::TextLayer),
            "pdftotext" => Ok(ExtractionMethod::Pdftotext),
            "ocr" => Ok(ExtractionMethod::Ocr),
            other => Err(format!("unknown extraction method '{}'", other)),
        }
    }
}

/// Stop signal for an extraction running on a blocking thread. The caller
/// keeps one clone and cancels it when it stops waiting for the result.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

pub trait ExtractionStrategy: Send + Sync {
    fn method(&self) -> ExtractionMethod;
    fn extract(&self, pdf_bytes: &[u8]) -> Result<String, ProcessError>;

    /// Like [`extract`](Self::extract), but gives up early once `cancel` is
    /// set. Strategies that do a single short unit of work need not check.
    fn extract_cancellable(
        &self,
        pdf_bytes: &[u8],
        _cancel: &CancelFlag,
    ) -> Result<String, ProcessError> {
        self.extract(pdf_bytes)
    }
}

/// Why one strategy did not produce usable text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyFailure {
    pub method: ExtractionMethod,
    pub reason: String,
}

impl StrategyFailure {
    pub fn new(method: ExtractionMethod, reason: impl Into<String>) -> Self {
        Self {
            method,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for StrategyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.method, self.reason)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub text: String,
    pub method: ExtractionMethod,
}

pub struct ExtractionChain {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
    min_text_chars: usize,
}

impl ExtractionChain {
    pub fn new(strategies: Vec<Box<dyn ExtractionStrategy>>, min_text_chars: usize) -> Self {
        Self {
            strategies,
            min_text_chars,
        }
    }

    /// Text layer, then `pdftotext` (if enabled), then OCR (if configured).
    pub fn standard(
        min_text_chars: usize,
        pdftotext_enabled: bool,
        ocr: Option<OcrProcessor>,
    ) -> Self {
        let mut strategies: Vec<Box<dyn ExtractionStrategy>> =
            vec![Box::new(TextLayerStrategy::new())];
        if pdftotext_enabled {
            strategies.push(Box::new(PdftotextStrategy::new()));
        }
        if let Some(ocr) = ocr {
            strategies.push(Box::new(OcrStrategy::new(ocr)));
        }
        Self::new(strategies, min_text_chars)
    }

    pub fn methods(&self) -> Vec<ExtractionMethod> {
        self.strategies.iter().map(|s| s.method()).collect()
    }

    pub fn extract(&self, pdf_bytes: &[u8]) -> Result<Extracted, ExtractionError> {
        self.extract_cancellable(pdf_bytes, &CancelFlag::new())
    }

    /// Checks `cancel` before every strategy and hands it on to the strategy.
    pub fn extract_cancellable(
        &self,
        pdf_bytes: &[u8],
        cancel: &CancelFlag,
    ) -> Result<Extracted, ExtractionError> {
        let mut failures = Vec::with_capacity(self.strategies.len());

        for strategy in &self.strategies {
            let method = strategy.method();
            if cancel.is_cancelled() {
                debug!("Extraction cancelled before {}", method);
                return Err(ExtractionError::Aborted("cancelled".to_string()));
            }
            let _span = info_span!("extraction.strategy", method = %method).entered();

            match strategy.extract_cancellable(pdf_bytes, cancel) {
                Ok(text) => match assess_text(&text, self.min_text_chars) {
                    Ok(()) => {
                        debug!("Accepted {} characters from {}", text.len(), method);
                        return Ok(Extracted {
                            text: text.trim().to_string(),
                            method,
                        });
                    }
                    Err(rejection) => {
                        debug!("Rejected output of {}: {}", method, rejection);
                        failures.push(StrategyFailure::new(method, rejection.to_string()));
                    }
                },
                Err(ProcessError::Cancelled) => {
                    debug!("Extraction cancelled during {}", method);
                    return Err(ExtractionError::Aborted("cancelled".to_string()));
                }
                Err(e) => {
                    warn!("Extraction strategy {} failed: {}", method, e);
                    failures.push(StrategyFailure::new(method, e.to_string()));
                }
            }
        }

        Err(ExtractionError::AllStrategiesFailed { failures })
    }
}

/// Pattern lopdf emits for CID fonts it cannot decode.
const IDENTITY_H_PATTERN: &str = "?Identity-H Unimplemented?";

/// Text shorter than this is not checked for garbling.
const MIN_CHARS_FOR_RATIO_CHECK: usize = 50;

/// Below this share of alphanumeric characters the text is considered garbled.
const MIN_ALPHANUMERIC_PERCENT: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextRejection {
    Empty,
    EncodingMarkersOnly,
    TooShort { chars: usize, required: usize },
    Garbled { alphanumeric_percent: usize },
}

impl fmt::Display for TextRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextRejection::Empty => write!(f, "no text"),
            TextRejection::EncodingMarkersOnly => {
                write!(f, "only undecodable font markers")
            }
            TextRejection::TooShort { chars, required } => write!(
                f,
                "{} characters, below the minimum of {}",
                chars, required
            ),
            TextRejection::Garbled {
                alphanumeric_percent,
            } => write!(
                f,
                "garbled text ({}% alphanumeric)",
                alphanumeric_percent
            ),
        }
    }
}

/// Quality gate applied to every strategy's output.
///
/// Length is measured in non-whitespace characters so that layout padding
/// does not count towards the threshold.
pub fn assess_text(text: &str, min_chars: usize) -> Result<(), TextRejection> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(TextRejection::Empty);
    }

    let cleaned: String = trimmed
        .replace(IDENTITY_H_PATTERN, "")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return Err(TextRejection::EncodingMarkersOnly);
    }

    let chars = cleaned.chars().count();
    if chars < min_chars {
        return Err(TextRejection::TooShort {
            chars,
            required: min_chars,
        });
    }

    let alphanumeric = cleaned.chars().filter(|c| c.is_alphanumeric()).count();
    if chars > MIN_CHARS_FOR_RATIO_CHECK && alphanumeric * 100 < chars * MIN_ALPHANUMERIC_PERCENT
    {
        return Err(TextRejection::Garbled {
            alphanumeric_percent: alphanumeric * 100 / chars,
        });
    }

    Ok(())
}
