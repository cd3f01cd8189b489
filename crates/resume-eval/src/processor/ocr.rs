use std::io::Cursor;
use std::sync::Arc;

use crate::error::ProcessError;
use crate::processor::poppler::{self, ScratchPdf};
use crate::processor::{pdf, CancelFlag, ExtractionMethod, ExtractionStrategy};

#[derive(Clone)]
pub struct OcrProcessor {
    inner: Arc<OcrProcessorInner>,
}

struct OcrProcessorInner {
    languages: String,
    dpi: u32,
}

impl OcrProcessor {
    pub fn new(languages: &[String], dpi: u32) -> Self {
        let lang_str = if languages.is_empty() {
            "eng".to_string()
        } else {
            languages.join("+")
        };

        Self {
            inner: Arc::new(OcrProcessorInner {
                languages: lang_str,
                dpi,
            }),
        }
    }

    pub fn dpi(&self) -> u32 {
        self.inner.dpi
    }

    pub fn languages(&self) -> &str {
        &self.inner.languages
    }

    pub fn recognize_image(&self, image_data: &[u8]) -> Result<String, ProcessError> {
        let _span = tracing::info_span!("processor.ocr_page").entered();

        let img = image::load_from_memory(image_data)
            .map_err(|e| ProcessError::OcrFailed(format!("Failed to load image: {}", e)))?;

        // leptess wants an encoded image, so normalize to PNG.
        let mut png_data = Vec::new();
        img.write_to(&mut Cursor::new(&mut png_data), image::ImageFormat::Png)
            .map_err(|e| ProcessError::OcrFailed(format!("Failed to convert image: {}", e)))?;

        let mut lt = leptess::LepTess::new(None, &self.inner.languages).map_err(|e| {
            ProcessError::OcrFailed(format!("Failed to initialize Tesseract: {}", e))
        })?;

        lt.set_image_from_mem(&png_data)
            .map_err(|e| ProcessError::OcrFailed(format!("Failed to set image for OCR: {}", e)))?;

        lt.get_utf8_text()
            .map_err(|e| ProcessError::OcrFailed(format!("OCR failed: {}", e)))
    }
}

/// Last resort: rasterize every page and run Tesseract on it.
pub struct OcrStrategy {
    ocr: OcrProcessor,
}

impl OcrStrategy {
    pub fn new(ocr: OcrProcessor) -> Self {
        Self { ocr }
    }
}

impl ExtractionStrategy for OcrStrategy {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::Ocr
    }

    fn extract(&self, pdf_bytes: &[u8]) -> Result<String, ProcessError> {
        self.extract_cancellable(pdf_bytes, &CancelFlag::new())
    }

    /// Checks `cancel` before rendering each page, so an abandoned attempt
    /// stops after at most one more page.
    fn extract_cancellable(
        &self,
        pdf_bytes: &[u8],
        cancel: &CancelFlag,
    ) -> Result<String, ProcessError> {
        let _span = tracing::info_span!("processor.ocr", languages = self.ocr.languages()).entered();

        let scratch = ScratchPdf::new(pdf_bytes)?;
        let page_count = match pdf::page_count(pdf_bytes) {
            Some(count) => count,
            None => poppler::count_pages(&scratch)?,
        };

        let mut all_text = String::new();
        let mut last_error = None;
        for page_num in 1..=page_count {
            if cancel.is_cancelled() {
                tracing::debug!("OCR cancelled before page {} of {}", page_num, page_count);
                return Err(ProcessError::Cancelled);
            }
            let page_text = poppler::render_page_png(&scratch, page_num, self.ocr.dpi())
                .and_then(|image| self.ocr.recognize_image(&image));
            match page_text {
                Ok(text) => {
                    all_text.push_str(&text);
                    all_text.push('\n');
                }
                Err(e) => {
                    tracing::warn!("OCR failed for page {}: {}", page_num, e);
                    last_error = Some(e);
                }
            }
        }

        // A tool that is missing or broken on every page is an error, not empty text.
        match last_error {
            Some(e) if all_text.trim().is_empty() => Err(e),
            _ => Ok(all_text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ocr_processor_languages() {
        let processor = OcrProcessor::new(&["eng".to_string(), "deu".to_string()], 300);
        assert_eq!(processor.languages(), "eng+deu");
        assert_eq!(processor.dpi(), 300);
    }

    #[test]
    fn test_ocr_processor_default_language() {
        let processor = OcrProcessor::new(&[], 150);
        assert_eq!(processor.languages(), "eng");
        assert_eq!(processor.dpi(), 150);
    }

    #[test]
    fn test_invalid_image_data_error() {
        let processor = OcrProcessor::new(&["eng".to_string()], 300);
        match processor.recognize_image(b"not valid image data") {
            Err(ProcessError::OcrFailed(msg)) => assert!(msg.contains("Failed to load image")),
            other => panic!("Expected OcrFailed error, got {:?}", other),
        }
    }

    #[test]
    fn test_ocr_processor_clone_shares_settings() {
        let processor = OcrProcessor::new(&["fra".to_string()], 200);
        let cloned = processor.clone();
        assert!(Arc::ptr_eq(&processor.inner, &cloned.inner));
    }

    #[test]
    fn test_ocr_strategy_method() {
        let strategy = OcrStrategy::new(OcrProcessor::new(&[], 300));
        assert_eq!(strategy.method(), ExtractionMethod::Ocr);
    }
}
