use lopdf::Document;

use crate::error::ProcessError;
use crate::processor::{ExtractionMethod, ExtractionStrategy};

/// Reads the embedded text layer with lopdf.
#[derive(Debug, Default)]
pub struct TextLayerStrategy;

impl TextLayerStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl ExtractionStrategy for TextLayerStrategy {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::TextLayer
    }

    fn extract(&self, pdf_bytes: &[u8]) -> Result<String, ProcessError> {
        let _span = tracing::info_span!("processor.text_layer").entered();

        let doc = Document::load_mem(pdf_bytes).map_err(|e| ProcessError::LoadPdf(e.to_string()))?;
        Ok(extract_text_from_pdf(&doc))
    }
}

/// Page count according to lopdf, if the document parses.
pub fn page_count(pdf_bytes: &[u8]) -> Option<usize> {
    Document::load_mem(pdf_bytes)
        .ok()
        .map(|doc| doc.get_pages().len())
}

fn extract_text_from_pdf(doc: &Document) -> String {
    let mut text = String::new();

    for (page_num, _) in doc.get_pages() {
        match doc.extract_text(&[page_num]) {
            Ok(page_text) => {
                text.push_str(&page_text);
                text.push('\n');
            }
            Err(e) => tracing::debug!("No text on page {}: {}", page_num, e),
        }
    }

    text
}
