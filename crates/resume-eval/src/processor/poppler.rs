//! Helpers around the poppler-utils command line tools.
//!
//! The tools read from disk, so the PDF bytes are written to a private
//! temporary directory that is removed when the call returns.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

use crate::error::ProcessError;
use crate::processor::{ExtractionMethod, ExtractionStrategy};

/// Secondary text-layer parser backed by `pdftotext`.
#[derive(Debug, Default)]
pub struct PdftotextStrategy;

impl PdftotextStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl ExtractionStrategy for PdftotextStrategy {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::Pdftotext
    }

    fn extract(&self, pdf_bytes: &[u8]) -> Result<String, ProcessError> {
        let _span = tracing::info_span!("processor.pdftotext").entered();

        let workspace = ScratchPdf::new(pdf_bytes)?;
        let output = Command::new("pdftotext")
            .args(["-layout", "-enc", "UTF-8"])
            .arg(workspace.pdf_path())
            .arg("-")
            .output();

        let stdout = handle_cmd_output(output, "pdftotext")?;
        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }
}

/// A PDF written to a temporary directory for the CLI tools.
pub struct ScratchPdf {
    dir: TempDir,
    pdf_path: PathBuf,
}

impl ScratchPdf {
    pub fn new(pdf_bytes: &[u8]) -> Result<Self, ProcessError> {
        let dir = tempfile::Builder::new().prefix("resume-eval-").tempdir()?;
        let pdf_path = dir.path().join("resume.pdf");
        let mut file = std::fs::File::create(&pdf_path)?;
        file.write_all(pdf_bytes)?;
        file.flush()?;
        Ok(Self { dir, pdf_path })
    }

    pub fn pdf_path(&self) -> &Path {
        &self.pdf_path
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }
}

/// Page count reported by `pdfinfo`, for documents lopdf cannot parse.
pub fn count_pages(scratch: &ScratchPdf) -> Result<usize, ProcessError> {
    let output = Command::new("pdfinfo").arg(scratch.pdf_path()).output();
    let stdout = handle_cmd_output(output, "pdfinfo")?;

    Ok(parse_page_count(&String::from_utf8_lossy(&stdout)).unwrap_or(1))
}

fn parse_page_count(pdfinfo_output: &str) -> Option<usize> {
    pdfinfo_output
        .lines()
        .filter_map(|line| line.strip_prefix("Pages:"))
        .find_map(|count| count.trim().parse::<usize>().ok())
}

/// Renders one page to PNG with `pdftoppm` and returns the image bytes.
pub fn render_page_png(
    scratch: &ScratchPdf,
    page_num: usize,
    dpi: u32,
) -> Result<Vec<u8>, ProcessError> {
    let prefix = scratch.dir().join("page");
    let page = page_num.to_string();

    let output = Command::new("pdftoppm")
        .args(["-png", "-r", &dpi.to_string(), "-f", &page, "-l", &page])
        .arg(scratch.pdf_path())
        .arg(&prefix)
        .output();
    handle_cmd_output(output, "pdftoppm")?;

    let image_path = find_page_image(scratch.dir(), page_num).ok_or_else(|| {
        ProcessError::PdfProcessing(format!("pdftoppm produced no image for page {}", page_num))
    })?;

    let image_data = std::fs::read(&image_path)?;
    let _ = std::fs::remove_file(&image_path);
    Ok(image_data)
}

/// pdftoppm pads the page suffix to the width of the page count.
fn find_page_image(dir: &Path, page_num: usize) -> Option<PathBuf> {
    (1..=4)
        .map(|digits| dir.join(format!("page-{:0width$}.png", page_num, width = digits)))
        .find(|path| path.exists())
}

fn handle_cmd_output(
    result: std::io::Result<Output>,
    tool: &str,
) -> Result<Vec<u8>, ProcessError> {
    match result {
        Ok(output) if output.status.success() => Ok(output.stdout),
        Ok(output) => Err(ProcessError::ToolFailed {
            tool: tool.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ProcessError::ToolNotFound(
            format!("{} (install poppler-utils)", tool),
        )),
        Err(e) => Err(ProcessError::Io(e)),
    }
}
