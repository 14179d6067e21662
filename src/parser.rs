//! Document parser adapter.
//!
//! The parser is an external collaborator: it turns raw document bytes into
//! ordered pages of text blocks and raster images. Its internals are out of
//! scope here; the pipeline only depends on the `DocumentParser` trait and
//! the page types below.

use std::path::Path;

/// A single parsed page: zero or more text blocks and zero or more images
/// (raw encoded bytes, any format the `image` crate can decode).
#[derive(Debug, Default, Clone)]
pub struct ParsedPage {
    /// Zero-based page number
    pub number: usize,
    pub text_blocks: Vec<String>,
    pub images: Vec<Vec<u8>>,
}

/// A page that could not be parsed. Per-page failures never fail the
/// document as a whole.
#[derive(Debug, thiserror::Error)]
#[error("page {page}: {reason}")]
pub struct PageError {
    pub page: usize,
    pub reason: String,
}

/// Ordered sequence of pages, each either parsed or failed.
#[derive(Debug, Default)]
pub struct ParsedDocument {
    pub pages: Vec<Result<ParsedPage, PageError>>,
}

impl ParsedDocument {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

/// Errors for whole-document parse failures (unreadable file, encrypted
/// document, unsupported format).
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("failed to read document: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse document: {0}")]
    Unreadable(String),
}

pub trait DocumentParser {
    fn parse(&self, path: &Path) -> Result<ParsedDocument, ParseError>;
}

/// PDF text parser backed by `pdf-extract`.
///
/// Extracts one text block per page. `pdf-extract` does not expose embedded
/// raster images, so pages parsed through this adapter carry no image blocks;
/// parsers that do supply images plug in through the same trait.
pub struct PdfParser;

impl DocumentParser for PdfParser {
    fn parse(&self, path: &Path) -> Result<ParsedDocument, ParseError> {
        let bytes = std::fs::read(path)?;

        let pages = pdf_extract::extract_text_from_mem_by_pages(&bytes)
            .map_err(|e| ParseError::Unreadable(e.to_string()))?;

        let pages = pages
            .into_iter()
            .enumerate()
            .map(|(number, text)| {
                let text_blocks = if text.trim().is_empty() {
                    Vec::new()
                } else {
                    vec![text]
                };
                Ok(ParsedPage {
                    number,
                    text_blocks,
                    images: Vec::new(),
                })
            })
            .collect();

        Ok(ParsedDocument { pages })
    }
}

/// In-memory parser, used by tests and by callers that already hold parsed
/// content (e.g. an upload path that decoded pages elsewhere).
pub struct StaticParser {
    pub document: ParsedDocument,
}

impl DocumentParser for StaticParser {
    fn parse(&self, _path: &Path) -> Result<ParsedDocument, ParseError> {
        let pages = self
            .document
            .pages
            .iter()
            .map(|page| match page {
                Ok(p) => Ok(p.clone()),
                Err(e) => Err(PageError {
                    page: e.page,
                    reason: e.reason.clone(),
                }),
            })
            .collect();
        Ok(ParsedDocument { pages })
    }
}
