//! Document ingestion.
//!
//! Turns a parsed document into an ordered list of content fragments: page
//! text is windowed into overlapping chunks, each page image becomes one
//! fragment (downscaled and PNG-encoded). A bad page or image is recorded as
//! a warning and skipped; ingestion only fails when every page failed.

pub mod chunking;
pub mod images;

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;

use crate::config::Config;
use crate::fragment::{ContentFragment, SourceLocator};
use crate::parser::ParsedDocument;

/// Errors that abort ingestion of a whole document.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("all {0} pages failed to parse")]
    AllPagesFailed(usize),
}

/// A recoverable problem encountered during ingestion.
#[derive(Debug, Clone)]
pub enum IngestWarning {
    /// The parser could not produce this page at all
    PageFailed { page: usize, reason: String },
    /// Page had no extractable text and no images
    EmptyPage { page: usize },
    /// An image on the page could not be decoded
    ImageFailed {
        page: usize,
        position: usize,
        reason: String,
    },
}

/// Per-document summary of what ingestion skipped.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub pages_total: usize,
    pub pages_failed: usize,
    pub warnings: Vec<IngestWarning>,
}

/// Ordered fragments plus the skip report for one document.
#[derive(Debug)]
pub struct IngestOutput {
    pub fragments: Vec<ContentFragment>,
    pub report: IngestReport,
}

/// Splits a parsed document into ordered content fragments.
pub struct Ingestor {
    chunk_size: usize,
    chunk_overlap: usize,
    max_image_dimension: u32,
    show_progress: bool,
}

impl Ingestor {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
            max_image_dimension: config.max_image_dimension,
            show_progress: false,
        }
    }

    /// Render an indicatif progress bar over pages while ingesting.
    pub fn with_progress(mut self) -> Self {
        self.show_progress = true;
        self
    }

    /// Ingest a parsed document. Fragment ids are assigned monotonically in
    /// page order, text chunks before images within each page, so the same
    /// document always produces the same fragments in the same order.
    pub fn ingest(&self, document: ParsedDocument) -> Result<IngestOutput, IngestError> {
        let mut report = IngestReport {
            pages_total: document.page_count(),
            ..Default::default()
        };

        let mut pages = Vec::new();
        for page in document.pages {
            match page {
                Ok(p) => pages.push(p),
                Err(e) => {
                    log::warn!("skipping page {}: {}", e.page, e.reason);
                    report.pages_failed += 1;
                    report.warnings.push(IngestWarning::PageFailed {
                        page: e.page,
                        reason: e.reason,
                    });
                }
            }
        }

        if pages.is_empty() && report.pages_failed > 0 {
            return Err(IngestError::AllPagesFailed(report.pages_failed));
        }

        // Decode and downscale every image up front; decoding dominates
        // ingestion time and each image is independent.
        let prepared_images: Vec<_> = pages
            .par_iter()
            .flat_map(|page| {
                page.images
                    .par_iter()
                    .enumerate()
                    .map(|(position, bytes)| {
                        (
                            page.number,
                            position,
                            images::prepare_image(bytes, self.max_image_dimension),
                        )
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        let mut prepared = prepared_images.into_iter().peekable();

        let progress = if self.show_progress {
            let bar = ProgressBar::new(pages.len() as u64);
            bar.set_style(
                ProgressStyle::with_template("{msg} [{bar:40}] {pos}/{len} pages")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            bar.set_message("ingesting");
            Some(bar)
        } else {
            None
        };

        let mut fragments = Vec::new();
        let mut next_id: u64 = 0;

        for page in &pages {
            let mut position = 0;

            for block in &page.text_blocks {
                for chunk in chunking::chunk_text(block, self.chunk_size, self.chunk_overlap) {
                    fragments.push(ContentFragment::new_text(
                        next_id,
                        chunk,
                        SourceLocator {
                            page: page.number,
                            position,
                        },
                    ));
                    next_id += 1;
                    position += 1;
                }
            }

            let mut image_position = 0;
            while prepared
                .peek()
                .map(|(p, _, _)| *p == page.number)
                .unwrap_or(false)
            {
                let (_, source_position, result) = prepared.next().expect("peeked");
                match result {
                    Ok(img) => {
                        fragments.push(ContentFragment::new_image(
                            next_id,
                            img.png,
                            img.dimensions.0,
                            img.dimensions.1,
                            SourceLocator {
                                page: page.number,
                                position: image_position,
                            },
                        ));
                        next_id += 1;
                        image_position += 1;
                    }
                    Err(e) => {
                        log::warn!(
                            "skipping image {} on page {}: {}",
                            source_position,
                            page.number,
                            e
                        );
                        report.warnings.push(IngestWarning::ImageFailed {
                            page: page.number,
                            position: source_position,
                            reason: e.to_string(),
                        });
                    }
                }
            }

            if position == 0 && image_position == 0 {
                log::warn!("page {} yielded no fragments", page.number);
                report
                    .warnings
                    .push(IngestWarning::EmptyPage { page: page.number });
            }

            if let Some(bar) = &progress {
                bar.inc(1);
            }
        }

        if let Some(bar) = progress {
            bar.finish_and_clear();
        }

        log::info!(
            "ingested {} fragments from {} pages ({} warnings)",
            fragments.len(),
            pages.len(),
            report.warnings.len()
        );

        Ok(IngestOutput { fragments, report })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::Modality;
    use crate::parser::{PageError, ParsedPage};

    fn test_ingestor() -> Ingestor {
        Ingestor {
            chunk_size: 20,
            chunk_overlap: 5,
            max_image_dimension: 64,
            show_progress: false,
        }
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x * 3) as u8, (y * 7) as u8, 99])
        });
        let mut buf = Vec::new();
        let mut cursor = std::io::Cursor::new(&mut buf);
        img.write_to(&mut cursor, image::ImageFormat::Png).unwrap();
        buf
    }

    fn text_page(number: usize, text: &str) -> Result<ParsedPage, PageError> {
        Ok(ParsedPage {
            number,
            text_blocks: vec![text.to_string()],
            images: vec![],
        })
    }

    #[test]
    fn test_text_pages_become_ordered_chunks() {
        let doc = ParsedDocument {
            pages: vec![
                text_page(0, "The quick brown fox jumps over the lazy dog"),
                text_page(1, "short"),
            ],
        };

        let output = test_ingestor().ingest(doc).unwrap();

        assert!(output.fragments.len() >= 3);
        // ids are monotonic and match insertion order
        for (i, fragment) in output.fragments.iter().enumerate() {
            assert_eq!(fragment.id, i as u64);
        }
        // last fragment comes from page 1
        assert_eq!(output.fragments.last().unwrap().locator.page, 1);
        assert_eq!(output.fragments.last().unwrap().text(), Some("short"));
    }

    #[test]
    fn test_images_become_fragments_after_text() {
        let doc = ParsedDocument {
            pages: vec![Ok(ParsedPage {
                number: 0,
                text_blocks: vec!["some page text".to_string()],
                images: vec![png_bytes(16, 16)],
            })],
        };

        let output = test_ingestor().ingest(doc).unwrap();

        assert_eq!(output.fragments.len(), 2);
        assert_eq!(output.fragments[0].modality(), Modality::Text);
        assert_eq!(output.fragments[1].modality(), Modality::Image);
        assert!(output.report.warnings.is_empty());
    }

    #[test]
    fn test_oversized_image_downscaled() {
        let doc = ParsedDocument {
            pages: vec![Ok(ParsedPage {
                number: 0,
                text_blocks: vec![],
                images: vec![png_bytes(128, 64)],
            })],
        };

        let output = test_ingestor().ingest(doc).unwrap();

        match &output.fragments[0].payload {
            crate::fragment::FragmentPayload::Image { width, height, .. } => {
                assert_eq!((*width, *height), (64, 32));
            }
            other => panic!("expected image payload, got {other:?}"),
        }
    }

    #[test]
    fn test_bad_image_skipped_with_warning() {
        let doc = ParsedDocument {
            pages: vec![Ok(ParsedPage {
                number: 0,
                text_blocks: vec!["still here".to_string()],
                images: vec![vec![0xde, 0xad, 0xbe, 0xef], png_bytes(8, 8)],
            })],
        };

        let output = test_ingestor().ingest(doc).unwrap();

        // text chunk + the one decodable image
        assert_eq!(output.fragments.len(), 2);
        assert!(output
            .report
            .warnings
            .iter()
            .any(|w| matches!(w, IngestWarning::ImageFailed { page: 0, position: 0, .. })));
    }

    #[test]
    fn test_failed_page_skipped() {
        let doc = ParsedDocument {
            pages: vec![
                Err(PageError {
                    page: 0,
                    reason: "encrypted".to_string(),
                }),
                text_page(1, "survives"),
            ],
        };

        let output = test_ingestor().ingest(doc).unwrap();

        assert_eq!(output.fragments.len(), 1);
        assert_eq!(output.report.pages_failed, 1);
    }

    #[test]
    fn test_all_pages_failed_is_error() {
        let doc = ParsedDocument {
            pages: vec![
                Err(PageError {
                    page: 0,
                    reason: "bad".to_string(),
                }),
                Err(PageError {
                    page: 1,
                    reason: "worse".to_string(),
                }),
            ],
        };

        let result = test_ingestor().ingest(doc);
        assert!(matches!(result, Err(IngestError::AllPagesFailed(2))));
    }

    #[test]
    fn test_empty_page_recorded() {
        let doc = ParsedDocument {
            pages: vec![Ok(ParsedPage {
                number: 0,
                text_blocks: vec![],
                images: vec![],
            })],
        };

        let output = test_ingestor().ingest(doc).unwrap();

        assert!(output.fragments.is_empty());
        assert!(matches!(
            output.report.warnings.as_slice(),
            [IngestWarning::EmptyPage { page: 0 }]
        ));
    }

    #[test]
    fn test_ingestion_is_deterministic() {
        let make_doc = || ParsedDocument {
            pages: vec![
                text_page(0, "a repeated document body that spans multiple chunks easily"),
                Ok(ParsedPage {
                    number: 1,
                    text_blocks: vec![],
                    images: vec![png_bytes(16, 8)],
                }),
            ],
        };

        let a = test_ingestor().ingest(make_doc()).unwrap();
        let b = test_ingestor().ingest(make_doc()).unwrap();

        let a_texts: Vec<_> = a.fragments.iter().map(|f| (f.id, f.text().map(str::to_string), f.locator)).collect();
        let b_texts: Vec<_> = b.fragments.iter().map(|f| (f.id, f.text().map(str::to_string), f.locator)).collect();
        assert_eq!(a_texts, b_texts);
    }
}
