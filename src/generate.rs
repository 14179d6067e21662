//! Grounded answer generation.
//!
//! Builds a multimodal prompt from the user's query and the retrieved
//! fragments in rank order, hands it to the generation adapter, and wraps
//! the outcome in an [`Answer`] that always carries the provenance of what
//! was used, even when generation itself failed.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::fragment::{ContentFragment, FragmentPayload};
use crate::retrieve::{QueryInput, RetrievalResult};

/// Errors raised by the generation adapter.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("generation provider error: {0}")]
    Provider(String),

    #[error("missing credentials: {0}")]
    MissingCredentials(String),
}

/// One block of a multimodal prompt, in the order it should be presented.
#[derive(Debug, Clone, PartialEq)]
pub enum PromptBlock {
    Text(String),
    Image { png_base64: String },
}

/// Generation model adapter: consumes an ordered grounded prompt, returns
/// generated text. Implementations must honor the timeout and must not hold
/// any pipeline lock while the call is in flight.
pub trait TextGenerator: Send + Sync {
    fn model_name(&self) -> &str;

    fn generate(
        &self,
        blocks: &[PromptBlock],
        timeout: Duration,
    ) -> Result<String, GenerationError>;
}

/// Generated text plus the exact fragments supplied as grounding context.
///
/// `success == false` means generation failed but retrieval did not; the
/// provenance list still shows what was found.
#[derive(Debug)]
pub struct Answer {
    pub text: Option<String>,
    pub provenance: Vec<ContentFragment>,
    pub success: bool,
    pub error: Option<String>,
}

/// Composes grounded prompts and invokes the generation adapter.
pub struct ResponseAssembler {
    generator: Arc<dyn TextGenerator>,
    timeout: Duration,
}

impl ResponseAssembler {
    pub fn new(generator: Arc<dyn TextGenerator>, timeout: Duration) -> Self {
        Self { generator, timeout }
    }

    /// Build the prompt and call the generation model.
    ///
    /// Generation failure degrades the answer instead of discarding the
    /// already-computed retrieval.
    pub fn generate(&self, query: &QueryInput, retrieval: &RetrievalResult) -> Answer {
        let blocks = build_prompt(query, retrieval);
        let provenance: Vec<ContentFragment> = retrieval
            .hits
            .iter()
            .map(|hit| hit.fragment.clone())
            .collect();

        match self.generator.generate(&blocks, self.timeout) {
            Ok(text) => Answer {
                text: Some(text),
                provenance,
                success: true,
                error: None,
            },
            Err(e) => {
                log::error!("generation with '{}' failed: {}", self.generator.model_name(), e);
                Answer {
                    text: None,
                    provenance,
                    success: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

/// Interleave the query and the retrieved fragments into an ordered prompt,
/// keeping the retriever's rank order. Page numbers are shown 1-based.
pub fn build_prompt(query: &QueryInput, retrieval: &RetrievalResult) -> Vec<PromptBlock> {
    let mut blocks = Vec::new();

    match query {
        QueryInput::Text(question) => {
            blocks.push(PromptBlock::Text(format!(
                "Question: {question}\n\nContext from the document:\n"
            )));
        }
        QueryInput::Image(png) => {
            blocks.push(PromptBlock::Text(
                "Analyze the following input image using the related document content below.\n\nInput image:"
                    .to_string(),
            ));
            blocks.push(PromptBlock::Image {
                png_base64: BASE64.encode(png),
            });
            blocks.push(PromptBlock::Text(
                "\nRelated content from the document:\n".to_string(),
            ));
        }
    }

    for hit in &retrieval.hits {
        let page = hit.fragment.locator.page + 1;
        match &hit.fragment.payload {
            FragmentPayload::Text { content } => {
                blocks.push(PromptBlock::Text(format!("[Page {page}]: {content}\n")));
            }
            FragmentPayload::Image { png, .. } => {
                blocks.push(PromptBlock::Text(format!("[Image from page {page}]:")));
                blocks.push(PromptBlock::Image {
                    png_base64: BASE64.encode(png),
                });
            }
        }
    }

    blocks.push(PromptBlock::Text(
        "\nAnswer the question based on the provided text and images.".to_string(),
    ));

    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::SourceLocator;
    use crate::retrieve::ScoredFragment;
    use crate::testutil::FakeGenerator;

    fn retrieval_with(hits: Vec<(ContentFragment, f32)>) -> RetrievalResult {
        RetrievalResult {
            hits: hits
                .into_iter()
                .map(|(fragment, score)| ScoredFragment { fragment, score })
                .collect(),
            missing: 0,
        }
    }

    fn text_fragment(id: u64, page: usize, content: &str) -> ContentFragment {
        ContentFragment::new_text(
            id,
            content.to_string(),
            SourceLocator { page, position: 0 },
        )
    }

    fn image_fragment(id: u64, page: usize) -> ContentFragment {
        ContentFragment::new_image(
            id,
            vec![1, 2, 3],
            2,
            2,
            SourceLocator { page, position: 0 },
        )
    }

    #[test]
    fn test_prompt_interleaves_in_rank_order() {
        let retrieval = retrieval_with(vec![
            (image_fragment(1, 1), 0.9),
            (text_fragment(0, 0, "revenue grew"), 0.8),
        ]);

        let blocks = build_prompt(
            &QueryInput::Text("what happened?".to_string()),
            &retrieval,
        );

        // question, image label, image, text, instruction
        assert!(matches!(&blocks[0], PromptBlock::Text(t) if t.starts_with("Question:")));
        assert!(matches!(&blocks[1], PromptBlock::Text(t) if t.contains("page 2")));
        assert!(matches!(&blocks[2], PromptBlock::Image { .. }));
        assert!(matches!(&blocks[3], PromptBlock::Text(t) if t.contains("[Page 1]: revenue grew")));
        assert!(matches!(blocks.last().unwrap(), PromptBlock::Text(_)));
    }

    #[test]
    fn test_image_query_leads_the_prompt() {
        let retrieval = retrieval_with(vec![(text_fragment(0, 0, "context"), 0.5)]);
        let blocks = build_prompt(&QueryInput::Image(vec![9, 9]), &retrieval);

        assert!(matches!(&blocks[0], PromptBlock::Text(_)));
        assert!(matches!(&blocks[1], PromptBlock::Image { .. }));
    }

    #[test]
    fn test_successful_generation_carries_provenance() {
        let generator = Arc::new(FakeGenerator::answering("Revenue grew 10%."));
        let assembler = ResponseAssembler::new(generator.clone(), Duration::from_secs(5));

        let retrieval = retrieval_with(vec![(text_fragment(0, 0, "revenue grew 10%"), 0.9)]);
        let answer = assembler.generate(
            &QueryInput::Text("what happened to revenue?".to_string()),
            &retrieval,
        );

        assert!(answer.success);
        assert_eq!(answer.text.as_deref(), Some("Revenue grew 10%."));
        assert_eq!(answer.provenance.len(), 1);
        assert_eq!(answer.provenance[0].id, 0);
        assert!(generator.last_prompt().is_some());
    }

    #[test]
    fn test_failed_generation_keeps_retrieval_context() {
        let generator = Arc::new(FakeGenerator::failing("provider down"));
        let assembler = ResponseAssembler::new(generator, Duration::from_secs(5));

        let retrieval = retrieval_with(vec![
            (text_fragment(0, 0, "kept"), 0.9),
            (image_fragment(1, 1), 0.7),
        ]);
        let answer = assembler.generate(&QueryInput::Text("q".to_string()), &retrieval);

        assert!(!answer.success);
        assert!(answer.text.is_none());
        assert_eq!(answer.provenance.len(), 2);
        assert!(answer.error.as_deref().unwrap().contains("provider down"));
    }

    #[test]
    fn test_empty_retrieval_still_generates() {
        let generator = Arc::new(FakeGenerator::answering("I found nothing relevant."));
        let assembler = ResponseAssembler::new(generator, Duration::from_secs(5));

        let answer = assembler.generate(
            &QueryInput::Text("q".to_string()),
            &RetrievalResult::default(),
        );

        assert!(answer.success);
        assert!(answer.provenance.is_empty());
    }
}
