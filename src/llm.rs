//! OpenAI-compatible generation adapter.
//!
//! Sends the grounded prompt as one user message whose content array mixes
//! `text` and `image_url` (data URI) parts, the shape every vision-capable
//! chat-completions endpoint accepts. The call is blocking with an explicit
//! per-request timeout and holds no pipeline state.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use crate::generate::{GenerationError, PromptBlock, TextGenerator};

const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const API_KEY_ENV: &str = "OPENAI_API_KEY";

pub struct OpenAiGenerator {
    model: String,
    api_url: String,
    api_key: String,
}

impl OpenAiGenerator {
    /// Create an adapter for `model`, reading the API key from
    /// `OPENAI_API_KEY` (and an optional endpoint override from
    /// `OPENAI_API_URL`).
    pub fn from_env(model: &str) -> Result<Self, GenerationError> {
        let api_key = std::env::var(API_KEY_ENV)
            .map_err(|_| GenerationError::MissingCredentials(API_KEY_ENV.to_string()))?;
        let api_url =
            std::env::var("OPENAI_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());

        Ok(Self {
            model: model.to_string(),
            api_url,
            api_key,
        })
    }

    fn content_parts(blocks: &[PromptBlock]) -> Vec<serde_json::Value> {
        blocks
            .iter()
            .map(|block| match block {
                PromptBlock::Text(text) => json!({
                    "type": "text",
                    "text": text,
                }),
                PromptBlock::Image { png_base64 } => json!({
                    "type": "image_url",
                    "image_url": {
                        "url": format!("data:image/png;base64,{png_base64}"),
                    },
                }),
            })
            .collect()
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

impl TextGenerator for OpenAiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn generate(
        &self,
        blocks: &[PromptBlock],
        timeout: Duration,
    ) -> Result<String, GenerationError> {
        let body = json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": Self::content_parts(blocks),
            }],
        });

        log::debug!(
            "calling {} with {} prompt blocks (timeout {:?})",
            self.model,
            blocks.len(),
            timeout
        );

        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GenerationError::Provider(e.to_string()))?;

        let response = client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    GenerationError::Timeout(timeout)
                } else {
                    GenerationError::Provider(e.to_string())
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .map_err(|e| GenerationError::Provider(e.to_string()))?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorResponse>(&text)
                .map(|e| e.error.message)
                .unwrap_or(text);
            return Err(GenerationError::Provider(format!("{status}: {message}")));
        }

        let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| {
            log::error!("{e}. tried to parse: {text:?}");
            GenerationError::Provider(format!("unexpected response shape: {e}"))
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| GenerationError::Provider("response contained no choices".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_api_key_is_credentials_error() {
        // guard against an ambient key leaking into the test environment
        if std::env::var(API_KEY_ENV).is_ok() {
            return;
        }
        let result = OpenAiGenerator::from_env("gpt-4o");
        assert!(matches!(result, Err(GenerationError::MissingCredentials(_))));
    }

    #[test]
    fn test_content_parts_shape() {
        let blocks = vec![
            PromptBlock::Text("hello".to_string()),
            PromptBlock::Image {
                png_base64: "QUJD".to_string(),
            },
        ];

        let parts = OpenAiGenerator::content_parts(&blocks);

        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[0]["text"], "hello");
        assert_eq!(parts[1]["type"], "image_url");
        assert_eq!(
            parts[1]["image_url"]["url"],
            "data:image/png;base64,QUJD"
        );
    }
}
