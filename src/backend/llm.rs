//! Vision-LLM backend: caption and tag an image with any multimodal model
//! reachable through `edgequake-llm`.
//!
//! The model is asked for a small JSON object so the answer maps onto the
//! same [`ImageAnalysis`] shape Azure returns:
//!
//! ```json
//! {"caption": "a screenshot of a block editor", "tags": [{"name": "screenshot", "confidence": 0.9}]}
//! ```
//!
//! Models do not always obey; a non-JSON answer is kept as the caption.
//!
//! ## Retry Strategy
//!
//! Transient provider errors are retried with exponential backoff
//! (`retry_backoff_ms * 2^attempt`). The quota tracker counts the logical
//! request once, whatever the number of attempts.

use super::{ImageAnalysis, Tag, VisionBackend, VisualFeature};
use crate::error::BackendError;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::io::Cursor;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// Default model when only a provider name is given.
pub const DEFAULT_VISION_MODEL: &str = "gpt-4.1-nano";

/// System prompt for image description.
pub const DESCRIBE_SYSTEM_PROMPT: &str = r#"You describe images extracted from documents so they can be used as alt text.

Answer with ONE JSON object and nothing else:
{"caption": "<one short sentence>", "tags": [{"name": "<single word>", "confidence": <0.0-1.0>}]}

Rules:
- The caption is a plain description of what is visible, no more than 20 words.
- Give at most 8 tags, most relevant first.
- Do not wrap the JSON in code fences."#;

fn user_instruction(features: &[VisualFeature], language: &str) -> String {
    let wants_tags = features.contains(&VisualFeature::Tags);
    format!(
        "Describe this image in language code '{}'.{}",
        language,
        if wants_tags { "" } else { " Return an empty tags list." }
    )
}

/// Vision backend driven by an `edgequake-llm` provider.
pub struct LlmVision {
    provider: Arc<dyn LLMProvider>,
    label: String,
    max_retries: u32,
    retry_backoff_ms: u64,
}

impl std::fmt::Debug for LlmVision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmVision")
            .field("label", &self.label)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl LlmVision {
    pub fn new(provider: Arc<dyn LLMProvider>, label: impl Into<String>) -> Self {
        Self {
            provider,
            label: label.into(),
            max_retries: 3,
            retry_backoff_ms: 500,
        }
    }

    /// Instantiate a named provider (`openai`, `anthropic`, `gemini`, …).
    /// The API key is read from the provider's usual environment variable.
    pub fn from_provider_name(name: &str, model: Option<&str>) -> Result<Self, BackendError> {
        let model = model.unwrap_or(DEFAULT_VISION_MODEL);
        let provider = ProviderFactory::create_llm_provider(name, model)
            .map_err(|e| BackendError::Llm(format!("provider '{name}' not configured: {e}")))?;
        Ok(Self::new(provider, format!("llm-{name}")))
    }

    pub fn with_retries(mut self, max_retries: u32, retry_backoff_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.retry_backoff_ms = retry_backoff_ms;
        self
    }
}

#[async_trait]
impl VisionBackend for LlmVision {
    fn name(&self) -> &str {
        &self.label
    }

    async fn analyze(
        &self,
        image: &[u8],
        features: &[VisualFeature],
        language: &str,
    ) -> Result<ImageAnalysis, BackendError> {
        let image_data = encode_image(image)?;
        let messages = vec![
            ChatMessage::system(DESCRIBE_SYSTEM_PROMPT),
            ChatMessage::user_with_images(user_instruction(features, language), vec![image_data]),
        ];
        let options = CompletionOptions {
            temperature: Some(0.1),
            max_tokens: Some(400),
            ..Default::default()
        };

        let mut last_err: Option<String> = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!(
                    "{}: retry {}/{} after {}ms",
                    self.label, attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            match self.provider.chat(&messages, Some(&options)).await {
                Ok(response) => {
                    debug!(
                        "{}: {} input tokens, {} output tokens",
                        self.label, response.prompt_tokens, response.completion_tokens
                    );
                    return Ok(parse_answer(&response.content));
                }
                Err(e) => {
                    warn!("{}: attempt {} failed: {}", self.label, attempt + 1, e);
                    last_err = Some(e.to_string());
                }
            }
        }

        Err(BackendError::Llm(
            last_err.unwrap_or_else(|| "Unknown error".to_string()),
        ))
    }
}

/// Wrap image bytes as base64 `ImageData`; anything that is neither PNG
/// nor JPEG is re-encoded as PNG first.
fn encode_image(bytes: &[u8]) -> Result<ImageData, BackendError> {
    let invalid = |e: image::ImageError| BackendError::MalformedResponse(format!("unreadable image: {e}"));
    let (data, mime) = match image::guess_format(bytes).map_err(invalid)? {
        image::ImageFormat::Png => (bytes.to_vec(), "image/png"),
        image::ImageFormat::Jpeg => (bytes.to_vec(), "image/jpeg"),
        _ => {
            let img = image::load_from_memory(bytes).map_err(invalid)?;
            let mut buf = Vec::new();
            img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
                .map_err(invalid)?;
            (buf, "image/png")
        }
    };
    Ok(ImageData::new(STANDARD.encode(&data), mime).with_detail("high"))
}

#[derive(Debug, Deserialize)]
struct Answer {
    #[serde(default)]
    caption: String,
    #[serde(default)]
    tags: Vec<Tag>,
}

static RE_JSON_OBJECT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").unwrap());

/// Map the model's answer onto an [`ImageAnalysis`].
fn parse_answer(content: &str) -> ImageAnalysis {
    let parsed = RE_JSON_OBJECT
        .find(content)
        .and_then(|m| serde_json::from_str::<Answer>(m.as_str()).ok());

    match parsed {
        Some(answer) => {
            let mut analysis = ImageAnalysis {
                captions: Vec::new(),
                tags: answer.tags,
            };
            if !answer.caption.trim().is_empty() {
                analysis.captions.push(super::Caption {
                    text: answer.caption.trim().to_string(),
                    confidence: 1.0,
                });
            }
            analysis
        }
        None => {
            let text = content.trim();
            if text.is_empty() {
                ImageAnalysis::default()
            } else {
                ImageAnalysis::captioned(text)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgba, RgbaImage};

    fn png_bytes() -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([255, 0, 0, 255])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn encode_png_keeps_bytes() {
        let bytes = png_bytes();
        let data = encode_image(&bytes).expect("encode should succeed");
        assert_eq!(data.mime_type, "image/png");
        assert_eq!(STANDARD.decode(&data.data).unwrap(), bytes);
    }

    #[test]
    fn encode_garbage_fails() {
        assert!(encode_image(b"definitely not an image").is_err());
    }

    #[test]
    fn parse_json_answer() {
        let a = parse_answer(
            r#"{"caption": "a screenshot", "tags": [{"name": "screenshot", "confidence": 0.93}]}"#,
        );
        assert_eq!(a.captions[0].text, "a screenshot");
        assert_eq!(a.tags[0].name, "screenshot");
    }

    #[test]
    fn parse_fenced_json_answer() {
        let a = parse_answer("```json\n{\"caption\": \"a cat\", \"tags\": []}\n```");
        assert_eq!(a.captions[0].text, "a cat");
        assert!(a.tags.is_empty());
    }

    #[test]
    fn parse_plain_text_answer() {
        let a = parse_answer("A diagram of a loop.");
        assert_eq!(a.captions[0].text, "A diagram of a loop.");
    }

    #[test]
    fn parse_empty_answer() {
        assert_eq!(parse_answer("  "), ImageAnalysis::default());
    }

    #[test]
    fn instruction_mentions_language() {
        assert!(user_instruction(super::super::DEFAULT_FEATURES, "en").contains("'en'"));
        assert!(user_instruction(&[VisualFeature::Caption], "fr").contains("empty tags"));
    }
}
