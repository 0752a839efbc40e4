//! External analysis services: image captioning and text translation.
//!
//! The pipeline only talks to the two traits below. Two vision backends and
//! one translation backend ship with the crate:
//!
//! * [`azure::AzureVision`]: Azure Computer Vision `analyze` REST API;
//! * [`llm::LlmVision`]: any vision-capable LLM reachable through
//!   `edgequake-llm` (OpenAI, Anthropic, Gemini, Ollama…);
//! * [`azure::AzureTranslator`]: Azure Translator v3 REST API.
//!
//! Backends are called one request at a time and never retried by the
//! pipeline; quota bookkeeping happens in [`crate::describe::ImageDescriber`].

pub mod azure;
pub mod llm;

use crate::error::BackendError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Analysis features a vision backend is asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VisualFeature {
    Caption,
    Tags,
    Objects,
}

/// The features the pipeline requests for every image.
pub const DEFAULT_FEATURES: &[VisualFeature] =
    &[VisualFeature::Caption, VisualFeature::Tags, VisualFeature::Objects];

/// A natural-language caption.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Caption {
    pub text: String,
    #[serde(default)]
    pub confidence: f32,
}

/// A content tag, e.g. `screenshot` or `text`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    #[serde(default)]
    pub confidence: f32,
}

/// What a vision backend says about one image. Captions and tags are
/// ordered best first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageAnalysis {
    #[serde(default)]
    pub captions: Vec<Caption>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl ImageAnalysis {
    /// Analysis with a single caption and no tags.
    pub fn captioned(text: impl Into<String>) -> Self {
        Self {
            captions: vec![Caption {
                text: text.into(),
                confidence: 1.0,
            }],
            tags: Vec::new(),
        }
    }

    pub fn with_tag(mut self, name: impl Into<String>, confidence: f32) -> Self {
        self.tags.push(Tag {
            name: name.into(),
            confidence,
        });
        self
    }
}

/// Describes images.
#[async_trait]
pub trait VisionBackend: Send + Sync {
    /// Short name used in logs and quota file names.
    fn name(&self) -> &str;

    async fn analyze(
        &self,
        image: &[u8],
        features: &[VisualFeature],
        language: &str,
    ) -> Result<ImageAnalysis, BackendError>;
}

/// Translates text.
#[async_trait]
pub trait TranslationBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn translate(&self, text: &str, from: &str, to: &str) -> Result<String, BackendError>;
}
