//! Image descriptions: vision caption + tags, enhanced with context keywords,
//! optionally translated.
//!
//! ```text
//! image bytes ──► VisionBackend ──► base_description()      "a screenshot. Tags: text"
//!                   (quota-gated)          │
//! context text ──► keywords ──► compose()  ▼                "… (related to: scratch, variable)"
//!                                          │
//!                 TranslationBackend ◄─────┘                "une capture d'écran …"
//!                   (quota-gated)
//! ```
//!
//! Nothing in here fails the conversion. A missing backend, an exhausted
//! quota or a backend error each degrade to a fallback value (empty
//! description, untranslated text) and are reported through
//! [`DescribeOutcome::error`] or the log.

use crate::backend::{ImageAnalysis, TranslationBackend, VisionBackend, DEFAULT_FEATURES};
use crate::error::ImageError;
use crate::keywords::KeywordExtractor;
use crate::quota::QuotaTracker;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

// ── Composition ──────────────────────────────────────────────────────────

/// Appends context keywords to a base description.
#[derive(Debug, Clone)]
pub struct DescriptionComposer {
    label: String,
    max_keywords: usize,
    extractor: KeywordExtractor,
}

impl Default for DescriptionComposer {
    fn default() -> Self {
        Self {
            label: "related to".to_string(),
            max_keywords: 3,
            extractor: KeywordExtractor::default(),
        }
    }
}

impl DescriptionComposer {
    pub fn new(label: impl Into<String>, max_keywords: usize, extractor: KeywordExtractor) -> Self {
        Self {
            label: label.into(),
            max_keywords,
            extractor,
        }
    }

    pub fn with_max_keywords(mut self, n: usize) -> Self {
        self.max_keywords = n;
        self
    }

    /// `base (label: k1, k2, k3)`, or `base` unchanged when either input is
    /// empty or the context yields no keyword.
    pub fn compose(&self, base: &str, context: &str) -> String {
        if base.is_empty() || context.trim().is_empty() || self.max_keywords == 0 {
            return base.to_string();
        }
        let keywords = self.extractor.extract(context);
        if keywords.is_empty() {
            return base.to_string();
        }
        let shown: Vec<&str> = keywords
            .iter()
            .take(self.max_keywords)
            .map(String::as_str)
            .collect();
        format!("{} ({}: {})", base, self.label, shown.join(", "))
    }
}

/// [`DescriptionComposer::compose`] with the default composer.
pub fn compose(base: &str, context: &str) -> String {
    DescriptionComposer::default().compose(base, context)
}

/// First caption, then the confident tags among the first `max_tags`
/// returned, as `"caption. Tags: a, b"`.
pub fn base_description(analysis: &ImageAnalysis, threshold: f32, max_tags: usize) -> String {
    let mut parts = Vec::with_capacity(2);

    if let Some(caption) = analysis.captions.first() {
        let text = caption.text.trim();
        if !text.is_empty() {
            parts.push(text.to_string());
        }
    }

    let tags: Vec<&str> = analysis
        .tags
        .iter()
        .take(max_tags)
        .filter(|t| t.confidence > threshold)
        .map(|t| t.name.as_str())
        .collect();
    if !tags.is_empty() {
        parts.push(format!("Tags: {}", tags.join(", ")));
    }

    parts.join(". ")
}

// ── Describer ────────────────────────────────────────────────────────────

/// What happened while describing one image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DescribeOutcome {
    /// Caption + tags as returned by the vision backend.
    pub raw: Option<String>,
    /// `raw` with context keywords appended.
    pub enhanced: Option<String>,
    /// Final text, possibly translated. Empty when no description could be
    /// produced.
    pub description: String,
    pub translated: bool,
    pub error: Option<ImageError>,
}

impl DescribeOutcome {
    fn failed(error: ImageError) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }
}

/// Quota-gated vision and translation calls for a whole conversion.
///
/// Holds the two quota trackers, so one describer is created per run and
/// used for every image in turn.
pub struct ImageDescriber {
    vision: Option<(Arc<dyn VisionBackend>, QuotaTracker)>,
    translator: Option<(Arc<dyn TranslationBackend>, QuotaTracker)>,
    composer: DescriptionComposer,
    source_language: String,
    target_language: String,
    tag_confidence_threshold: f32,
    max_tags: usize,
}

impl std::fmt::Debug for ImageDescriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageDescriber")
            .field("vision", &self.vision_name())
            .field("translator", &self.translation_name())
            .field("composer", &self.composer)
            .field("source_language", &self.source_language)
            .field("target_language", &self.target_language)
            .finish()
    }
}

impl Default for ImageDescriber {
    fn default() -> Self {
        Self {
            vision: None,
            translator: None,
            composer: DescriptionComposer::default(),
            source_language: "en".to_string(),
            target_language: "fr".to_string(),
            tag_confidence_threshold: 0.7,
            max_tags: 5,
        }
    }
}

impl ImageDescriber {
    pub fn new(composer: DescriptionComposer) -> Self {
        Self {
            composer,
            ..Default::default()
        }
    }

    pub fn with_vision(mut self, backend: Arc<dyn VisionBackend>, quota: QuotaTracker) -> Self {
        self.vision = Some((backend, quota));
        self
    }

    pub fn with_translation(
        mut self,
        backend: Arc<dyn TranslationBackend>,
        quota: QuotaTracker,
    ) -> Self {
        self.translator = Some((backend, quota));
        self
    }

    pub fn languages(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.source_language = source.into();
        self.target_language = target.into();
        self
    }

    pub fn tag_filter(mut self, threshold: f32, max_tags: usize) -> Self {
        self.tag_confidence_threshold = threshold;
        self.max_tags = max_tags;
        self
    }

    pub fn has_vision(&self) -> bool {
        self.vision.is_some()
    }

    pub fn has_translation(&self) -> bool {
        self.translator.is_some()
    }

    pub fn vision_name(&self) -> Option<String> {
        self.vision.as_ref().map(|(b, _)| b.name().to_string())
    }

    pub fn translation_name(&self) -> Option<String> {
        self.translator.as_ref().map(|(b, _)| b.name().to_string())
    }

    /// Describe the image at `path`, enhancing with `context`.
    pub async fn describe(&mut self, path: &Path, context: &str) -> DescribeOutcome {
        let Some((backend, quota)) = self.vision.as_mut() else {
            return DescribeOutcome::default();
        };

        let bytes = match tokio::fs::read(path).await {
            Ok(b) => b,
            Err(e) => {
                warn!("Cannot read image {}: {}", path.display(), e);
                return DescribeOutcome::failed(ImageError::ReadFailed {
                    path: path.to_path_buf(),
                    detail: e.to_string(),
                });
            }
        };

        if !quota.can_make_request().await {
            info!("{} quota reached; skipping {}", quota.service(), path.display());
            return DescribeOutcome::failed(ImageError::QuotaExhausted {
                service: quota.service().to_string(),
            });
        }

        let analysis = match backend
            .analyze(&bytes, DEFAULT_FEATURES, &self.source_language)
            .await
        {
            Ok(a) => a,
            Err(e) => {
                warn!("{} failed for {}: {}", backend.name(), path.display(), e);
                return DescribeOutcome::failed(ImageError::VisionFailed {
                    path: path.to_path_buf(),
                    detail: e.to_string(),
                });
            }
        };
        quota.increment(1);

        let raw = base_description(&analysis, self.tag_confidence_threshold, self.max_tags);
        let enhanced = self.composer.compose(&raw, context);
        debug!("{}: {:?}", path.display(), enhanced);

        let (description, translated) = match self.try_translate(&enhanced).await {
            Some(t) => (t, true),
            None => (enhanced.clone(), false),
        };

        DescribeOutcome {
            raw: Some(raw),
            enhanced: Some(enhanced),
            description,
            translated,
            error: None,
        }
    }

    /// Translate `text`, or return it unchanged when no translator is
    /// configured, its quota is exhausted, or the call fails.
    pub async fn translate(&mut self, text: &str) -> String {
        self.try_translate(text)
            .await
            .unwrap_or_else(|| text.to_string())
    }

    async fn try_translate(&mut self, text: &str) -> Option<String> {
        let (backend, quota) = self.translator.as_mut()?;
        if text.trim().is_empty() {
            return None;
        }

        if !quota.can_make_request().await {
            info!("{} quota reached; keeping untranslated text", quota.service());
            return None;
        }

        match backend
            .translate(text, &self.source_language, &self.target_language)
            .await
        {
            Ok(translated) => {
                quota.record_usage(text.chars().count() as u64);
                Some(translated)
            }
            Err(e) => {
                warn!("{} failed for {:?}: {}", backend.name(), text, e);
                None
            }
        }
    }
}
