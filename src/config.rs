//! Configuration types for contextual PDF-to-Markdown conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. Every directory the pipeline touches
//! is an explicit field: the output directory, the asset directory name, the
//! staging directory for raw images, and the directory holding the quota
//! state files. Nothing is inferred from the process working directory.
//!
//! Credentials for the Azure backends come from explicit fields first and,
//! unless [`ConversionConfig::credentials_from_env`] is switched off, from the
//! `AZURE_VISION_*` / `AZURE_TRANSLATOR_*` environment variables.

use crate::backend::{TranslationBackend, VisionBackend};
use crate::context::ContextMode;
use crate::error::Pdf2MdError;
use crate::pipeline::extract::DocumentConverter;
use crate::pipeline::layout::LayoutSource;
use crate::progress::ProgressCallback;
use crate::quota::{Clock, QuotaConfig};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for a contextual PDF-to-Markdown conversion.
///
/// Built via [`ConversionConfig::builder()`] or using
/// [`ConversionConfig::default()`].
///
/// # Example
/// ```rust
/// use contextual_pdf2md::{ContextMode, ConversionConfig, PageSelection};
///
/// let config = ConversionConfig::builder()
///     .pages(PageSelection::Set(vec![0, 1, 2]))
///     .context_mode(ContextMode::NearestBlocks)
///     .wait_if_quota_reached(true)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Pages to convert (0-based). Default: all pages.
    pub pages: PageSelection,

    /// How image context is gathered. Default: [`ContextMode::WholePage`].
    pub context_mode: ContextMode,

    /// Directory the Markdown is written for; image links are relative to it.
    /// Default: the directory of the input PDF.
    pub output_dir: Option<PathBuf>,

    /// Name of the asset directory inside `output_dir`. Default: `assets`.
    pub assets_dir_name: String,

    /// Staging directory the converter writes raw images into.
    /// Default: a temporary directory removed after the run.
    pub work_dir: Option<PathBuf>,

    /// Directory of the `.azure_vision_quota.json` / `.azure_translator_quota.json` files.
    /// Default: `output_dir`.
    pub quota_dir: Option<PathBuf>,

    /// Persist quota state between runs. Default: true.
    pub persist_quota: bool,

    /// Wait for quota windows to roll over instead of skipping. Default: false.
    ///
    /// Waiting stalls the whole (sequential) pipeline, possibly until the
    /// next calendar month when the monthly cap is reached.
    pub wait_if_quota_reached: bool,

    /// Limits for the vision backend. Default: 5 000/month, 20/minute.
    pub vision_quota: QuotaConfig,

    /// Limits for the translation backend. Default: 2 M chars/month, 5/second.
    pub translator_quota: QuotaConfig,

    /// Azure Computer Vision credentials.
    pub vision: Option<AzureVisionConfig>,

    /// Azure Translator credentials.
    pub translator: Option<AzureTranslatorConfig>,

    /// Pre-constructed vision backend. Takes precedence over every other
    /// vision setting.
    pub vision_backend: Option<Arc<dyn VisionBackend>>,

    /// Pre-constructed translation backend. Takes precedence over `translator`.
    pub translation_backend: Option<Arc<dyn TranslationBackend>>,

    /// Use a vision LLM (edgequake-llm provider name, e.g. "openai") instead
    /// of Azure Computer Vision.
    pub llm_vision_provider: Option<String>,

    /// Model for `llm_vision_provider`. Default: `gpt-4.1-nano`.
    pub llm_vision_model: Option<String>,

    /// Read missing credentials from the environment. Default: true.
    pub credentials_from_env: bool,

    /// Translate descriptions. Default: true (only effective with a backend).
    pub translate: bool,

    /// Language of descriptions returned by the vision backend. Default: "en".
    pub source_language: String,

    /// Language descriptions are translated into. Default: "fr".
    pub target_language: String,

    /// Minimum tag confidence to appear in a description. Default: 0.7.
    pub tag_confidence_threshold: f32,

    /// How many of the top tags are considered. Default: 5.
    pub max_tags: usize,

    /// Keywords appended to a description. Default: 3.
    pub max_keywords: usize,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Per-request timeout for backend calls in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Retries for the vision LLM backend. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    pub retry_backoff_ms: u64,

    /// Document-to-Markdown converter. Default: the pdfium converter.
    pub converter: Option<Arc<dyn DocumentConverter>>,

    /// Source of page layouts for context extraction. Default: pdfium.
    pub layout_source: Option<Arc<dyn LayoutSource>>,

    /// Clock used by the quota trackers. Default: system clock.
    pub clock: Option<Arc<dyn Clock>>,

    /// Per-image progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            pages: PageSelection::default(),
            context_mode: ContextMode::default(),
            output_dir: None,
            assets_dir_name: "assets".to_string(),
            work_dir: None,
            quota_dir: None,
            persist_quota: true,
            wait_if_quota_reached: false,
            vision_quota: QuotaConfig::vision(),
            translator_quota: QuotaConfig::translator(),
            vision: None,
            translator: None,
            vision_backend: None,
            translation_backend: None,
            llm_vision_provider: None,
            llm_vision_model: None,
            credentials_from_env: true,
            translate: true,
            source_language: "en".to_string(),
            target_language: "fr".to_string(),
            tag_confidence_threshold: 0.7,
            max_tags: 5,
            max_keywords: 3,
            password: None,
            api_timeout_secs: 60,
            max_retries: 3,
            retry_backoff_ms: 500,
            converter: None,
            layout_source: None,
            clock: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("pages", &self.pages)
            .field("context_mode", &self.context_mode)
            .field("output_dir", &self.output_dir)
            .field("assets_dir_name", &self.assets_dir_name)
            .field("work_dir", &self.work_dir)
            .field("quota_dir", &self.quota_dir)
            .field("persist_quota", &self.persist_quota)
            .field("wait_if_quota_reached", &self.wait_if_quota_reached)
            .field("vision", &self.vision)
            .field("translator", &self.translator)
            .field("vision_backend", &self.vision_backend.as_ref().map(|b| b.name().to_string()))
            .field(
                "translation_backend",
                &self.translation_backend.as_ref().map(|b| b.name().to_string()),
            )
            .field("llm_vision_provider", &self.llm_vision_provider)
            .field("llm_vision_model", &self.llm_vision_model)
            .field("translate", &self.translate)
            .field("source_language", &self.source_language)
            .field("target_language", &self.target_language)
            .field("converter", &self.converter.as_ref().map(|_| "<dyn DocumentConverter>"))
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Vision credentials: explicit, else from the environment.
    pub fn resolved_vision(&self) -> Option<AzureVisionConfig> {
        self.vision.clone().or_else(|| {
            if self.credentials_from_env {
                AzureVisionConfig::from_env()
            } else {
                None
            }
        })
    }

    /// Translator credentials: explicit, else from the environment.
    pub fn resolved_translator(&self) -> Option<AzureTranslatorConfig> {
        self.translator.clone().or_else(|| {
            if self.credentials_from_env {
                AzureTranslatorConfig::from_env()
            } else {
                None
            }
        })
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn context_mode(mut self, mode: ContextMode) -> Self {
        self.config.context_mode = mode;
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = Some(dir.into());
        self
    }

    pub fn assets_dir_name(mut self, name: impl Into<String>) -> Self {
        self.config.assets_dir_name = name.into();
        self
    }

    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.work_dir = Some(dir.into());
        self
    }

    pub fn quota_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.quota_dir = Some(dir.into());
        self
    }

    pub fn persist_quota(mut self, v: bool) -> Self {
        self.config.persist_quota = v;
        self
    }

    pub fn wait_if_quota_reached(mut self, v: bool) -> Self {
        self.config.wait_if_quota_reached = v;
        self
    }

    pub fn vision_quota(mut self, quota: QuotaConfig) -> Self {
        self.config.vision_quota = quota;
        self
    }

    pub fn translator_quota(mut self, quota: QuotaConfig) -> Self {
        self.config.translator_quota = quota;
        self
    }

    pub fn vision(mut self, creds: AzureVisionConfig) -> Self {
        self.config.vision = Some(creds);
        self
    }

    pub fn translator(mut self, creds: AzureTranslatorConfig) -> Self {
        self.config.translator = Some(creds);
        self
    }

    pub fn vision_backend(mut self, backend: Arc<dyn VisionBackend>) -> Self {
        self.config.vision_backend = Some(backend);
        self
    }

    pub fn translation_backend(mut self, backend: Arc<dyn TranslationBackend>) -> Self {
        self.config.translation_backend = Some(backend);
        self
    }

    pub fn llm_vision_provider(mut self, name: impl Into<String>) -> Self {
        self.config.llm_vision_provider = Some(name.into());
        self
    }

    pub fn llm_vision_model(mut self, model: impl Into<String>) -> Self {
        self.config.llm_vision_model = Some(model.into());
        self
    }

    pub fn credentials_from_env(mut self, v: bool) -> Self {
        self.config.credentials_from_env = v;
        self
    }

    pub fn translate(mut self, v: bool) -> Self {
        self.config.translate = v;
        self
    }

    pub fn source_language(mut self, lang: impl Into<String>) -> Self {
        self.config.source_language = lang.into();
        self
    }

    pub fn target_language(mut self, lang: impl Into<String>) -> Self {
        self.config.target_language = lang.into();
        self
    }

    pub fn tag_confidence_threshold(mut self, t: f32) -> Self {
        self.config.tag_confidence_threshold = t.clamp(0.0, 1.0);
        self
    }

    pub fn max_tags(mut self, n: usize) -> Self {
        self.config.max_tags = n;
        self
    }

    pub fn max_keywords(mut self, n: usize) -> Self {
        self.config.max_keywords = n;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn converter(mut self, converter: Arc<dyn DocumentConverter>) -> Self {
        self.config.converter = Some(converter);
        self
    }

    pub fn layout_source(mut self, source: Arc<dyn LayoutSource>) -> Self {
        self.config.layout_source = Some(source);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.config.clock = Some(clock);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, Pdf2MdError> {
        let c = &self.config;
        let assets = std::path::Path::new(&c.assets_dir_name);
        if c.assets_dir_name.trim().is_empty() || assets.is_absolute() {
            return Err(Pdf2MdError::InvalidConfig(format!(
                "assets directory must be a relative name, got {:?}",
                c.assets_dir_name
            )));
        }
        if c.api_timeout_secs == 0 {
            return Err(Pdf2MdError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        if c.source_language.trim().is_empty() || c.target_language.trim().is_empty() {
            return Err(Pdf2MdError::InvalidConfig(
                "translation languages must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Credentials ──────────────────────────────────────────────────────────

/// Azure Computer Vision endpoint and key.
#[derive(Clone, Serialize, Deserialize)]
pub struct AzureVisionConfig {
    pub endpoint: String,
    pub key: String,
}

impl AzureVisionConfig {
    pub fn new(endpoint: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            key: key.into(),
        }
    }

    /// `AZURE_VISION_ENDPOINT` + `AZURE_VISION_KEY`, both non-empty.
    pub fn from_env() -> Option<Self> {
        Some(Self::new(non_empty_env("AZURE_VISION_ENDPOINT")?, non_empty_env("AZURE_VISION_KEY")?))
    }
}

impl fmt::Debug for AzureVisionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureVisionConfig")
            .field("endpoint", &self.endpoint)
            .field("key", &mask(&self.key))
            .finish()
    }
}

/// Azure Translator endpoint, key and region.
#[derive(Clone, Serialize, Deserialize)]
pub struct AzureTranslatorConfig {
    pub endpoint: String,
    pub key: String,
    pub region: String,
}

impl AzureTranslatorConfig {
    pub fn new(endpoint: impl Into<String>, key: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            key: key.into(),
            region: region.into(),
        }
    }

    /// `AZURE_TRANSLATOR_ENDPOINT`, `_KEY` and `_REGION`, all non-empty.
    pub fn from_env() -> Option<Self> {
        Some(Self::new(
            non_empty_env("AZURE_TRANSLATOR_ENDPOINT")?,
            non_empty_env("AZURE_TRANSLATOR_KEY")?,
            non_empty_env("AZURE_TRANSLATOR_REGION")?,
        ))
    }
}

impl fmt::Debug for AzureTranslatorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureTranslatorConfig")
            .field("endpoint", &self.endpoint)
            .field("key", &mask(&self.key))
            .field("region", &self.region)
            .finish()
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// `***abcd`: only the last four characters of a secret.
fn mask(secret: &str) -> String {
    let tail: String = secret
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    if secret.chars().count() > 4 {
        format!("***{tail}")
    } else {
        "***".to_string()
    }
}

// ── Page selection ───────────────────────────────────────────────────────

/// Specifies which pages of the PDF to convert. Indices are 0-based.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSelection {
    /// Convert all pages (default).
    #[default]
    All,
    /// Convert a single page.
    Single(usize),
    /// Convert a contiguous range of pages (inclusive).
    Range(usize, usize),
    /// Convert specific pages.
    Set(Vec<usize>),
}

impl PageSelection {
    /// Whether page `index` is selected.
    pub fn contains(&self, index: usize) -> bool {
        match self {
            PageSelection::All => true,
            PageSelection::Single(p) => *p == index,
            PageSelection::Range(start, end) => (*start..=*end).contains(&index),
            PageSelection::Set(pages) => pages.contains(&index),
        }
    }

    /// Expand the selection into a sorted, deduplicated list of page indices
    /// below `total_pages`.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = match self {
            PageSelection::All => (0..total_pages).collect(),
            PageSelection::Single(p) => vec![*p],
            PageSelection::Range(start, end) => {
                (*start..end.saturating_add(1).min(total_pages)).collect()
            }
            PageSelection::Set(pages) => pages.clone(),
        };
        indices.retain(|&p| p < total_pages);
        indices.sort_unstable();
        indices.dedup();
        indices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = ConversionConfig::default();
        assert_eq!(c.assets_dir_name, "assets");
        assert_eq!(c.target_language, "fr");
        assert_eq!(c.max_keywords, 3);
        assert_eq!(c.max_tags, 5);
        assert!((c.tag_confidence_threshold - 0.7).abs() < f32::EPSILON);
        assert_eq!(c.vision_quota.rate_limit, 20);
        assert_eq!(c.translator_quota.monthly_limit, 2_000_000);
        assert!(!c.wait_if_quota_reached);
    }

    #[test]
    fn builder_rejects_absolute_assets_dir() {
        let err = ConversionConfig::builder()
            .assets_dir_name("/tmp/assets")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("relative"));
    }

    #[test]
    fn builder_rejects_zero_timeout() {
        assert!(ConversionConfig::builder().api_timeout_secs(0).build().is_err());
    }

    #[test]
    fn builder_clamps_threshold() {
        let c = ConversionConfig::builder()
            .tag_confidence_threshold(3.0)
            .build()
            .unwrap();
        assert_eq!(c.tag_confidence_threshold, 1.0);
    }

    #[test]
    fn explicit_credentials_win_over_env() {
        let c = ConversionConfig::builder()
            .vision(AzureVisionConfig::new("https://v.example", "k1"))
            .credentials_from_env(false)
            .build()
            .unwrap();
        assert_eq!(c.resolved_vision().unwrap().endpoint, "https://v.example");
        assert!(c.resolved_translator().is_none());
    }

    #[test]
    fn debug_masks_keys() {
        let creds = AzureTranslatorConfig::new("https://t.example", "supersecret1234", "westeurope");
        let dbg = format!("{creds:?}");
        assert!(dbg.contains("***1234"));
        assert!(!dbg.contains("supersecret"));
    }

    #[test]
    fn page_selection_contains() {
        assert!(PageSelection::All.contains(99));
        assert!(PageSelection::Single(2).contains(2));
        assert!(!PageSelection::Single(2).contains(3));
        assert!(PageSelection::Range(1, 3).contains(3));
        assert!(!PageSelection::Range(1, 3).contains(0));
        assert!(PageSelection::Set(vec![0, 4]).contains(4));
    }

    #[test]
    fn page_selection_to_indices() {
        assert_eq!(PageSelection::All.to_indices(3), vec![0, 1, 2]);
        assert_eq!(PageSelection::Range(1, 10).to_indices(4), vec![1, 2, 3]);
        assert_eq!(PageSelection::Set(vec![5, 0, 0, 2]).to_indices(4), vec![0, 2]);
        assert!(PageSelection::Single(7).to_indices(3).is_empty());
    }

    #[test]
    fn open_ended_range_is_clamped_to_the_document() {
        assert_eq!(PageSelection::Range(0, usize::MAX).to_indices(3), vec![0, 1, 2]);
        assert_eq!(PageSelection::Range(2, usize::MAX).to_indices(3), vec![2]);
        assert!(PageSelection::Range(5, usize::MAX).to_indices(3).is_empty());
        assert!(PageSelection::Range(0, usize::MAX).to_indices(0).is_empty());
    }
}
