//! # contextual-pdf2md
//!
//! Convert PDF documents to Markdown whose images carry useful alt text.
//!
//! ## Why this crate?
//!
//! A PDF-to-Markdown converter leaves `![](image.png)` placeholders behind.
//! A vision service can caption those images, but a caption alone ("a
//! screenshot") says little about *why* the image is there. This crate
//! captions each image, appends the domain keywords found in the text
//! around it, optionally translates the result, and writes it into the
//! Markdown, all while staying inside the monthly and per-minute quotas of
//! the paid backends.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input     check the file is a readable PDF
//!  ├─ 2. Context   page text (or nearest text blocks) per image, via pdfium
//!  ├─ 3. Convert   Markdown with empty placeholders + raw images
//!  ├─ 4. Assets    move images to assets/image_<page>-<index>.png
//!  ├─ 5. Describe  caption + tags ─► keywords ─► translation (quota-gated)
//!  └─ 6. Embed     ![description](assets/image_<page>-<index>.png)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use contextual_pdf2md::{convert_to_file, ConversionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Backends from AZURE_VISION_* / AZURE_TRANSLATOR_* when set
//!     let config = ConversionConfig::default();
//!     let output = convert_to_file("course.pdf", "course.md", &config).await?;
//!     eprintln!("{}/{} images described",
//!         output.stats.described_images,
//!         output.stats.total_images);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2md` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! contextual-pdf2md = { version = "0.1", default-features = false }
//! ```
//!
//! ## Backends
//!
//! | Backend | Configured by | Quota |
//! |---------|---------------|-------|
//! | Azure Computer Vision | `AZURE_VISION_ENDPOINT`, `AZURE_VISION_KEY` | 5 000/month, 20/minute |
//! | Vision LLM (edgequake-llm) | `llm_vision_provider` + provider API key | same as vision |
//! | Azure Translator | `AZURE_TRANSLATOR_ENDPOINT`, `_KEY`, `_REGION` | 2 M chars/month, 5/second |
//!
//! Without any backend the conversion still runs; images get empty alt text.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backend;
pub mod config;
pub mod context;
pub mod convert;
pub mod describe;
pub mod error;
pub mod keywords;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod quota;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backend::{Caption, ImageAnalysis, Tag, TranslationBackend, VisionBackend, VisualFeature};
pub use config::{
    AzureTranslatorConfig, AzureVisionConfig, ConversionConfig, ConversionConfigBuilder,
    PageSelection,
};
pub use context::{BoundingBox, ContextMap, ContextMode, PageLayout, TextBlock};
pub use convert::{
    apply_descriptions, apply_descriptions_to_file, convert, convert_sync, convert_to_file,
    default_output_path, inspect_context,
};
pub use describe::{base_description, compose, DescribeOutcome, DescriptionComposer, ImageDescriber};
pub use error::{BackendError, ImageError, Pdf2MdError};
pub use keywords::{extract_keywords, KeywordExtractor};
pub use output::{ConversionOutput, ConversionStats, ImageRecord, PageContextReport};
pub use pipeline::extract::{DocumentConverter, RawConversion, RawImage};
pub use pipeline::layout::LayoutSource;
pub use pipeline::substitute::{ApplyReport, DescriptionCatalog, MarkdownDocument};
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use quota::{
    Clock, JsonFileStore, ManualClock, MemoryStore, QuotaConfig, QuotaStore, QuotaTracker,
    SystemClock, TimeUnit,
};
