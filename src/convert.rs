//! Conversion entry points: the image pipeline orchestrator.
//!
//! ## Step order
//!
//! ```text
//! validate input ─► context map ─► document → raw Markdown + raw images
//!                                              │
//!        for each image, in document order:    ▼
//!          move to assets/image_p-i.png ─► look up context ─► describe ─► embed
//! ```
//!
//! The order is fixed: context is read before the converter runs, and each
//! image is fully handled (moved, described, embedded) before the next one
//! starts. Backend calls are never concurrent, so quota accounting stays
//! exact and a quota wait simply pauses the run.
//!
//! Only input and conversion failures are fatal. Everything that can go
//! wrong per image ends up in [`ImageRecord::error`].

use crate::backend::azure::{AzureTranslator, AzureVision};
use crate::backend::llm::LlmVision;
use crate::backend::{TranslationBackend, VisionBackend};
use crate::config::ConversionConfig;
use crate::context::extract_page_context;
use crate::describe::{DescriptionComposer, ImageDescriber};
use crate::error::{ImageError, Pdf2MdError};
use crate::keywords::KeywordExtractor;
use crate::output::{ConversionOutput, ConversionStats, ImageRecord, PageContextReport};
use crate::pipeline::assets;
use crate::pipeline::extract::{DocumentConverter, PdfiumConverter};
use crate::pipeline::layout::{LayoutSource, PdfiumLayoutSource};
use crate::pipeline::substitute::{self, ApplyReport, DescriptionCatalog, MarkdownDocument};
use crate::pipeline::{input, postprocess};
use crate::quota::{Clock, JsonFileStore, MemoryStore, QuotaConfig, QuotaStore, QuotaTracker, SystemClock};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Quota state file of the vision backend, inside the quota directory.
pub const VISION_QUOTA_FILE: &str = ".azure_vision_quota.json";
/// Quota state file of the translation backend.
pub const TRANSLATOR_QUOTA_FILE: &str = ".azure_translator_quota.json";

/// Convert a PDF to Markdown with described images.
///
/// Images are moved into `{output_dir}/{assets_dir_name}` and linked
/// relative to `output_dir` (default: the PDF's directory).
///
/// # Errors
/// Returns `Err(Pdf2MdError)` only for fatal errors:
/// - File not found / permission denied / not a PDF
/// - The document converter failed
/// - The asset or work directory cannot be created
pub async fn convert(
    input: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Pdf2MdError> {
    let total_start = Instant::now();
    let pdf_path = input::resolve_input(input.as_ref())?;
    info!("Starting conversion: {}", pdf_path.display());

    let output_dir = config
        .output_dir
        .clone()
        .unwrap_or_else(|| parent_dir(&pdf_path));
    let assets_dir = output_dir.join(&config.assets_dir_name);
    create_dir(&assets_dir).await?;

    let mut describer = build_describer(config, &output_dir);

    // ── (a) Context ──────────────────────────────────────────────────────
    let layout_source: Arc<dyn LayoutSource> = config
        .layout_source
        .clone()
        .unwrap_or_else(|| Arc::new(PdfiumLayoutSource));
    let context_map = extract_page_context(layout_source.as_ref(), &pdf_path, config).await;

    // ── (b) Markdown + raw images ────────────────────────────────────────
    let (work_dir, _work_guard) = work_dir(config).await?;
    let converter: Arc<dyn DocumentConverter> = config
        .converter
        .clone()
        .unwrap_or_else(|| Arc::new(PdfiumConverter));

    let conversion_start = Instant::now();
    let raw = converter
        .to_markdown(&pdf_path, &config.pages, &work_dir, config.password.as_deref())
        .await?;
    let conversion_duration_ms = conversion_start.elapsed().as_millis() as u64;
    info!(
        "Converter produced {} chars and {} images in {}ms",
        raw.markdown.len(),
        raw.images.len(),
        conversion_duration_ms
    );

    let mut document = MarkdownDocument::new(postprocess::clean_markdown(&raw.markdown));
    let doc_name = pdf_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let total = raw.images.len();
    if let Some(ref cb) = config.progress_callback {
        cb.on_conversion_start(total);
    }

    // ── (c)–(f) Per image ────────────────────────────────────────────────
    let describe_start = Instant::now();
    let mut records = Vec::with_capacity(total);

    for (n, raw_image) in raw.images.iter().enumerate() {
        let position = n + 1;
        if let Some(ref cb) = config.progress_callback {
            cb.on_image_start(position, total);
        }

        let page_index = assets::page_index_of(raw_image);
        let image_index = assets::image_index_of(raw_image);

        let canonical_path = match assets::move_into_assets(raw_image, &doc_name, &assets_dir) {
            Ok(p) => p,
            Err(e) => {
                warn!("Cannot move {}: {}", raw_image.path.display(), e);
                let error = ImageError::MoveFailed {
                    path: raw_image.path.clone(),
                    detail: e.to_string(),
                };
                if let Some(ref cb) = config.progress_callback {
                    cb.on_image_error(position, total, &error.to_string());
                }
                records.push(ImageRecord {
                    source_temp_path: raw_image.path.clone(),
                    canonical_path: raw_image.path.clone(),
                    relative_path: String::new(),
                    page_index,
                    image_index,
                    raw_description: None,
                    enhanced_description: None,
                    description: String::new(),
                    translated: false,
                    embedded: false,
                    error: Some(error),
                });
                continue;
            }
        };

        let canonical_name = canonical_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let relative_path = assets::relative_link(&config.assets_dir_name, &canonical_name);

        let context = context_map.lookup(page_index, image_index);
        debug!(
            "{}: page {}, {} chars of context",
            canonical_name,
            page_index,
            context.len()
        );

        let outcome = describer.describe(&canonical_path, context).await;
        let embedded = document.embed(
            &raw_image.placeholder_target,
            &outcome.description,
            &relative_path,
        );
        if !embedded {
            warn!("No placeholder for {} in the Markdown", raw_image.placeholder_target);
        }

        if let Some(ref cb) = config.progress_callback {
            match outcome.error {
                Some(ref e) => cb.on_image_error(position, total, &e.to_string()),
                None => cb.on_image_complete(position, total, &outcome.description),
            }
        }

        records.push(ImageRecord {
            source_temp_path: raw_image.path.clone(),
            canonical_path,
            relative_path,
            page_index,
            image_index,
            raw_description: outcome.raw,
            enhanced_description: outcome.enhanced,
            description: outcome.description,
            translated: outcome.translated,
            embedded,
            error: outcome.error,
        });
    }

    let stats = ConversionStats {
        total_images: total,
        described_images: records.iter().filter(|r| !r.description.is_empty()).count(),
        translated_images: records.iter().filter(|r| r.translated).count(),
        failed_images: records.iter().filter(|r| r.error.is_some()).count(),
        context_pages: context_map.pages().count(),
        vision_backend: describer.vision_name(),
        translation_backend: describer.translation_name(),
        total_duration_ms: total_start.elapsed().as_millis() as u64,
        conversion_duration_ms,
        describe_duration_ms: describe_start.elapsed().as_millis() as u64,
    };

    info!(
        "Conversion complete: {}/{} images described, {}ms total",
        stats.described_images, stats.total_images, stats.total_duration_ms
    );

    if let Some(ref cb) = config.progress_callback {
        cb.on_conversion_complete(total, stats.described_images);
    }

    Ok(ConversionOutput {
        markdown: document.into_string(),
        images: records,
        assets_dir,
        stats,
    })
}

/// Convert a PDF and write the Markdown to `output_path`.
///
/// Unless `config.output_dir` is set, assets go next to the output file.
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn convert_to_file(
    input: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Pdf2MdError> {
    let path = output_path.as_ref();
    let mut config = config.clone();
    if config.output_dir.is_none() {
        config.output_dir = Some(parent_dir(path));
    }

    let output = convert(input, &config).await?;
    write_atomic(path, &output.markdown).await?;
    info!("Wrote {}", path.display());
    Ok(output)
}

/// Default Markdown path for a PDF: same name, `.md` extension.
pub fn default_output_path(input: impl AsRef<Path>) -> PathBuf {
    input.as_ref().with_extension("md")
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    input: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Pdf2MdError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Pdf2MdError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert(input, config))
}

/// Per-page context text and keywords, without converting or calling any
/// backend. Useful to check what descriptions will be enhanced with.
pub async fn inspect_context(
    input: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<Vec<PageContextReport>, Pdf2MdError> {
    let pdf_path = input::resolve_input(input.as_ref())?;
    let layout_source: Arc<dyn LayoutSource> = config
        .layout_source
        .clone()
        .unwrap_or_else(|| Arc::new(PdfiumLayoutSource));
    let context_map = extract_page_context(layout_source.as_ref(), &pdf_path, config).await;

    let extractor = KeywordExtractor::default();
    Ok(context_map
        .pages()
        .map(|(page, text)| PageContextReport::new(page, text, extractor.extract(text)))
        .collect())
}

/// Rewrite image alt texts in `markdown` from `catalog`.
pub fn apply_descriptions(markdown: &str, catalog: &DescriptionCatalog) -> (String, ApplyReport) {
    substitute::apply_descriptions(markdown, catalog)
}

/// Apply a JSON description catalog to a Markdown file in place.
///
/// When at least one reference changes, the previous content is kept as
/// `<stem>_old.md` next to the file.
pub async fn apply_descriptions_to_file(
    markdown_path: impl AsRef<Path>,
    catalog_path: impl AsRef<Path>,
) -> Result<ApplyReport, Pdf2MdError> {
    let path = markdown_path.as_ref();
    let catalog = DescriptionCatalog::from_file(catalog_path.as_ref())?;
    let original = tokio::fs::read_to_string(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Pdf2MdError::FileNotFound {
            path: path.to_path_buf(),
        },
        std::io::ErrorKind::PermissionDenied => Pdf2MdError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => Pdf2MdError::Internal(format!("reading {}: {}", path.display(), e)),
    })?;

    let (updated, report) = apply_descriptions(&original, &catalog);
    info!(
        "{} descriptions applied, {} images without one",
        report.updated,
        report.missing.len()
    );

    if report.updated > 0 {
        let backup = backup_path(path);
        write_atomic(&backup, &original).await?;
        write_atomic(path, &updated).await?;
        debug!("Backup kept at {}", backup.display());
    }
    Ok(report)
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Build the describer, resolving backends from most to least specific:
///
/// 1. **Pre-built backend** (`vision_backend` / `translation_backend`);
/// 2. **Vision LLM** (`llm_vision_provider`, vision only), whose API key
///    comes from the provider's usual environment variable;
/// 3. **Azure credentials**, explicit or from `AZURE_*` variables.
///
/// A missing backend is not an error: one warning is logged and images get
/// empty (or untranslated) descriptions.
fn build_describer(config: &ConversionConfig, output_dir: &Path) -> ImageDescriber {
    let quota_dir = config
        .quota_dir
        .clone()
        .unwrap_or_else(|| output_dir.to_path_buf());
    let clock: Arc<dyn Clock> = config.clock.clone().unwrap_or_else(|| Arc::new(SystemClock));
    let tracker = |service: &str, file: &str, quota: QuotaConfig| {
        let store: Arc<dyn QuotaStore> = if config.persist_quota {
            Arc::new(JsonFileStore::new(quota_dir.join(file)))
        } else {
            Arc::new(MemoryStore::new())
        };
        let quota = quota.waiting(quota.wait_if_quota_reached || config.wait_if_quota_reached);
        QuotaTracker::with_clock(service, quota, store, Arc::clone(&clock))
    };

    let composer = DescriptionComposer::default().with_max_keywords(config.max_keywords);
    let mut describer = ImageDescriber::new(composer)
        .languages(config.source_language.clone(), config.target_language.clone())
        .tag_filter(config.tag_confidence_threshold, config.max_tags);

    match resolve_vision(config) {
        Some(backend) => {
            info!("Vision backend: {}", backend.name());
            describer =
                describer.with_vision(backend, tracker("vision", VISION_QUOTA_FILE, config.vision_quota));
        }
        None => warn!(
            "No vision backend configured (set AZURE_VISION_ENDPOINT/AZURE_VISION_KEY or an LLM provider); images keep empty descriptions"
        ),
    }

    if config.translate {
        match resolve_translation(config) {
            Some(backend) => {
                info!("Translation backend: {} ({} → {})", backend.name(), config.source_language, config.target_language);
                describer = describer.with_translation(
                    backend,
                    tracker("translator", TRANSLATOR_QUOTA_FILE, config.translator_quota),
                );
            }
            None => warn!(
                "No translation backend configured (set AZURE_TRANSLATOR_ENDPOINT/KEY/REGION); descriptions stay in '{}'",
                config.source_language
            ),
        }
    }

    describer
}

fn resolve_vision(config: &ConversionConfig) -> Option<Arc<dyn VisionBackend>> {
    if let Some(ref backend) = config.vision_backend {
        return Some(Arc::clone(backend));
    }

    if let Some(ref name) = config.llm_vision_provider {
        match LlmVision::from_provider_name(name, config.llm_vision_model.as_deref()) {
            Ok(v) => {
                return Some(Arc::new(
                    v.with_retries(config.max_retries, config.retry_backoff_ms),
                ))
            }
            Err(e) => warn!("Vision LLM unavailable: {}", e),
        }
    }

    let creds = config.resolved_vision()?;
    match AzureVision::new(&creds, config.api_timeout_secs) {
        Ok(v) => Some(Arc::new(v)),
        Err(e) => {
            warn!("Azure Vision unavailable: {}", e);
            None
        }
    }
}

fn resolve_translation(config: &ConversionConfig) -> Option<Arc<dyn TranslationBackend>> {
    if let Some(ref backend) = config.translation_backend {
        return Some(Arc::clone(backend));
    }

    let creds = config.resolved_translator()?;
    match AzureTranslator::new(&creds, config.api_timeout_secs) {
        Ok(t) => Some(Arc::new(t)),
        Err(e) => {
            warn!("Azure Translator unavailable: {}", e);
            None
        }
    }
}

/// Directory containing `path`, `.` for bare file names.
fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

async fn create_dir(dir: &Path) -> Result<(), Pdf2MdError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| Pdf2MdError::AssetDirFailed {
            path: dir.to_path_buf(),
            source: e,
        })
}

/// The configured work directory, or a fresh temporary one whose guard
/// removes it when dropped.
async fn work_dir(config: &ConversionConfig) -> Result<(PathBuf, Option<TempDir>), Pdf2MdError> {
    match config.work_dir {
        Some(ref dir) => {
            create_dir(dir).await?;
            Ok((dir.clone(), None))
        }
        None => {
            let tmp = TempDir::new().map_err(|e| Pdf2MdError::AssetDirFailed {
                path: std::env::temp_dir(),
                source: e,
            })?;
            Ok((tmp.path().to_path_buf(), Some(tmp)))
        }
    }
}

/// `notes.md` → `notes_old.md`, in the same directory.
fn backup_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{stem}_old.md"))
}

/// Write to a temp sibling, then rename over `path`.
async fn write_atomic(path: &Path, content: &str) -> Result<(), Pdf2MdError> {
    let failed = |source: std::io::Error| Pdf2MdError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(failed)?;
    }

    let tmp_path = path.with_extension("md.tmp");
    tokio::fs::write(&tmp_path, content).await.map_err(failed)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(failed)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_output_is_md_next_to_pdf() {
        assert_eq!(
            default_output_path("docs/cours.pdf"),
            PathBuf::from("docs/cours.md")
        );
    }

    #[test]
    fn parent_of_bare_name_is_cwd() {
        assert_eq!(parent_dir(Path::new("cours.md")), PathBuf::from("."));
        assert_eq!(parent_dir(Path::new("out/cours.md")), PathBuf::from("out"));
    }

    #[test]
    fn backup_name() {
        assert_eq!(
            backup_path(Path::new("/site/index.md")),
            PathBuf::from("/site/index_old.md")
        );
    }

    #[tokio::test]
    async fn atomic_write_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/out.md");
        write_atomic(&path, "# hi\n").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# hi\n");
        assert!(!dir.path().join("nested/out.md.tmp").exists());
    }

    #[test]
    fn describer_without_backends() {
        let config = ConversionConfig::builder()
            .credentials_from_env(false)
            .persist_quota(false)
            .build()
            .unwrap();
        let d = build_describer(&config, Path::new("."));
        assert!(!d.has_vision());
        assert!(!d.has_translation());
    }

    #[tokio::test]
    async fn apply_to_file_keeps_backup() {
        let dir = TempDir::new().unwrap();
        let md = dir.path().join("index.md");
        let catalog = dir.path().join("descriptions.json");
        std::fs::write(&md, "![](assets/image_0-0.png)\n").unwrap();
        std::fs::write(
            &catalog,
            r#"{"assets/image_0-0.png": {"description": "Le chat de Scratch"}}"#,
        )
        .unwrap();

        let report = apply_descriptions_to_file(&md, &catalog).await.unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(
            std::fs::read_to_string(&md).unwrap(),
            "![Le chat de Scratch](assets/image_0-0.png)\n"
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("index_old.md")).unwrap(),
            "![](assets/image_0-0.png)\n"
        );
    }

    #[tokio::test]
    async fn apply_without_matches_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let md = dir.path().join("index.md");
        let catalog = dir.path().join("descriptions.json");
        std::fs::write(&md, "![](assets/image_9-0.png)\n").unwrap();
        std::fs::write(&catalog, "{}").unwrap();

        let report = apply_descriptions_to_file(&md, &catalog).await.unwrap();
        assert_eq!(report.updated, 0);
        assert_eq!(report.missing, vec!["assets/image_9-0.png".to_string()]);
        assert!(!dir.path().join("index_old.md").exists());
    }

    #[tokio::test]
    async fn apply_with_bad_catalog_fails() {
        let dir = TempDir::new().unwrap();
        let md = dir.path().join("index.md");
        let catalog = dir.path().join("descriptions.json");
        std::fs::write(&md, "x\n").unwrap();
        std::fs::write(&catalog, "not json").unwrap();
        assert!(matches!(
            apply_descriptions_to_file(&md, &catalog).await,
            Err(Pdf2MdError::CatalogInvalid { .. })
        ));
    }
}
