//! CLI binary for contextual-pdf2md.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ConversionConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use contextual_pdf2md::{
    apply_descriptions_to_file, convert_to_file, default_output_path, inspect_context,
    AzureTranslatorConfig, AzureVisionConfig, ContextMode, ConversionConfig,
    ConversionProgressCallback, PageSelection, ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

/// Shorten `s` to `max` characters, with an ellipsis.
fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let head: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{head}\u{2026}")
    } else {
        s.to_string()
    }
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a progress bar over the extracted images and
/// one log line per image.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Start time of the image being described.
    started: Mutex<Option<Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner until `on_conversion_start` tells us how many images there are.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);

        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            started: Mutex::new(None),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} images  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Describing");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self) -> f64 {
        self.started
            .lock()
            .ok()
            .and_then(|mut s| s.take())
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_conversion_start(&self, total_images: usize) {
        self.activate_bar(total_images);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("{total_images} images extracted"))
        ));
    }

    fn on_image_start(&self, index: usize, _total: usize) {
        if let Ok(mut s) = self.started.lock() {
            *s = Some(Instant::now());
        }
        self.bar.set_message(format!("image {index}"));
    }

    fn on_image_complete(&self, index: usize, total: usize, description: &str) {
        let shown = if description.is_empty() {
            dim("(no description)")
        } else {
            truncate(description, 70)
        };
        self.bar.println(format!(
            "  {} Image {:>3}/{:<3}  {}  {}",
            green("✓"),
            index,
            total,
            shown,
            dim(&format!("{:.1}s", self.elapsed_secs())),
        ));
        self.bar.inc(1);
    }

    fn on_image_error(&self, index: usize, total: usize, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        self.bar.println(format!(
            "  {} Image {:>3}/{:<3}  {}  {}",
            red("✗"),
            index,
            total,
            red(&truncate(error, 80)),
            dim(&format!("{:.1}s", self.elapsed_secs())),
        ));
        self.bar.inc(1);
    }

    fn on_conversion_complete(&self, total_images: usize, described: usize) {
        self.bar.finish_and_clear();
        let errors = self.errors.load(Ordering::SeqCst);

        if errors == 0 {
            eprintln!(
                "{} {}/{} images described",
                green("✔"),
                bold(&described.to_string()),
                total_images
            );
        } else {
            eprintln!(
                "{} {}/{} images described  ({} errors)",
                if errors == total_images {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&described.to_string()),
                total_images,
                red(&errors.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert next to the PDF (course.md + assets/)
  pdf2md course.pdf

  # Explicit output file, nearest-text context
  pdf2md course.pdf -o out/course.md --context-mode nearest

  # First five pages only, wait for quota windows instead of skipping images
  pdf2md --pages 0-4 --wait-if-quota-reached course.pdf

  # Describe images with a vision LLM instead of Azure Computer Vision
  pdf2md --llm-provider openai --llm-model gpt-4.1-mini course.pdf

  # Show the context text and keywords found per page (no backend calls)
  pdf2md --inspect-only course.pdf

  # Rewrite alt texts of an existing Markdown file from reviewed descriptions
  pdf2md course.pdf --apply-descriptions descriptions.json

DESCRIPTION CATALOG (for --apply-descriptions):
  {
    "assets/image_0-0.png": {"description": "The repeat block"},
    "assets/image_1-0.png": "A cat sprite"
  }

QUOTAS (free tiers, tracked in .azure_vision_quota.json / .azure_translator_quota.json):
  Vision       5,000 images/month     20 requests/minute
  Translator   2,000,000 chars/month  5 requests/second

ENVIRONMENT VARIABLES:
  AZURE_VISION_ENDPOINT       Azure Computer Vision endpoint
  AZURE_VISION_KEY            Azure Computer Vision key
  AZURE_TRANSLATOR_ENDPOINT   Azure Translator endpoint
  AZURE_TRANSLATOR_KEY        Azure Translator key
  AZURE_TRANSLATOR_REGION     Azure Translator region
  OPENAI_API_KEY, ...         Provider key when --llm-provider is used
  PDFIUM_LIB_PATH             Directory or file of the pdfium library
"#;

/// Convert PDF files to Markdown with context-aware image descriptions.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2md",
    version,
    about = "Convert PDF files to Markdown with context-aware image descriptions",
    long_about = "Convert a PDF to Markdown, move its images into an asset directory and give \
each one an alt text: a vision caption, the domain keywords of the surrounding text, and an \
optional translation. Backend calls stay within monthly and per-window quotas.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path.
    input: PathBuf,

    /// Markdown output file. Default: the input path with a .md extension.
    #[arg(short, long, env = "PDF2MD_OUTPUT")]
    output: Option<PathBuf>,

    /// Page selection (0-based): all, 4, 2-14, or 0,2,4.
    #[arg(long, env = "PDF2MD_PAGES", default_value = "all")]
    pages: String,

    /// How image context is gathered.
    #[arg(long, env = "PDF2MD_CONTEXT_MODE", value_enum, default_value = "page")]
    context_mode: ContextModeArg,

    /// Asset directory name, relative to the output file.
    #[arg(long, env = "PDF2MD_ASSETS_DIR", default_value = "assets")]
    assets_dir: String,

    /// Directory of the quota state files. Default: the output directory.
    #[arg(long, env = "PDF2MD_QUOTA_DIR")]
    quota_dir: Option<PathBuf>,

    /// Sleep until quota windows roll over instead of skipping images.
    #[arg(long, env = "PDF2MD_WAIT_IF_QUOTA_REACHED")]
    wait_if_quota_reached: bool,

    /// Azure Computer Vision endpoint.
    #[arg(long, env = "AZURE_VISION_ENDPOINT", hide_env_values = true)]
    vision_endpoint: Option<String>,

    /// Azure Computer Vision key.
    #[arg(long, env = "AZURE_VISION_KEY", hide_env_values = true)]
    vision_key: Option<String>,

    /// Azure Translator endpoint.
    #[arg(long, env = "AZURE_TRANSLATOR_ENDPOINT", hide_env_values = true)]
    translator_endpoint: Option<String>,

    /// Azure Translator key.
    #[arg(long, env = "AZURE_TRANSLATOR_KEY", hide_env_values = true)]
    translator_key: Option<String>,

    /// Azure Translator region.
    #[arg(long, env = "AZURE_TRANSLATOR_REGION", hide_env_values = true)]
    translator_region: Option<String>,

    /// Describe images with a vision LLM: openai, anthropic, gemini, ollama…
    #[arg(long, env = "PDF2MD_LLM_PROVIDER")]
    llm_provider: Option<String>,

    /// Model for --llm-provider (default: gpt-4.1-nano).
    #[arg(long, env = "PDF2MD_LLM_MODEL")]
    llm_model: Option<String>,

    /// Language the vision backend answers in.
    #[arg(long, env = "PDF2MD_SOURCE_LANGUAGE", default_value = "en")]
    source_language: String,

    /// Language descriptions are translated into.
    #[arg(long, env = "PDF2MD_TARGET_LANGUAGE", default_value = "fr")]
    target_language: String,

    /// Keep descriptions in the source language.
    #[arg(long, env = "PDF2MD_NO_TRANSLATE")]
    no_translate: bool,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDF2MD_PASSWORD")]
    password: Option<String>,

    /// Per-request backend timeout in seconds.
    #[arg(long, env = "PDF2MD_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Print the context text and keywords per page, no conversion.
    #[arg(long)]
    inspect_only: bool,

    /// Rewrite alt texts of the output Markdown from a JSON catalog, no conversion.
    #[arg(long, value_name = "CATALOG", conflicts_with = "inspect_only")]
    apply_descriptions: Option<PathBuf>,

    /// Print results as JSON on stdout.
    #[arg(long, env = "PDF2MD_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDF2MD_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2MD_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2MD_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum ContextModeArg {
    /// Whole page text.
    Page,
    /// Text blocks nearest each image.
    Nearest,
}

impl From<ContextModeArg> for ContextMode {
    fn from(v: ContextModeArg) -> Self {
        match v {
            ContextModeArg::Page => ContextMode::WholePage,
            ContextModeArg::Nearest => ContextMode::NearestBlocks,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs unless -v is given.
    let show_progress = !cli.quiet
        && !cli.no_progress
        && !cli.json
        && !cli.inspect_only
        && cli.apply_descriptions.is_none();
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let output_path = cli
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&cli.input));

    // ── Apply-descriptions mode ──────────────────────────────────────────
    if let Some(ref catalog) = cli.apply_descriptions {
        let report = apply_descriptions_to_file(&output_path, catalog)
            .await
            .with_context(|| format!("Failed to apply descriptions to {}", output_path.display()))?;

        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("Failed to serialise report")?
            );
        } else if !cli.quiet {
            eprintln!(
                "{} {} descriptions applied to {}",
                green("✔"),
                bold(&report.updated.to_string()),
                output_path.display()
            );
            for link in &report.missing {
                eprintln!("  {} no description for {}", cyan("⚠"), link);
            }
        }
        return Ok(());
    }

    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn ConversionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let pages = inspect_context(&cli.input, &config)
            .await
            .context("Failed to inspect PDF")?;

        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&pages).context("Failed to serialise context")?
            );
        } else {
            println!("File:         {}", cli.input.display());
            println!("Pages with images and text: {}", pages.len());
            for page in &pages {
                println!();
                println!("Page {} ({} chars)", page.page_index, page.chars);
                println!("  Keywords:   {}", page.keywords.join(", "));
                println!("  Text:       {}", page.preview);
            }
        }
        return Ok(());
    }

    // ── Run conversion ───────────────────────────────────────────────────
    let output = convert_to_file(&cli.input, &output_path, &config)
        .await
        .context("Conversion failed")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
    } else if !cli.quiet {
        let stats = &output.stats;
        if !show_progress {
            eprintln!(
                "Described {}/{} images in {}ms",
                stats.described_images, stats.total_images, stats.total_duration_ms
            );
        }
        eprintln!(
            "{}  {} images  {} translated  {}ms  →  {}",
            if stats.failed_images == 0 {
                green("✔")
            } else {
                cyan("⚠")
            },
            stats.total_images,
            stats.translated_images,
            stats.total_duration_ms,
            bold(&output_path.display().to_string()),
        );
        eprintln!(
            "   {} {}",
            dim("assets:"),
            dim(&output.assets_dir.display().to_string())
        );
        if stats.vision_backend.is_none() {
            eprintln!(
                "   {}",
                dim("no vision backend configured: images have empty descriptions")
            );
        }
    }

    Ok(())
}

/// Map CLI args to `ConversionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ConversionConfig> {
    let pages = parse_pages(&cli.pages)?;

    let mut builder = ConversionConfig::builder()
        .pages(pages)
        .context_mode(cli.context_mode.clone().into())
        .assets_dir_name(cli.assets_dir.clone())
        .wait_if_quota_reached(cli.wait_if_quota_reached)
        .translate(!cli.no_translate)
        .source_language(cli.source_language.clone())
        .target_language(cli.target_language.clone())
        .api_timeout_secs(cli.api_timeout);

    if let Some(ref dir) = cli.quota_dir {
        builder = builder.quota_dir(dir.clone());
    }
    if let (Some(endpoint), Some(key)) = (&cli.vision_endpoint, &cli.vision_key) {
        builder = builder.vision(AzureVisionConfig::new(endpoint.clone(), key.clone()));
    }
    if let (Some(endpoint), Some(key), Some(region)) = (
        &cli.translator_endpoint,
        &cli.translator_key,
        &cli.translator_region,
    ) {
        builder = builder.translator(AzureTranslatorConfig::new(
            endpoint.clone(),
            key.clone(),
            region.clone(),
        ));
    }
    if let Some(ref provider) = cli.llm_provider {
        builder = builder.llm_vision_provider(provider.clone());
    }
    if let Some(ref model) = cli.llm_model {
        builder = builder.llm_vision_model(model.clone());
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Parse `--pages` (0-based, like the asset names) into a `PageSelection`.
fn parse_pages(s: &str) -> Result<PageSelection> {
    let s = s.trim().to_lowercase();

    if s == "all" {
        return Ok(PageSelection::All);
    }

    let page_index = |p: &str| -> Result<usize> {
        p.trim()
            .parse()
            .with_context(|| format!("Invalid page index: '{}'", p.trim()))
    };

    // Range: "2-14"
    if let Some((start, end)) = s.split_once('-') {
        let start = page_index(start)?;
        let end = page_index(end)?;
        if start > end {
            anyhow::bail!(
                "Invalid page range '{}-{}': start must be <= end",
                start,
                end
            );
        }
        return Ok(PageSelection::Range(start, end));
    }

    // Set: "0,2,4"
    if s.contains(',') {
        let pages = s.split(',').map(page_index).collect::<Result<Vec<_>>>()?;
        return Ok(PageSelection::Set(pages));
    }

    Ok(PageSelection::Single(page_index(&s)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_all() {
        assert_eq!(parse_pages("ALL").unwrap(), PageSelection::All);
    }

    #[test]
    fn pages_are_zero_based() {
        assert_eq!(parse_pages("0").unwrap(), PageSelection::Single(0));
        assert_eq!(parse_pages("2-14").unwrap(), PageSelection::Range(2, 14));
        assert_eq!(parse_pages("0, 2,4").unwrap(), PageSelection::Set(vec![0, 2, 4]));
    }

    #[test]
    fn pages_reject_garbage_and_reversed_ranges() {
        assert!(parse_pages("5-2").is_err());
        assert!(parse_pages("abc").is_err());
        assert!(parse_pages("1,x").is_err());
    }

    #[test]
    fn truncate_counts_chars() {
        assert_eq!(truncate("éééé", 10), "éééé");
        assert_eq!(truncate("abcdef", 4), "abc\u{2026}");
    }

    #[test]
    fn cli_parses_flags() {
        let cli = Cli::try_parse_from([
            "pdf2md",
            "course.pdf",
            "--context-mode",
            "nearest",
            "--no-translate",
            "--pages",
            "2",
        ])
        .unwrap();
        let config = build_config(&cli, None).unwrap();
        assert_eq!(config.context_mode, ContextMode::NearestBlocks);
        assert!(!config.translate);
        assert_eq!(config.pages, PageSelection::Single(2));
    }
}
