//! Result types returned by the conversion entry points.
//!
//! Everything here is `Serialize` so the CLI can print it with `--json`.

use crate::error::ImageError;
use serde::Serialize;
use std::path::PathBuf;

/// Result of a full conversion.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionOutput {
    /// Final Markdown, image references rewritten.
    pub markdown: String,
    /// One record per extracted image, in document order.
    pub images: Vec<ImageRecord>,
    /// Directory the images were moved into.
    pub assets_dir: PathBuf,
    pub stats: ConversionStats,
}

/// What happened to one image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageRecord {
    /// Where the converter wrote the file.
    pub source_temp_path: PathBuf,
    /// Where the file lives now (asset directory).
    pub canonical_path: PathBuf,
    /// Link used in the Markdown, relative to the output directory.
    pub relative_path: String,
    pub page_index: usize,
    pub image_index: Option<usize>,
    /// Caption + tags from the vision backend.
    pub raw_description: Option<String>,
    /// `raw_description` with context keywords.
    pub enhanced_description: Option<String>,
    /// Alt text written into the Markdown.
    pub description: String,
    pub translated: bool,
    /// Whether the Markdown placeholder was found and replaced.
    pub embedded: bool,
    pub error: Option<ImageError>,
}

/// Aggregate statistics for a conversion.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConversionStats {
    pub total_images: usize,
    /// Images with a non-empty description.
    pub described_images: usize,
    pub translated_images: usize,
    /// Images with an [`ImageError`].
    pub failed_images: usize,
    /// Pages for which context text was found.
    pub context_pages: usize,
    pub vision_backend: Option<String>,
    pub translation_backend: Option<String>,
    pub total_duration_ms: u64,
    /// Time spent in the document converter.
    pub conversion_duration_ms: u64,
    /// Time spent moving and describing images.
    pub describe_duration_ms: u64,
}

/// Context found for one page, without calling any backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageContextReport {
    pub page_index: usize,
    /// Length of the context text, in characters.
    pub chars: usize,
    /// First 200 characters.
    pub preview: String,
    pub keywords: Vec<String>,
}

impl PageContextReport {
    pub const PREVIEW_CHARS: usize = 200;

    pub fn new(page_index: usize, context: &str, keywords: Vec<String>) -> Self {
        let chars = context.chars().count();
        let mut preview: String = context.chars().take(Self::PREVIEW_CHARS).collect();
        if chars > Self::PREVIEW_CHARS {
            preview.push_str("...");
        }
        Self {
            page_index,
            chars,
            preview,
            keywords,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_context_preview_is_whole_text() {
        let r = PageContextReport::new(0, "Dans Scratch", vec!["scratch".into()]);
        assert_eq!(r.preview, "Dans Scratch");
        assert_eq!(r.chars, 12);
    }

    #[test]
    fn long_context_preview_is_truncated_on_chars() {
        let text = "é".repeat(250);
        let r = PageContextReport::new(3, &text, Vec::new());
        assert_eq!(r.chars, 250);
        assert_eq!(r.preview.chars().count(), 203);
        assert!(r.preview.ends_with("..."));
    }

    #[test]
    fn stats_serialise() {
        let json = serde_json::to_string(&ConversionStats::default()).unwrap();
        assert!(json.contains("\"total_images\":0"));
    }
}
