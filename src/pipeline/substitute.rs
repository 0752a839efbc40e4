//! Rewriting image references in Markdown.
//!
//! Two operations:
//!
//! * [`MarkdownDocument::embed`] swaps the converter's empty placeholder
//!   `![](raw)` for `![description](assets/image_p-i.png)`. Substitutions
//!   are keyed by the canonical link, so each image is embedded at most
//!   once even when placeholders repeat or the step runs twice.
//! * [`apply_descriptions`] rewrites the alt text of existing references
//!   from a [`DescriptionCatalog`] (hand-written or reviewed descriptions).

use crate::error::Pdf2MdError;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::debug;

/// Make a description safe as Markdown alt text: single line, brackets
/// escaped.
pub fn sanitize_alt(description: &str) -> String {
    description
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('[', "\\[")
        .replace(']', "\\]")
}

// ── Placeholder substitution ─────────────────────────────────────────────

/// Markdown buffer that records which canonical links it already embeds.
#[derive(Debug, Clone, Default)]
pub struct MarkdownDocument {
    text: String,
    embedded: HashSet<String>,
}

impl MarkdownDocument {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            embedded: HashSet::new(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }

    /// Whether `link` has been embedded.
    pub fn is_embedded(&self, link: &str) -> bool {
        self.embedded.contains(link)
    }

    /// Replace the first `![](placeholder_target)` with
    /// `![description](link)`. Returns `false`, leaving the text untouched,
    /// when `link` was already embedded or no placeholder is left.
    pub fn embed(&mut self, placeholder_target: &str, description: &str, link: &str) -> bool {
        if self.embedded.contains(link) {
            debug!("{} already embedded", link);
            return false;
        }
        let placeholder = format!("![]({placeholder_target})");
        let Some(start) = self.text.find(&placeholder) else {
            debug!("No placeholder {} in Markdown", placeholder);
            return false;
        };
        let replacement = format!("![{}]({})", sanitize_alt(description), link);
        self.text
            .replace_range(start..start + placeholder.len(), &replacement);
        self.embedded.insert(link.to_string());
        true
    }
}

// ── Description catalog ──────────────────────────────────────────────────

/// One catalog value: either a bare string or `{"description": "…"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
enum CatalogEntry {
    Plain(String),
    Detailed { description: String },
}

impl CatalogEntry {
    fn into_text(self) -> String {
        match self {
            CatalogEntry::Plain(s) | CatalogEntry::Detailed { description: s } => s,
        }
    }
}

/// Image link → description, loaded from JSON.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DescriptionCatalog {
    entries: BTreeMap<String, String>,
}

impl DescriptionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, link: impl Into<String>, description: impl Into<String>) {
        self.entries.insert(link.into(), description.into());
    }

    pub fn get(&self, link: &str) -> Option<&str> {
        self.entries.get(link).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse `{"assets/image_0-0.png": {"description": "…"}, …}`; bare
    /// string values are accepted too.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let raw: BTreeMap<String, CatalogEntry> = serde_json::from_str(json)?;
        Ok(Self {
            entries: raw.into_iter().map(|(k, v)| (k, v.into_text())).collect(),
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, Pdf2MdError> {
        let invalid = |detail: String| Pdf2MdError::CatalogInvalid {
            path: path.to_path_buf(),
            detail,
        };
        let json = std::fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
        Self::from_json(&json).map_err(|e| invalid(e.to_string()))
    }
}

/// Outcome of [`apply_descriptions`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    /// References whose alt text was rewritten.
    pub updated: usize,
    /// Image links found in the Markdown with no catalog entry, in order.
    pub missing: Vec<String>,
}

static RE_IMAGE_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[(.*?)\]\(([^)]+)\)").unwrap());

/// Rewrite the alt text of every image reference whose link is in
/// `catalog`.
pub fn apply_descriptions(markdown: &str, catalog: &DescriptionCatalog) -> (String, ApplyReport) {
    let mut report = ApplyReport::default();
    let out = RE_IMAGE_REF.replace_all(markdown, |caps: &Captures| {
        let link = &caps[2];
        match catalog.get(link) {
            Some(description) => {
                report.updated += 1;
                format!("![{}]({})", sanitize_alt(description), link)
            }
            None => {
                report.missing.push(link.to_string());
                caps[0].to_string()
            }
        }
    });
    (out.into_owned(), report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embed_replaces_placeholder_once() {
        let mut doc = MarkdownDocument::new("Intro\n\n![](doc.pdf-0-0.png)\n\nEnd\n");
        assert!(doc.embed("doc.pdf-0-0.png", "a screenshot", "assets/image_0-0.png"));
        assert_eq!(
            doc.as_str(),
            "Intro\n\n![a screenshot](assets/image_0-0.png)\n\nEnd\n"
        );
        assert!(!doc.embed("doc.pdf-0-0.png", "again", "assets/image_0-0.png"));
    }

    #[test]
    fn second_pass_over_same_buffer_is_a_no_op() {
        let mut doc = MarkdownDocument::new("![](a.png)");
        doc.embed("a.png", "x", "assets/image_0-0.png");
        let once = doc.as_str().to_string();

        let mut again = MarkdownDocument::new(once.clone());
        assert!(!again.embed("a.png", "x", "assets/image_0-0.png"));
        assert_eq!(again.as_str(), once);
    }

    #[test]
    fn identical_placeholders_are_consumed_one_per_image() {
        let mut doc = MarkdownDocument::new("![](x.png) ![](x.png)");
        assert!(doc.embed("x.png", "first", "assets/image_0-0.png"));
        assert!(doc.embed("x.png", "second", "assets/image_0-1.png"));
        assert_eq!(
            doc.as_str(),
            "![first](assets/image_0-0.png) ![second](assets/image_0-1.png)"
        );
        assert!(doc.is_embedded("assets/image_0-1.png"));
    }

    #[test]
    fn empty_description_keeps_empty_alt() {
        let mut doc = MarkdownDocument::new("![](a.png)");
        doc.embed("a.png", "", "assets/image_0-0.png");
        assert_eq!(doc.as_str(), "![](assets/image_0-0.png)");
    }

    #[test]
    fn alt_text_is_single_line_and_escaped() {
        assert_eq!(sanitize_alt("a [chart]\nof  sales"), "a \\[chart\\] of sales");
    }

    #[test]
    fn catalog_accepts_both_shapes() {
        let cat = DescriptionCatalog::from_json(
            r#"{"assets/image_0-0.png": {"description": "un chat"}, "assets/image_1-0.png": "un chien"}"#,
        )
        .unwrap();
        assert_eq!(cat.len(), 2);
        assert_eq!(cat.get("assets/image_0-0.png"), Some("un chat"));
        assert_eq!(cat.get("assets/image_1-0.png"), Some("un chien"));
    }

    #[test]
    fn catalog_rejects_garbage() {
        assert!(DescriptionCatalog::from_json("[1, 2]").is_err());
    }

    #[test]
    fn apply_rewrites_known_links_and_lists_missing() {
        let mut cat = DescriptionCatalog::new();
        cat.insert("assets/image_0-0.png", "Le bloc « répéter »");
        let md = "![old](assets/image_0-0.png)\n![](assets/image_2-0.png)\n";
        let (out, report) = apply_descriptions(md, &cat);
        assert_eq!(
            out,
            "![Le bloc « répéter »](assets/image_0-0.png)\n![](assets/image_2-0.png)\n"
        );
        assert_eq!(report.updated, 1);
        assert_eq!(report.missing, vec!["assets/image_2-0.png".to_string()]);
    }
}
