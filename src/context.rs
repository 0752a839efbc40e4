//! Context text for images: what the page says around a picture.
//!
//! A [`ContextMap`] is built once per conversion from the page layouts of the
//! source document and is read-only afterwards. Two interchangeable
//! strategies fill it:
//!
//! * [`WholePageContext`]: the whole text of every page that carries at
//!   least one image, whitespace-collapsed;
//! * [`NearestBlocksContext`]: per image, the text of the N blocks whose
//!   centres are closest to the image's centre (plus the whole-page entry
//!   as a fallback).
//!
//! Extraction never fails the conversion: a document that cannot be read
//! yields an empty map and a warning.

use crate::config::{ConversionConfig, PageSelection};
use crate::pipeline::layout::LayoutSource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

// ── Layout model ─────────────────────────────────────────────────────────

/// Axis-aligned rectangle in page coordinates (PDF points).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BoundingBox {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x0 + self.x1) / 2.0, (self.y0 + self.y1) / 2.0)
    }

    /// Euclidean distance between the two centres.
    pub fn center_distance(&self, other: &BoundingBox) -> f32 {
        let (ax, ay) = self.center();
        let (bx, by) = other.center();
        ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
    }
}

/// A run of text with its position on the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub bbox: BoundingBox,
    pub text: String,
}

/// What the context extractor needs to know about one page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageLayout {
    /// 0-based page index.
    pub index: usize,
    /// Full page text in reading order.
    pub text: String,
    /// One slot per image object, in content-stream order. `None` when the
    /// bounds are unknown; the slot still counts so image numbers match the
    /// converter's.
    pub images: Vec<Option<BoundingBox>>,
    pub blocks: Vec<TextBlock>,
}

// ── Context map ──────────────────────────────────────────────────────────

/// Page and image context, keyed by 0-based page index and image index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextMap {
    pages: BTreeMap<usize, String>,
    images: BTreeMap<(usize, usize), String>,
}

impl ContextMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_page(&mut self, page: usize, text: impl Into<String>) {
        self.pages.insert(page, text.into());
    }

    pub fn insert_image(&mut self, page: usize, image: usize, text: impl Into<String>) {
        self.images.insert((page, image), text.into());
    }

    pub fn page(&self, page: usize) -> Option<&str> {
        self.pages.get(&page).map(String::as_str)
    }

    pub fn image(&self, page: usize, image: usize) -> Option<&str> {
        self.images.get(&(page, image)).map(String::as_str)
    }

    /// Best context for an image: its own entry, then its page, then `""`.
    pub fn lookup(&self, page: usize, image: Option<usize>) -> &str {
        image
            .and_then(|i| self.image(page, i))
            .or_else(|| self.page(page))
            .unwrap_or("")
    }

    /// Pages with context, ascending.
    pub fn pages(&self) -> impl Iterator<Item = (usize, &str)> {
        self.pages.iter().map(|(k, v)| (*k, v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty() && self.images.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }
}

// ── Strategies ───────────────────────────────────────────────────────────

/// Fills a [`ContextMap`] from one page layout.
pub trait ContextStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Add whatever context `layout` yields. Pages without images add nothing.
    fn collect(&self, layout: &PageLayout, map: &mut ContextMap);
}

/// Whole page text for every page that carries an image.
#[derive(Debug, Default, Clone, Copy)]
pub struct WholePageContext;

impl ContextStrategy for WholePageContext {
    fn name(&self) -> &'static str {
        "whole-page"
    }

    fn collect(&self, layout: &PageLayout, map: &mut ContextMap) {
        if layout.images.is_empty() {
            return;
        }
        let text = normalize_whitespace(&layout.text);
        if !text.is_empty() {
            map.insert_page(layout.index, text);
        }
    }
}

/// Text of the `blocks` nearest text blocks, per image.
#[derive(Debug, Clone, Copy)]
pub struct NearestBlocksContext {
    pub blocks: usize,
}

impl Default for NearestBlocksContext {
    fn default() -> Self {
        Self { blocks: 3 }
    }
}

impl ContextStrategy for NearestBlocksContext {
    fn name(&self) -> &'static str {
        "nearest-blocks"
    }

    fn collect(&self, layout: &PageLayout, map: &mut ContextMap) {
        WholePageContext.collect(layout, map);
        for (i, bbox) in layout.images.iter().enumerate() {
            let Some(bbox) = bbox else {
                continue;
            };
            let text = nearest_text(bbox, &layout.blocks, self.blocks);
            if !text.is_empty() {
                map.insert_image(layout.index, i, text);
            }
        }
    }
}

/// Which [`ContextStrategy`] the pipeline uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ContextMode {
    /// Whole page text (default).
    #[default]
    WholePage,
    /// Text of the three blocks nearest each image.
    NearestBlocks,
}

impl ContextMode {
    pub fn strategy(&self) -> Box<dyn ContextStrategy> {
        match self {
            ContextMode::WholePage => Box::new(WholePageContext),
            ContextMode::NearestBlocks => Box::new(NearestBlocksContext::default()),
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

/// Collapse every whitespace run to one space and trim.
pub fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Concatenate the text of the `n` non-empty blocks closest to `image`.
pub fn nearest_text(image: &BoundingBox, blocks: &[TextBlock], n: usize) -> String {
    let mut by_distance: Vec<(f32, String)> = blocks
        .iter()
        .filter_map(|b| {
            let text = normalize_whitespace(&b.text);
            (!text.is_empty()).then(|| (image.center_distance(&b.bbox), text))
        })
        .collect();
    by_distance.sort_by(|a, b| a.0.total_cmp(&b.0));
    by_distance
        .into_iter()
        .take(n)
        .map(|(_, t)| t)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Apply `strategy` to every layout whose page is in `pages`.
pub fn build_context_map(
    layouts: &[PageLayout],
    strategy: &dyn ContextStrategy,
    pages: &PageSelection,
) -> ContextMap {
    let mut map = ContextMap::new();
    for layout in layouts.iter().filter(|l| pages.contains(l.index)) {
        strategy.collect(layout, &mut map);
    }
    map
}

/// Read the document's layouts and build its context map.
///
/// Any failure is logged and yields an empty map.
pub async fn extract_page_context(
    source: &dyn LayoutSource,
    pdf_path: &Path,
    config: &ConversionConfig,
) -> ContextMap {
    let strategy = config.context_mode.strategy();
    match source
        .read_layouts(pdf_path, &config.pages, config.password.as_deref())
        .await
    {
        Ok(layouts) => {
            let map = build_context_map(&layouts, strategy.as_ref(), &config.pages);
            info!(
                "Context extracted for {} page(s) ({} strategy)",
                map.len(),
                strategy.name()
            );
            map
        }
        Err(e) => {
            warn!("Text context extraction failed, continuing without it: {}", e);
            debug!("Context extraction error detail: {:?}", e);
            ContextMap::new()
        }
    }
}
