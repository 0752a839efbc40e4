//! Document → raw Markdown + raw image files.
//!
//! The pipeline treats this step as an external collaborator behind
//! [`DocumentConverter`]. The shipped [`PdfiumConverter`] is deliberately
//! simple: it emits the page text line by line and drops an empty-alt image
//! reference where each image sits vertically, writing the image itself to
//! the work directory as `{file name}-{page}-{index}.png`.
//!
//! Placeholders reference the bare file name (`![](doc.pdf-0-0.png)`); the
//! orchestrator swaps them for the canonical asset path later.

use super::layout::{bind_pdfium, numbered_images, open_document};
use crate::config::PageSelection;
use crate::error::Pdf2MdError;
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// An image file written by a converter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImage {
    /// Where the converter wrote the file.
    pub path: PathBuf,
    /// Exact target string used in the `![](target)` placeholder.
    pub placeholder_target: String,
    /// 0-based page, when the converter knows it.
    pub page_index: Option<usize>,
    /// 0-based position among the page's images.
    pub image_index: Option<usize>,
}

impl RawImage {
    /// A raw image known only by its path; the placeholder is the file name.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let placeholder_target = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            path,
            placeholder_target,
            page_index: None,
            image_index: None,
        }
    }

    pub fn at(mut self, page: usize, image: usize) -> Self {
        self.page_index = Some(page);
        self.image_index = Some(image);
        self
    }

    /// The `![](target)` string this image appears as in the raw Markdown.
    pub fn placeholder(&self) -> String {
        format!("![]({})", self.placeholder_target)
    }
}

/// Output of a [`DocumentConverter`]. Images are in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawConversion {
    pub markdown: String,
    pub images: Vec<RawImage>,
}

/// Turns a document into Markdown text plus extracted image files.
#[async_trait]
pub trait DocumentConverter: Send + Sync {
    async fn to_markdown(
        &self,
        path: &Path,
        pages: &PageSelection,
        work_dir: &Path,
        password: Option<&str>,
    ) -> Result<RawConversion, Pdf2MdError>;
}

/// Raw file name for image `image` of page `page` of `file_name`.
pub fn raw_image_name(file_name: &str, page: usize, image: usize) -> String {
    format!("{file_name}-{page}-{image}.png")
}

// ── pdfium converter ─────────────────────────────────────────────────────

/// Text + image extraction with pdfium.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfiumConverter;

#[async_trait]
impl DocumentConverter for PdfiumConverter {
    async fn to_markdown(
        &self,
        path: &Path,
        pages: &PageSelection,
        work_dir: &Path,
        password: Option<&str>,
    ) -> Result<RawConversion, Pdf2MdError> {
        let path = path.to_path_buf();
        let pages = pages.clone();
        let work_dir = work_dir.to_path_buf();
        let password = password.map(str::to_string);

        tokio::task::spawn_blocking(move || {
            convert_blocking(&path, &pages, &work_dir, password.as_deref())
        })
        .await
        .map_err(|e| Pdf2MdError::Internal(format!("Conversion task panicked: {}", e)))?
    }
}

/// Something placed on the page at a vertical position.
#[derive(Debug, Clone, PartialEq)]
enum Item {
    Text { top: f32, bottom: f32, left: f32, text: String },
    Image { top: f32, target: String },
}

impl Item {
    fn top(&self) -> f32 {
        match self {
            Item::Text { top, .. } | Item::Image { top, .. } => *top,
        }
    }
}

fn convert_blocking(
    pdf_path: &Path,
    selection: &PageSelection,
    work_dir: &Path,
    password: Option<&str>,
) -> Result<RawConversion, Pdf2MdError> {
    let file_name = pdf_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document.pdf".to_string());

    let pdfium = bind_pdfium()?;
    let document = open_document(&pdfium, pdf_path, password)?;
    let pages = document.pages();
    let indices = selection.to_indices(pages.len() as usize);
    info!("Converting {} pages of {}", indices.len(), file_name);

    let mut out = RawConversion::default();
    let mut page_texts = Vec::with_capacity(indices.len());

    for idx in indices {
        let page = pages.get(idx as u16).map_err(|e| Pdf2MdError::ConversionFailed {
            path: pdf_path.to_path_buf(),
            detail: format!("page {}: {:?}", idx, e),
        })?;

        let mut items = text_items(&page, idx);
        let numbered = numbered_images(page.objects().iter(), |o| {
            o.object_type() == PdfPageObjectType::Image
        });
        let (image_items, images) = place_images(&file_name, idx, work_dir, numbered, |object, dest| {
            let Some(image_object) = object.as_image_object() else {
                return Ok(None);
            };
            match image_object.get_raw_image() {
                Ok(img) => {
                    img.save(dest).map_err(|e| Pdf2MdError::ConversionFailed {
                        path: pdf_path.to_path_buf(),
                        detail: format!("writing {}: {}", dest.display(), e),
                    })?;
                    Ok(Some(object.bounds().map(|b| b.top().value).unwrap_or(0.0)))
                }
                Err(e) => {
                    warn!("Page {}: cannot extract image ({:?})", idx, e);
                    Ok(None)
                }
            }
        })?;
        items.extend(image_items);
        out.images.extend(images);

        page_texts.push(render_items(items));
    }

    out.markdown = page_texts
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    out.markdown.push('\n');
    Ok(out)
}

/// Write each numbered image object with `write`, which yields the object's
/// top edge or `None` when nothing could be extracted. A skipped object keeps
/// its number so the remaining images still match their layout slots.
fn place_images<O>(
    file_name: &str,
    page: usize,
    work_dir: &Path,
    numbered: impl IntoIterator<Item = (usize, O)>,
    mut write: impl FnMut(&O, &Path) -> Result<Option<f32>, Pdf2MdError>,
) -> Result<(Vec<Item>, Vec<RawImage>), Pdf2MdError> {
    let mut items = Vec::new();
    let mut images = Vec::new();
    for (image_index, object) in numbered {
        let name = raw_image_name(file_name, page, image_index);
        let dest = work_dir.join(&name);
        if let Some(top) = write(&object, &dest)? {
            debug!("Page {}: wrote {}", page, name);
            items.push(Item::Image { top, target: name });
            images.push(RawImage::from_path(dest).at(page, image_index));
        }
    }
    Ok((items, images))
}

fn text_items(page: &PdfPage, idx: usize) -> Vec<Item> {
    let text = match page.text() {
        Ok(t) => t,
        Err(e) => {
            warn!("Page {}: no text layer ({:?})", idx, e);
            return Vec::new();
        }
    };
    let items: Vec<Item> = text
        .segments()
        .iter()
        .filter_map(|segment| {
            let content = segment.text();
            let content = content.trim();
            if content.is_empty() {
                return None;
            }
            let b = segment.bounds();
            Some(Item::Text {
                top: b.top().value,
                bottom: b.bottom().value,
                left: b.left().value,
                text: content.to_string(),
            })
        })
        .collect();
    items
}

/// Lay items out top to bottom (PDF y grows upwards). Text segments sharing
/// a baseline join into one line; a vertical gap larger than a line height
/// starts a new paragraph.
fn render_items(mut items: Vec<Item>) -> String {
    items.sort_by(|a, b| {
        b.top()
            .partial_cmp(&a.top())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| match (a, b) {
                (Item::Text { left: la, .. }, Item::Text { left: lb, .. }) => {
                    la.partial_cmp(lb).unwrap_or(std::cmp::Ordering::Equal)
                }
                _ => std::cmp::Ordering::Equal,
            })
    });

    let mut blocks: Vec<String> = Vec::new();
    let mut line = String::new();
    let mut paragraph: Vec<String> = Vec::new();
    let mut last: Option<(f32, f32)> = None;

    let flush_line = |line: &mut String, paragraph: &mut Vec<String>| {
        if !line.is_empty() {
            paragraph.push(std::mem::take(line));
        }
    };
    let flush_paragraph = |paragraph: &mut Vec<String>, blocks: &mut Vec<String>| {
        if !paragraph.is_empty() {
            blocks.push(paragraph.join("\n"));
            paragraph.clear();
        }
    };

    for item in items {
        match item {
            Item::Text { top, bottom, text, .. } => {
                let height = (top - bottom).abs().max(1.0);
                match last {
                    Some((_, last_bottom)) if (bottom - last_bottom).abs() < height * 0.5 => {
                        line.push(' ');
                    }
                    Some((_, last_bottom)) => {
                        flush_line(&mut line, &mut paragraph);
                        if last_bottom - top > height {
                            flush_paragraph(&mut paragraph, &mut blocks);
                        }
                    }
                    None => {}
                }
                line.push_str(&text);
                last = Some((top, bottom));
            }
            Item::Image { target, .. } => {
                flush_line(&mut line, &mut paragraph);
                flush_paragraph(&mut paragraph, &mut blocks);
                blocks.push(format!("![]({target})"));
                last = None;
            }
        }
    }
    flush_line(&mut line, &mut paragraph);
    flush_paragraph(&mut paragraph, &mut blocks);

    blocks.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(top: f32, left: f32, s: &str) -> Item {
        Item::Text {
            top,
            bottom: top - 10.0,
            left,
            text: s.to_string(),
        }
    }

    #[test]
    fn raw_names_follow_file_page_index_pattern() {
        assert_eq!(raw_image_name("cours.pdf", 3, 1), "cours.pdf-3-1.png");
    }

    #[test]
    fn placeholder_uses_file_name() {
        let raw = RawImage::from_path("/tmp/work/cours.pdf-0-0.png").at(0, 0);
        assert_eq!(raw.placeholder(), "![](cours.pdf-0-0.png)");
        assert_eq!(raw.page_index, Some(0));
    }

    #[test]
    fn failed_extraction_keeps_image_numbers() {
        let numbered = numbered_images(["a", "text", "b", "c"], |o| *o != "text");
        let (items, images) = place_images("doc.pdf", 2, Path::new("/work"), numbered, |o, _| {
            Ok((*o != "a").then_some(100.0))
        })
        .unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(
            images.iter().map(|r| r.image_index).collect::<Vec<_>>(),
            vec![Some(1), Some(2)]
        );
        assert_eq!(images[0].placeholder(), "![](doc.pdf-2-1.png)");
        assert_eq!(images[1].path, Path::new("/work/doc.pdf-2-2.png"));
    }

    #[test]
    fn write_errors_abort_the_page() {
        let numbered = numbered_images(["a"], |_| true);
        let result = place_images("doc.pdf", 0, Path::new("/work"), numbered, |_, dest| {
            Err(Pdf2MdError::ConversionFailed {
                path: dest.to_path_buf(),
                detail: "disk full".into(),
            })
        });
        assert!(result.is_err());
    }

    #[test]
    fn same_baseline_joins_left_to_right() {
        let md = render_items(vec![text(700.0, 200.0, "world"), text(700.0, 50.0, "Hello")]);
        assert_eq!(md, "Hello world");
    }

    #[test]
    fn consecutive_lines_stay_in_one_paragraph() {
        let md = render_items(vec![text(700.0, 50.0, "first"), text(688.0, 50.0, "second")]);
        assert_eq!(md, "first\nsecond");
    }

    #[test]
    fn large_gap_starts_new_paragraph() {
        let md = render_items(vec![text(700.0, 50.0, "Title"), text(600.0, 50.0, "Body")]);
        assert_eq!(md, "Title\n\nBody");
    }

    #[test]
    fn image_placed_between_text_by_position() {
        let md = render_items(vec![
            text(700.0, 50.0, "Step one: create a variable in Scratch"),
            Item::Image {
                top: 650.0,
                target: "doc.pdf-0-0.png".into(),
            },
            text(300.0, 50.0, "Step two"),
        ]);
        assert_eq!(
            md,
            "Step one: create a variable in Scratch\n\n![](doc.pdf-0-0.png)\n\nStep two"
        );
    }
}
