//! Page layouts via pdfium: page text, image bounds and positioned text
//! segments, which is everything the context extractor needs.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which keeps thread-local
//! state and blocks while parsing. Every pdfium call runs on Tokio's
//! blocking pool so the async workers never stall.
//!
//! ## Binding
//!
//! The pdfium shared library is looked up in this order:
//!
//! 1. `PDFIUM_LIB_PATH`: a library file, or a directory containing one;
//! 2. the current directory;
//! 3. the system library path.

use crate::config::PageSelection;
use crate::context::{BoundingBox, PageLayout, TextBlock};
use crate::error::Pdf2MdError;
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Reads the layout of selected pages of a document.
#[async_trait]
pub trait LayoutSource: Send + Sync {
    async fn read_layouts(
        &self,
        path: &Path,
        pages: &PageSelection,
        password: Option<&str>,
    ) -> Result<Vec<PageLayout>, Pdf2MdError>;
}

/// [`LayoutSource`] backed by pdfium.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfiumLayoutSource;

#[async_trait]
impl LayoutSource for PdfiumLayoutSource {
    async fn read_layouts(
        &self,
        path: &Path,
        pages: &PageSelection,
        password: Option<&str>,
    ) -> Result<Vec<PageLayout>, Pdf2MdError> {
        let path = path.to_path_buf();
        let pages = pages.clone();
        let password = password.map(str::to_string);

        tokio::task::spawn_blocking(move || {
            read_layouts_blocking(&path, &pages, password.as_deref())
        })
        .await
        .map_err(|e| Pdf2MdError::Internal(format!("Layout task panicked: {}", e)))?
    }
}

fn read_layouts_blocking(
    pdf_path: &Path,
    selection: &PageSelection,
    password: Option<&str>,
) -> Result<Vec<PageLayout>, Pdf2MdError> {
    let pdfium = bind_pdfium()?;
    let document = open_document(&pdfium, pdf_path, password)?;
    let pages = document.pages();
    let total = pages.len() as usize;
    let indices = selection.to_indices(total);
    info!("Reading layout of {} of {} pages", indices.len(), total);

    let mut layouts = Vec::with_capacity(indices.len());
    for idx in indices {
        let page = pages.get(idx as u16).map_err(|e| Pdf2MdError::CorruptPdf {
            path: pdf_path.to_path_buf(),
            detail: format!("page {}: {:?}", idx, e),
        })?;
        layouts.push(page_layout(&page, idx));
    }
    Ok(layouts)
}

// ── pdfium helpers (shared with the default converter) ───────────────────

/// Bind to a pdfium library (see module docs for the lookup order).
pub fn bind_pdfium() -> Result<Pdfium, Pdf2MdError> {
    let bindings = match std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from) {
        Some(p) if p.is_dir() => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&p)),
        Some(p) => Pdfium::bind_to_library(&p),
        None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| Pdf2MdError::PdfiumBindingFailed(format!("{:?}", e)))?;
    Ok(Pdfium::new(bindings))
}

/// Open a document, mapping pdfium's load errors onto [`Pdf2MdError`].
pub fn open_document<'a>(
    pdfium: &'a Pdfium,
    pdf_path: &Path,
    password: Option<&'a str>,
) -> Result<PdfDocument<'a>, Pdf2MdError> {
    pdfium
        .load_pdf_from_file(pdf_path, password)
        .map_err(|e| load_error(pdf_path, password.is_some(), format!("{:?}", e)))
}

fn load_error(path: &Path, had_password: bool, detail: String) -> Pdf2MdError {
    let path = path.to_path_buf();
    if detail.to_lowercase().contains("password") {
        if had_password {
            Pdf2MdError::WrongPassword { path }
        } else {
            Pdf2MdError::PasswordRequired { path }
        }
    } else {
        Pdf2MdError::CorruptPdf { path, detail }
    }
}

/// Image objects in content-stream order with their 0-based number on the
/// page. Layout and converter both number images through here.
pub(crate) fn numbered_images<T>(
    objects: impl IntoIterator<Item = T>,
    is_image: impl Fn(&T) -> bool,
) -> impl Iterator<Item = (usize, T)> {
    objects.into_iter().filter(move |o| is_image(o)).enumerate()
}

/// Layout of one page. Text segments whose bounds pdfium cannot compute are
/// skipped; images without bounds keep an empty slot.
pub fn page_layout(page: &PdfPage, index: usize) -> PageLayout {
    let mut layout = PageLayout {
        index,
        ..Default::default()
    };

    match page.text() {
        Ok(text) => {
            layout.text = text.all();
            for segment in text.segments().iter() {
                let content = segment.text();
                let content = content.trim();
                if content.is_empty() {
                    continue;
                }
                let b = segment.bounds();
                layout.blocks.push(TextBlock {
                    bbox: BoundingBox::new(b.left().value, b.bottom().value, b.right().value, b.top().value),
                    text: content.to_string(),
                });
            }
        }
        Err(e) => warn!("Page {}: no text layer ({:?})", index, e),
    }

    let numbered = numbered_images(page.objects().iter(), |o| {
        o.object_type() == PdfPageObjectType::Image
    });
    for (i, object) in numbered {
        match object.bounds() {
            Ok(b) => layout.images.push(Some(BoundingBox::new(
                b.left().value,
                b.bottom().value,
                b.right().value,
                b.top().value,
            ))),
            Err(e) => {
                debug!("Page {}: image {} without bounds ({:?})", index, i, e);
                layout.images.push(None);
            }
        }
    }

    debug!(
        "Page {}: {} chars, {} blocks, {} images",
        index,
        layout.text.len(),
        layout.blocks.len(),
        layout.images.len()
    );
    layout
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn images_are_numbered_among_images_only() {
        let objects = ["text", "img-a", "path", "img-b", "img-c"];
        let numbered: Vec<_> = numbered_images(objects, |o| o.starts_with("img")).collect();
        assert_eq!(numbered, vec![(0, "img-a"), (1, "img-b"), (2, "img-c")]);
    }

    #[test]
    fn password_errors_are_classified() {
        let p = Path::new("secret.pdf");
        assert!(matches!(
            load_error(p, false, "PdfiumLibraryInternalError(PasswordError)".into()),
            Pdf2MdError::PasswordRequired { .. }
        ));
        assert!(matches!(
            load_error(p, true, "PdfiumLibraryInternalError(PasswordError)".into()),
            Pdf2MdError::WrongPassword { .. }
        ));
    }

    #[test]
    fn other_load_errors_are_corruption() {
        let err = load_error(Path::new("bad.pdf"), false, "FormatError".into());
        match err {
            Pdf2MdError::CorruptPdf { detail, .. } => assert_eq!(detail, "FormatError"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
