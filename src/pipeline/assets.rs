//! Canonical asset naming and moving raw images into the asset directory.
//!
//! Raw images are named `{file name}-{page}-{index}.png` by the converter;
//! in the asset directory they become `image_{page}-{index}.png`, and the
//! Markdown links them relative to the output directory.

use super::extract::RawImage;
use once_cell::sync::Lazy;
use regex::Regex;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

static RE_PAGE_INDEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"-(\d+)-(\d+)\.png$").unwrap());

/// `(page, image)` parsed from a raw file name such as `doc.pdf-2-0.png`.
pub fn indices_from_file_name(name: &str) -> Option<(usize, usize)> {
    let caps = RE_PAGE_INDEX.captures(name)?;
    let page = caps.get(1)?.as_str().parse().ok()?;
    let image = caps.get(2)?.as_str().parse().ok()?;
    Some((page, image))
}

/// Page index of a raw image: the explicit one if the converter gave it,
/// else parsed from the file name, else 0.
pub fn page_index_of(raw: &RawImage) -> usize {
    raw.page_index
        .or_else(|| indices_from_file_name(&file_name(&raw.path)).map(|(p, _)| p))
        .unwrap_or(0)
}

/// Image index of a raw image, explicit or parsed from the file name.
pub fn image_index_of(raw: &RawImage) -> Option<usize> {
    raw.image_index
        .or_else(|| indices_from_file_name(&file_name(&raw.path)).map(|(_, i)| i))
}

/// Canonical asset file name for a raw image of the document `doc_name`.
///
/// `doc.pdf-2-0.png` → `image_2-0.png`. Names that do not carry the
/// document prefix fall back to the explicit indices, then to
/// `image_{raw name}`.
pub fn canonical_name(raw: &RawImage, doc_name: &str) -> String {
    let name = file_name(&raw.path);
    if let Some(rest) = name.strip_prefix(&format!("{doc_name}-")) {
        return format!("image_{rest}");
    }
    match (raw.page_index, raw.image_index) {
        (Some(p), Some(i)) => format!("image_{p}-{i}.png"),
        _ => format!("image_{name}"),
    }
}

/// Markdown link target for `name` in the asset directory, always with
/// forward slashes.
pub fn relative_link(assets_dir_name: &str, name: &str) -> String {
    let dir = assets_dir_name.replace('\\', "/");
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() || dir == "." {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

/// Move `from` to `to`, copying then removing when a rename is not possible
/// (e.g. across filesystems). An existing destination is replaced.
pub fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) => {
            debug!("rename {} failed ({}), copying", from.display(), e);
            std::fs::copy(from, to)?;
            std::fs::remove_file(from)
        }
    }
}

/// Move a raw image into `assets_dir` under its canonical name and return
/// the new path.
pub fn move_into_assets(raw: &RawImage, doc_name: &str, assets_dir: &Path) -> io::Result<PathBuf> {
    let dest = assets_dir.join(canonical_name(raw, doc_name));
    move_file(&raw.path, &dest)?;
    Ok(dest)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
