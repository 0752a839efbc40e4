//! Input validation: make sure the source path is a readable PDF before any
//! directory is created or any backend is called.
//!
//! The `%PDF` magic check turns "wrong file" into a clear error instead of a
//! pdfium failure halfway through the pipeline.

use crate::error::Pdf2MdError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Validate `path` as a local, readable PDF file and return it.
pub fn resolve_input(path: &Path) -> Result<PathBuf, Pdf2MdError> {
    let path = path.to_path_buf();

    if !path.is_file() {
        return Err(Pdf2MdError::FileNotFound { path });
    }

    match std::fs::File::open(&path) {
        Ok(mut f) => {
            let mut magic = [0u8; 4];
            if f.read_exact(&mut magic).is_ok() && &magic != b"%PDF" {
                return Err(Pdf2MdError::NotAPdf { path, magic });
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(Pdf2MdError::PermissionDenied { path });
        }
        Err(_) => {
            return Err(Pdf2MdError::FileNotFound { path });
        }
    }

    debug!("Resolved local PDF: {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file() {
        let dir = TempDir::new().unwrap();
        let err = resolve_input(&dir.path().join("nope.pdf")).unwrap_err();
        assert!(matches!(err, Pdf2MdError::FileNotFound { .. }));
    }

    #[test]
    fn directory_is_not_a_file() {
        let dir = TempDir::new().unwrap();
        let err = resolve_input(dir.path()).unwrap_err();
        assert!(matches!(err, Pdf2MdError::FileNotFound { .. }));
    }

    #[test]
    fn wrong_magic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.pdf");
        std::fs::write(&path, b"hello world").unwrap();
        match resolve_input(&path).unwrap_err() {
            Pdf2MdError::NotAPdf { magic, .. } => assert_eq!(&magic, b"hell"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn pdf_magic_accepted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.pdf");
        std::fs::write(&path, b"%PDF-1.7\n%\xe2\xe3\xcf\xd3\n").unwrap();
        assert_eq!(resolve_input(&path).unwrap(), path);
    }
}
