//! Error types for the contextual-pdf2md library.
//!
//! Three error types reflect three distinct failure modes:
//!
//! * [`Pdf2MdError`]: **Fatal**: the conversion cannot proceed at all
//!   (missing input file, not a PDF, the layout converter failed). Returned
//!   as `Err(Pdf2MdError)` from the top-level `convert*` functions.
//!
//! * [`ImageError`]: **Non-fatal**: a single image could not be described
//!   or moved, but the document still converts. Stored inside
//!   [`crate::output::ImageRecord`] so callers can inspect what was skipped.
//!
//! * [`BackendError`]: returned by the vision and translation backends.
//!   The describer turns these into fallbacks (empty description,
//!   untranslated text) and never lets them escape the pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the contextual-pdf2md library.
///
/// Image-level failures use [`ImageError`] and are stored in
/// [`crate::output::ImageRecord`] rather than propagated here.
#[derive(Debug, Error)]
pub enum Pdf2MdError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}\nTry repairing with: qpdf --decrypt input.pdf output.pdf")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// The document-to-Markdown converter failed for the whole document.
    #[error("Markdown conversion of '{path}' failed: {detail}")]
    ConversionFailed { path: PathBuf, detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create the asset or work directory.
    #[error("Failed to create directory '{path}': {source}")]
    AssetDirFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not create or write the output Markdown file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A description catalog could not be read or parsed.
    #[error("Description catalog '{path}' is invalid: {detail}")]
    CatalogInvalid { path: PathBuf, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Install a pdfium build (e.g. from bblanchon/pdfium-binaries) and either:\n\
  • place libpdfium on the system library path, or\n\
  • set PDFIUM_LIB_PATH=/path/to/libpdfium (file or directory).\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single image.
///
/// The image keeps an empty (or untranslated) description and the overall
/// conversion continues.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum ImageError {
    /// The quota of a backend was exhausted and waiting is disabled.
    #[error("{service} quota reached; description skipped")]
    QuotaExhausted { service: String },

    /// The vision backend failed for this image.
    #[error("vision analysis failed for '{path}': {detail}")]
    VisionFailed { path: PathBuf, detail: String },

    /// The image bytes could not be read back from the asset directory.
    #[error("could not read '{path}': {detail}")]
    ReadFailed { path: PathBuf, detail: String },

    /// The raw image could not be moved into the asset directory.
    #[error("could not move '{path}' into the asset directory: {detail}")]
    MoveFailed { path: PathBuf, detail: String },
}

/// Errors reported by vision and translation backends.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The service answered with a non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The request never produced a response (DNS, TLS, timeout…).
    #[error("transport error: {0}")]
    Transport(String),

    /// The response arrived but did not have the expected shape.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The vision LLM provider reported an error.
    #[error("LLM error: {0}")]
    Llm(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            BackendError::MalformedResponse(e.to_string())
        } else {
            BackendError::Transport(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_a_pdf_display() {
        let e = Pdf2MdError::NotAPdf {
            path: PathBuf::from("notes.txt"),
            magic: *b"hell",
        };
        let msg = e.to_string();
        assert!(msg.contains("notes.txt"), "got: {msg}");
    }

    #[test]
    fn quota_exhausted_display() {
        let e = ImageError::QuotaExhausted {
            service: "vision".into(),
        };
        assert!(e.to_string().contains("vision quota reached"));
    }

    #[test]
    fn vision_failed_display() {
        let e = ImageError::VisionFailed {
            path: PathBuf::from("assets/image_0-0.png"),
            detail: "HTTP 401: bad key".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("image_0-0.png"));
        assert!(msg.contains("bad key"));
    }

    #[test]
    fn http_error_display() {
        let e = BackendError::Http {
            status: 429,
            body: "Too Many Requests".into(),
        };
        assert_eq!(e.to_string(), "HTTP 429: Too Many Requests");
    }

    #[test]
    fn image_error_serialises() {
        let e = ImageError::QuotaExhausted {
            service: "translator".into(),
        };
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains("QuotaExhausted"));
    }
}
