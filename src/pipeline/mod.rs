//! Pipeline stages for PDF-to-Markdown conversion.
//!
//! Each submodule implements one transformation step so it can be tested
//! alone and swapped (the converter and layout source are traits).
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ layout ──▶ extract ──▶ postprocess ──▶ assets ──▶ substitute
//! (path)    (text)     (md+imgs)   (cleanup)       (move)     (alt text)
//! ```
//!
//! 1. [`input`]: check that the path is a readable PDF
//! 2. [`layout`]: read text blocks and image boxes per page; feeds the
//!    context map
//! 3. [`extract`]: produce Markdown with empty image placeholders and
//!    write the raw images to a work directory; runs in `spawn_blocking`
//!    because pdfium is not async-safe
//! 4. [`postprocess`]: deterministic text cleanup
//! 5. [`assets`]: canonical image names and the move into the asset
//!    directory
//! 6. [`substitute`]: write descriptions into the Markdown image
//!    references

pub mod assets;
pub mod extract;
pub mod input;
pub mod layout;
pub mod postprocess;
pub mod substitute;
