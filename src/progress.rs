//! Progress-callback trait for per-image conversion events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to be told
//! as the pipeline moves and describes each image.
//!
//! Images are processed one after another, so events for a conversion arrive
//! in order from a single task. The trait is still `Send + Sync` because the
//! conversion future may move between runtime threads.
//!
//! # Example
//!
//! ```rust
//! use contextual_pdf2md::{ConversionProgressCallback, ConversionConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     described: Arc<AtomicUsize>,
//! }
//!
//! impl ConversionProgressCallback for CountingCallback {
//!     fn on_image_complete(&self, index: usize, total: usize, description: &str) {
//!         self.described.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Image {}/{}: {}", index, total, description);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback {
//!     described: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = ConversionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ConversionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the conversion pipeline as it processes each image.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Image indices are 1-based positions in document
/// order.
pub trait ConversionProgressCallback: Send + Sync {
    /// Called once after the Markdown conversion, before the first image.
    fn on_conversion_start(&self, total_images: usize) {
        let _ = total_images;
    }

    /// Called before an image is moved and described.
    fn on_image_start(&self, index: usize, total: usize) {
        let _ = (index, total);
    }

    /// Called when an image has been embedded. `description` may be empty
    /// when no backend produced one.
    fn on_image_complete(&self, index: usize, total: usize, description: &str) {
        let _ = (index, total, description);
    }

    /// Called when an image hit a non-fatal error (quota, backend, move).
    fn on_image_error(&self, index: usize, total: usize, error: &str) {
        let _ = (index, total, error);
    }

    /// Called once after every image has been attempted.
    ///
    /// * `described`: images that received a non-empty description
    fn on_conversion_complete(&self, total_images: usize, described: usize) {
        let _ = (total_images, described);
    }
}

/// A no-op implementation for callers that don't need progress events.
///
/// This is the default when no callback is configured.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl ConversionProgressCallback for Recorder {
        fn on_conversion_start(&self, total_images: usize) {
            self.events.lock().unwrap().push(format!("start {total_images}"));
        }
        fn on_image_complete(&self, index: usize, total: usize, description: &str) {
            self.events
                .lock()
                .unwrap()
                .push(format!("done {index}/{total} {description}"));
        }
        fn on_image_error(&self, index: usize, _total: usize, error: &str) {
            self.events.lock().unwrap().push(format!("error {index} {error}"));
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_conversion_start(3);
        cb.on_image_start(1, 3);
        cb.on_image_complete(1, 3, "a cat");
        cb.on_image_error(2, 3, "quota");
        cb.on_conversion_complete(3, 1);
    }

    #[test]
    fn overridden_methods_receive_events() {
        let rec = Arc::new(Recorder::default());
        let cb: ProgressCallback = rec.clone();
        cb.on_conversion_start(2);
        cb.on_image_start(1, 2);
        cb.on_image_complete(1, 2, "a chart");
        cb.on_image_error(2, 2, "vision quota reached");
        cb.on_conversion_complete(2, 1);

        let events = rec.events.lock().unwrap();
        assert_eq!(
            *events,
            vec![
                "start 2".to_string(),
                "done 1/2 a chart".to_string(),
                "error 2 vision quota reached".to_string(),
            ]
        );
    }
}
