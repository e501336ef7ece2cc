//! Progress-callback trait for per-page parsing events.
//!
//! Inject an [`Arc<dyn ParseProgressCallback>`] via
//! [`crate::config::ParserConfigBuilder::progress_callback`] to receive events
//! as pages are dispatched and completed. Pages finish in any order, so
//! implementations see `on_page_complete` calls out of page order.
//!
//! # Example
//!
//! ```rust
//! use dots_ocr_client::{ParseProgressCallback, ParserConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl ParseProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, page_no: usize, total_pages: usize, cells: usize) {
//!         let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("Processed page {}/{} ({} cells, {} done)", page_no + 1, total_pages, cells, done);
//!     }
//! }
//!
//! let config = ParserConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { completed: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the orchestrator as it processes each page.
///
/// All methods default to no-ops. Page events may arrive concurrently from
/// different worker threads; protect shared state accordingly.
pub trait ParseProgressCallback: Send + Sync {
    /// Called once after rasterisation, before any backend call.
    fn on_document_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called just before the backend request for a page (0-indexed).
    fn on_page_start(&self, page_no: usize, total_pages: usize) {
        let _ = (page_no, total_pages);
    }

    /// Called when a page was parsed successfully.
    fn on_page_complete(&self, page_no: usize, total_pages: usize, cells: usize) {
        let _ = (page_no, total_pages, cells);
    }

    /// Called when a page failed; the page still appears in the output.
    fn on_page_error(&self, page_no: usize, total_pages: usize, error: &str) {
        let _ = (page_no, total_pages, error);
    }

    /// Called once after every page has been attempted.
    fn on_document_complete(&self, total_pages: usize, success_count: usize) {
        let _ = (total_pages, success_count);
    }
}

/// A no-op implementation.
pub struct NoopProgressCallback;

impl ParseProgressCallback for NoopProgressCallback {}

/// The type stored in [`crate::config::ParserConfig`].
pub type ProgressCallback = Arc<dyn ParseProgressCallback>;
