//! Error types for the dots-ocr-client library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`OcrError`] is **fatal**: the document cannot be processed at all
//!   (bad configuration, missing file, unreadable PDF). Returned as
//!   `Err(OcrError)` from the constructor and the `parse_*` entry points.
//!
//! * [`PageError`] is **non-fatal**: a single page failed (backend outage,
//!   unparseable model output) but every other page is fine. Stored inside
//!   [`crate::output::PageResult`] so callers always receive one result per
//!   page and can inspect partial success.
//!
//! [`BackendError`] and [`MalformedResponse`] are the two per-page causes;
//! the orchestrator converts them into [`PageError`] at the page boundary.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the dots-ocr-client library.
#[derive(Debug, Error)]
pub enum OcrError {
    // ── Configuration errors ──────────────────────────────────────────────
    /// A required credential or identifier is missing or invalid for the
    /// selected backend, or a numeric setting is out of range.
    ///
    /// Always raised from [`crate::ParserConfigBuilder::build`] or
    /// [`crate::DotsOcrParser::new`], before any network activity.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// Neither a PDF nor a supported raster image.
    #[error("File extension '{extension}' of '{path}' is not supported (expected .pdf, .jpg, .jpeg or .png)")]
    UnsupportedFileType { path: PathBuf, extension: String },

    /// The file has a `.pdf` extension but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The raster image could not be decoded.
    #[error("Failed to decode image '{path}': {detail}")]
    ImageDecode { path: PathBuf, detail: String },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// pdfium could not open the document.
    #[error("PDF '{path}' could not be opened: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// pdfium returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Place libpdfium next to the executable or install it system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── Call errors ───────────────────────────────────────────────────────
    /// The prompt key does not name a known template.
    #[error("Unknown prompt mode '{0}'")]
    UnknownPromptMode(String),

    /// `prompt_grounding_ocr` needs a region to read.
    #[error("Prompt mode 'prompt_grounding_ocr' requires a bounding box")]
    MissingBoundingBox,

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure talking to an inference backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The endpoint answered with a non-success status.
    #[error("HTTP {status} from {backend}: {body}")]
    Http {
        backend: &'static str,
        status: u16,
        body: String,
    },

    /// Connection, TLS or body-decoding failure.
    #[error("{backend} request failed: {detail}")]
    Request {
        backend: &'static str,
        detail: String,
    },

    /// The call exceeded the configured per-call timeout.
    #[error("{backend} request timed out after {secs}s")]
    Timeout { backend: &'static str, secs: u64 },

    /// A hosted prediction reached a failed or canceled terminal state.
    #[error("Prediction {id} ended with status '{status}': {detail}")]
    PredictionFailed {
        id: String,
        status: String,
        detail: String,
    },

    /// The endpoint answered 2xx but the body has no usable completion.
    #[error("Unexpected response from {backend}: {detail}")]
    UnexpectedResponse {
        backend: &'static str,
        detail: String,
    },
}

impl BackendError {
    /// Map a reqwest failure, keeping timeouts distinguishable.
    pub(crate) fn from_reqwest(backend: &'static str, timeout_secs: u64, e: reqwest::Error) -> Self {
        if e.is_timeout() {
            BackendError::Timeout {
                backend,
                secs: timeout_secs,
            }
        } else {
            BackendError::Request {
                backend,
                detail: e.to_string(),
            }
        }
    }
}

/// Model output could not be decoded into a cell array.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Malformed model response: {detail}")]
pub struct MalformedResponse {
    pub detail: String,
}

/// A non-fatal error for a single page.
///
/// Stored in [`crate::output::PageResult::error`]. The page keeps its slot in
/// the output with empty `cells`; sibling pages are unaffected.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// The page image could not be prepared for the model.
    #[error("Page {page}: preprocessing failed: {detail}")]
    Preprocess { page: usize, detail: String },

    /// Backend call failed after retries.
    #[error("Page {page}: backend call failed after {retries} retries: {detail}")]
    Backend {
        page: usize,
        retries: u32,
        detail: String,
    },

    /// The model answered but the answer is not a cell array.
    #[error("Page {page}: {detail}")]
    MalformedResponse { page: usize, detail: String },

    /// The page task panicked or was cancelled.
    #[error("Page {page}: internal error: {detail}")]
    Internal { page: usize, detail: String },
}

impl PageError {
    /// 0-based page index the error belongs to.
    pub fn page(&self) -> usize {
        match self {
            PageError::Preprocess { page, .. }
            | PageError::Backend { page, .. }
            | PageError::MalformedResponse { page, .. }
            | PageError::Internal { page, .. } => *page,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_display() {
        let e = OcrError::Configuration("replicate backend requires an API token".into());
        assert!(e.to_string().contains("API token"), "got: {e}");
    }

    #[test]
    fn unsupported_file_display() {
        let e = OcrError::UnsupportedFileType {
            path: PathBuf::from("scan.tiff"),
            extension: ".tiff".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains(".tiff"));
        assert!(msg.contains(".pdf"));
    }

    #[test]
    fn backend_http_display() {
        let e = BackendError::Http {
            backend: "vllm",
            status: 503,
            body: "overloaded".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("503"));
        assert!(msg.contains("vllm"));
    }

    #[test]
    fn prediction_failed_display() {
        let e = BackendError::PredictionFailed {
            id: "abc123".into(),
            status: "canceled".into(),
            detail: "user canceled".into(),
        };
        assert!(e.to_string().contains("canceled"));
        assert!(e.to_string().contains("abc123"));
    }

    #[test]
    fn page_error_reports_page() {
        let e = PageError::MalformedResponse {
            page: 4,
            detail: "top-level value is not an array".into(),
        };
        assert_eq!(e.page(), 4);
        assert!(e.to_string().starts_with("Page 4"));
    }
}
