//! Input resolution: normalise a user-supplied path or URL to a local file
//! and decide how it will be rasterised.
//!
//! pdfium opens documents by path, so URL inputs are downloaded into a
//! `TempDir` that lives as long as the [`ResolvedInput`]. The downloaded file
//! keeps the URL's file name so extension-based detection still works.

use crate::error::OcrError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

/// How a resolved input is turned into page images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// Rendered one image per page.
    Pdf,
    /// A single page.
    Image,
}

impl InputKind {
    /// Classify by extension (case-insensitive).
    pub fn from_path(path: &Path) -> Result<Self, OcrError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => Ok(InputKind::Pdf),
            "jpg" | "jpeg" | "png" => Ok(InputKind::Image),
            _ => Err(OcrError::UnsupportedFileType {
                path: path.to_path_buf(),
                extension: if ext.is_empty() {
                    "(none)".to_string()
                } else {
                    format!(".{ext}")
                },
            }),
        }
    }
}

/// The resolved input: either a local path or a downloaded temp file.
#[derive(Debug)]
pub enum ResolvedInput {
    Local { path: PathBuf, kind: InputKind },
    /// The `TempDir` is deleted when this value is dropped.
    Downloaded {
        path: PathBuf,
        kind: InputKind,
        _temp_dir: TempDir,
    },
}

impl ResolvedInput {
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local { path, .. } | ResolvedInput::Downloaded { path, .. } => path,
        }
    }

    pub fn kind(&self) -> InputKind {
        match self {
            ResolvedInput::Local { kind, .. } | ResolvedInput::Downloaded { kind, .. } => *kind,
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve a path or `http(s)` URL to a local, classified file.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, OcrError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else if input.trim().is_empty() {
        Err(OcrError::InvalidInput {
            input: input.to_string(),
        })
    } else {
        resolve_local(Path::new(input))
    }
}

/// Validate a local file: existence, permissions, type and PDF magic.
pub fn resolve_local(path: &Path) -> Result<ResolvedInput, OcrError> {
    let path = path.to_path_buf();
    if !path.exists() {
        return Err(OcrError::FileNotFound { path });
    }

    let kind = InputKind::from_path(&path)?;
    let mut file = match std::fs::File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(OcrError::PermissionDenied { path });
        }
        Err(_) => return Err(OcrError::FileNotFound { path }),
    };

    if kind == InputKind::Pdf {
        let mut magic = [0u8; 4];
        let n = file.read(&mut magic).unwrap_or(0);
        check_pdf_magic(&path, &magic[..n])?;
    }

    debug!("Resolved local {:?}: {}", kind, path.display());
    Ok(ResolvedInput::Local { path, kind })
}

fn check_pdf_magic(path: &Path, head: &[u8]) -> Result<(), OcrError> {
    if head.starts_with(b"%PDF") {
        return Ok(());
    }
    let mut magic = [0u8; 4];
    let n = head.len().min(4);
    magic[..n].copy_from_slice(&head[..n]);
    Err(OcrError::NotAPdf {
        path: path.to_path_buf(),
        magic,
    })
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, OcrError> {
    let filename = filename_from_url(url).ok_or_else(|| OcrError::InvalidInput {
        input: url.to_string(),
    })?;
    // Classify before spending bandwidth.
    let kind = InputKind::from_path(Path::new(&filename))?;

    info!("Downloading {} from: {}", filename, url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| OcrError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let to_download_error = |e: reqwest::Error| {
        if e.is_timeout() {
            OcrError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            OcrError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    };

    let response = client.get(url).send().await.map_err(to_download_error)?;
    if !response.status().is_success() {
        return Err(OcrError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }
    let bytes = response.bytes().await.map_err(to_download_error)?;

    let temp_dir = TempDir::new().map_err(|e| OcrError::Internal(e.to_string()))?;
    let path = temp_dir.path().join(&filename);
    tokio::fs::write(&path, &bytes)
        .await
        .map_err(|e| OcrError::Internal(format!("Failed to write temp file: {e}")))?;

    if kind == InputKind::Pdf {
        check_pdf_magic(&path, &bytes)?;
    }

    info!("Downloaded {} bytes to: {}", bytes.len(), path.display());
    Ok(ResolvedInput::Downloaded {
        path,
        kind,
        _temp_dir: temp_dir,
    })
}

/// Last path segment of the URL, if it has an extension.
fn filename_from_url(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    if last.contains('.') {
        Some(last.to_string())
    } else {
        None
    }
}
