//! Document orchestration: input → page images → concurrent page tasks →
//! ordered results.
//!
//! Every page runs as its own spawned task (resize → encode → backend call
//! with retries → parse → assemble), at most `min(num_thread, pages)` in
//! flight. A page that fails is reported in its own [`PageResult`]; only
//! input, configuration and rasterisation problems abort a document.

use crate::backend::{Backend, InferenceBackend, InferenceRequest};
use crate::config::{ParseOptions, ParserConfig};
use crate::error::{OcrError, PageError};
use crate::output::{PageGeometry, PageResult};
use crate::pipeline::assemble::{assemble, assemble_text, AssembleOptions};
use crate::pipeline::encode::encode_png;
use crate::pipeline::input::{self, InputKind};
use crate::pipeline::parse::parse_cells;
use crate::pipeline::render::{PageImage, PdfiumRasterizer, Rasterizer};
use crate::pipeline::resize::{fit_image, project_to_model, smart_resize, MAX_PIXELS, MIN_PIXELS};
use crate::prompts::{build_prompt, PromptMode};
use futures::stream::{self, StreamExt};
use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// Client for a dots.ocr inference service.
///
/// Cheap to share: hold one per process and call it from many tasks.
///
/// # Example
///
/// ```rust,no_run
/// use dots_ocr_client::{BackendConfig, DotsOcrParser, ParseOptions, ParserConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ParserConfig::builder()
///     .backend(BackendConfig::direct("http://127.0.0.1:8000"))
///     .build()?;
/// let parser = DotsOcrParser::new(config)?;
/// let pages = parser.parse_file("report.pdf", &ParseOptions::default()).await?;
/// for page in &pages {
///     println!("{}", page.md_content);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DotsOcrParser {
    config: Arc<ParserConfig>,
    backend: Arc<dyn InferenceBackend>,
    rasterizer: Arc<dyn Rasterizer>,
}

impl std::fmt::Debug for DotsOcrParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DotsOcrParser")
            .field("backend", &self.backend.name())
            .field("config", &self.config)
            .finish()
    }
}

/// Everything a page task needs; shared read-only across tasks.
struct PageContext {
    file_path: String,
    options: ParseOptions,
    config: Arc<ParserConfig>,
    backend: Arc<dyn InferenceBackend>,
    total_pages: usize,
}

impl DotsOcrParser {
    /// Build the client. Fails fast on backend misconfiguration.
    pub fn new(config: ParserConfig) -> Result<Self, OcrError> {
        let backend: Arc<dyn InferenceBackend> = match &config.backend_override {
            Some(b) => Arc::clone(b),
            None => Arc::new(Backend::from_config(&config.backend, config.api_timeout_secs)?),
        };
        let rasterizer: Arc<dyn Rasterizer> = match &config.rasterizer {
            Some(r) => Arc::clone(r),
            None => Arc::new(PdfiumRasterizer::new()),
        };
        info!(
            "Using {} backend, num_thread={}",
            backend.name(),
            config.num_thread
        );
        Ok(Self {
            config: Arc::new(config),
            backend,
            rasterizer,
        })
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Parse a PDF or image given as a local path or `http(s)` URL.
    ///
    /// Returns one result per page, in page order. `file_path` on every
    /// result is `input` as given.
    pub async fn parse_file(
        &self,
        input: &str,
        options: &ParseOptions,
    ) -> Result<Vec<PageResult>, OcrError> {
        check_options(options)?;
        info!("Parsing {} ({})", input, options.prompt_mode);

        let resolved = input::resolve_input(input, self.config.download_timeout_secs).await?;
        let images = self
            .rasterize(resolved.path(), resolved.kind(), options.fitz_preprocess)
            .await?;
        self.run_pages(input, images, options).await
    }

    /// Parse every page of a local PDF.
    pub async fn parse_pdf(
        &self,
        path: impl AsRef<Path>,
        options: &ParseOptions,
    ) -> Result<Vec<PageResult>, OcrError> {
        self.parse_local(path.as_ref(), InputKind::Pdf, options).await
    }

    /// Parse a local image as a single page.
    pub async fn parse_image(
        &self,
        path: impl AsRef<Path>,
        options: &ParseOptions,
    ) -> Result<Vec<PageResult>, OcrError> {
        self.parse_local(path.as_ref(), InputKind::Image, options).await
    }

    async fn parse_local(
        &self,
        path: &Path,
        expected: InputKind,
        options: &ParseOptions,
    ) -> Result<Vec<PageResult>, OcrError> {
        check_options(options)?;
        let resolved = input::resolve_local(path)?;
        if resolved.kind() != expected {
            return Err(OcrError::UnsupportedFileType {
                path: path.to_path_buf(),
                extension: path
                    .extension()
                    .map(|e| format!(".{}", e.to_string_lossy()))
                    .unwrap_or_else(|| "(none)".to_string()),
            });
        }
        let images = self
            .rasterize(resolved.path(), resolved.kind(), options.fitz_preprocess)
            .await?;
        self.run_pages(&path.display().to_string(), images, options)
            .await
    }

    /// Parse already-rasterised pages; `pages[i]` becomes page `i`.
    ///
    /// The images are sent as given; `fitz_preprocess` does not apply.
    pub async fn parse_pages(
        &self,
        file_path: &str,
        pages: Vec<DynamicImage>,
        options: &ParseOptions,
    ) -> Result<Vec<PageResult>, OcrError> {
        let pages = pages.into_iter().map(PageImage::from).collect();
        self.run_pages(file_path, pages, options).await
    }

    async fn run_pages(
        &self,
        file_path: &str,
        pages: Vec<PageImage>,
        options: &ParseOptions,
    ) -> Result<Vec<PageResult>, OcrError> {
        check_options(options)?;
        let start = Instant::now();
        let total_pages = pages.len();
        if total_pages == 0 {
            warn!("{}: no pages to parse", file_path);
            return Ok(Vec::new());
        }

        let callback = self.config.progress_callback.clone();
        if let Some(ref cb) = callback {
            cb.on_document_start(total_pages);
        }

        let ctx = Arc::new(PageContext {
            file_path: file_path.to_string(),
            options: options.clone(),
            config: Arc::clone(&self.config),
            backend: Arc::clone(&self.backend),
            total_pages,
        });
        let concurrency = self.config.num_thread.min(total_pages).max(1);
        debug!("Dispatching {} pages, {} in flight", total_pages, concurrency);

        let mut slots: Vec<Option<PageResult>> = (0..total_pages).map(|_| None).collect();
        let mut results = stream::iter(pages.into_iter().enumerate().map(|(page_no, image)| {
            let ctx = Arc::clone(&ctx);
            let callback = callback.clone();
            async move {
                let geometry = identity_geometry(&image.original);
                let mut task = AbortOnDrop(tokio::spawn(process_page(
                    Arc::clone(&ctx),
                    page_no,
                    image,
                )));
                let result = (&mut task.0).await.unwrap_or_else(|e| {
                    PageResult::failed(
                        page_no,
                        ctx.file_path.as_str(),
                        geometry,
                        PageError::Internal {
                            page: page_no,
                            detail: format!("page task failed: {e}"),
                        },
                        None,
                    )
                });
                if let Some(ref cb) = callback {
                    match &result.error {
                        None => cb.on_page_complete(page_no, total_pages, result.cells.len()),
                        Some(e) => cb.on_page_error(page_no, total_pages, &e.to_string()),
                    }
                }
                result
            }
        }))
        .buffer_unordered(concurrency);

        while let Some(result) = results.next().await {
            let idx = result.page_no;
            slots[idx] = Some(result);
        }

        let pages: Vec<PageResult> = slots
            .into_iter()
            .enumerate()
            .map(|(page_no, slot)| {
                slot.unwrap_or_else(|| {
                    PageResult::failed(
                        page_no,
                        file_path,
                        PageGeometry {
                            image_width: 0,
                            image_height: 0,
                            model_width: 0,
                            model_height: 0,
                        },
                        PageError::Internal {
                            page: page_no,
                            detail: "page produced no result".into(),
                        },
                        None,
                    )
                })
            })
            .collect();

        let succeeded = pages.iter().filter(|p| p.is_ok()).count();
        if let Some(ref cb) = callback {
            cb.on_document_complete(total_pages, succeeded);
        }
        info!(
            "Parsed {}: {}/{} pages in {}ms",
            file_path,
            succeeded,
            total_pages,
            start.elapsed().as_millis()
        );
        Ok(pages)
    }

    /// Synchronous wrapper around [`parse_file`](Self::parse_file).
    ///
    /// Creates a temporary tokio runtime internally; do not call from inside
    /// an async context.
    pub fn parse_file_blocking(
        &self,
        input: &str,
        options: &ParseOptions,
    ) -> Result<Vec<PageResult>, OcrError> {
        tokio::runtime::Runtime::new()
            .map_err(|e| OcrError::Internal(format!("Failed to create tokio runtime: {e}")))?
            .block_on(self.parse_file(input, options))
    }

    async fn rasterize(
        &self,
        path: &Path,
        kind: InputKind,
        fitz_preprocess: bool,
    ) -> Result<Vec<PageImage>, OcrError> {
        let rasterizer = Arc::clone(&self.rasterizer);
        let path: PathBuf = path.to_path_buf();
        let dpi = self.config.dpi;
        let render_start = Instant::now();

        let images = tokio::task::spawn_blocking(move || match kind {
            InputKind::Pdf => rasterizer.render_pdf(&path, dpi, fitz_preprocess),
            InputKind::Image => rasterizer
                .load_image(&path, dpi, fitz_preprocess)
                .map(|img| vec![img]),
        })
        .await
        .map_err(|e| OcrError::Internal(format!("Render task panicked: {e}")))??;

        info!(
            "Rasterised {} pages in {}ms",
            images.len(),
            render_start.elapsed().as_millis()
        );
        Ok(images)
    }
}

/// Page task handle that cancels the task when dropped, so abandoning a
/// document stops its in-flight backend calls.
struct AbortOnDrop<T>(tokio::task::JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn check_options(options: &ParseOptions) -> Result<(), OcrError> {
    if options.prompt_mode == PromptMode::GroundingOcr && options.bbox.is_none() {
        return Err(OcrError::MissingBoundingBox);
    }
    Ok(())
}

fn identity_geometry(image: &DynamicImage) -> PageGeometry {
    PageGeometry {
        image_width: image.width(),
        image_height: image.height(),
        model_width: image.width(),
        model_height: image.height(),
    }
}

/// Run one page end to end. Never fails: errors land in the result.
///
/// Cells, geometry `image_*` and the preview use the original image; the
/// model sees the upsampled copy when there is one.
async fn process_page(ctx: Arc<PageContext>, page_no: usize, page: PageImage) -> PageResult {
    let config = &ctx.config;
    let mode = ctx.options.prompt_mode;
    let fail = |geometry: PageGeometry, error: PageError, response: Option<String>| {
        warn!("{}", error);
        PageResult::failed(page_no, ctx.file_path.as_str(), geometry, error, response)
    };

    // Grounding sends exactly the model input so the projected box lines up.
    let (min_pixels, max_pixels) = if mode == PromptMode::GroundingOcr {
        (
            Some(config.min_pixels.unwrap_or(MIN_PIXELS)),
            Some(config.max_pixels.unwrap_or(MAX_PIXELS)),
        )
    } else {
        (config.min_pixels, config.max_pixels)
    };

    let image = &page.original;
    let mut geometry = identity_geometry(image);
    let sent = match fit_image(page.to_send(), min_pixels, max_pixels) {
        Ok(img) => img,
        Err(e) => {
            let error = PageError::Preprocess {
                page: page_no,
                detail: e.to_string(),
            };
            return fail(geometry, error, None);
        }
    };
    match smart_resize(
        sent.height(),
        sent.width(),
        min_pixels.unwrap_or(MIN_PIXELS),
        max_pixels.unwrap_or(MAX_PIXELS),
    ) {
        Ok((h, w)) => {
            geometry.model_width = w;
            geometry.model_height = h;
        }
        Err(e) => {
            let error = PageError::Preprocess {
                page: page_no,
                detail: e.to_string(),
            };
            return fail(geometry, error, None);
        }
    }

    let encoded = match encode_png(&sent) {
        Ok(e) => e,
        Err(e) => {
            let error = PageError::Preprocess {
                page: page_no,
                detail: format!("image encoding failed: {e}"),
            };
            return fail(geometry, error, None);
        }
    };
    drop(sent);
    debug!(
        "Page {}: image {}x{}, model input {}x{}",
        page_no,
        geometry.image_width,
        geometry.image_height,
        geometry.model_width,
        geometry.model_height
    );

    let model_bbox = ctx.options.bbox.map(|b| {
        project_to_model(
            b,
            geometry.image_width,
            geometry.image_height,
            geometry.model_width,
            geometry.model_height,
        )
    });
    let request = InferenceRequest {
        page_no,
        image: encoded,
        prompt: build_prompt(mode, model_bbox),
        sampling: config.sampling,
    };

    if let Some(ref cb) = config.progress_callback {
        cb.on_page_start(page_no, ctx.total_pages);
    }

    let response = match call_with_retries(&ctx, &request).await {
        Ok(text) => text,
        Err(detail) => {
            let error = PageError::Backend {
                page: page_no,
                retries: config.max_retries,
                detail,
            };
            return fail(geometry, error, None);
        }
    };

    if !mode.returns_layout() {
        return assemble_text(page_no, &ctx.file_path, geometry, response);
    }

    match parse_cells(&response, geometry) {
        Ok(cells) => {
            debug!("Page {}: {} cells", page_no, cells.len());
            let options = AssembleOptions {
                prompt_mode: mode,
                embed_pictures: config.embed_pictures,
            };
            assemble(page_no, &ctx.file_path, geometry, cells, image, options)
        }
        Err(e) => {
            let error = PageError::MalformedResponse {
                page: page_no,
                detail: e.to_string(),
            };
            fail(geometry, error, Some(response))
        }
    }
}

/// Backend call with exponential backoff: `retry_backoff_ms * 2^(attempt-1)`.
async fn call_with_retries(ctx: &PageContext, request: &InferenceRequest) -> Result<String, String> {
    let config = &ctx.config;
    let start = Instant::now();
    let mut last_err: Option<String> = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let backoff = config
                .retry_backoff_ms
                .saturating_mul(2u64.saturating_pow(attempt - 1));
            warn!(
                "Page {}: retry {}/{} after {}ms",
                request.page_no, attempt, config.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        match ctx.backend.infer(request).await {
            Ok(text) => {
                debug!(
                    "Page {}: {} answered in {:?}",
                    request.page_no,
                    ctx.backend.name(),
                    start.elapsed()
                );
                return Ok(text);
            }
            Err(e) => {
                warn!("Page {}: attempt {} failed: {}", request.page_no, attempt + 1, e);
                last_err = Some(e.to_string());
            }
        }
    }

    Err(last_err.unwrap_or_else(|| "Unknown error".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grounding_requires_bbox() {
        let err = check_options(&ParseOptions::new(PromptMode::GroundingOcr)).unwrap_err();
        assert!(matches!(err, OcrError::MissingBoundingBox));
        assert!(check_options(&ParseOptions::new(PromptMode::GroundingOcr).with_bbox([0, 0, 5, 5])).is_ok());
        assert!(check_options(&ParseOptions::default()).is_ok());
    }

    #[test]
    fn new_fails_fast_without_hosted_token() {
        let config = ParserConfig::builder()
            .backend(crate::config::BackendConfig::hosted(None))
            .build()
            .unwrap();
        assert!(matches!(
            DotsOcrParser::new(config),
            Err(OcrError::Configuration(_))
        ));
    }
}
