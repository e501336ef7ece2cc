//! Configuration types for the OCR client.
//!
//! All behaviour of a [`crate::DotsOcrParser`] is controlled through one
//! immutable [`ParserConfig`], built via [`ParserConfigBuilder`]. Only the
//! prompt mode, grounding box and rasterisation flag vary per call; those live
//! in [`ParseOptions`].
//!
//! The library never reads environment variables. Credentials are passed in
//! explicitly (the CLI maps `DOTS_OCR_API_TOKEN` through clap).

use crate::backend::InferenceBackend;
use crate::error::OcrError;
use crate::pipeline::render::Rasterizer;
use crate::pipeline::resize::{MAX_PIXELS, MIN_PIXELS};
use crate::progress::ProgressCallback;
use crate::prompts::PromptMode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Public Replicate model used when no deployment is configured.
pub const DEFAULT_HOSTED_MODEL: &str = "sljeff/dots.ocr";

/// Replicate HTTP API root.
pub const DEFAULT_HOSTED_API_BASE: &str = "https://api.replicate.com/v1";

// ── Backend selection ────────────────────────────────────────────────────

/// Which inference service to talk to.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendConfig {
    /// A vLLM (OpenAI-compatible) chat-completion server.
    Direct {
        /// Server root, e.g. `http://127.0.0.1:8000`.
        base_url: String,
        /// Optional bearer token.
        api_token: Option<String>,
        /// Served model name. Default: `"model"`.
        model_name: String,
    },
    /// Replicate predictions, polled until terminal.
    Hosted {
        /// Bearer token. Required.
        api_token: Option<String>,
        /// Deployment `owner/name`. When `None`, `model` is used.
        deployment: Option<String>,
        /// Public model `owner/name` or `owner/name:version`.
        model: String,
        /// API root. Default: [`DEFAULT_HOSTED_API_BASE`].
        api_base: String,
        /// Delay between status polls in milliseconds. Default: 1000.
        poll_interval_ms: u64,
    },
}

impl BackendConfig {
    /// Direct backend with the reference defaults.
    pub fn direct(base_url: impl Into<String>) -> Self {
        BackendConfig::Direct {
            base_url: base_url.into(),
            api_token: None,
            model_name: "model".to_string(),
        }
    }

    /// Hosted backend on the public model.
    pub fn hosted(api_token: Option<String>) -> Self {
        BackendConfig::Hosted {
            api_token,
            deployment: None,
            model: DEFAULT_HOSTED_MODEL.to_string(),
            api_base: DEFAULT_HOSTED_API_BASE.to_string(),
            poll_interval_ms: 1000,
        }
    }

    /// Short backend tag used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            BackendConfig::Direct { .. } => "vllm",
            BackendConfig::Hosted { .. } => "replicate",
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::direct("http://127.0.0.1:8000")
    }
}

impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |t: &Option<String>| t.as_ref().map(|_| "<redacted>");
        match self {
            BackendConfig::Direct {
                base_url,
                api_token,
                model_name,
            } => f
                .debug_struct("Direct")
                .field("base_url", base_url)
                .field("api_token", &redact(api_token))
                .field("model_name", model_name)
                .finish(),
            BackendConfig::Hosted {
                api_token,
                deployment,
                model,
                api_base,
                poll_interval_ms,
            } => f
                .debug_struct("Hosted")
                .field("api_token", &redact(api_token))
                .field("deployment", deployment)
                .field("model", model)
                .field("api_base", api_base)
                .field("poll_interval_ms", poll_interval_ms)
                .finish(),
        }
    }
}

// ── Sampling ─────────────────────────────────────────────────────────────

/// Sampling parameters forwarded to the model on every call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_p: f32,
    pub max_completion_tokens: u32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            top_p: 1.0,
            max_completion_tokens: 16384,
        }
    }
}

// ── Parser configuration ─────────────────────────────────────────────────

/// Configuration for a [`crate::DotsOcrParser`].
///
/// # Example
/// ```rust
/// use dots_ocr_client::{BackendConfig, ParserConfig};
///
/// let config = ParserConfig::builder()
///     .backend(BackendConfig::direct("http://10.0.0.5:8000"))
///     .num_thread(16)
///     .dpi(200)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ParserConfig {
    /// Backend selection and credentials.
    pub backend: BackendConfig,

    /// Pre-constructed backend. Takes precedence over `backend`.
    ///
    /// Lets embedders add caching or rate limiting, and lets tests script
    /// responses without a server.
    pub backend_override: Option<Arc<dyn InferenceBackend>>,

    /// Pre-constructed rasterizer. Default: pdfium.
    pub rasterizer: Option<Arc<dyn Rasterizer>>,

    /// Sampling parameters.
    pub sampling: SamplingParams,

    /// Rendering DPI for PDF pages (and for `fitz_preprocess` upsampling).
    /// Default: 200.
    pub dpi: u32,

    /// Lower bound on the pixel count of the image sent to the model.
    /// `None` leaves the rendered image as is. Must be `>= MIN_PIXELS`.
    pub min_pixels: Option<u32>,

    /// Upper bound on the pixel count of the image sent to the model.
    /// `None` leaves the rendered image as is. Must be `<= MAX_PIXELS`.
    pub max_pixels: Option<u32>,

    /// Maximum number of pages in flight. Default: 64.
    ///
    /// Each page is one blocking-style round trip to the backend, so this is
    /// a network concurrency limit, not a CPU one.
    pub num_thread: usize,

    /// Retries after a failed backend call. Default: 0.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-request timeout in seconds. Default: 600.
    ///
    /// A dense page at 16k completion tokens can take minutes on a busy
    /// server.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Embed Picture crops in the Markdown as base64 data URIs instead of
    /// file-name placeholders. Default: false.
    pub embed_pictures: bool,

    /// Optional per-page progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            backend_override: None,
            rasterizer: None,
            sampling: SamplingParams::default(),
            dpi: 200,
            min_pixels: None,
            max_pixels: None,
            num_thread: 64,
            max_retries: 0,
            retry_backoff_ms: 500,
            api_timeout_secs: 600,
            download_timeout_secs: 120,
            embed_pictures: false,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ParserConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParserConfig")
            .field("backend", &self.backend)
            .field(
                "backend_override",
                &self.backend_override.as_ref().map(|b| b.name().to_string()),
            )
            .field("rasterizer", &self.rasterizer.as_ref().map(|_| "<dyn Rasterizer>"))
            .field("sampling", &self.sampling)
            .field("dpi", &self.dpi)
            .field("min_pixels", &self.min_pixels)
            .field("max_pixels", &self.max_pixels)
            .field("num_thread", &self.num_thread)
            .field("max_retries", &self.max_retries)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("embed_pictures", &self.embed_pictures)
            .finish()
    }
}

impl ParserConfig {
    /// Create a new builder for `ParserConfig`.
    pub fn builder() -> ParserConfigBuilder {
        ParserConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ParserConfig`].
#[derive(Debug)]
pub struct ParserConfigBuilder {
    config: ParserConfig,
}

impl ParserConfigBuilder {
    pub fn backend(mut self, backend: BackendConfig) -> Self {
        self.config.backend = backend;
        self
    }

    pub fn backend_override(mut self, backend: Arc<dyn InferenceBackend>) -> Self {
        self.config.backend_override = Some(backend);
        self
    }

    pub fn rasterizer(mut self, rasterizer: Arc<dyn Rasterizer>) -> Self {
        self.config.rasterizer = Some(rasterizer);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.sampling.temperature = t;
        self
    }

    pub fn top_p(mut self, p: f32) -> Self {
        self.config.sampling.top_p = p;
        self
    }

    pub fn max_completion_tokens(mut self, n: u32) -> Self {
        self.config.sampling.max_completion_tokens = n;
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi;
        self
    }

    pub fn min_pixels(mut self, px: u32) -> Self {
        self.config.min_pixels = Some(px);
        self
    }

    pub fn max_pixels(mut self, px: u32) -> Self {
        self.config.max_pixels = Some(px);
        self
    }

    pub fn num_thread(mut self, n: usize) -> Self {
        self.config.num_thread = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn embed_pictures(mut self, v: bool) -> Self {
        self.config.embed_pictures = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    ///
    /// Backend credentials are checked later, by
    /// [`crate::DotsOcrParser::new`], because an injected backend needs none.
    pub fn build(self) -> Result<ParserConfig, OcrError> {
        let c = &self.config;
        if !(72..=600).contains(&c.dpi) {
            return Err(OcrError::Configuration(format!(
                "dpi must be 72–600, got {}",
                c.dpi
            )));
        }
        if c.num_thread == 0 {
            return Err(OcrError::Configuration("num_thread must be ≥ 1".into()));
        }
        if let Some(min) = c.min_pixels {
            if min < MIN_PIXELS {
                return Err(OcrError::Configuration(format!(
                    "min_pixels must be ≥ {MIN_PIXELS}, got {min}"
                )));
            }
        }
        if let Some(max) = c.max_pixels {
            if max > MAX_PIXELS {
                return Err(OcrError::Configuration(format!(
                    "max_pixels must be ≤ {MAX_PIXELS}, got {max}"
                )));
            }
        }
        if let (Some(min), Some(max)) = (c.min_pixels, c.max_pixels) {
            if min > max {
                return Err(OcrError::Configuration(format!(
                    "min_pixels ({min}) exceeds max_pixels ({max})"
                )));
            }
        }
        if !(0.0..=2.0).contains(&c.sampling.temperature) {
            return Err(OcrError::Configuration(format!(
                "temperature must be 0–2, got {}",
                c.sampling.temperature
            )));
        }
        if !(c.sampling.top_p > 0.0 && c.sampling.top_p <= 1.0) {
            return Err(OcrError::Configuration(format!(
                "top_p must be in (0, 1], got {}",
                c.sampling.top_p
            )));
        }
        if c.sampling.max_completion_tokens == 0 {
            return Err(OcrError::Configuration(
                "max_completion_tokens must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Per-call options ─────────────────────────────────────────────────────

/// Options that may change from one `parse_*` call to the next.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseOptions {
    /// Instruction template. Default: [`PromptMode::LayoutAll`].
    pub prompt_mode: PromptMode,
    /// Region `[x1, y1, x2, y2]` in original-image pixels. Required for
    /// [`PromptMode::GroundingOcr`], forwarded to every page.
    pub bbox: Option<[u32; 4]>,
    /// Upsample raster images to the configured DPI before sending.
    pub fitz_preprocess: bool,
}

impl ParseOptions {
    pub fn new(prompt_mode: PromptMode) -> Self {
        Self {
            prompt_mode,
            ..Self::default()
        }
    }

    pub fn with_bbox(mut self, bbox: [u32; 4]) -> Self {
        self.bbox = Some(bbox);
        self
    }

    pub fn with_fitz_preprocess(mut self, v: bool) -> Self {
        self.fitz_preprocess = v;
        self
    }
}
