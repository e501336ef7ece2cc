//! Inference backends: one page image + prompt in, raw model text out.
//!
//! [`InferenceBackend`] is the seam the orchestrator calls through. The two
//! supported services are the closed enum [`Backend`]; anything else (a
//! cache, a rate limiter, a test double) can be injected as an
//! `Arc<dyn InferenceBackend>` through
//! [`crate::config::ParserConfigBuilder::backend_override`].

pub mod direct;
pub mod hosted;

use crate::config::{BackendConfig, SamplingParams};
use crate::error::{BackendError, OcrError};
use crate::pipeline::encode::EncodedImage;
use async_trait::async_trait;

pub use direct::DirectBackend;
pub use hosted::HostedBackend;

/// One model call.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    /// 0-indexed page, for logs and scripted test backends.
    pub page_no: usize,
    pub image: EncodedImage,
    pub prompt: String,
    pub sampling: SamplingParams,
}

/// A service that turns an image and a prompt into model text.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Run one inference and return the model's text verbatim.
    async fn infer(&self, request: &InferenceRequest) -> Result<String, BackendError>;

    /// Short identifier used in logs.
    fn name(&self) -> &str;
}

/// The built-in backends.
#[derive(Debug)]
pub enum Backend {
    Direct(DirectBackend),
    Hosted(HostedBackend),
}

impl Backend {
    /// Build a backend from validated configuration.
    ///
    /// Fails with [`OcrError::Configuration`] when the hosted backend has no
    /// token or a malformed deployment/model identifier, before any network
    /// activity.
    pub fn from_config(config: &BackendConfig, timeout_secs: u64) -> Result<Self, OcrError> {
        match config {
            BackendConfig::Direct {
                base_url,
                api_token,
                model_name,
            } => Ok(Backend::Direct(DirectBackend::new(
                base_url,
                api_token.clone(),
                model_name,
                timeout_secs,
            )?)),
            BackendConfig::Hosted {
                api_token,
                deployment,
                model,
                api_base,
                poll_interval_ms,
            } => {
                let token = api_token
                    .as_deref()
                    .filter(|t| !t.trim().is_empty())
                    .ok_or_else(|| {
                        OcrError::Configuration(
                            "replicate backend requires an API token".to_string(),
                        )
                    })?;
                Ok(Backend::Hosted(HostedBackend::new(
                    token,
                    deployment.as_deref(),
                    model,
                    api_base,
                    *poll_interval_ms,
                    timeout_secs,
                )?))
            }
        }
    }
}

#[async_trait]
impl InferenceBackend for Backend {
    async fn infer(&self, request: &InferenceRequest) -> Result<String, BackendError> {
        match self {
            Backend::Direct(b) => b.infer(request).await,
            Backend::Hosted(b) => b.infer(request).await,
        }
    }

    fn name(&self) -> &str {
        match self {
            Backend::Direct(b) => b.name(),
            Backend::Hosted(b) => b.name(),
        }
    }
}

/// Build a reqwest client with the per-call timeout.
pub(crate) fn http_client(timeout_secs: u64) -> Result<reqwest::Client, OcrError> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| OcrError::Configuration(format!("could not build HTTP client: {e}")))
}

/// Read a response body and fail on non-2xx status.
pub(crate) async fn check_status(
    backend: &'static str,
    timeout_secs: u64,
    response: reqwest::Response,
) -> Result<reqwest::Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .map_err(|e| BackendError::from_reqwest(backend, timeout_secs, e))?;
    Err(BackendError::Http {
        backend,
        status: status.as_u16(),
        body,
    })
}
