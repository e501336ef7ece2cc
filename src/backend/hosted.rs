//! Hosted backend: Replicate predictions.
//!
//! A prediction is created, then polled at `urls.get` until it reaches a
//! terminal status. With a deployment the prediction is created on the
//! deployment; otherwise on a public model version, resolved once from the
//! model's `latest_version` unless pinned as `owner/name:version`.

use super::{check_status, http_client, InferenceBackend, InferenceRequest};
use crate::error::{BackendError, OcrError};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tracing::{debug, info};

const NAME: &str = "replicate";

/// `owner/name`, validated.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ModelRef {
    owner: String,
    name: String,
}

impl ModelRef {
    fn parse(s: &str) -> Result<Self, OcrError> {
        match s.trim().split_once('/') {
            Some((owner, name))
                if !owner.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(Self {
                    owner: owner.to_string(),
                    name: name.to_string(),
                })
            }
            _ => Err(OcrError::Configuration(format!(
                "expected 'owner/name', got '{s}'"
            ))),
        }
    }
}

/// Where predictions are created.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Deployment(ModelRef),
    Model {
        model: ModelRef,
        version: Option<String>,
    },
}

impl Target {
    fn from_config(deployment: Option<&str>, model: &str) -> Result<Self, OcrError> {
        if let Some(d) = deployment.filter(|d| !d.trim().is_empty()) {
            return Ok(Target::Deployment(ModelRef::parse(d)?));
        }
        let (model, version) = match model.split_once(':') {
            Some((m, v)) if !v.is_empty() => (m, Some(v.to_string())),
            Some((m, _)) => (m, None),
            None => (model, None),
        };
        Ok(Target::Model {
            model: ModelRef::parse(model)?,
            version,
        })
    }
}

#[derive(Debug, Serialize)]
struct PredictionInput<'a> {
    image: &'a str,
    prompt: &'a str,
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct CreatePrediction<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<&'a str>,
    input: PredictionInput<'a>,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    id: String,
    status: String,
    #[serde(default)]
    output: Value,
    #[serde(default)]
    error: Value,
    #[serde(default)]
    urls: PredictionUrls,
}

#[derive(Debug, Default, Deserialize)]
struct PredictionUrls {
    #[serde(default)]
    get: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelInfo {
    latest_version: Option<VersionInfo>,
}

#[derive(Debug, Deserialize)]
struct VersionInfo {
    id: String,
}

/// Client for Replicate's prediction API.
pub struct HostedBackend {
    client: reqwest::Client,
    api_token: String,
    api_base: String,
    target: Target,
    version: OnceCell<String>,
    poll_interval: Duration,
    timeout_secs: u64,
}

impl std::fmt::Debug for HostedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostedBackend")
            .field("api_base", &self.api_base)
            .field("target", &self.target)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl HostedBackend {
    pub fn new(
        api_token: &str,
        deployment: Option<&str>,
        model: &str,
        api_base: &str,
        poll_interval_ms: u64,
        timeout_secs: u64,
    ) -> Result<Self, OcrError> {
        let target = Target::from_config(deployment, model)?;
        let api_base = api_base.trim().trim_end_matches('/').to_string();
        reqwest::Url::parse(&api_base)
            .map_err(|e| OcrError::Configuration(format!("invalid API base '{api_base}': {e}")))?;

        match &target {
            Target::Deployment(d) => info!("replicate deployment {}/{}", d.owner, d.name),
            Target::Model { model, .. } => info!("replicate model {}/{}", model.owner, model.name),
        }

        let version = OnceCell::new_with(match &target {
            Target::Model {
                version: Some(v), ..
            } => Some(v.clone()),
            _ => None,
        });

        Ok(Self {
            client: http_client(timeout_secs)?,
            api_token: api_token.to_string(),
            api_base,
            target,
            version,
            poll_interval: Duration::from_millis(poll_interval_ms.max(1)),
            timeout_secs,
        })
    }

    fn err(&self, e: reqwest::Error) -> BackendError {
        BackendError::from_reqwest(NAME, self.timeout_secs, e)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, BackendError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| self.err(e))?;
        let response = check_status(NAME, self.timeout_secs, response).await?;
        response.json().await.map_err(|e| BackendError::UnexpectedResponse {
            backend: NAME,
            detail: e.to_string(),
        })
    }

    /// Resolve and cache the public model's latest version.
    async fn model_version(&self, model: &ModelRef) -> Result<&str, BackendError> {
        let version = self
            .version
            .get_or_try_init(|| async {
                let url = format!("{}/models/{}/{}", self.api_base, model.owner, model.name);
                let info: ModelInfo = self.get_json(&url).await?;
                let id = info
                    .latest_version
                    .map(|v| v.id)
                    .ok_or_else(|| BackendError::UnexpectedResponse {
                        backend: NAME,
                        detail: format!("model {}/{} has no published version", model.owner, model.name),
                    })?;
                debug!("Resolved {}/{} to version {}", model.owner, model.name, id);
                Ok::<_, BackendError>(id)
            })
            .await?;
        Ok(version.as_str())
    }

    async fn create(&self, request: &InferenceRequest) -> Result<Prediction, BackendError> {
        let input = PredictionInput {
            image: &request.image.data_uri,
            prompt: &request.prompt,
            temperature: request.sampling.temperature,
            top_p: request.sampling.top_p,
            max_tokens: request.sampling.max_completion_tokens,
        };
        let (url, body) = match &self.target {
            Target::Deployment(d) => (
                format!("{}/deployments/{}/{}/predictions", self.api_base, d.owner, d.name),
                CreatePrediction {
                    version: None,
                    input,
                },
            ),
            Target::Model { model, .. } => (
                format!("{}/predictions", self.api_base),
                CreatePrediction {
                    version: Some(self.model_version(model).await?),
                    input,
                },
            ),
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.err(e))?;
        let response = check_status(NAME, self.timeout_secs, response).await?;
        response.json().await.map_err(|e| BackendError::UnexpectedResponse {
            backend: NAME,
            detail: e.to_string(),
        })
    }
}

/// What to do with a prediction snapshot.
#[derive(Debug, PartialEq, Eq)]
enum Poll {
    Pending,
    Done(String),
}

fn inspect(prediction: &Prediction) -> Result<Poll, BackendError> {
    match prediction.status.as_str() {
        "succeeded" => join_output(&prediction.output).map(Poll::Done),
        "failed" | "canceled" | "aborted" => Err(BackendError::PredictionFailed {
            id: prediction.id.clone(),
            status: prediction.status.clone(),
            detail: match &prediction.error {
                Value::Null => "no error message".to_string(),
                Value::String(s) => s.clone(),
                other => other.to_string(),
            },
        }),
        _ => Ok(Poll::Pending),
    }
}

/// Output is a string, or an array of string chunks to concatenate.
fn join_output(output: &Value) -> Result<String, BackendError> {
    match output {
        Value::String(s) => Ok(s.clone()),
        Value::Array(parts) => parts
            .iter()
            .map(|p| p.as_str())
            .collect::<Option<Vec<_>>>()
            .map(|v| v.concat())
            .ok_or_else(|| BackendError::UnexpectedResponse {
                backend: NAME,
                detail: "prediction output array contains non-string items".into(),
            }),
        other => Err(BackendError::UnexpectedResponse {
            backend: NAME,
            detail: format!("unexpected prediction output: {other}"),
        }),
    }
}

#[async_trait]
impl InferenceBackend for HostedBackend {
    async fn infer(&self, request: &InferenceRequest) -> Result<String, BackendError> {
        let started = Instant::now();
        let mut prediction = self.create(request).await?;
        debug!(
            "Page {}: prediction {} created for a {}x{} image",
            request.page_no, prediction.id, request.image.width, request.image.height
        );

        loop {
            if let Poll::Done(text) = inspect(&prediction)? {
                debug!(
                    "Page {}: prediction {} succeeded in {:?}",
                    request.page_no,
                    prediction.id,
                    started.elapsed()
                );
                return Ok(text);
            }
            if started.elapsed() > Duration::from_secs(self.timeout_secs) {
                return Err(BackendError::Timeout {
                    backend: NAME,
                    secs: self.timeout_secs,
                });
            }
            let url = prediction
                .urls
                .get
                .clone()
                .ok_or_else(|| BackendError::UnexpectedResponse {
                    backend: NAME,
                    detail: format!("prediction {} has no urls.get", prediction.id),
                })?;
            tokio::time::sleep(self.poll_interval).await;
            prediction = self.get_json(&url).await?;
        }
    }

    fn name(&self) -> &str {
        NAME
    }
}
