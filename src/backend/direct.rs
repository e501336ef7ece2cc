//! Direct backend: a vLLM server's OpenAI-compatible chat-completion API.
//!
//! One request per page: a single user message carrying the page image as an
//! `image_url` part followed by the prompt. The prompt is prefixed with the
//! model's image placeholder tokens; without them vLLM inserts a newline
//! between image and text, which the model was not trained on.

use super::{check_status, http_client, InferenceBackend, InferenceRequest};
use crate::error::{BackendError, OcrError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

const NAME: &str = "vllm";

/// Prepended to every prompt.
pub const IMAGE_TOKENS: &str = "<|img|><|imgpad|><|endofimg|>";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_completion_tokens: u32,
    temperature: f32,
    top_p: f32,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Content<'a> {
    ImageUrl { image_url: ImageUrl<'a> },
    Text { text: String },
}

#[derive(Debug, Serialize)]
struct ImageUrl<'a> {
    url: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for one vLLM server.
#[derive(Debug)]
pub struct DirectBackend {
    client: reqwest::Client,
    endpoint: String,
    api_token: Option<String>,
    model_name: String,
    timeout_secs: u64,
}

impl DirectBackend {
    pub fn new(
        base_url: &str,
        api_token: Option<String>,
        model_name: &str,
        timeout_secs: u64,
    ) -> Result<Self, OcrError> {
        let endpoint = completions_url(base_url)?;
        if model_name.trim().is_empty() {
            return Err(OcrError::Configuration("model_name must not be empty".into()));
        }
        debug!("vllm endpoint: {}", endpoint);
        Ok(Self {
            client: http_client(timeout_secs)?,
            endpoint,
            api_token: api_token.filter(|t| !t.is_empty()),
            model_name: model_name.to_string(),
            timeout_secs,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// `{base}/v1/chat/completions`, without doubling a trailing `/v1`.
fn completions_url(base_url: &str) -> Result<String, OcrError> {
    let base = base_url.trim().trim_end_matches('/');
    reqwest::Url::parse(base)
        .map_err(|e| OcrError::Configuration(format!("invalid base URL '{base_url}': {e}")))?;
    if base.ends_with("/v1") {
        Ok(format!("{base}/chat/completions"))
    } else {
        Ok(format!("{base}/v1/chat/completions"))
    }
}

fn build_request<'a>(model: &'a str, request: &'a InferenceRequest) -> ChatRequest<'a> {
    ChatRequest {
        model,
        messages: vec![Message {
            role: "user",
            content: vec![
                Content::ImageUrl {
                    image_url: ImageUrl {
                        url: &request.image.data_uri,
                    },
                },
                Content::Text {
                    text: format!("{IMAGE_TOKENS}{}", request.prompt),
                },
            ],
        }],
        max_completion_tokens: request.sampling.max_completion_tokens,
        temperature: request.sampling.temperature,
        top_p: request.sampling.top_p,
    }
}

fn extract_content(response: ChatResponse) -> Result<String, BackendError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| BackendError::UnexpectedResponse {
            backend: NAME,
            detail: "no choices[0].message.content in completion".into(),
        })
}

#[async_trait]
impl InferenceBackend for DirectBackend {
    async fn infer(&self, request: &InferenceRequest) -> Result<String, BackendError> {
        debug!(
            "Page {}: sending {}x{} image to {}",
            request.page_no, request.image.width, request.image.height, self.endpoint
        );
        let body = build_request(&self.model_name, request);
        let mut call = self.client.post(&self.endpoint).json(&body);
        if let Some(token) = &self.api_token {
            call = call.bearer_auth(token);
        }

        let response = call
            .send()
            .await
            .map_err(|e| BackendError::from_reqwest(NAME, self.timeout_secs, e))?;
        let response = check_status(NAME, self.timeout_secs, response).await?;
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| BackendError::UnexpectedResponse {
                backend: NAME,
                detail: e.to_string(),
            })?;

        let content = extract_content(parsed)?;
        debug!("Page {}: {} chars from vllm", request.page_no, content.len());
        Ok(content)
    }

    fn name(&self) -> &str {
        NAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SamplingParams;
    use crate::pipeline::encode::EncodedImage;

    fn request() -> InferenceRequest {
        InferenceRequest {
            page_no: 0,
            image: EncodedImage {
                data_uri: "data:image/png;base64,AAAA".into(),
                width: 28,
                height: 28,
            },
            prompt: "Extract the text content from this image.".into(),
            sampling: SamplingParams::default(),
        }
    }

    #[test]
    fn url_gets_v1_suffix() {
        assert_eq!(
            completions_url("http://127.0.0.1:8000").unwrap(),
            "http://127.0.0.1:8000/v1/chat/completions"
        );
        assert_eq!(
            completions_url("http://gpu-box:8000/").unwrap(),
            "http://gpu-box:8000/v1/chat/completions"
        );
    }

    #[test]
    fn url_does_not_double_v1() {
        assert_eq!(
            completions_url("https://host/v1/").unwrap(),
            "https://host/v1/chat/completions"
        );
    }

    #[test]
    fn invalid_url_is_configuration_error() {
        assert!(matches!(
            completions_url("not a url"),
            Err(OcrError::Configuration(_))
        ));
    }

    #[test]
    fn request_body_shape() {
        let req = request();
        let body = serde_json::to_value(build_request("model", &req)).unwrap();
        assert_eq!(body["model"], "model");
        assert_eq!(body["max_completion_tokens"], 16384);
        assert_eq!(body["top_p"], 1.0);

        let content = &body["messages"][0]["content"];
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(content[0]["type"], "image_url");
        assert_eq!(content[0]["image_url"]["url"], "data:image/png;base64,AAAA");
        assert_eq!(content[1]["type"], "text");
        assert_eq!(
            content[1]["text"],
            "<|img|><|imgpad|><|endofimg|>Extract the text content from this image."
        );
    }

    #[test]
    fn extracts_first_choice() {
        let resp: ChatResponse = serde_json::from_str(
            r#"{"id":"x","choices":[{"index":0,"message":{"role":"assistant","content":"[]"}}]}"#,
        )
        .unwrap();
        assert_eq!(extract_content(resp).unwrap(), "[]");
    }

    #[test]
    fn empty_choices_is_unexpected() {
        let resp: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(matches!(
            extract_content(resp),
            Err(BackendError::UnexpectedResponse { .. })
        ));
    }
}
