//! Replicate predictions client.
//!
//! One client per hosted model. Predictions are created with `Prefer: wait`
//! and polled through `urls.get` when the model is still running after that.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use super::{Provider, ProviderError, ProviderOutput, ProviderRequest, ProviderResult};

pub const DEFAULT_BASE_URL: &str = "https://api.replicate.com";

const MIXTRAL_VERSION: &str = "7b3212fbaf88310cfef07a061ce94224e82efc8403c26fc67e8f6c065de51f21";
const PLAYGROUND_VERSION: &str = "42fe626e41cc811eaf02c94b892774839268ce1994ea778eba97103fe1ef51b8";

const NEGATIVE_PROMPT: &str = "BadDream, badhandv4, BadNegAnatomyV1-neg, easynegative, \
FastNegativeV2, bad anatomy, extra people, extra limbs, deformed, blurry, watermark, text, \
signature";

/// Upper bound on status polls for one prediction.
const MAX_POLLS: usize = 600;

/// Hosted models this bot knows how to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicateModel {
    /// mistralai/mixtral-8x7b-instruct-v0.1, text in, token stream out.
    Mixtral,
    /// playgroundai/playground-v2-1024px-aesthetic, prompt in, image URLs out.
    Playground,
}

impl ReplicateModel {
    fn version(&self) -> &'static str {
        match self {
            Self::Mixtral => MIXTRAL_VERSION,
            Self::Playground => PLAYGROUND_VERSION,
        }
    }

    fn input(&self, prompt: &str) -> Value {
        match self {
            Self::Mixtral => json!({
                "top_k": 50,
                "top_p": 0.9,
                "prompt": prompt,
                "temperature": 0.6,
                "max_new_tokens": 1024,
                "prompt_template": "<s>[INST] {prompt} [/INST]",
                "presence_penalty": 0,
                "frequency_penalty": 0,
            }),
            Self::Playground => json!({
                "width": 1024,
                "height": 1024,
                "prompt": prompt,
                "scheduler": "K_EULER_ANCESTRAL",
                "guidance_scale": 3,
                "apply_watermark": false,
                "negative_prompt": NEGATIVE_PROMPT,
                "num_inference_steps": 50,
            }),
        }
    }
}

#[derive(Deserialize, Debug)]
struct Prediction {
    status: String,
    output: Option<Value>,
    error: Option<Value>,
    urls: Option<PredictionUrls>,
}

#[derive(Deserialize, Debug)]
struct PredictionUrls {
    get: Option<String>,
}

pub struct ReplicateClient {
    api_token: String,
    model: ReplicateModel,
    base_url: String,
    poll_interval: Duration,
    client: reqwest::Client,
}

impl ReplicateClient {
    pub fn new(api_token: String, model: ReplicateModel) -> Self {
        Self {
            api_token,
            model,
            base_url: DEFAULT_BASE_URL.to_string(),
            poll_interval: Duration::from_secs(1),
            client: super::http_client(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Create a prediction and wait for it to reach a terminal state.
    async fn run(&self, prompt: &str) -> Result<Value, ProviderError> {
        let url = format!("{}/v1/predictions", self.base_url.trim_end_matches('/'));
        let body = json!({
            "version": self.model.version(),
            "input": self.model.input(prompt),
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_token)
            .header("Prefer", "wait")
            .json(&body)
            .send()
            .await?;
        let mut prediction: Prediction = super::parse_json(&super::read_body(response).await?)?;

        for _ in 0..MAX_POLLS {
            match prediction.status.as_str() {
                "succeeded" => {
                    return prediction.output.ok_or(ProviderError::Empty);
                }
                "failed" | "canceled" => {
                    let detail = prediction
                        .error
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| prediction.status.clone());
                    return Err(ProviderError::Upstream(detail));
                }
                status => debug!("Replicate prediction {status}, polling"),
            }

            let poll_url = prediction
                .urls
                .as_ref()
                .and_then(|u| u.get.clone())
                .ok_or_else(|| {
                    ProviderError::Malformed("running prediction has no poll url".into())
                })?;

            tokio::time::sleep(self.poll_interval).await;

            let response = self.client.get(&poll_url).bearer_auth(&self.api_token).send().await?;
            prediction = super::parse_json(&super::read_body(response).await?)?;
        }

        Err(ProviderError::Timeout)
    }
}

/// Mixtral streams tokens, so its output is an array of string fragments.
fn join_tokens(output: &Value) -> Result<String, ProviderError> {
    match output {
        Value::Array(parts) => {
            let text: String = parts.iter().filter_map(Value::as_str).collect();
            super::non_empty(text)
        }
        Value::String(s) => super::non_empty(s.clone()),
        _ => Err(ProviderError::Malformed("unexpected text output shape".into())),
    }
}

/// Image models return a list of URLs. The first one is used.
fn first_url(output: &Value) -> Result<String, ProviderError> {
    let url = match output {
        Value::Array(items) => items.first().and_then(Value::as_str),
        Value::String(s) => Some(s.as_str()),
        _ => None,
    };
    url.filter(|u| !u.is_empty())
        .map(str::to_string)
        .ok_or(ProviderError::Empty)
}

#[async_trait]
impl Provider for ReplicateClient {
    fn name(&self) -> &'static str {
        match self.model {
            ReplicateModel::Mixtral => "replicate-mixtral",
            ReplicateModel::Playground => "replicate-playground",
        }
    }

    async fn invoke(&self, request: ProviderRequest) -> ProviderResult {
        match (self.model, request) {
            (ReplicateModel::Mixtral, ProviderRequest::Text { prompt }) => {
                info!("💬 Replicate mixtral: {}", prompt.chars().take(50).collect::<String>());
                let output = self.run(prompt.trim()).await?;
                join_tokens(&output).map(ProviderOutput::Text)
            }
            (ReplicateModel::Playground, ProviderRequest::Image { prompt }) => {
                info!("🎨 Replicate playground: {}", prompt.chars().take(50).collect::<String>());
                let output = self.run(&prompt).await?;
                first_url(&output).map(ProviderOutput::ImageUrl)
            }
            (_, other) => Err(ProviderError::Unsupported {
                provider: self.name(),
                kind: other.kind(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_join_tokens() {
        assert_eq!(join_tokens(&json!(["Hel", "lo", "!"])).unwrap(), "Hello!");
        assert!(matches!(join_tokens(&json!([])), Err(ProviderError::Empty)));
        assert!(matches!(join_tokens(&json!({"a": 1})), Err(ProviderError::Malformed(_))));
    }

    #[test]
    fn test_first_url() {
        assert_eq!(
            first_url(&json!(["https://a/1.png", "https://a/2.png"])).unwrap(),
            "https://a/1.png"
        );
        assert!(matches!(first_url(&json!([])), Err(ProviderError::Empty)));
    }

    #[tokio::test]
    async fn test_mixtral_waits_synchronously() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/predictions"))
            .and(header("prefer", "wait"))
            .and(header("authorization", "Bearer r8_test"))
            .and(body_partial_json(json!({
                "version": MIXTRAL_VERSION,
                "input": { "prompt": "tell me a joke" }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "p1",
                "status": "succeeded",
                "output": ["Why ", "not?"],
            })))
            .mount(&server)
            .await;

        let client = ReplicateClient::new("r8_test".into(), ReplicateModel::Mixtral)
            .with_base_url(server.uri());
        let out = client
            .invoke(ProviderRequest::Text { prompt: "  tell me a joke ".into() })
            .await
            .unwrap();
        assert_eq!(out, ProviderOutput::Text("Why not?".into()));
    }

    #[tokio::test]
    async fn test_playground_polls_until_done() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/predictions"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "p2",
                "status": "processing",
                "output": null,
                "urls": { "get": format!("{}/v1/predictions/p2", server.uri()) },
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/predictions/p2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "p2",
                "status": "succeeded",
                "output": ["https://replicate.delivery/out-0.png"],
            })))
            .mount(&server)
            .await;

        let client = ReplicateClient::new("r8".into(), ReplicateModel::Playground)
            .with_base_url(server.uri())
            .with_poll_interval(Duration::from_millis(5));
        let out = client
            .invoke(ProviderRequest::Image { prompt: "castle".into() })
            .await
            .unwrap();
        assert_eq!(out, ProviderOutput::ImageUrl("https://replicate.delivery/out-0.png".into()));
    }

    #[tokio::test]
    async fn test_failed_prediction_is_upstream_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "status": "failed",
                "error": "NSFW content detected",
            })))
            .mount(&server)
            .await;

        let client = ReplicateClient::new("r8".into(), ReplicateModel::Playground)
            .with_base_url(server.uri());
        let err = client
            .invoke(ProviderRequest::Image { prompt: "x".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Upstream(ref d) if d.contains("NSFW")));
    }

    #[tokio::test]
    async fn test_model_rejects_other_capability() {
        let client = ReplicateClient::new("r8".into(), ReplicateModel::Mixtral);
        let err = client
            .invoke(ProviderRequest::Image { prompt: "x".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Unsupported { provider: "replicate-mixtral", .. }));
    }
}
