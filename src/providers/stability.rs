//! Stability AI text-to-image client.

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{Provider, ProviderError, ProviderOutput, ProviderRequest, ProviderResult};

pub const DEFAULT_API_HOST: &str = "https://api.stability.ai";
pub const DEFAULT_ENGINE: &str = "stable-diffusion-v1-6";

pub struct StabilityClient {
    api_key: String,
    engine: String,
    api_host: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct TextToImageRequest<'a> {
    text_prompts: [TextPrompt<'a>; 1],
    cfg_scale: u32,
    height: u32,
    width: u32,
    steps: u32,
    samples: u32,
}

#[derive(Serialize)]
struct TextPrompt<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct TextToImageResponse {
    artifacts: Vec<Artifact>,
}

#[derive(Deserialize)]
struct Artifact {
    base64: String,
}

impl StabilityClient {
    pub fn new(api_key: String, engine: String) -> Self {
        Self {
            api_key,
            engine,
            api_host: DEFAULT_API_HOST.to_string(),
            client: super::http_client(),
        }
    }

    pub fn with_api_host(mut self, api_host: impl Into<String>) -> Self {
        self.api_host = api_host.into();
        self
    }

    async fn text_to_image(&self, prompt: &str) -> Result<Vec<u8>, ProviderError> {
        info!("🎨 Stability image: {}", prompt.chars().take(50).collect::<String>());

        let request = TextToImageRequest {
            text_prompts: [TextPrompt { text: prompt }],
            cfg_scale: 8,
            height: 1024,
            width: 1024,
            steps: 50,
            samples: 1,
        };

        let url = format!(
            "{}/v1/generation/{}/text-to-image",
            self.api_host.trim_end_matches('/'),
            self.engine
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("Accept", "application/json")
            .json(&request)
            .send()
            .await?;

        let body = super::read_body(response).await?;
        let parsed: TextToImageResponse = super::parse_json(&body)?;

        let artifact = parsed.artifacts.first().ok_or(ProviderError::Empty)?;
        let data = base64::engine::general_purpose::STANDARD
            .decode(&artifact.base64)
            .map_err(|e| ProviderError::Malformed(format!("bad base64 artifact: {e}")))?;
        if data.is_empty() {
            return Err(ProviderError::Empty);
        }

        info!("🎨 Image generated: {} bytes", data.len());
        Ok(data)
    }
}

#[async_trait]
impl Provider for StabilityClient {
    fn name(&self) -> &'static str {
        "stability"
    }

    async fn invoke(&self, request: ProviderRequest) -> ProviderResult {
        match request {
            ProviderRequest::Image { prompt } => {
                self.text_to_image(&prompt).await.map(ProviderOutput::ImageBytes)
            }
            other => Err(ProviderError::Unsupported {
                provider: self.name(),
                kind: other.kind(),
            }),
        }
    }
}
