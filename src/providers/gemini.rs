//! Gemini API client for text generation, conversation and image description.

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{Provider, ProviderError, ProviderOutput, ProviderRequest, ProviderResult};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

pub struct GeminiClient {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Serialize)]
struct InlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Deserialize, Debug)]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
    error: Option<ApiError>,
}

#[derive(Deserialize, Debug)]
struct ApiError {
    message: String,
}

#[derive(Deserialize, Debug)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize, Debug)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize, Debug)]
struct ResponsePart {
    text: Option<String>,
}

impl GeminiClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            api_key,
            model,
            base_url: DEFAULT_BASE_URL.to_string(),
            client: super::http_client(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Generate text from a list of parts sent as one user turn.
    async fn generate(&self, parts: Vec<Part>) -> Result<String, ProviderError> {
        let request = GenerateRequest {
            contents: vec![Content { role: "user", parts }],
        };

        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url.trim_end_matches('/'),
            self.model,
            self.api_key
        );

        let response = self.client.post(&url).json(&request).send().await?;
        let body = super::read_body(response).await?;
        debug!("Gemini response: {} bytes", body.len());

        let parsed: GenerateResponse = super::parse_json(&body)?;

        if let Some(error) = parsed.error {
            return Err(ProviderError::Malformed(format!("Gemini error: {}", error.message)));
        }

        let candidates = parsed
            .candidates
            .ok_or_else(|| ProviderError::Malformed("no candidates in response".into()))?;
        let content = candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .ok_or(ProviderError::Empty)?;

        let text: String = content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();

        super::non_empty(text)
    }

    /// Download an image and encode it as an inline part.
    async fn fetch_image(&self, image_url: &str) -> Result<Part, ProviderError> {
        let response = self.client.get(image_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body,
            });
        }
        let data = response.bytes().await?;
        if data.is_empty() {
            return Err(ProviderError::Empty);
        }

        info!("📥 Downloaded image ({} bytes)", data.len());
        Ok(Part::Inline {
            inline_data: InlineData {
                mime_type: media_type(image_url).to_string(),
                data: base64::engine::general_purpose::STANDARD.encode(&data),
            },
        })
    }
}

/// Guess the media type from the file extension. Telegram photos default to JPEG.
fn media_type(url: &str) -> &'static str {
    let path = url.split('?').next().unwrap_or(url).to_ascii_lowercase();
    if path.ends_with(".png") {
        "image/png"
    } else if path.ends_with(".webp") {
        "image/webp"
    } else {
        "image/jpeg"
    }
}

#[async_trait]
impl Provider for GeminiClient {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn invoke(&self, request: ProviderRequest) -> ProviderResult {
        let text = match request {
            ProviderRequest::Text { prompt } => {
                info!("💬 Gemini text: {}", prompt.chars().take(50).collect::<String>());
                self.generate(vec![Part::Text { text: prompt }]).await?
            }
            ProviderRequest::Conversation { context, prompt } => {
                info!("💬 Gemini conversation ({} chars of context)", context.len());
                let mut parts = Vec::with_capacity(2);
                if !context.is_empty() {
                    parts.push(Part::Text { text: context });
                }
                parts.push(Part::Text { text: prompt });
                self.generate(parts).await?
            }
            ProviderRequest::Describe { image_url, prompt } => {
                info!("👁️ Gemini describe");
                let image = self.fetch_image(&image_url).await?;
                self.generate(vec![Part::Text { text: prompt }, image]).await?
            }
            other => {
                return Err(ProviderError::Unsupported {
                    provider: self.name(),
                    kind: other.kind(),
                });
            }
        };

        Ok(ProviderOutput::Text(text))
    }
}
