//! Google Cloud Translation (v2) client for translation and language detection.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{Provider, ProviderError, ProviderOutput, ProviderRequest, ProviderResult};

pub const DEFAULT_BASE_URL: &str = "https://translation.googleapis.com";

pub struct TranslateClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct TranslateRequest<'a> {
    q: &'a str,
    target: &'a str,
    format: &'static str,
}

#[derive(Serialize)]
struct DetectRequest<'a> {
    q: &'a str,
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct TranslationsData {
    translations: Vec<Translation>,
}

#[derive(Deserialize)]
struct Translation {
    #[serde(rename = "translatedText")]
    translated_text: String,
}

#[derive(Deserialize)]
struct DetectionsData {
    detections: Vec<Vec<Detection>>,
}

#[derive(Deserialize)]
struct Detection {
    language: String,
    #[serde(default)]
    confidence: Option<f64>,
}

impl TranslateClient {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            client: super::http_client(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn url(&self, suffix: &str) -> String {
        format!(
            "{}/language/translate/v2{}?key={}",
            self.base_url.trim_end_matches('/'),
            suffix,
            urlencoding::encode(&self.api_key)
        )
    }

    async fn translate(&self, text: &str, target: &str) -> Result<String, ProviderError> {
        info!("🌐 Translating {} chars to {}", text.chars().count(), target);

        let request = TranslateRequest {
            q: text,
            target,
            format: "text",
        };
        let response = self.client.post(self.url("")).json(&request).send().await?;
        let body = super::read_body(response).await?;
        let parsed: Envelope<TranslationsData> = super::parse_json(&body)?;

        let translation = parsed.data.translations.into_iter().next().ok_or(ProviderError::Empty)?;
        super::non_empty(translation.translated_text)
    }

    async fn detect(&self, text: &str) -> Result<String, ProviderError> {
        info!("🌐 Detecting language of {} chars", text.chars().count());

        let response = self
            .client
            .post(self.url("/detect"))
            .json(&DetectRequest { q: text })
            .send()
            .await?;
        let body = super::read_body(response).await?;
        let parsed: Envelope<DetectionsData> = super::parse_json(&body)?;

        let detection = parsed
            .data
            .detections
            .into_iter()
            .next()
            .and_then(|d| d.into_iter().next())
            .ok_or(ProviderError::Empty)?;

        Ok(format_detection(&detection))
    }
}

fn format_detection(detection: &Detection) -> String {
    match detection.confidence {
        Some(c) => format!(
            "Detected language: {} (confidence {:.0}%)",
            detection.language,
            c * 100.0
        ),
        None => format!("Detected language: {}", detection.language),
    }
}

#[async_trait]
impl Provider for TranslateClient {
    fn name(&self) -> &'static str {
        "google-translate"
    }

    async fn invoke(&self, request: ProviderRequest) -> ProviderResult {
        match request {
            ProviderRequest::Translate { text, target } => {
                self.translate(&text, &target).await.map(ProviderOutput::Text)
            }
            ProviderRequest::DetectLanguage { text } => {
                self.detect(&text).await.map(ProviderOutput::Text)
            }
            other => Err(ProviderError::Unsupported {
                provider: self.name(),
                kind: other.kind(),
            }),
        }
    }
}
