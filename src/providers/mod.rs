//! Provider clients - one per third-party API.
//!
//! Every provider speaks the same narrow contract: take a [`ProviderRequest`],
//! return a [`ProviderOutput`] or a [`ProviderError`]. The lifecycle controller
//! never sees provider-specific payloads.

pub mod gemini;
pub mod openweather;
pub mod replicate;
pub mod stability;
pub mod timeapi;
pub mod translate;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::config::Config;

pub use gemini::GeminiClient;
pub use openweather::OpenWeatherClient;
pub use replicate::{ReplicateClient, ReplicateModel};
pub use stability::StabilityClient;
pub use timeapi::TimeApiClient;
pub use translate::TranslateClient;

/// Default per-request HTTP timeout for provider clients.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(120);

/// A request handed to a provider, already built from the command's template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderRequest {
    /// Single-shot text generation.
    Text { prompt: String },
    /// Text generation with prior exchanges flattened into `context`.
    Conversation { context: String, prompt: String },
    /// Text-to-image.
    Image { prompt: String },
    /// Describe the image found at `image_url`.
    Describe { image_url: String, prompt: String },
    /// Translate `text` into the `target` language code.
    Translate { text: String, target: String },
    /// Detect the language of `text`.
    DetectLanguage { text: String },
    /// Resolve a place name to coordinates.
    Geocode { location: String },
    /// Current weather at a place.
    Weather { location: String },
    /// Current local time at a place.
    LocalTime { location: String },
}

impl ProviderRequest {
    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Conversation { .. } => "conversation",
            Self::Image { .. } => "image",
            Self::Describe { .. } => "describe",
            Self::Translate { .. } => "translate",
            Self::DetectLanguage { .. } => "detect",
            Self::Geocode { .. } => "geocode",
            Self::Weather { .. } => "weather",
            Self::LocalTime { .. } => "time",
        }
    }
}

/// Successful provider payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderOutput {
    Text(String),
    ImageBytes(Vec<u8>),
    ImageUrl(String),
}

/// Normalized provider failure. Shown to operators only.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("request timed out")]
    Timeout,

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("empty response")]
    Empty,

    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error("{provider} cannot handle {kind} requests")]
    Unsupported {
        provider: &'static str,
        kind: &'static str,
    },
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        // Request URLs carry API keys and the bot token.
        let e = e.without_url();
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::Malformed(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

pub type ProviderResult = Result<ProviderOutput, ProviderError>;

/// A third-party capability.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &'static str;

    /// Run one request. Must never panic on bad upstream data.
    async fn invoke(&self, request: ProviderRequest) -> ProviderResult;
}

/// Registry key for a configured provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderId {
    Gemini,
    Stability,
    ReplicateMixtral,
    ReplicatePlayground,
    Translate,
    OpenWeather,
    TimeApi,
}

/// Providers available to the registry. A missing key means the
/// corresponding credential was not configured.
pub type ProviderSet = HashMap<ProviderId, Arc<dyn Provider>>;

/// Build every provider whose credentials are present.
pub fn from_config(config: &Config) -> ProviderSet {
    let mut providers: ProviderSet = HashMap::new();
    let endpoints = &config.endpoints;

    if let Some(ref key) = config.gemini_api_key {
        let mut client = GeminiClient::new(key.clone(), config.gemini_model.clone());
        if let Some(ref url) = endpoints.gemini {
            client = client.with_base_url(url.clone());
        }
        providers.insert(ProviderId::Gemini, Arc::new(client));
    }

    if let Some(ref key) = config.stability_api_key {
        let mut client = StabilityClient::new(key.clone(), config.stability_engine.clone());
        if let Some(ref url) = endpoints.stability {
            client = client.with_api_host(url.clone());
        }
        providers.insert(ProviderId::Stability, Arc::new(client));
    }

    if let Some(ref token) = config.replicate_api_token {
        for (id, model) in [
            (ProviderId::ReplicateMixtral, ReplicateModel::Mixtral),
            (ProviderId::ReplicatePlayground, ReplicateModel::Playground),
        ] {
            let mut client = ReplicateClient::new(token.clone(), model);
            if let Some(ref url) = endpoints.replicate {
                client = client.with_base_url(url.clone());
            }
            providers.insert(id, Arc::new(client));
        }
    }

    if let Some(ref key) = config.google_translate_api_key {
        let mut client = TranslateClient::new(key.clone());
        if let Some(ref url) = endpoints.translate {
            client = client.with_base_url(url.clone());
        }
        providers.insert(ProviderId::Translate, Arc::new(client));
    }

    if let Some(ref key) = config.openweather_api_key {
        let mut client = OpenWeatherClient::new(key.clone());
        if let Some(ref url) = endpoints.openweather {
            client = client.with_base_url(url.clone());
        }
        let geocoder = Arc::new(client);

        let mut time = TimeApiClient::new(geocoder.clone());
        if let Some(ref url) = endpoints.timeapi {
            time = time.with_base_url(url.clone());
        }
        providers.insert(ProviderId::OpenWeather, geocoder);
        providers.insert(ProviderId::TimeApi, Arc::new(time));
    }

    let mut names: Vec<&str> = providers.values().map(|p| p.name()).collect();
    names.sort_unstable();
    info!("Providers enabled: {}", names.join(", "));

    providers
}

/// Shared HTTP client builder for providers.
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Read a response body, turning non-2xx statuses into [`ProviderError::Http`].
pub(crate) async fn read_body(response: reqwest::Response) -> Result<String, ProviderError> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(ProviderError::Http {
            status: status.as_u16(),
            body,
        });
    }
    if body.trim().is_empty() {
        return Err(ProviderError::Empty);
    }
    Ok(body)
}

/// Parse a JSON body into `T`, mapping failures to [`ProviderError::Malformed`].
pub(crate) fn parse_json<T: serde::de::DeserializeOwned>(body: &str) -> Result<T, ProviderError> {
    serde_json::from_str(body).map_err(|e| ProviderError::Malformed(e.to_string()))
}

/// Fail with [`ProviderError::Empty`] on blank text.
pub(crate) fn non_empty(text: String) -> Result<String, ProviderError> {
    if text.trim().is_empty() {
        Err(ProviderError::Empty)
    } else {
        Ok(text)
    }
}
