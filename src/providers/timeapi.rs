//! Current local time by place name.
//!
//! The place is geocoded through OpenWeather, timeapi.io maps the coordinates
//! to an IANA time zone, and the clock itself is rendered locally with chrono-tz.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use tracing::info;

use super::openweather::{OpenWeatherClient, Place};
use super::{Provider, ProviderError, ProviderOutput, ProviderRequest, ProviderResult};

pub const DEFAULT_BASE_URL: &str = "https://timeapi.io";

#[derive(Deserialize)]
struct ZoneResponse {
    #[serde(rename = "timeZone")]
    time_zone: String,
}

pub struct TimeApiClient {
    geocoder: Arc<OpenWeatherClient>,
    base_url: String,
    client: reqwest::Client,
}

impl TimeApiClient {
    pub fn new(geocoder: Arc<OpenWeatherClient>) -> Self {
        Self {
            geocoder,
            base_url: DEFAULT_BASE_URL.to_string(),
            client: super::http_client(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn time_zone(&self, place: &Place) -> Result<Tz, ProviderError> {
        let url = format!(
            "{}/api/timezone/coordinate?latitude={}&longitude={}",
            self.base_url.trim_end_matches('/'),
            place.lat,
            place.lon
        );

        let response = self.client.get(&url).send().await?;
        let body = super::read_body(response).await?;
        let zone: ZoneResponse = super::parse_json(&body)?;

        zone.time_zone.parse::<Tz>().map_err(|e| {
            ProviderError::Malformed(format!("unknown time zone '{}': {e}", zone.time_zone))
        })
    }
}

fn format_local_time(place: &Place, tz: Tz, now: DateTime<Utc>) -> String {
    let local = now.with_timezone(&tz);
    format!(
        "🕒 {} in {}\n{} ({})",
        local.format("%H:%M"),
        place.label(),
        local.format("%A, %-d %B %Y"),
        tz.name()
    )
}

#[async_trait]
impl Provider for TimeApiClient {
    fn name(&self) -> &'static str {
        "timeapi"
    }

    async fn invoke(&self, request: ProviderRequest) -> ProviderResult {
        match request {
            ProviderRequest::LocalTime { location } => {
                let place = self.geocoder.geocode(&location).await?;
                let tz = self.time_zone(&place).await?;
                info!("🕒 {} is in {}", place.label(), tz.name());
                Ok(ProviderOutput::Text(format_local_time(&place, tz, Utc::now())))
            }
            other => Err(ProviderError::Unsupported {
                provider: self.name(),
                kind: other.kind(),
            }),
        }
    }
}
