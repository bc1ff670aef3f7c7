//! OpenWeather client: direct geocoding and current weather.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use super::{Provider, ProviderError, ProviderOutput, ProviderRequest, ProviderResult};

pub const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org";

/// A geocoded place.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Place {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

impl Place {
    /// "Paris, Île-de-France, FR"
    pub fn label(&self) -> String {
        let mut parts = vec![self.name.as_str()];
        if let Some(ref state) = self.state {
            parts.push(state);
        }
        if let Some(ref country) = self.country {
            parts.push(country);
        }
        parts.join(", ")
    }
}

#[derive(Deserialize)]
struct WeatherResponse {
    weather: Vec<Condition>,
    main: MainReadings,
    #[serde(default)]
    wind: Option<Wind>,
}

#[derive(Deserialize)]
struct Condition {
    description: String,
}

#[derive(Deserialize)]
struct MainReadings {
    temp: f64,
    feels_like: f64,
    humidity: u32,
}

#[derive(Deserialize)]
struct Wind {
    speed: f64,
}

pub struct OpenWeatherClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenWeatherClient {
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

    /// Resolve a place name to its best match.
    pub async fn geocode(&self, location: &str) -> Result<Place, ProviderError> {
        let url = format!(
            "{}/geo/1.0/direct?q={}&limit=1&appid={}",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(location),
            urlencoding::encode(&self.api_key)
        );

        let response = self.client.get(&url).send().await?;
        let body = super::read_body(response).await?;
        let places: Vec<Place> = super::parse_json(&body)?;

        let place = places.into_iter().next().ok_or(ProviderError::Empty)?;
        info!("📍 Geocoded \"{}\" to {} ({}, {})", location, place.label(), place.lat, place.lon);
        Ok(place)
    }

    async fn current_weather(&self, place: &Place) -> Result<String, ProviderError> {
        let url = format!(
            "{}/data/2.5/weather?lat={}&lon={}&units=metric&appid={}",
            self.base_url.trim_end_matches('/'),
            place.lat,
            place.lon,
            urlencoding::encode(&self.api_key)
        );

        let response = self.client.get(&url).send().await?;
        let body = super::read_body(response).await?;
        let weather: WeatherResponse = super::parse_json(&body)?;

        Ok(format_weather(place, &weather))
    }
}

fn format_weather(place: &Place, weather: &WeatherResponse) -> String {
    let description = weather
        .weather
        .first()
        .map(|c| c.description.as_str())
        .unwrap_or("no description");

    let mut lines = vec![
        format!("🌤 Weather in {}", place.label()),
        description.to_string(),
        format!(
            "Temperature: {:.1}°C (feels like {:.1}°C)",
            weather.main.temp, weather.main.feels_like
        ),
        format!("Humidity: {}%", weather.main.humidity),
    ];
    if let Some(ref wind) = weather.wind {
        lines.push(format!("Wind: {:.1} m/s", wind.speed));
    }
    lines.join("\n")
}

fn format_place(place: &Place) -> String {
    format!(
        "📍 {}\nLatitude: {:.4}, Longitude: {:.4}",
        place.label(),
        place.lat,
        place.lon
    )
}

#[async_trait]
impl Provider for OpenWeatherClient {
    fn name(&self) -> &'static str {
        "openweather"
    }

    async fn invoke(&self, request: ProviderRequest) -> ProviderResult {
        match request {
            ProviderRequest::Geocode { location } => {
                let place = self.geocode(&location).await?;
                Ok(ProviderOutput::Text(format_place(&place)))
            }
            ProviderRequest::Weather { location } => {
                let place = self.geocode(&location).await?;
                self.current_weather(&place).await.map(ProviderOutput::Text)
            }
            other => Err(ProviderError::Unsupported {
                provider: self.name(),
                kind: other.kind(),
            }),
        }
    }
}
