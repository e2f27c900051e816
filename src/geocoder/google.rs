//! Google Geocoding API adapter.

use super::{Geocoder, checked};
use crate::error::GeocodeError;
use crate::scrapers::rate_limit;
use crate::station::Coordinates;
use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

const ENDPOINT: &str = "https://maps.googleapis.com/maps/api/geocode/json";

/// Response body of the geocoding endpoint.
#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    location: Location,
}

#[derive(Debug, Deserialize)]
struct Location {
    lat: f64,
    lng: f64,
}

/// Geocoder backed by the Google Geocoding API.
pub struct GoogleGeocoder {
    client: reqwest::Client,
    api_key: String,
    delay_sec: f64,
}

impl GoogleGeocoder {
    pub fn new(client: reqwest::Client, api_key: String, delay_sec: f64) -> Self {
        Self {
            client,
            api_key,
            delay_sec,
        }
    }

    fn request_url(&self, query: &str) -> Result<Url, GeocodeError> {
        Url::parse_with_params(
            ENDPOINT,
            &[
                ("address", query),
                ("language", "ja"),
                ("region", "jp"),
                ("key", self.api_key.as_str()),
            ],
        )
        .map_err(|e| GeocodeError::InvalidUrl(e.to_string()))
    }
}

/// Interprets a response body.
fn interpret(response: GeocodeResponse) -> Result<Option<Coordinates>, GeocodeError> {
    match response.status.as_str() {
        "OK" => Ok(response
            .results
            .first()
            .and_then(|r| checked(r.geometry.location.lat, r.geometry.location.lng))),
        "ZERO_RESULTS" => Ok(None),
        status => Err(GeocodeError::ApiError(match response.error_message {
            Some(message) => format!("{}: {}", status, message),
            None => status.to_string(),
        })),
    }
}

#[async_trait]
impl Geocoder for GoogleGeocoder {
    fn name(&self) -> &'static str {
        "Google"
    }

    async fn lookup(&self, query: &str) -> Result<Option<Coordinates>, GeocodeError> {
        rate_limit(self.delay_sec).await;

        let url = self.request_url(query)?;
        let response = self.client.get(url).send().await?.error_for_status()?;
        let body: GeocodeResponse = response.json().await?;

        interpret(body)
    }
}
