//! GSI (Geospatial Information Authority of Japan) address search adapter.

use super::{Geocoder, checked};
use crate::error::GeocodeError;
use crate::scrapers::rate_limit;
use crate::station::Coordinates;
use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

const ENDPOINT: &str = "https://msearch.gsi.go.jp/address-search/AddressSearch";

/// One GeoJSON-like feature of the search result.
#[derive(Debug, Deserialize)]
struct Feature {
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    /// `[lng, lat]`
    coordinates: Vec<f64>,
}

/// Geocoder backed by the GSI address search. Needs no API key.
pub struct GsiGeocoder {
    client: reqwest::Client,
    delay_sec: f64,
}

impl GsiGeocoder {
    pub fn new(client: reqwest::Client, delay_sec: f64) -> Self {
        Self { client, delay_sec }
    }
}

fn interpret(features: &[Feature]) -> Option<Coordinates> {
    let first = features.first()?;
    match first.geometry.coordinates.as_slice() {
        [lng, lat, ..] => checked(*lat, *lng),
        _ => None,
    }
}

#[async_trait]
impl Geocoder for GsiGeocoder {
    fn name(&self) -> &'static str {
        "GSI"
    }

    async fn lookup(&self, query: &str) -> Result<Option<Coordinates>, GeocodeError> {
        rate_limit(self.delay_sec).await;

        let url = Url::parse_with_params(ENDPOINT, &[("q", query)])
            .map_err(|e| GeocodeError::InvalidUrl(e.to_string()))?;
        let response = self.client.get(url).send().await?.error_for_status()?;
        let features: Vec<Feature> = response.json().await?;

        Ok(interpret(&features))
    }
}
