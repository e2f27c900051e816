//! Geocoding service adapters.
//!
//! The service is unreliable; callers treat errors like an empty answer.

mod google;
mod gsi;

pub use google::GoogleGeocoder;
pub use gsi::GsiGeocoder;

use crate::config::{GeocoderProvider, GeocodingConfig};
use crate::error::{ConfigError, GeocodeError};
use crate::station::Coordinates;
use async_trait::async_trait;

/// Converts a free-text query into coordinates.
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Returns the human-readable name of this service.
    fn name(&self) -> &'static str;

    /// Looks up a query. `Ok(None)` means the service found nothing.
    async fn lookup(&self, query: &str) -> Result<Option<Coordinates>, GeocodeError>;
}

/// Creates the geocoder selected in the configuration.
pub fn create_geocoder(
    config: &GeocodingConfig,
    client: reqwest::Client,
) -> Result<Box<dyn Geocoder>, ConfigError> {
    let geocoder: Box<dyn Geocoder> = match config.provider {
        GeocoderProvider::Gsi => Box::new(GsiGeocoder::new(
            client,
            config.delay_between_requests_sec,
        )),
        GeocoderProvider::Google => {
            if !config.has_api_key() {
                return Err(ConfigError::MissingValue("geocoding.api_key".to_string()));
            }
            Box::new(GoogleGeocoder::new(
                client,
                config.api_key.clone(),
                config.delay_between_requests_sec,
            ))
        }
    };

    Ok(geocoder)
}

/// Rejects coordinates outside the valid degree ranges.
pub(crate) fn checked(lat: f64, lng: f64) -> Option<Coordinates> {
    let valid = lat.is_finite()
        && lng.is_finite()
        && (-90.0..=90.0).contains(&lat)
        && (-180.0..=180.0).contains(&lng);
    valid.then(|| Coordinates::new(lat, lng))
}
