//! GeoJSON export of the registry.

use crate::error::ExportError;
use crate::registry::StationRegistry;
use crate::station::Station;
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub struct FeatureCollection<'a> {
    pub features: Vec<Feature<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub struct Feature<'a> {
    pub geometry: Point,
    pub properties: StationProperties<'a>,
}

/// Point geometry, `[lng, lat]`.
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub struct Point {
    pub coordinates: [f64; 2],
}

#[derive(Debug, Serialize)]
pub struct StationProperties<'a> {
    pub pref_id: &'a str,
    pub station_id: &'a str,
    pub name: &'a str,
    pub address: Option<&'a str>,
    pub detail_locator: Option<&'a str>,
    pub phone: Option<&'a str>,
    pub hours: Option<&'a str>,
}

/// Builds a feature collection. Stations without coordinates are left out.
pub fn to_feature_collection(stations: &[Station]) -> FeatureCollection<'_> {
    let features = stations
        .iter()
        .filter_map(|station| {
            let coordinates = station.coordinates?;
            Some(Feature {
                geometry: Point {
                    coordinates: [coordinates.lng, coordinates.lat],
                },
                properties: StationProperties {
                    pref_id: &station.pref_id,
                    station_id: &station.station_id,
                    name: &station.name,
                    address: station.address.as_deref(),
                    detail_locator: station.detail_locator.as_deref(),
                    phone: station.phone.as_deref(),
                    hours: station.hours.as_deref(),
                },
            })
        })
        .collect();

    FeatureCollection { features }
}

/// Reads the registry file and writes it as GeoJSON.
///
/// Returns the number of exported features.
pub fn export_geojson(registry_path: &Path, output_path: &Path) -> Result<usize, ExportError> {
    let registry = StationRegistry::load(registry_path)?;
    let collection = to_feature_collection(registry.stations());
    let json = serde_json::to_string(&collection)?;

    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(output_path, json)?;

    Ok(collection.features.len())
}
