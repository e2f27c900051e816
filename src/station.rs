//! Station record and the types shared by scraping, resolution and the registry.

use std::fmt;

/// A latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.lat, self.lng)
    }
}

/// Identity of a station across runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StationKey {
    pub pref_id: String,
    pub station_id: String,
}

impl StationKey {
    pub fn new(pref_id: impl Into<String>, station_id: impl Into<String>) -> Self {
        Self {
            pref_id: pref_id.into(),
            station_id: station_id.into(),
        }
    }
}

impl fmt::Display for StationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.pref_id, self.station_id)
    }
}

/// First-level grouping of stations, as listed on the index page.
#[derive(Debug, Clone, PartialEq)]
pub struct Prefecture {
    /// Stable identifier, unique within a run.
    pub id: String,

    /// Display name.
    pub name: String,

    /// Absolute URL of the station listing.
    pub locator: String,
}

/// One roadside station in the registry.
///
/// Display fields may change between runs; `pref_id` and `station_id` do not.
#[derive(Debug, Clone, PartialEq)]
pub struct Station {
    pub pref_id: String,
    pub station_id: String,
    pub name: String,
    pub address: Option<String>,
    /// Detail page URL. Unknown for rows written by the legacy format.
    pub detail_locator: Option<String>,
    pub phone: Option<String>,
    pub hours: Option<String>,
    /// `None` means unresolved.
    pub coordinates: Option<Coordinates>,
}

impl Station {
    pub fn key(&self) -> StationKey {
        StationKey::new(&self.pref_id, &self.station_id)
    }
}
