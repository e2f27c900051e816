//! Persisted station registry.
//!
//! The registry file is tab-separated text, one station per line. Two column
//! layouts are understood:
//!
//! - legacy: `pref_id, station_id, name, address, lat, lng`
//! - extended: `pref_id, station_id, name, address, detail_locator, phone, hours, lat, lng`
//!
//! Files are always written in the extended layout. Unknown values are stored
//! as the literal [`UNKNOWN`], so an optional field holding exactly that string
//! cannot be saved. Columns after the ninth (such as a mapcode column written
//! by other tools) are accepted on load but not kept, and a save drops them.

use crate::error::RegistryError;
use crate::station::{Coordinates, Station, StationKey};
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Marker written for unknown text fields and unresolved coordinates.
pub const UNKNOWN: &str = "None";

const LEGACY_COLUMNS: usize = 6;
const EXTENDED_COLUMNS: usize = 9;

/// Ordered station collection with a key index for lookups.
///
/// `stations` owns the records; `index` only maps keys to positions in it.
#[derive(Debug, Default, Clone)]
pub struct StationRegistry {
    stations: Vec<Station>,
    index: HashMap<StationKey, usize>,
}

impl StationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a registry file. A missing file yields an empty registry.
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parses registry file content.
    pub fn parse(content: &str) -> Result<Self, RegistryError> {
        let mut registry = Self::new();

        for (idx, raw_line) in content.lines().enumerate() {
            let line = raw_line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }

            let station = parse_row(line, idx + 1)?;
            // First occurrence wins for lookups; later duplicates are still kept in order
            let position = registry.stations.len();
            registry.index.entry(station.key()).or_insert(position);
            registry.stations.push(station);
        }

        Ok(registry)
    }

    /// Looks up a station by its identity.
    pub fn find(&self, pref_id: &str, station_id: &str) -> Option<&Station> {
        self.index
            .get(&StationKey::new(pref_id, station_id))
            .map(|&i| &self.stations[i])
    }

    /// Looks up a station by key.
    pub fn get(&self, key: &StationKey) -> Option<&Station> {
        self.index.get(key).map(|&i| &self.stations[i])
    }

    /// Appends a station. Returns false (and leaves the registry unchanged)
    /// if a station with the same key is already present.
    pub fn push(&mut self, station: Station) -> bool {
        let key = station.key();
        if self.index.contains_key(&key) {
            return false;
        }

        self.index.insert(key, self.stations.len());
        self.stations.push(station);
        true
    }

    /// Writes the whole registry to `path`, replacing the file atomically.
    pub fn save(&self, path: &Path) -> Result<(), RegistryError> {
        let content = self.to_tsv()?;

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let mut file = NamedTempFile::new_in(dir)?;
        file.write_all(content.as_bytes())?;
        file.as_file().sync_all()?;
        file.persist(path).map_err(|e| RegistryError::Io(e.error))?;

        Ok(())
    }

    /// Serializes the registry in the extended layout.
    pub fn to_tsv(&self) -> Result<String, RegistryError> {
        let mut out = String::new();

        for station in &self.stations {
            let row = format_row(station)?;
            out.push_str(&row.join("\t"));
            out.push('\n');
        }

        Ok(out)
    }

    pub fn stations(&self) -> &[Station] {
        &self.stations
    }

    pub fn iter(&self) -> impl Iterator<Item = &Station> {
        self.stations.iter()
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }
}

impl FromIterator<Station> for StationRegistry {
    fn from_iter<I: IntoIterator<Item = Station>>(iter: I) -> Self {
        let mut registry = Self::new();
        for station in iter {
            registry.push(station);
        }
        registry
    }
}

fn parse_row(line: &str, line_no: usize) -> Result<Station, RegistryError> {
    let cols: Vec<&str> = line.split('\t').collect();

    let (detail_locator, phone, hours, lat, lng) = match cols.len() {
        LEGACY_COLUMNS => (None, None, None, cols[4], cols[5]),
        n if n >= EXTENDED_COLUMNS => (
            optional(cols[4]),
            optional(cols[5]),
            optional(cols[6]),
            cols[7],
            cols[8],
        ),
        n => {
            return Err(RegistryError::InvalidRow {
                line: line_no,
                message: format!(
                    "expected {} or {} columns, found {}",
                    LEGACY_COLUMNS, EXTENDED_COLUMNS, n
                ),
            });
        }
    };

    if cols[0].is_empty() || cols[1].is_empty() {
        return Err(RegistryError::InvalidRow {
            line: line_no,
            message: "empty prefecture or station id".to_string(),
        });
    }

    Ok(Station {
        pref_id: cols[0].to_string(),
        station_id: cols[1].to_string(),
        name: cols[2].to_string(),
        address: optional(cols[3]),
        detail_locator,
        phone,
        hours,
        coordinates: parse_coordinates(lat, lng, line_no)?,
    })
}

fn optional(value: &str) -> Option<String> {
    if value == UNKNOWN {
        None
    } else {
        Some(value.to_string())
    }
}

fn parse_coordinates(
    lat: &str,
    lng: &str,
    line_no: usize,
) -> Result<Option<Coordinates>, RegistryError> {
    let is_unknown = |s: &str| s.is_empty() || s == UNKNOWN;
    if is_unknown(lat) || is_unknown(lng) {
        return Ok(None);
    }

    let parse = |s: &str| {
        s.parse::<f64>().map_err(|_| RegistryError::InvalidRow {
            line: line_no,
            message: format!("invalid coordinate '{}'", s),
        })
    };

    Ok(Some(Coordinates::new(parse(lat)?, parse(lng)?)))
}

fn format_row(station: &Station) -> Result<Vec<String>, RegistryError> {
    let invalid = |field, reason| RegistryError::InvalidField {
        key: station.key().to_string(),
        field,
        reason,
    };

    let text = |field: &'static str, value: &str| -> Result<String, RegistryError> {
        if value.contains(['\t', '\n', '\r']) {
            return Err(invalid(field, "contains a tab or line break"));
        }
        Ok(value.to_string())
    };

    let optional = |field: &'static str, value: Option<&str>| match value {
        // Would load back as unknown
        Some(UNKNOWN) => Err(invalid(field, "equals the unknown marker")),
        Some(v) => text(field, v),
        None => Ok(UNKNOWN.to_string()),
    };

    let (lat, lng) = match station.coordinates {
        Some(c) => (c.lat.to_string(), c.lng.to_string()),
        None => (UNKNOWN.to_string(), UNKNOWN.to_string()),
    };

    Ok(vec![
        text("pref_id", &station.pref_id)?,
        text("station_id", &station.station_id)?,
        text("name", &station.name)?,
        optional("address", station.address.as_deref())?,
        optional("detail_locator", station.detail_locator.as_deref())?,
        optional("phone", station.phone.as_deref())?,
        optional("hours", station.hours.as_deref())?,
        lat,
        lng,
    ])
}
