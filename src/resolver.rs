//! Coordinate resolution with a first-match-wins fallback chain.
//!
//! Queries, in order:
//! 1. the corrected address as-is
//! 2. the address with digit/hyphen runs separated by a space
//! 3. the station name behind a fixed prefix
//!
//! When nothing matches, coordinates from the previous registry are reused.
//! A newly found pair that differs from the previous one is reported as drift
//! but still used.

use crate::config::{AddressCorrection, GeocodingConfig};
use crate::geocoder::Geocoder;
use crate::station::{Coordinates, Station, StationKey};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

/// Digit and hyphen runs inside an address.
static NUMBER_RUN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9\-]+").expect("Invalid NUMBER_RUN_REGEX"));

/// Non-fatal outcome of a resolution that the operator should see.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolveWarning {
    /// Every query missed; previous coordinates were kept.
    FilledFromPrior {
        key: StationKey,
        coordinates: Coordinates,
    },

    /// Every query missed and there was nothing to fall back to.
    Unresolved {
        key: StationKey,
        name: String,
        address: Option<String>,
    },

    /// New coordinates differ from the previous registry.
    GeometryDrift {
        key: StationKey,
        previous: Coordinates,
        current: Coordinates,
    },
}

impl ResolveWarning {
    pub fn key(&self) -> &StationKey {
        match self {
            ResolveWarning::FilledFromPrior { key, .. }
            | ResolveWarning::Unresolved { key, .. }
            | ResolveWarning::GeometryDrift { key, .. } => key,
        }
    }
}

impl fmt::Display for ResolveWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveWarning::FilledFromPrior { key, coordinates } => write!(
                f,
                "Could not obtain geometry for {}; filled from prior data {}",
                key, coordinates
            ),
            ResolveWarning::Unresolved { key, name, address } => write!(
                f,
                "Could not obtain geometry for {} {} ({})",
                key,
                name,
                address.as_deref().unwrap_or("no address")
            ),
            ResolveWarning::GeometryDrift {
                key,
                previous,
                current,
            } => write!(
                f,
                "Geometry of {} changed from {} to {}",
                key, previous, current
            ),
        }
    }
}

/// Result of resolving one station.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    /// `None` when unresolved.
    pub coordinates: Option<Coordinates>,

    /// Warnings for the operator.
    pub warnings: Vec<ResolveWarning>,

    /// Geocoding service failures, each treated as an empty answer.
    pub lookup_errors: Vec<String>,

    /// Number of queries sent to the service.
    pub queries_sent: usize,
}

/// Resolves station coordinates through a [`Geocoder`].
pub struct Resolver {
    geocoder: Box<dyn Geocoder>,
    corrections: Vec<AddressCorrection>,
    name_prefix: String,
}

impl Resolver {
    pub fn new(
        geocoder: Box<dyn Geocoder>,
        corrections: Vec<AddressCorrection>,
        name_prefix: impl Into<String>,
    ) -> Self {
        Self {
            geocoder,
            corrections,
            name_prefix: name_prefix.into(),
        }
    }

    /// Creates a resolver with corrections and prefix taken from the configuration.
    pub fn from_config(geocoder: Box<dyn Geocoder>, config: &GeocodingConfig) -> Self {
        Self::new(
            geocoder,
            config.address_corrections.clone(),
            config.name_query_prefix.clone(),
        )
    }

    /// Applies the configured address corrections.
    pub fn correct_address(&self, address: &str) -> String {
        self.corrections
            .iter()
            .fold(address.to_string(), |acc, c| acc.replace(&c.from, &c.to))
    }

    /// Builds the query chain. Duplicate queries are dropped.
    pub fn queries(&self, name: &str, address: Option<&str>) -> Vec<String> {
        let mut queries: Vec<String> = Vec::with_capacity(3);

        if let Some(address) = address.map(str::trim).filter(|a| !a.is_empty()) {
            let corrected = self.correct_address(address);
            let spaced = NUMBER_RUN_REGEX
                .replace_all(&corrected, " $0")
                .trim()
                .to_string();
            queries.push(corrected);
            queries.push(spaced);
        }

        let name = name.trim();
        if !name.is_empty() {
            queries.push(format!("{} {}", self.name_prefix.trim(), name));
        }

        let mut unique: Vec<String> = Vec::with_capacity(queries.len());
        for q in queries {
            if !unique.contains(&q) {
                unique.push(q);
            }
        }
        unique
    }

    /// Resolves coordinates for a station.
    ///
    /// Service errors are treated like an empty answer and never propagated.
    pub async fn resolve(
        &self,
        key: &StationKey,
        name: &str,
        address: Option<&str>,
        previous: Option<&Station>,
    ) -> Resolution {
        let mut found = None;
        let mut lookup_errors = Vec::new();
        let mut queries_sent = 0;

        for query in self.queries(name, address) {
            queries_sent += 1;
            match self.geocoder.lookup(&query).await {
                Ok(Some(coordinates)) => {
                    found = Some(coordinates);
                    break;
                }
                Ok(None) => {}
                Err(e) => lookup_errors.push(format!(
                    "{} lookup '{}': {}",
                    self.geocoder.name(),
                    query,
                    e
                )),
            }
        }

        let mut resolution = settle(key, name, address, found, previous);
        resolution.lookup_errors = lookup_errors;
        resolution.queries_sent = queries_sent;
        resolution
    }
}

/// Applies the prior-data fallback and drift check to a lookup outcome.
///
/// Also used for coordinates taken directly from the source page.
pub fn settle(
    key: &StationKey,
    name: &str,
    address: Option<&str>,
    found: Option<Coordinates>,
    previous: Option<&Station>,
) -> Resolution {
    let previous_coordinates = previous.and_then(|s| s.coordinates);
    let mut warnings = Vec::new();

    let coordinates = match (found, previous_coordinates) {
        (Some(current), Some(prev)) => {
            if current != prev {
                warnings.push(ResolveWarning::GeometryDrift {
                    key: key.clone(),
                    previous: prev,
                    current,
                });
            }
            Some(current)
        }
        (Some(current), None) => Some(current),
        (None, Some(prev)) => {
            warnings.push(ResolveWarning::FilledFromPrior {
                key: key.clone(),
                coordinates: prev,
            });
            Some(prev)
        }
        (None, None) => {
            warnings.push(ResolveWarning::Unresolved {
                key: key.clone(),
                name: name.to_string(),
                address: address.map(str::to_string),
            });
            None
        }
    };

    Resolution {
        coordinates,
        warnings,
        ..Resolution::default()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::GeocodeError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// In-memory geocoder recording every query it receives.
    #[derive(Default, Clone)]
    pub(crate) struct FakeGeocoder {
        pub answers: HashMap<String, Coordinates>,
        pub failing: Vec<String>,
        pub calls: Arc<Mutex<Vec<String>>>,
    }

    impl FakeGeocoder {
        pub fn with(answers: &[(&str, Coordinates)]) -> Self {
            Self {
                answers: answers
                    .iter()
                    .map(|(q, c)| (q.to_string(), *c))
                    .collect(),
                ..Self::default()
            }
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Geocoder for FakeGeocoder {
        fn name(&self) -> &'static str {
            "Fake"
        }

        async fn lookup(&self, query: &str) -> Result<Option<Coordinates>, GeocodeError> {
            self.calls.lock().unwrap().push(query.to_string());
            if self.failing.iter().any(|q| q == query) {
                return Err(GeocodeError::ApiError("OVER_QUERY_LIMIT".to_string()));
            }
            Ok(self.answers.get(query).copied())
        }
    }

    const ADDRESS: &str = "高知県土佐郡土佐町田井1484-1";
    const SPACED: &str = "高知県土佐郡土佐町田井 1484-1";
    const NAME_QUERY: &str = "道の駅 土佐さめうら";

    fn key() -> StationKey {
        StationKey::new("39", "18001")
    }

    fn resolver(geocoder: &FakeGeocoder) -> Resolver {
        Resolver::new(Box::new(geocoder.clone()), Vec::new(), "道の駅")
    }

    fn previous(coordinates: Option<Coordinates>) -> Station {
        Station {
            pref_id: "39".to_string(),
            station_id: "18001".to_string(),
            name: "土佐さめうら".to_string(),
            address: Some(ADDRESS.to_string()),
            detail_locator: None,
            phone: None,
            hours: None,
            coordinates,
        }
    }

    #[test]
    fn test_query_chain() {
        let resolver = resolver(&FakeGeocoder::default());
        assert_eq!(
            resolver.queries("土佐さめうら", Some(ADDRESS)),
            vec![ADDRESS, SPACED, NAME_QUERY]
        );
    }

    #[test]
    fn test_query_chain_skips_duplicates_and_missing_fields() {
        let resolver = resolver(&FakeGeocoder::default());
        assert_eq!(
            resolver.queries("とさ", Some("高知県土佐市")),
            vec!["高知県土佐市", "道の駅 とさ"]
        );
        assert_eq!(resolver.queries("とさ", None), vec!["道の駅 とさ"]);
        assert!(resolver.queries(" ", Some("")).is_empty());
    }

    #[test]
    fn test_address_correction_table() {
        let corrections = vec![AddressCorrection {
            from: "土佐町田井字桜ヶ内".to_string(),
            to: "土佐町田井字".to_string(),
        }];
        let resolver = Resolver::new(Box::new(FakeGeocoder::default()), corrections, "道の駅");

        let queries = resolver.queries("土佐さめうら", Some("高知県土佐郡土佐町田井字桜ヶ内1484-1"));
        assert_eq!(queries[0], "高知県土佐郡土佐町田井字1484-1");
        assert_eq!(resolver.correct_address("高知県須崎市"), "高知県須崎市");
    }

    #[tokio::test]
    async fn test_first_query_wins() {
        let geocoder = FakeGeocoder::with(&[
            (ADDRESS, Coordinates::new(33.7, 133.6)),
            (SPACED, Coordinates::new(1.0, 1.0)),
        ]);
        let resolution = resolver(&geocoder)
            .resolve(&key(), "土佐さめうら", Some(ADDRESS), None)
            .await;

        assert_eq!(resolution.coordinates, Some(Coordinates::new(33.7, 133.6)));
        assert!(resolution.warnings.is_empty());
        assert_eq!(geocoder.calls(), vec![ADDRESS]);
    }

    #[tokio::test]
    async fn test_short_circuit_on_second_query() {
        let geocoder = FakeGeocoder::with(&[(SPACED, Coordinates::new(35.0, 139.0))]);
        let resolution = resolver(&geocoder)
            .resolve(&key(), "土佐さめうら", Some(ADDRESS), None)
            .await;

        assert_eq!(resolution.coordinates, Some(Coordinates::new(35.0, 139.0)));
        assert_eq!(geocoder.calls(), vec![ADDRESS, SPACED]);
        assert!(!geocoder.calls().contains(&NAME_QUERY.to_string()));
        assert_eq!(resolution.queries_sent, 2);
    }

    #[tokio::test]
    async fn test_filled_from_prior() {
        let geocoder = FakeGeocoder::default();
        let prev = previous(Some(Coordinates::new(34.0, 135.0)));
        let resolution = resolver(&geocoder)
            .resolve(&key(), "土佐さめうら", Some(ADDRESS), Some(&prev))
            .await;

        assert_eq!(resolution.coordinates, Some(Coordinates::new(34.0, 135.0)));
        assert_eq!(resolution.warnings.len(), 1);
        assert!(matches!(
            resolution.warnings[0],
            ResolveWarning::FilledFromPrior { .. }
        ));
        assert_eq!(geocoder.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_unresolved() {
        let geocoder = FakeGeocoder::default();
        let resolution = resolver(&geocoder)
            .resolve(&key(), "土佐さめうら", Some(ADDRESS), None)
            .await;

        assert_eq!(resolution.coordinates, None);
        assert_eq!(resolution.warnings.len(), 1);
        assert!(matches!(
            resolution.warnings[0],
            ResolveWarning::Unresolved { .. }
        ));
    }

    #[tokio::test]
    async fn test_previous_without_coordinates_is_unresolved() {
        let geocoder = FakeGeocoder::default();
        let prev = previous(None);
        let resolution = resolver(&geocoder)
            .resolve(&key(), "土佐さめうら", Some(ADDRESS), Some(&prev))
            .await;

        assert_eq!(resolution.coordinates, None);
        assert!(matches!(
            resolution.warnings.as_slice(),
            [ResolveWarning::Unresolved { .. }]
        ));
    }

    #[tokio::test]
    async fn test_geometry_drift() {
        let geocoder = FakeGeocoder::with(&[(ADDRESS, Coordinates::new(33.70001, 133.6))]);
        let prev = previous(Some(Coordinates::new(33.7, 133.6)));
        let resolution = resolver(&geocoder)
            .resolve(&key(), "土佐さめうら", Some(ADDRESS), Some(&prev))
            .await;

        assert_eq!(resolution.coordinates, Some(Coordinates::new(33.70001, 133.6)));
        assert_eq!(
            resolution.warnings,
            vec![ResolveWarning::GeometryDrift {
                key: key(),
                previous: Coordinates::new(33.7, 133.6),
                current: Coordinates::new(33.70001, 133.6),
            }]
        );
        assert!(resolution.warnings[0].to_string().contains("39/18001"));
    }

    #[tokio::test]
    async fn test_same_coordinates_no_drift() {
        let geocoder = FakeGeocoder::with(&[(ADDRESS, Coordinates::new(33.7, 133.6))]);
        let prev = previous(Some(Coordinates::new(33.7, 133.6)));
        let resolution = resolver(&geocoder)
            .resolve(&key(), "土佐さめうら", Some(ADDRESS), Some(&prev))
            .await;

        assert!(resolution.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_service_errors_treated_as_empty() {
        let mut geocoder = FakeGeocoder::with(&[(NAME_QUERY, Coordinates::new(33.0, 133.0))]);
        geocoder.failing = vec![ADDRESS.to_string(), SPACED.to_string()];
        let resolution = resolver(&geocoder)
            .resolve(&key(), "土佐さめうら", Some(ADDRESS), None)
            .await;

        assert_eq!(resolution.coordinates, Some(Coordinates::new(33.0, 133.0)));
        assert_eq!(resolution.lookup_errors.len(), 2);
        assert!(resolution.warnings.is_empty());
    }
}
