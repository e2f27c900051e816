//! Scrape-and-geocode update run.
//!
//! One run loads the previous registry, walks every prefecture and station in
//! document order, resolves coordinates against the previous data and finally
//! replaces the registry file. The file is only written when the whole run
//! succeeds.

use crate::config::Config;
use crate::console::Console;
use crate::error::{PipelineError, ScraperError};
use crate::normalize::{normalize, normalize_str};
use crate::registry::StationRegistry;
use crate::resolver::{Resolution, ResolveWarning, Resolver, settle};
use crate::scrapers::{
    PageSource, extract_listing, extract_prefectures, extract_station, station_id_from_locator,
};
use crate::station::{Prefecture, Station, StationKey};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;

/// Safety limit for listing pagination.
const MAX_LISTING_PAGES: usize = 50;

/// Construction-time settings of a run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// URL of the prefecture index page.
    pub base_url: String,

    /// Minimum delay between two page fetches.
    pub fetch_delay: Duration,

    /// Registry file read at start and replaced at the end.
    pub registry_path: PathBuf,

    /// Use coordinates from detail page map links instead of geocoding.
    pub use_map_link_coordinates: bool,
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_url: config.source.base_url.clone(),
            fetch_delay: config.fetch_delay(),
            registry_path: config.paths.registry_file.clone(),
            use_map_link_coordinates: config.geocoding.use_map_link_coordinates,
        }
    }
}

/// Something the operator should review after a run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunWarning {
    /// Coordinate resolution warning.
    Resolve(ResolveWarning),

    /// Station left out of the new registry.
    StationSkipped { locator: String, reason: String },

    /// Station listed more than once.
    DuplicateStation { key: StationKey, locator: String },
}

impl fmt::Display for RunWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunWarning::Resolve(w) => write!(f, "{}", w),
            RunWarning::StationSkipped { locator, reason } => {
                write!(f, "Skipped station {}: {}", locator, reason)
            }
            RunWarning::DuplicateStation { key, locator } => {
                write!(f, "Station {} listed again at {}; ignored", key, locator)
            }
        }
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub prefectures: usize,
    pub stations: usize,
    pub unresolved: usize,
    pub skipped: usize,
    pub geocoder_queries: usize,
    pub warnings: Vec<RunWarning>,
}

impl RunReport {
    /// Drift warnings of this run.
    pub fn drifts(&self) -> impl Iterator<Item = &ResolveWarning> {
        self.warnings.iter().filter_map(|w| match w {
            RunWarning::Resolve(r @ ResolveWarning::GeometryDrift { .. }) => Some(r),
            _ => None,
        })
    }
}

/// Flat minimum spacing between requests.
struct Throttle {
    delay: Duration,
    last: Option<Instant>,
}

impl Throttle {
    fn new(delay: Duration) -> Self {
        Self { delay, last: None }
    }

    async fn wait(&mut self) {
        if let Some(prev) = self.last {
            let elapsed = prev.elapsed();
            if elapsed < self.delay {
                tokio::time::sleep(self.delay - elapsed).await;
            }
        }
        self.last = Some(Instant::now());
    }
}

/// Update run over a page source and a resolver.
pub struct Pipeline {
    source: Box<dyn PageSource>,
    resolver: Resolver,
    config: PipelineConfig,
    console: Console,
    throttle: Throttle,
}

impl Pipeline {
    pub fn new(source: Box<dyn PageSource>, resolver: Resolver, config: PipelineConfig) -> Self {
        let throttle = Throttle::new(config.fetch_delay);
        Self {
            source,
            resolver,
            config,
            console: Console::new(),
            throttle,
        }
    }

    /// Replaces the console used for progress and warnings.
    pub fn with_console(mut self, console: Console) -> Self {
        self.console = console;
        self
    }

    /// Runs the whole update.
    ///
    /// On error the previous registry file is left untouched.
    pub async fn run(&mut self) -> Result<RunReport, PipelineError> {
        self.console.step("Loading previous registry...");
        let previous = StationRegistry::load(&self.config.registry_path)?;
        self.console.info(&format!(
            "{} stations in {}",
            self.console.count(previous.len()),
            self.config.registry_path.display()
        ));

        self.console.step("Fetching prefecture index...");
        let index_url = self.config.base_url.clone();
        let html = self.fetch(&index_url).await.map_err(PipelineError::Index)?;
        let prefectures = extract_prefectures(&html, &index_url).map_err(PipelineError::Index)?;
        self.console.success(&format!(
            "Found {} prefectures",
            self.console.count(prefectures.len())
        ));

        let mut registry = StationRegistry::new();
        let mut report = RunReport {
            prefectures: prefectures.len(),
            ..RunReport::default()
        };

        for prefecture in &prefectures {
            self.process_prefecture(prefecture, &previous, &mut registry, &mut report)
                .await?;
        }

        self.console.step("Saving registry...");
        registry.save(&self.config.registry_path)?;
        report.stations = registry.len();

        Ok(report)
    }

    async fn fetch(&mut self, locator: &str) -> Result<String, ScraperError> {
        self.throttle.wait().await;
        self.source.fetch(locator).await
    }

    /// Collects detail links over all listing pages of a prefecture.
    async fn collect_links(
        &mut self,
        prefecture: &Prefecture,
    ) -> Result<Vec<(String, String)>, ScraperError> {
        let mut links = Vec::new();
        let mut visited = HashSet::new();
        let mut next = Some(prefecture.locator.clone());

        while let Some(url) = next.take() {
            if visited.len() >= MAX_LISTING_PAGES || !visited.insert(url.clone()) {
                break;
            }

            let html = self.fetch(&url).await?;
            let listing = extract_listing(&html, &url)?;
            links.extend(listing.stations);
            next = listing.next_page;
        }

        Ok(links)
    }

    async fn process_prefecture(
        &mut self,
        prefecture: &Prefecture,
        previous: &StationRegistry,
        registry: &mut StationRegistry,
        report: &mut RunReport,
    ) -> Result<(), PipelineError> {
        self.console.step(&format!(
            "Processing {}({}) ...",
            prefecture.name, prefecture.id
        ));

        let links = self
            .collect_links(prefecture)
            .await
            .map_err(|source| PipelineError::Listing {
                pref_id: prefecture.id.clone(),
                source,
            })?;

        let total = links.len();
        let mut added = 0;

        for (i, (locator, link_text)) in links.iter().enumerate() {
            self.console.progress_update(&format!(
                "{} {}",
                prefecture.name,
                self.console.ratio(i + 1, total)
            ));

            if let Ok(station_id) = station_id_from_locator(locator) {
                let key = StationKey::new(&prefecture.id, station_id);
                if registry.get(&key).is_some() {
                    self.warn(
                        report,
                        RunWarning::DuplicateStation {
                            key,
                            locator: locator.clone(),
                        },
                    );
                    continue;
                }
            }

            match self
                .process_station(prefecture, locator, link_text, previous)
                .await
            {
                Ok((station, resolution)) => {
                    report.geocoder_queries += resolution.queries_sent;
                    for message in &resolution.lookup_errors {
                        self.console.info(&self.console.muted(message));
                    }
                    for warning in resolution.warnings {
                        self.warn(report, RunWarning::Resolve(warning));
                    }

                    if station.coordinates.is_none() {
                        report.unresolved += 1;
                    }

                    let key = station.key();
                    if registry.push(station) {
                        added += 1;
                    } else {
                        self.warn(
                            report,
                            RunWarning::DuplicateStation {
                                key,
                                locator: locator.clone(),
                            },
                        );
                    }
                }
                Err(e) => {
                    report.skipped += 1;
                    let reason = if e.is_structural() {
                        format!("{} (page layout may have changed)", e)
                    } else {
                        e.to_string()
                    };
                    self.warn(
                        report,
                        RunWarning::StationSkipped {
                            locator: locator.clone(),
                            reason,
                        },
                    );
                }
            }
        }

        self.console.clear_line();
        self.console.success(&format!(
            "{}: {} stations",
            prefecture.name,
            self.console.count(added)
        ));

        Ok(())
    }

    /// Scrapes, normalizes and resolves one station.
    async fn process_station(
        &mut self,
        prefecture: &Prefecture,
        locator: &str,
        link_text: &str,
        previous: &StationRegistry,
    ) -> Result<(Station, Resolution), ScraperError> {
        let html = self.fetch(locator).await?;
        let raw = extract_station(prefecture, locator, link_text, &html)?;

        let name = normalize_str(&raw.name);
        let address = normalize(raw.address.as_deref());
        let key = StationKey::new(&raw.pref_id, &raw.station_id);
        let prior = previous.get(&key);

        let embedded = raw
            .map_coordinates
            .filter(|_| self.config.use_map_link_coordinates);
        let resolution = match embedded {
            Some(coordinates) => settle(&key, &name, address.as_deref(), Some(coordinates), prior),
            None => {
                self.resolver
                    .resolve(&key, &name, address.as_deref(), prior)
                    .await
            }
        };

        let station = Station {
            pref_id: raw.pref_id,
            station_id: raw.station_id,
            name,
            address,
            detail_locator: Some(raw.detail_locator),
            phone: normalize(raw.phone.as_deref()),
            hours: normalize(raw.hours.as_deref()),
            coordinates: resolution.coordinates,
        };

        Ok((station, resolution))
    }

    /// Reports a warning immediately and records it.
    fn warn(&self, report: &mut RunReport, warning: RunWarning) {
        self.console.warning(&warning.to_string());
        report.warnings.push(warning);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::tests::FakeGeocoder;
    use crate::station::Coordinates;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    const BASE: &str = "https://www.michi-no-eki.jp/";

    /// Canned pages keyed by absolute URL.
    #[derive(Default, Clone)]
    struct FakeSource {
        pages: HashMap<String, String>,
        fetched: Arc<Mutex<Vec<String>>>,
    }

    impl FakeSource {
        fn page(mut self, url: &str, html: String) -> Self {
            self.pages.insert(url.to_string(), html);
            self
        }
    }

    #[async_trait]
    impl PageSource for FakeSource {
        async fn fetch(&self, locator: &str) -> Result<String, ScraperError> {
            self.fetched.lock().unwrap().push(locator.to_string());
            self.pages
                .get(locator)
                .cloned()
                .ok_or_else(|| ScraperError::NotFound(locator.to_string()))
        }
    }

    fn listing_url(pref_id: &str) -> String {
        format!("{}stations/search/{}", BASE, pref_id)
    }

    fn detail_url(station_id: &str) -> String {
        format!("{}stations/views/{}/", BASE, station_id)
    }

    fn index_html(prefectures: &[(&str, &str)]) -> String {
        let items: String = prefectures
            .iter()
            .map(|(id, name)| format!(r#"<li><a href="/stations/search/{}">{}</a></li>"#, id, name))
            .collect();
        format!(
            r#"<html><body><div class="station__list"><dl><dt>地方</dt><dd><ul>{}</ul></dd></dl></div></body></html>"#,
            items
        )
    }

    fn listing_html(station_ids: &[&str], next: Option<&str>) -> String {
        let items: String = station_ids
            .iter()
            .map(|id| format!(r#"<li><a href="/stations/views/{}/">駅{}</a></li>"#, id, id))
            .collect();
        let paging = next
            .map(|n| format!(r#"<div class="paging"><span class="next"><a href="{}">次へ</a></span></div>"#, n))
            .unwrap_or_default();
        format!(
            r#"<html><body><div class="searchList"><ul>{}</ul></div>{}</body></html>"#,
            items, paging
        )
    }

    fn detail_html(name: &str, address: &str, map: Option<Coordinates>) -> String {
        let map_link = map
            .map(|c| {
                format!(
                    r#"<a href="https://www.google.com/maps/search/?api=1&amp;q={},{}&amp;z=15">地図</a>"#,
                    c.lat, c.lng
                )
            })
            .unwrap_or_default();
        format!(
            r#"<html><body><div class="info">
                <dl><dt>道の駅名</dt><dd>{}</dd></dl>
                <dl><dt>所在地</dt><dd>{}</dd></dl>
                <dl><dt>ＴＥＬ</dt><dd><a href="tel:0880-00-0000">０８８０－００－００００</a></dd></dl>
                <dl><dt>営業時間</dt><dd>9:00~17:00</dd></dl>
            </div>{}</body></html>"#,
            name, address, map_link
        )
    }

    fn config(dir: &Path) -> PipelineConfig {
        PipelineConfig {
            base_url: BASE.to_string(),
            fetch_delay: Duration::ZERO,
            registry_path: dir.join("stations.csv"),
            use_map_link_coordinates: true,
        }
    }

    fn pipeline(source: &FakeSource, geocoder: &FakeGeocoder, config: PipelineConfig) -> Pipeline {
        let resolver = Resolver::new(Box::new(geocoder.clone()), Vec::new(), "道の駅");
        Pipeline::new(Box::new(source.clone()), resolver, config)
            .with_console(Console::with_colors(false))
    }

    fn prior_station(station_id: &str, address: &str, coordinates: Coordinates) -> Station {
        Station {
            pref_id: "39".to_string(),
            station_id: station_id.to_string(),
            name: format!("駅{}", station_id),
            address: Some(address.to_string()),
            detail_locator: Some(detail_url(station_id)),
            phone: None,
            hours: None,
            coordinates: Some(coordinates),
        }
    }

    /// Three stations in one prefecture, geocoded by address.
    fn kochi_source() -> FakeSource {
        FakeSource::default()
            .page(BASE, index_html(&[("39", "高知")]))
            .page(&listing_url("39"), listing_html(&["1", "2", "3"], None))
            .page(&detail_url("1"), detail_html("駅1", "高知県土佐市１", None))
            .page(&detail_url("2"), detail_html("駅2", "高知県須崎市２", None))
            .page(&detail_url("3"), detail_html("駅3", "高知県四万十市３", None))
    }

    #[tokio::test]
    async fn test_drift_reported_once() {
        let dir = TempDir::new().unwrap();
        let config = config(dir.path());

        let previous: StationRegistry = vec![
            prior_station("1", "高知県土佐市1", Coordinates::new(33.1, 133.1)),
            prior_station("2", "高知県須崎市2", Coordinates::new(33.2, 133.2)),
            prior_station("3", "高知県四万十市3", Coordinates::new(33.3, 133.3)),
        ]
        .into_iter()
        .collect();
        previous.save(&config.registry_path).unwrap();

        let geocoder = FakeGeocoder::with(&[
            ("高知県土佐市1", Coordinates::new(33.1, 133.1)),
            ("高知県須崎市2", Coordinates::new(33.25, 133.2)),
            ("高知県四万十市3", Coordinates::new(33.3, 133.3)),
        ]);
        let source = kochi_source();

        let report = pipeline(&source, &geocoder, config.clone()).run().await.unwrap();

        let saved = StationRegistry::load(&config.registry_path).unwrap();
        assert_eq!(saved.len(), 3);
        assert_eq!(report.stations, 3);

        let drifts: Vec<&ResolveWarning> = report.drifts().collect();
        assert_eq!(drifts.len(), 1);
        assert_eq!(drifts[0].key(), &StationKey::new("39", "2"));
        assert_eq!(
            saved.find("39", "2").unwrap().coordinates,
            Some(Coordinates::new(33.25, 133.2))
        );
    }

    #[tokio::test]
    async fn test_stations_normalized_and_saved_in_order() {
        let dir = TempDir::new().unwrap();
        let config = config(dir.path());
        let geocoder = FakeGeocoder::with(&[("高知県土佐市1", Coordinates::new(33.1, 133.1))]);

        let report = pipeline(&kochi_source(), &geocoder, config.clone())
            .run()
            .await
            .unwrap();

        let saved = StationRegistry::load(&config.registry_path).unwrap();
        let ids: Vec<&str> = saved.iter().map(|s| s.station_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);

        let first = saved.find("39", "1").unwrap();
        assert_eq!(first.address.as_deref(), Some("高知県土佐市1"));
        assert_eq!(first.phone.as_deref(), Some("0880-00-0000"));
        assert_eq!(first.hours.as_deref(), Some("9:00〜17:00"));
        assert_eq!(first.detail_locator, Some(detail_url("1")));

        // No previous file: the other two are unresolved
        assert_eq!(report.unresolved, 2);
        assert_eq!(saved.find("39", "2").unwrap().coordinates, None);
    }

    #[tokio::test]
    async fn test_index_parse_error_leaves_registry_untouched() {
        let dir = TempDir::new().unwrap();
        let config = config(dir.path());
        let before = "39\t1\t駅1\t高知県\t33.1\t133.1\n";
        std::fs::write(&config.registry_path, before).unwrap();

        let source = FakeSource::default().page(BASE, "<html><body>メンテナンス中</body></html>".to_string());
        let result = pipeline(&source, &FakeGeocoder::default(), config.clone())
            .run()
            .await;

        assert!(matches!(result, Err(PipelineError::Index(ScraperError::ParseError(_)))));
        assert_eq!(std::fs::read_to_string(&config.registry_path).unwrap(), before);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_index_fetch_error_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let config = config(dir.path());

        let result = pipeline(&FakeSource::default(), &FakeGeocoder::default(), config.clone())
            .run()
            .await;

        assert!(matches!(result, Err(PipelineError::Index(_))));
        assert!(!config.registry_path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_listing_error_aborts_run() {
        let dir = TempDir::new().unwrap();
        let config = config(dir.path());
        let source = FakeSource::default()
            .page(BASE, index_html(&[("39", "高知")]))
            .page(&listing_url("39"), "<html></html>".to_string());

        let result = pipeline(&source, &FakeGeocoder::default(), config.clone())
            .run()
            .await;

        assert!(matches!(result, Err(PipelineError::Listing { .. })));
        assert!(!config.registry_path.exists());
    }

    #[tokio::test]
    async fn test_broken_station_is_skipped() {
        let dir = TempDir::new().unwrap();
        let config = config(dir.path());
        let source = FakeSource::default()
            .page(BASE, index_html(&[("39", "高知"), ("38", "愛媛")]))
            .page(&listing_url("39"), listing_html(&["1", "2", "3"], None))
            .page(&listing_url("38"), listing_html(&["4"], None))
            .page(&detail_url("1"), detail_html("駅1", "高知県土佐市1", None))
            // 2 is missing entirely
            .page(&detail_url("3"), "<html><body>準備中</body></html>".to_string())
            .page(&detail_url("4"), detail_html("駅4", "愛媛県4", None));

        let report = pipeline(&source, &FakeGeocoder::default(), config.clone())
            .run()
            .await
            .unwrap();

        assert_eq!(report.skipped, 2);
        let saved = StationRegistry::load(&config.registry_path).unwrap();
        let ids: Vec<&str> = saved.iter().map(|s| s.station_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "4"]);

        let skipped = report
            .warnings
            .iter()
            .filter(|w| matches!(w, RunWarning::StationSkipped { .. }))
            .count();
        assert_eq!(skipped, 2);
    }

    #[tokio::test]
    async fn test_map_link_coordinates_skip_geocoding() {
        let dir = TempDir::new().unwrap();
        let config = config(dir.path());
        let source = FakeSource::default()
            .page(BASE, index_html(&[("39", "高知")]))
            .page(&listing_url("39"), listing_html(&["1"], None))
            .page(
                &detail_url("1"),
                detail_html("駅1", "高知県土佐市1", Some(Coordinates::new(33.5, 133.5))),
            );
        let geocoder = FakeGeocoder::default();

        let report = pipeline(&source, &geocoder, config.clone()).run().await.unwrap();

        assert!(geocoder.calls().is_empty());
        assert_eq!(report.geocoder_queries, 0);
        let saved = StationRegistry::load(&config.registry_path).unwrap();
        assert_eq!(
            saved.find("39", "1").unwrap().coordinates,
            Some(Coordinates::new(33.5, 133.5))
        );
    }

    #[tokio::test]
    async fn test_map_link_coordinates_can_be_disabled() {
        let dir = TempDir::new().unwrap();
        let mut config = config(dir.path());
        config.use_map_link_coordinates = false;
        let source = FakeSource::default()
            .page(BASE, index_html(&[("39", "高知")]))
            .page(&listing_url("39"), listing_html(&["1"], None))
            .page(
                &detail_url("1"),
                detail_html("駅1", "高知県土佐市1", Some(Coordinates::new(33.5, 133.5))),
            );
        let geocoder = FakeGeocoder::with(&[("高知県土佐市1", Coordinates::new(33.6, 133.6))]);

        pipeline(&source, &geocoder, config.clone()).run().await.unwrap();

        assert_eq!(geocoder.calls(), vec!["高知県土佐市1"]);
        let saved = StationRegistry::load(&config.registry_path).unwrap();
        assert_eq!(
            saved.find("39", "1").unwrap().coordinates,
            Some(Coordinates::new(33.6, 133.6))
        );
    }

    #[tokio::test]
    async fn test_pagination_and_duplicates() {
        let dir = TempDir::new().unwrap();
        let config = config(dir.path());
        let page2 = format!("{}/page:2", listing_url("39"));
        let source = FakeSource::default()
            .page(BASE, index_html(&[("39", "高知")]))
            .page(&listing_url("39"), listing_html(&["1", "2"], Some("/stations/search/39/page:2")))
            .page(&page2, listing_html(&["2", "3"], None))
            .page(&detail_url("1"), detail_html("駅1", "高知県1", None))
            .page(&detail_url("2"), detail_html("駅2", "高知県2", None))
            .page(&detail_url("3"), detail_html("駅3", "高知県3", None));

        let report = pipeline(&source, &FakeGeocoder::default(), config.clone())
            .run()
            .await
            .unwrap();

        assert_eq!(report.stations, 3);
        assert!(report
            .warnings
            .iter()
            .any(|w| matches!(w, RunWarning::DuplicateStation { key, .. } if key.station_id == "2")));

        // Duplicate detail page is not fetched twice
        let fetched = source.fetched.lock().unwrap();
        assert_eq!(fetched.iter().filter(|u| **u == detail_url("2")).count(), 1);
        assert!(fetched.contains(&page2));
    }

    #[tokio::test]
    async fn test_unresolved_station_filled_from_previous() {
        let dir = TempDir::new().unwrap();
        let config = config(dir.path());
        let previous: StationRegistry =
            vec![prior_station("1", "高知県土佐市1", Coordinates::new(34.0, 135.0))]
                .into_iter()
                .collect();
        previous.save(&config.registry_path).unwrap();

        let source = FakeSource::default()
            .page(BASE, index_html(&[("39", "高知")]))
            .page(&listing_url("39"), listing_html(&["1"], None))
            .page(&detail_url("1"), detail_html("駅1", "高知県土佐市1", None));

        let report = pipeline(&source, &FakeGeocoder::default(), config.clone())
            .run()
            .await
            .unwrap();

        assert_eq!(report.unresolved, 0);
        assert!(matches!(
            report.warnings.as_slice(),
            [RunWarning::Resolve(ResolveWarning::FilledFromPrior { .. })]
        ));
        let saved = StationRegistry::load(&config.registry_path).unwrap();
        assert_eq!(
            saved.find("39", "1").unwrap().coordinates,
            Some(Coordinates::new(34.0, 135.0))
        );
    }

    #[tokio::test]
    async fn test_throttle_spaces_requests() {
        let mut throttle = Throttle::new(Duration::from_millis(30));
        let start = Instant::now();
        throttle.wait().await;
        assert!(start.elapsed() < Duration::from_millis(30));
        throttle.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
