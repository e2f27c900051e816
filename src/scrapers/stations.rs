//! Station listing and detail page extraction.

use super::{resolve_url, trailing_segment};
use crate::error::ScraperError;
use crate::normalize::normalize_str;
use crate::station::{Coordinates, Prefecture};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;

/// Coordinates embedded in a map link, e.g. `https://www.google.com/maps/...?q=33.1,133.2&z=15`.
static MAP_LINK_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"google\.[a-z.]+/maps[^\s\x22'<>]*?(?:[?&]|&amp;)q=(-?[0-9]+(?:\.[0-9]+)?),\s*(-?[0-9]+(?:\.[0-9]+)?)",
    )
    .expect("Invalid MAP_LINK_REGEX")
});

/// CSS selectors used for parsing.
struct Selectors {
    /// Listing container.
    listing: Selector,
    /// Detail links inside the listing container.
    station_link: Selector,
    /// Link to the next listing page.
    next_page: Selector,
    /// Label/value rows on the detail page.
    info_row: Selector,
    /// Links inside a value cell.
    link: Selector,
}

impl Selectors {
    fn new() -> Self {
        Self {
            listing: Selector::parse(".searchList").expect("Invalid listing selector"),
            station_link: Selector::parse("ul li a").expect("Invalid station link selector"),
            next_page: Selector::parse(".paging .next a").expect("Invalid next page selector"),
            info_row: Selector::parse(".info dl").expect("Invalid info row selector"),
            link: Selector::parse("a").expect("Invalid link selector"),
        }
    }
}

static SELECTORS: LazyLock<Selectors> = LazyLock::new(Selectors::new);

/// Fields recognized in the detail page table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Label {
    Name,
    Address,
    Phone,
    Hours,
}

/// Label vocabulary, compared after normalization.
const LABELS: &[(&str, Label)] = &[
    ("道の駅名", Label::Name),
    ("所在地", Label::Address),
    ("TEL", Label::Phone),
    ("営業時間", Label::Hours),
];

/// One listing page of a prefecture.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StationListing {
    /// Detail page URLs with the link text, in document order.
    pub stations: Vec<(String, String)>,

    /// Absolute URL of the next page, if any.
    pub next_page: Option<String>,
}

/// Station fields as scraped, before normalization and geocoding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawStation {
    pub pref_id: String,
    pub station_id: String,
    pub detail_locator: String,
    pub name: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub hours: Option<String>,
    /// Coordinates found in an embedded map link.
    pub map_coordinates: Option<Coordinates>,
}

/// Extracts detail links and pagination from a listing page.
pub fn extract_listing(html: &str, page_url: &str) -> Result<StationListing, ScraperError> {
    let doc = Html::parse_document(html);
    let selectors = &*SELECTORS;

    let container = doc
        .select(&selectors.listing)
        .next()
        .ok_or_else(|| ScraperError::ParseError("station list container not found".to_string()))?;

    let mut stations = Vec::new();
    for link in container.select(&selectors.station_link) {
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        let title = link.text().collect::<String>().trim().to_string();
        stations.push((resolve_url(page_url, href)?, title));
    }

    let next_page = match doc
        .select(&selectors.next_page)
        .next()
        .and_then(|a| a.value().attr("href"))
    {
        Some(href) => Some(resolve_url(page_url, href)?),
        None => None,
    };

    Ok(StationListing {
        stations,
        next_page,
    })
}

/// Derives the station id from its detail page URL.
pub fn station_id_from_locator(locator: &str) -> Result<String, ScraperError> {
    trailing_segment(locator)
        .ok_or_else(|| ScraperError::InvalidUrl(format!("no station id in {}", locator)))
}

/// Extracts a station from its detail page.
///
/// `link_text` is the listing anchor text, used when the page has no name row.
pub fn extract_station(
    prefecture: &Prefecture,
    detail_locator: &str,
    link_text: &str,
    html: &str,
) -> Result<RawStation, ScraperError> {
    let station_id = station_id_from_locator(detail_locator)?;
    let doc = Html::parse_document(html);
    let selectors = &*SELECTORS;

    let mut station = RawStation {
        pref_id: prefecture.id.clone(),
        station_id,
        detail_locator: detail_locator.to_string(),
        ..RawStation::default()
    };

    let mut name = None;
    let mut rows = 0;
    for row in doc.select(&selectors.info_row) {
        rows += 1;

        let mut cells = row.children().filter_map(ElementRef::wrap);
        let (Some(key), Some(value)) = (cells.next(), cells.next()) else {
            continue;
        };

        let label = normalize_str(&element_text(key));
        let Some(&(_, field)) = LABELS.iter().find(|(l, _)| *l == label) else {
            continue;
        };

        let text = element_text(value);
        match field {
            Label::Name => name = non_empty(text),
            Label::Address => station.address = non_empty(text),
            Label::Phone => {
                // Phone numbers are wrapped in tel: links; fall back to the cell text
                let linked = value.select(&selectors.link).next().map(element_text);
                station.phone = linked.and_then(non_empty).or_else(|| non_empty(text));
            }
            Label::Hours => station.hours = non_empty(text),
        }
    }

    if rows == 0 {
        return Err(ScraperError::ElementNotFound("station info table".to_string()));
    }

    station.name = name
        .or_else(|| non_empty(link_text.to_string()))
        .ok_or_else(|| ScraperError::ElementNotFound("station name".to_string()))?;

    station.map_coordinates = extract_map_coordinates(html);

    Ok(station)
}

/// Finds coordinates in an embedded map link. Anything unparsable counts as absent.
pub(crate) fn extract_map_coordinates(html: &str) -> Option<Coordinates> {
    let caps = MAP_LINK_REGEX.captures(html)?;
    let lat = caps.get(1)?.as_str().parse::<f64>().ok()?;
    let lng = caps.get(2)?.as_str().parse::<f64>().ok()?;

    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
        return None;
    }

    Some(Coordinates::new(lat, lng))
}

/// Cell text with the indentation around each text node removed.
fn element_text(elem: ElementRef) -> String {
    elem.text().map(str::trim).collect::<String>()
}

fn non_empty(text: String) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
