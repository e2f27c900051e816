//! Prefecture index extraction from the directory's top page.

use super::{resolve_url, segment_after, trailing_segment};
use crate::error::ScraperError;
use crate::normalize::normalize_str;
use crate::station::Prefecture;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::sync::LazyLock;

/// Container holding the prefecture links.
static CONTAINER: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".station__list").expect("Invalid CONTAINER selector"));

/// Prefecture links inside the container.
static PREFECTURE_LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("dl dd ul li a").expect("Invalid PREFECTURE_LINK selector"));

/// Extracts prefectures from the top page in document order.
///
/// The id is the anchor's `id` attribute, else the path segment after
/// `search` (`/stations/search/01/all/all` is `01`), else the last segment.
/// Fails with a parse error when the link container is missing or two links
/// share an id, both of which mean the site layout changed.
pub fn extract_prefectures(html: &str, page_url: &str) -> Result<Vec<Prefecture>, ScraperError> {
    let doc = Html::parse_document(html);

    let container = doc
        .select(&CONTAINER)
        .next()
        .ok_or_else(|| ScraperError::ParseError("prefecture list container not found".to_string()))?;

    let mut seen = HashSet::new();
    let mut prefectures = Vec::new();

    for link in container.select(&PREFECTURE_LINK) {
        let Some(href) = link.value().attr("href") else {
            continue;
        };

        let locator = resolve_url(page_url, href)?;
        let id = match link.value().attr("id").map(str::trim).filter(|s| !s.is_empty()) {
            Some(id) => id.to_string(),
            None => segment_after(&locator, "search")
                .or_else(|| trailing_segment(&locator))
                .ok_or_else(|| {
                    ScraperError::ParseError(format!("cannot derive prefecture id from {}", href))
                })?,
        };

        if !seen.insert(id.clone()) {
            return Err(ScraperError::ParseError(format!(
                "prefecture id '{}' appears twice (at {})",
                id, href
            )));
        }

        let name = normalize_str(&link.text().collect::<String>());
        prefectures.push(Prefecture { id, name, locator });
    }

    Ok(prefectures)
}
