//! Archive listing page parsing
//!
//! The listing page belongs to the station's website and its markup changes
//! without notice.  Parsing is therefore best-effort: every row is matched
//! independently and a row missing any field is skipped, never emitted with
//! blanks.

use archive_proto::config::{Config, ExtractionConfig};
use archive_proto::protocol::ArchiveEntry;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use crate::error::{EngineError, Result};

/// Compiled listing markers.
#[derive(Debug, Clone)]
pub struct ListingParser {
    base: Url,
    rows: Option<Selector>,
    dates: Vec<Selector>,
    titles: Vec<Selector>,
    link: Selector,
    loose: Option<Regex>,
}

impl ListingParser {
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.extraction, &config.station.base_url)
    }

    pub fn new(markers: &ExtractionConfig, base_url: &str) -> Result<Self> {
        let base = Url::parse(base_url).map_err(|e| EngineError::invalid_marker(base_url, e))?;

        // One selector group keeps rows from different variants in document order.
        let rows = if markers.row_selectors.is_empty() {
            None
        } else {
            Some(compile_selector(&markers.row_selectors.join(", "))?)
        };

        let loose = match markers.loose_row_pattern.trim() {
            "" => None,
            pattern => Some(compile_loose_pattern(pattern)?),
        };

        Ok(Self {
            base,
            rows,
            dates: compile_selectors(&markers.date_selectors)?,
            titles: compile_selectors(&markers.title_selectors)?,
            link: compile_selector(&markers.link_selector)?,
            loose,
        })
    }

    /// Extract every complete entry from a listing document, in document order.
    pub fn parse(&self, html: &str) -> Vec<ArchiveEntry> {
        let document = Html::parse_document(html);

        if let Some(rows) = &self.rows {
            let candidates: Vec<ElementRef> = document.select(rows).collect();
            if !candidates.is_empty() {
                let entries: Vec<ArchiveEntry> = candidates
                    .iter()
                    .filter_map(|row| self.parse_row(row))
                    .collect();
                debug!(
                    "listing: {} of {} rows complete",
                    entries.len(),
                    candidates.len()
                );
                return entries;
            }
        }

        match &self.loose {
            Some(re) => {
                let entries = self.parse_loose(re, html);
                debug!("listing: no row containers, loose pattern found {}", entries.len());
                entries
            }
            None => Vec::new(),
        }
    }

    fn parse_row(&self, row: &ElementRef) -> Option<ArchiveEntry> {
        let date = first_text(row, &self.dates)?;
        let show_name = first_text(row, &self.titles)?;
        let playback_page_url = row
            .select(&self.link)
            .find_map(|a| a.value().attr("href").and_then(|h| self.absolutize(h)))?;

        Some(ArchiveEntry {
            show_name,
            date,
            playback_page_url,
        })
    }

    fn parse_loose(&self, re: &Regex, html: &str) -> Vec<ArchiveEntry> {
        re.captures_iter(html)
            .filter_map(|caps| {
                let href = fragment_text(caps.name("href")?.as_str())?;
                let show_name = fragment_text(caps.name("title")?.as_str())?;
                let date = fragment_text(caps.name("date")?.as_str())?;
                Some(ArchiveEntry {
                    show_name,
                    date,
                    playback_page_url: self.absolutize(&href)?,
                })
            })
            .collect()
    }

    /// Resolve `href` against the station host; only web links qualify.
    fn absolutize(&self, href: &str) -> Option<String> {
        let href = href.trim();
        if href.is_empty() || href.starts_with('#') {
            return None;
        }
        let url = self.base.join(href).ok()?;
        match url.scheme() {
            "http" | "https" => Some(url.to_string()),
            _ => None,
        }
    }
}

fn compile_selector(marker: &str) -> Result<Selector> {
    Selector::parse(marker).map_err(|e| EngineError::invalid_marker(marker, format!("{e:?}")))
}

fn compile_selectors(markers: &[String]) -> Result<Vec<Selector>> {
    markers.iter().map(|m| compile_selector(m)).collect()
}

fn compile_loose_pattern(pattern: &str) -> Result<Regex> {
    let re = Regex::new(pattern).map_err(|e| EngineError::invalid_marker(pattern, e))?;
    for group in ["href", "title", "date"] {
        if !re.capture_names().flatten().any(|name| name == group) {
            return Err(EngineError::invalid_marker(
                pattern,
                format!("missing named group `{group}`"),
            ));
        }
    }
    Ok(re)
}

/// Text of the first descendant matching any variant, variants in priority order.
fn first_text(row: &ElementRef, variants: &[Selector]) -> Option<String> {
    variants.iter().find_map(|sel| {
        row.select(sel)
            .map(|el| collapse_whitespace(el.text()))
            .find(|text| !text.is_empty())
    })
}

/// Strip markup and decode entities from a raw HTML snippet.
fn fragment_text(raw: &str) -> Option<String> {
    let fragment = Html::parse_fragment(raw);
    let text = collapse_whitespace(fragment.root_element().text());
    (!text.is_empty()).then_some(text)
}

fn collapse_whitespace<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    parts
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}
