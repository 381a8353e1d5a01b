//! Playback page → direct audio URL
//!
//! Strategies run in configured priority order and the first one that yields
//! a URL wins.  A strategy never returns a partial match.

use archive_proto::config::{Config, ExtractionConfig, StrategyKind};
use archive_proto::protocol::ResolvedStream;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use crate::error::{EngineError, Result};

/// One extraction heuristic, carrying its compiled marker.
#[derive(Debug, Clone)]
pub enum ResolveStrategy {
    AudioElement(Selector),
    SourceElement(Selector),
    QuotedUrl(Regex),
}

impl ResolveStrategy {
    pub fn kind(&self) -> StrategyKind {
        match self {
            ResolveStrategy::AudioElement(_) => StrategyKind::AudioElement,
            ResolveStrategy::SourceElement(_) => StrategyKind::SourceElement,
            ResolveStrategy::QuotedUrl(_) => StrategyKind::QuotedUrl,
        }
    }

    fn compile(kind: StrategyKind, markers: &ExtractionConfig) -> Result<Self> {
        Ok(match kind {
            StrategyKind::AudioElement => {
                ResolveStrategy::AudioElement(compile_selector(&markers.audio_selector)?)
            }
            StrategyKind::SourceElement => {
                ResolveStrategy::SourceElement(compile_selector(&markers.source_selector)?)
            }
            StrategyKind::QuotedUrl => {
                let pattern = &markers.quoted_url_pattern;
                let re =
                    Regex::new(pattern).map_err(|e| EngineError::invalid_marker(pattern, e))?;
                if re.captures_len() < 2 {
                    return Err(EngineError::invalid_marker(
                        pattern.as_str(),
                        "needs one capture group",
                    ));
                }
                ResolveStrategy::QuotedUrl(re)
            }
        })
    }

    fn attempt(
        &self,
        document: &Html,
        html: &str,
        page_url: &Url,
        media: &MediaFilter,
    ) -> Option<String> {
        match self {
            ResolveStrategy::AudioElement(sel) | ResolveStrategy::SourceElement(sel) => document
                .select(sel)
                .filter_map(|el| el.value().attr("src"))
                .find_map(|src| {
                    let src = unescape_separators(src.trim());
                    let url = page_url.join(&src).ok()?;
                    media.accepts(&url).then(|| url.to_string())
                }),
            ResolveStrategy::QuotedUrl(re) => re
                .captures_iter(html)
                .filter_map(|caps| caps.get(1))
                .find_map(|m| {
                    let url = Url::parse(&unescape_separators(m.as_str())).ok()?;
                    media.accepts(&url).then(|| url.to_string())
                }),
        }
    }
}

#[derive(Debug, Clone)]
struct MediaFilter {
    suffixes: Vec<String>,
}

impl MediaFilter {
    fn new(extensions: &[String]) -> Self {
        let suffixes = extensions
            .iter()
            .map(|ext| format!(".{}", ext.trim_start_matches('.').to_ascii_lowercase()))
            .collect();
        Self { suffixes }
    }

    /// Web URL whose path (query and fragment excluded) ends in a media extension.
    fn accepts(&self, url: &Url) -> bool {
        if !matches!(url.scheme(), "http" | "https") {
            return false;
        }
        let path = url.path().to_ascii_lowercase();
        self.suffixes.iter().any(|suffix| path.ends_with(suffix.as_str()))
    }
}

/// Undo JSON / JS escaping of `/` found in inline script variables.
pub fn unescape_separators(raw: &str) -> String {
    raw.replace("\\/", "/")
        .replace("\\u002F", "/")
        .replace("\\u002f", "/")
}

fn compile_selector(marker: &str) -> Result<Selector> {
    Selector::parse(marker).map_err(|e| EngineError::invalid_marker(marker, format!("{e:?}")))
}

/// Ordered strategy chain plus the media extension test.
#[derive(Debug, Clone)]
pub struct StreamResolver {
    strategies: Vec<ResolveStrategy>,
    media: MediaFilter,
}

impl StreamResolver {
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.extraction)
    }

    pub fn new(markers: &ExtractionConfig) -> Result<Self> {
        let strategies = markers
            .resolver_strategies
            .iter()
            .map(|kind| ResolveStrategy::compile(*kind, markers))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            strategies,
            media: MediaFilter::new(&markers.media_extensions),
        })
    }

    pub fn strategies(&self) -> impl Iterator<Item = StrategyKind> + '_ {
        self.strategies.iter().map(ResolveStrategy::kind)
    }

    /// Find the direct audio URL on a playback page.  `page_url` is the base
    /// for relative element sources.
    pub fn resolve(&self, html: &str, page_url: &Url) -> Result<ResolvedStream> {
        let document = Html::parse_document(html);
        for strategy in &self.strategies {
            if let Some(stream_url) = strategy.attempt(&document, html, page_url, &self.media) {
                debug!("resolver: {:?} matched {}", strategy.kind(), stream_url);
                return Ok(ResolvedStream { stream_url });
            }
            debug!("resolver: {:?} found nothing", strategy.kind());
        }
        Err(EngineError::NoAudioUrl)
    }
}
