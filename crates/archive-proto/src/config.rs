use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub station: StationConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub navigation: NavigationConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub socket: SocketConfig,
    #[serde(default)]
    pub mpv: MpvConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,
}

/// Upstream endpoints of the station.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    #[serde(default = "default_station_name")]
    pub name: String,
    /// Base used to absolutize relative links found on the listing page.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_archive_index_url")]
    pub archive_index_url: String,
    #[serde(default = "default_live_stream_url")]
    pub live_stream_url: String,
}

/// Which extraction strategy the stream resolver runs, in priority order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// `src` of a native audio element.
    AudioElement,
    /// `src` of a `<source>` child element.
    SourceElement,
    /// Any quoted absolute URL in the raw page text.
    QuotedUrl,
}

/// Markup markers for the listing parser and stream resolver.
///
/// The upstream pages are undocumented and change without notice, so every
/// marker lives here rather than in code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// CSS selectors identifying one show row on the listing page.
    #[serde(default = "default_row_selectors")]
    pub row_selectors: Vec<String>,
    /// Date label variants inside a row, tried in order.
    #[serde(default = "default_date_selectors")]
    pub date_selectors: Vec<String>,
    /// Title label variants inside a row, tried in order.
    #[serde(default = "default_title_selectors")]
    pub title_selectors: Vec<String>,
    #[serde(default = "default_link_selector")]
    pub link_selector: String,
    /// Regex used when the page has no row containers at all.  Must define
    /// the named groups `href`, `title` and `date`.
    #[serde(default = "default_loose_row_pattern")]
    pub loose_row_pattern: String,
    /// Extensions (without the dot) accepted as direct media.
    #[serde(default = "default_media_extensions")]
    pub media_extensions: Vec<String>,
    #[serde(default = "default_resolver_strategies")]
    pub resolver_strategies: Vec<StrategyKind>,
    #[serde(default = "default_audio_selector")]
    pub audio_selector: String,
    #[serde(default = "default_source_selector")]
    pub source_selector: String,
    /// Regex whose first capture group is a quoted absolute URL.
    #[serde(default = "default_quoted_url_pattern")]
    pub quoted_url_pattern: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NavigationConfig {
    /// Keep the live stream audible while browsing the archive.
    #[serde(default)]
    pub keep_live_audio: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketConfig {
    #[serde(default = "default_socket_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MpvConfig {
    #[serde(default = "default_volume")]
    pub default_volume: f32,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            pid_file: default_pid_file(),
        }
    }
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            name: default_station_name(),
            base_url: default_base_url(),
            archive_index_url: default_archive_index_url(),
            live_stream_url: default_live_stream_url(),
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            row_selectors: default_row_selectors(),
            date_selectors: default_date_selectors(),
            title_selectors: default_title_selectors(),
            link_selector: default_link_selector(),
            loose_row_pattern: default_loose_row_pattern(),
            media_extensions: default_media_extensions(),
            resolver_strategies: default_resolver_strategies(),
            audio_selector: default_audio_selector(),
            source_selector: default_source_selector(),
            quoted_url_pattern: default_quoted_url_pattern(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            port: default_socket_port(),
        }
    }
}

impl Default for MpvConfig {
    fn default() -> Self {
        Self {
            default_volume: default_volume(),
        }
    }
}

fn default_pid_file() -> PathBuf {
    platform::data_dir().join("daemon.pid")
}

fn default_station_name() -> String {
    "WWOZ".to_string()
}

fn default_base_url() -> String {
    "https://www.wwoz.org".to_string()
}

fn default_archive_index_url() -> String {
    "https://www.wwoz.org/listen/archive/".to_string()
}

fn default_live_stream_url() -> String {
    "https://wwoz-sc.streamguys1.com/wwoz-hi.mp3".to_string()
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_row_selectors() -> Vec<String> {
    strings(&[".views-row", ".archive-listing .show-listing"])
}

fn default_date_selectors() -> Vec<String> {
    strings(&[".date", ".archive-date", ".show-date"])
}

fn default_title_selectors() -> Vec<String> {
    strings(&[".show-title", ".archive-title", ".show-name", "h3"])
}

fn default_link_selector() -> String {
    "a[href]".to_string()
}

fn default_loose_row_pattern() -> String {
    r#"<a href="(?P<href>/listen/archive/[^"]+)"[^>]*>(?P<title>.*?)</a>\s*<span class="date">(?P<date>[^<]+)</span>"#
        .to_string()
}

fn default_media_extensions() -> Vec<String> {
    strings(&["mp3"])
}

fn default_resolver_strategies() -> Vec<StrategyKind> {
    vec![
        StrategyKind::AudioElement,
        StrategyKind::SourceElement,
        StrategyKind::QuotedUrl,
    ]
}

fn default_audio_selector() -> String {
    "audio[src]".to_string()
}

fn default_source_selector() -> String {
    "source[src]".to_string()
}

fn default_quoted_url_pattern() -> String {
    r#"["'](https?:[^"'\s<>]+)["']"#.to_string()
}

fn default_timeout_secs() -> u64 {
    20
}

fn default_user_agent() -> String {
    concat!("radio-archive/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8990
}

fn default_socket_port() -> u16 {
    9877
}

fn default_volume() -> f32 {
    0.5
}

impl Config {
    /// Load the config file, writing the defaults first when it is missing so
    /// the extraction markers can be edited in place.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}
