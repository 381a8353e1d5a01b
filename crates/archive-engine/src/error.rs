//! Error types for the archive engine

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Failures of a single engine operation.  None of them is fatal to the
/// process; each is scoped to the fetch, resolution or playback attempt
/// that produced it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    /// Network, DNS, timeout or non-2xx HTTP status reaching a page
    #[error("failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// The playback page was fetched but no strategy found a media URL
    #[error("no audio URL found in archive playback page")]
    NoAudioUrl,

    /// The audio output reported a runtime error after a source was attached
    #[error("playback fault: {0}")]
    PlaybackFault(String),

    /// Empty or non-absolute URL handed to the playback session
    #[error("invalid source URL: {0:?}")]
    InvalidSource(String),

    /// A configured selector or pattern does not compile
    #[error("invalid extraction marker {marker:?}: {reason}")]
    InvalidMarker { marker: String, reason: String },
}

impl EngineError {
    pub fn fetch(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::Fetch {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    pub fn invalid_marker(marker: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidMarker {
            marker: marker.into(),
            reason: reason.to_string(),
        }
    }
}
