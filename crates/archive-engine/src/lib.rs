//! Archive browsing and shared playback for a single radio station.
//!
//! Two page parsers turn the station's HTML into data: [`listing`] extracts
//! the archived shows, [`resolver`] finds the direct audio URL on a show's
//! playback page.  [`session`] models the one audio output all views share
//! and [`coordinator`] owns everything at runtime, fed by a single event
//! channel.

pub mod coordinator;
pub mod error;
pub mod fetch;
pub mod listing;
pub mod resolver;
pub mod session;

pub use coordinator::{Coordinator, CoreEvent};
pub use error::{EngineError, Result};
pub use fetch::{HtmlFetch, HttpFetcher};
pub use listing::ListingParser;
pub use resolver::StreamResolver;
pub use session::{AudioOutput, MediaSignal, PlaybackSession, StatusChange};
