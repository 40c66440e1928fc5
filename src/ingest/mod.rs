//! Remote frame sources.
//!
//! Each named stream is polled by its own [`StreamPoller`] thread which fetches
//! one frame per interval through a [`FrameFetcher`] and hands it to the
//! shared [`IngestionPipeline`](crate::pipeline::IngestionPipeline). The
//! [`StreamRegistry`] owns the pollers and enforces name uniqueness.

mod http;
mod poller;
mod registry;

pub use http::HttpFetcher;
pub use poller::{PollerState, StreamPoller};
pub use registry::{StreamInfo, StreamRegistry};

use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;
use url::Url;

use crate::error::{FetchError, StreamError};

/// Shortest accepted poll interval; shorter requests are raised to this.
pub const MIN_INTERVAL_SECS: f64 = 0.5;
/// Longest accepted poll interval (one day).
pub const MAX_INTERVAL_SECS: f64 = 60.0 * 60.0 * 24.0;
pub const DEFAULT_INTERVAL_SECS: f64 = 3.0;
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(8);
/// Upper bound on a single fetched frame.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Fetches the current frame of a remote source.
pub trait FrameFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// A validated stream definition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    name: String,
    url: String,
    interval_secs: f64,
}

impl StreamConfig {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        interval_secs: f64,
    ) -> Result<Self, StreamError> {
        let name = name.into();
        let url = url.into();
        validate_stream_name(&name)?;
        validate_stream_url(&url)?;
        if !interval_secs.is_finite() || interval_secs > MAX_INTERVAL_SECS {
            return Err(StreamError::InvalidInterval(interval_secs));
        }
        Ok(Self {
            name,
            url,
            interval_secs: interval_secs.max(MIN_INTERVAL_SECS),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn interval_secs(&self) -> f64 {
        self.interval_secs
    }

    pub fn interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.interval_secs)
            .unwrap_or(Duration::from_secs_f64(MAX_INTERVAL_SECS))
    }
}

pub fn validate_stream_name(name: &str) -> Result<(), StreamError> {
    static NAME_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = NAME_RE.get_or_init(|| regex::Regex::new(r"^[A-Za-z0-9_.-]{1,64}$").unwrap());
    if !re.is_match(name) {
        return Err(StreamError::InvalidName(name.to_string()));
    }
    Ok(())
}

pub fn validate_stream_url(url: &str) -> Result<(), StreamError> {
    let invalid = |reason: String| StreamError::InvalidUrl {
        url: url.to_string(),
        reason,
    };
    let parsed = Url::parse(url).map_err(|err| invalid(err.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => return Err(invalid(format!("unsupported scheme '{}'", other))),
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }
    Ok(())
}
