use std::io::Read;
use std::time::Duration;

use super::{FrameFetcher, DEFAULT_FETCH_TIMEOUT, MAX_FRAME_BYTES};
use crate::error::FetchError;

/// Snapshot fetcher for cameras exposing a single-image HTTP endpoint.
pub struct HttpFetcher {
    agent: ureq::Agent,
    max_bytes: usize,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            max_bytes: MAX_FRAME_BYTES,
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_FETCH_TIMEOUT)
    }
}

impl FrameFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = match self.agent.get(url).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(code, _)) => return Err(FetchError::Status(code)),
            Err(err) => return Err(FetchError::Transport(err.to_string())),
        };
        // Redirects are followed by the agent; anything else but 200 is a miss.
        if response.status() != 200 {
            return Err(FetchError::Status(response.status()));
        }
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(self.max_bytes as u64 + 1)
            .read_to_end(&mut bytes)?;
        if bytes.len() > self.max_bytes {
            return Err(FetchError::TooLarge(self.max_bytes));
        }
        if bytes.is_empty() {
            return Err(FetchError::EmptyBody);
        }
        Ok(bytes)
    }
}
