use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{FrameFetcher, StreamConfig, StreamPoller};
use crate::error::StreamError;
use crate::motion::FrameSource;
use crate::pipeline::IngestionPipeline;

/// Snapshot of one active stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub name: String,
    pub url: String,
    pub interval_secs: f64,
    pub frames_ingested: u64,
    pub fetch_failures: u64,
    pub last_error: Option<String>,
}

#[derive(Default)]
struct Pollers {
    active: HashMap<String, StreamPoller>,
    /// Names whose poller is being joined; reserved until its scoring
    /// context is dropped.
    stopping: HashSet<String>,
}

/// Active pollers keyed by stream name.
pub struct StreamRegistry {
    pipeline: Arc<IngestionPipeline>,
    fetcher: Arc<dyn FrameFetcher>,
    pollers: Mutex<Pollers>,
}

impl StreamRegistry {
    pub fn new(pipeline: Arc<IngestionPipeline>, fetcher: Arc<dyn FrameFetcher>) -> Self {
        Self {
            pipeline,
            fetcher,
            pollers: Mutex::new(Pollers::default()),
        }
    }

    fn pollers(&self) -> Result<MutexGuard<'_, Pollers>, StreamError> {
        self.pollers.lock().map_err(|_| StreamError::Poisoned)
    }

    pub fn start_stream(&self, config: StreamConfig) -> Result<StreamInfo, StreamError> {
        let mut pollers = self.pollers()?;
        if pollers.active.contains_key(config.name()) {
            return Err(StreamError::DuplicateName(config.name().to_string()));
        }
        if pollers.stopping.contains(config.name()) {
            return Err(StreamError::Stopping(config.name().to_string()));
        }
        let mut poller = StreamPoller::new(config);
        poller.start(self.pipeline.clone(), self.fetcher.clone())?;
        let info = stream_info(&poller);
        pollers.active.insert(info.name.clone(), poller);
        Ok(info)
    }

    /// Stop and remove a stream. Returns after its poller has finished.
    pub fn stop_stream(&self, name: &str) -> Result<(), StreamError> {
        // Joined outside the lock so other streams stay controllable meanwhile.
        let poller = {
            let mut pollers = self.pollers()?;
            let poller = pollers
                .active
                .remove(name)
                .ok_or_else(|| StreamError::NotFound(name.to_string()))?;
            pollers.stopping.insert(name.to_string());
            poller
        };
        self.retire(name.to_string(), poller);
        Ok(())
    }

    /// Active streams sorted by name.
    pub fn list_active_streams(&self) -> Result<Vec<StreamInfo>, StreamError> {
        let pollers = self.pollers()?;
        let mut streams: Vec<StreamInfo> = pollers.active.values().map(stream_info).collect();
        streams.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(streams)
    }

    pub fn stop_all(&self) {
        let drained: Vec<(String, StreamPoller)> = match self.pollers() {
            Ok(mut pollers) => {
                let drained: Vec<_> = pollers.active.drain().collect();
                for (name, _) in &drained {
                    pollers.stopping.insert(name.clone());
                }
                drained
            }
            Err(err) => {
                log::warn!("{}", err);
                return;
            }
        };
        for (name, poller) in drained {
            self.retire(name, poller);
        }
    }

    /// Join a removed poller, drop its scoring context, then release its name.
    fn retire(&self, name: String, mut poller: StreamPoller) {
        if let Err(err) = poller.stop() {
            log::warn!("{:#}", err);
        }
        self.pipeline.scorer().forget(&FrameSource::stream(name.as_str()));
        match self.pollers() {
            Ok(mut pollers) => {
                pollers.stopping.remove(&name);
            }
            Err(err) => log::warn!("stream '{}': {}", name, err),
        }
    }
}

impl Drop for StreamRegistry {
    fn drop(&mut self) {
        self.stop_all();
    }
}

fn stream_info(poller: &StreamPoller) -> StreamInfo {
    let config = poller.config();
    let counters = poller.counters();
    StreamInfo {
        name: config.name().to_string(),
        url: config.url().to_string(),
        interval_secs: config.interval_secs(),
        frames_ingested: counters.frames_ingested(),
        fetch_failures: counters.fetch_failures(),
        last_error: counters.last_error(),
    }
}
