use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use super::{FrameFetcher, StreamConfig};
use crate::error::StreamError;
use crate::motion::FrameSource;
use crate::pipeline::IngestionPipeline;
use crate::signal::StopSignal;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

#[derive(Debug, Default)]
pub(crate) struct PollerCounters {
    frames_ingested: AtomicU64,
    fetch_failures: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl PollerCounters {
    fn ingested(&self) {
        self.frames_ingested.fetch_add(1, Ordering::Relaxed);
    }

    fn failed(&self, error: String) {
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    pub(crate) fn frames_ingested(&self) -> u64 {
        self.frames_ingested.load(Ordering::Relaxed)
    }

    pub(crate) fn fetch_failures(&self) -> u64 {
        self.fetch_failures.load(Ordering::Relaxed)
    }

    pub(crate) fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

struct PollerWorker {
    stop: Arc<StopSignal>,
    join: JoinHandle<()>,
}

/// Polls one named source on its own thread.
pub struct StreamPoller {
    config: StreamConfig,
    state: PollerState,
    counters: Arc<PollerCounters>,
    worker: Option<PollerWorker>,
}

impl StreamPoller {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            state: PollerState::Idle,
            counters: Arc::new(PollerCounters::default()),
            worker: None,
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    pub(crate) fn counters(&self) -> &PollerCounters {
        &self.counters
    }

    /// Launch the polling thread. Only valid from `Idle`.
    pub fn start(
        &mut self,
        pipeline: Arc<IngestionPipeline>,
        fetcher: Arc<dyn FrameFetcher>,
    ) -> Result<(), StreamError> {
        if self.state != PollerState::Idle {
            return Ok(());
        }
        let stop = Arc::new(StopSignal::new());
        let config = self.config.clone();
        let counters = self.counters.clone();
        let stop_thread = stop.clone();
        let join = std::thread::Builder::new()
            .name(format!("stream-{}", config.name()))
            .spawn(move || poll_loop(&config, &pipeline, fetcher.as_ref(), &counters, &stop_thread))
            .map_err(StreamError::Spawn)?;
        log::info!(
            "stream '{}' started: url={} interval={}s",
            self.config.name(),
            self.config.url(),
            self.config.interval_secs()
        );
        self.worker = Some(PollerWorker { stop, join });
        self.state = PollerState::Running;
        Ok(())
    }

    /// Signal the loop and wait for the in-flight cycle. Once this returns the
    /// poller ingests nothing further.
    pub fn stop(&mut self) -> Result<()> {
        let Some(worker) = self.worker.take() else {
            if self.state == PollerState::Idle {
                self.state = PollerState::Stopped;
            }
            return Ok(());
        };
        self.state = PollerState::Stopping;
        worker.stop.trigger();
        let joined = worker.join.join();
        self.state = PollerState::Stopped;
        joined.map_err(|_| anyhow!("stream '{}' poller thread panicked", self.config.name()))?;
        log::info!("stream '{}' stopped", self.config.name());
        Ok(())
    }
}

impl Drop for StreamPoller {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            log::warn!("{:#}", err);
        }
    }
}

fn poll_loop(
    config: &StreamConfig,
    pipeline: &IngestionPipeline,
    fetcher: &dyn FrameFetcher,
    counters: &PollerCounters,
    stop: &StopSignal,
) {
    let source = FrameSource::stream(config.name());
    loop {
        match fetcher.fetch(config.url()) {
            // A stop raised during the fetch discards the frame.
            Ok(_) if stop.is_triggered() => break,
            Ok(bytes) => match pipeline.ingest(&bytes, &source, None) {
                Ok(result) => {
                    counters.ingested();
                    log::debug!("stream '{}': stored frame {}", config.name(), result.frame.id);
                }
                Err(err) => {
                    log::warn!("stream '{}': {}", config.name(), err);
                    counters.failed(err.to_string());
                }
            },
            Err(err) => {
                log::warn!("stream '{}': fetch {} failed: {}", config.name(), config.url(), err);
                pipeline.stats().fetch_failed();
                counters.failed(err.to_string());
            }
        }
        if stop.wait_timeout(config.interval()) {
            break;
        }
    }
}
