//! Process-level wiring: one pipeline, its stream registry and its sweeper.

use anyhow::{anyhow, Context, Result};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::MotionKeepConfig;
use crate::error::{StoreError, StreamError};
use crate::ingest::{FrameFetcher, HttpFetcher, StreamConfig, StreamInfo, StreamRegistry};
use crate::motion::{FrameSource, MotionScorer, ScoringMode, DEFAULT_MOTION_THRESHOLD};
use crate::pipeline::{IngestResult, IngestionPipeline};
use crate::retention::{RetentionBuffer, RetentionPolicy, RetentionSweeper, SweeperConfig};
use crate::stats::{PipelineStats, StatsSnapshot};
use crate::storage::{Frame, FrameId, FrameStore, MotionOutcome, MotionOutcomeStore, SqliteFrameStore};

#[derive(Clone, Debug)]
pub struct ServiceSettings {
    pub retention: RetentionPolicy,
    pub sweeper: SweeperConfig,
    pub motion_threshold: f64,
    pub scoring: ScoringMode,
    /// Started by [`FrameService::start_background`].
    pub streams: Vec<StreamConfig>,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            retention: RetentionPolicy::default(),
            sweeper: SweeperConfig::default(),
            motion_threshold: DEFAULT_MOTION_THRESHOLD,
            scoring: ScoringMode::default(),
            streams: Vec::new(),
        }
    }
}

impl From<&MotionKeepConfig> for ServiceSettings {
    fn from(config: &MotionKeepConfig) -> Self {
        Self {
            retention: config.retention_policy(),
            sweeper: config.sweeper_config(),
            motion_threshold: config.motion.threshold,
            scoring: config.motion.scoring,
            streams: config.streams.clone(),
        }
    }
}

pub struct FrameService {
    pipeline: Arc<IngestionPipeline>,
    streams: StreamRegistry,
    sweeper: Mutex<RetentionSweeper>,
    autostart: Vec<StreamConfig>,
}

impl FrameService {
    pub fn new<S>(store: Arc<S>, fetcher: Arc<dyn FrameFetcher>, settings: ServiceSettings) -> Self
    where
        S: FrameStore + MotionOutcomeStore + 'static,
    {
        let stats = Arc::new(PipelineStats::new());
        let retention = Arc::new(RetentionBuffer::new(
            settings.retention,
            store.clone(),
            stats.clone(),
        ));
        let sweeper = RetentionSweeper::new(settings.sweeper, retention.clone(), stats.clone());
        let pipeline = Arc::new(IngestionPipeline::new(
            store.clone(),
            store,
            MotionScorer::new(settings.motion_threshold, settings.scoring),
            retention,
            stats,
        ));
        Self {
            streams: StreamRegistry::new(pipeline.clone(), fetcher),
            pipeline,
            sweeper: Mutex::new(sweeper),
            autostart: settings.streams,
        }
    }

    /// Open the SQLite store and frame directory named by `config`.
    pub fn open(config: &MotionKeepConfig) -> Result<Self> {
        if let Some(parent) = Path::new(&config.db_path).parent() {
            if !parent.as_os_str().is_empty() && !config.db_path.starts_with("file:") {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create database dir {}", parent.display()))?;
            }
        }
        std::fs::create_dir_all(&config.frames_dir)
            .with_context(|| format!("create frames dir {}", config.frames_dir.display()))?;
        let store = Arc::new(SqliteFrameStore::open(&config.db_path, &config.frames_dir)?);
        let fetcher = Arc::new(HttpFetcher::new(config.fetch_timeout));
        Ok(Self::new(store, fetcher, ServiceSettings::from(config)))
    }

    pub fn pipeline(&self) -> &Arc<IngestionPipeline> {
        &self.pipeline
    }

    pub fn ingest_upload(&self, bytes: &[u8]) -> Result<IngestResult, StoreError> {
        self.pipeline.ingest(bytes, &FrameSource::Upload, None)
    }

    pub fn start_stream(
        &self,
        name: &str,
        url: &str,
        interval_secs: f64,
    ) -> Result<StreamInfo, StreamError> {
        self.streams
            .start_stream(StreamConfig::new(name, url, interval_secs)?)
    }

    pub fn stop_stream(&self, name: &str) -> Result<(), StreamError> {
        self.streams.stop_stream(name)
    }

    pub fn list_active_streams(&self) -> Result<Vec<StreamInfo>, StreamError> {
        self.streams.list_active_streams()
    }

    pub fn recent_frames(&self, limit: usize) -> Result<Vec<Frame>> {
        self.pipeline.frames().recent_frames(limit)
    }

    pub fn frame(&self, id: FrameId) -> Result<Option<Frame>> {
        self.pipeline.frames().get(id)
    }

    pub fn recent_outcomes(&self, limit: usize) -> Result<Vec<MotionOutcome>> {
        self.pipeline.outcomes().recent_outcomes(limit)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.pipeline.stats().snapshot()
    }

    fn sweeper(&self) -> Result<MutexGuard<'_, RetentionSweeper>> {
        self.sweeper
            .lock()
            .map_err(|_| anyhow!("sweeper lock poisoned"))
    }

    /// Start the retention sweeper and every configured stream. A stream that
    /// fails to start is logged and skipped.
    pub fn start_background(&self) -> Result<()> {
        self.sweeper()?.start()?;
        for stream in &self.autostart {
            if let Err(err) = self.streams.start_stream(stream.clone()) {
                log::warn!("configured stream '{}' not started: {}", stream.name(), err);
            }
        }
        Ok(())
    }

    /// Stop every poller, then the sweeper.
    pub fn shutdown(&self) -> Result<()> {
        self.streams.stop_all();
        self.sweeper()?.stop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::retention::SweeperState;
    use crate::storage::InMemoryFrameStore;
    use crate::test_support::gray_png;
    use std::time::{Duration, Instant};

    struct StaticFetcher;

    impl FrameFetcher for StaticFetcher {
        fn fetch(&self, _url: &str) -> Result<Vec<u8>, FetchError> {
            Ok(gray_png(8, 8, 100))
        }
    }

    fn service(settings: ServiceSettings) -> (tempfile::TempDir, FrameService) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryFrameStore::new(dir.path()));
        let service = FrameService::new(store, Arc::new(StaticFetcher), settings);
        (dir, service)
    }

    #[test]
    fn upload_is_listed_and_scored() -> Result<()> {
        let (_dir, service) = service(ServiceSettings::default());
        let first = service.ingest_upload(&gray_png(8, 8, 0))?;
        let second = service.ingest_upload(&gray_png(8, 8, 255))?;

        // 64 pixels * 255 stays far below the default threshold.
        assert!(!second.motion_event.as_ref().map_or(true, |m| m.is_motion));
        let frames = service.recent_frames(10)?;
        assert_eq!(
            frames.iter().map(|f| f.id).collect::<Vec<_>>(),
            vec![second.frame.id, first.frame.id]
        );
        assert_eq!(service.frame(first.frame.id)?, Some(first.frame));
        assert_eq!(service.recent_outcomes(10)?.len(), 2);
        assert_eq!(service.stats().frames_ingested, 2);
        Ok(())
    }

    #[test]
    fn background_work_starts_configured_streams_and_shuts_down() -> Result<()> {
        let (_dir, service) = service(ServiceSettings {
            streams: vec![StreamConfig::new("porch", "http://porch.local/snap", 60.0)?],
            ..ServiceSettings::default()
        });
        service.start_background()?;
        assert_eq!(service.sweeper()?.state(), SweeperState::Running);
        let streams = service.list_active_streams()?;
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].name, "porch");

        let deadline = Instant::now() + Duration::from_secs(5);
        while service.stats().frames_ingested == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(service.stats().frames_ingested, 1);

        service.shutdown()?;
        assert!(service.list_active_streams()?.is_empty());
        assert_eq!(service.sweeper()?.state(), SweeperState::Stopped);
        Ok(())
    }

    #[test]
    fn stream_errors_surface_to_caller() {
        let (_dir, service) = service(ServiceSettings::default());
        assert!(matches!(
            service.start_stream("cam", "ftp://cam/", 1.0),
            Err(StreamError::InvalidUrl { .. })
        ));
        assert!(matches!(
            service.stop_stream("missing"),
            Err(StreamError::NotFound(_))
        ));
    }
}
