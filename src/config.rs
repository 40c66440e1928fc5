use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ingest::{StreamConfig, DEFAULT_FETCH_TIMEOUT, DEFAULT_INTERVAL_SECS};
use crate::motion::{ScoringMode, DEFAULT_MOTION_THRESHOLD};
use crate::retention::{
    RetentionPolicy, SweeperConfig, DEFAULT_BUFFER_CAPACITY, DEFAULT_RETENTION_SECS,
    DEFAULT_SWEEP_INTERVAL_SECS, MAX_SWEEP_INTERVAL_SECS,
};

const DEFAULT_DB_PATH: &str = "data/frames.db";
const DEFAULT_FRAMES_DIR: &str = "data/uploads";
const DEFAULT_API_ADDR: &str = "127.0.0.1:8000";

#[derive(Debug, Deserialize, Default)]
struct MotionKeepConfigFile {
    db_path: Option<String>,
    frames_dir: Option<PathBuf>,
    api: Option<ApiConfigFile>,
    retention: Option<RetentionConfigFile>,
    motion: Option<MotionConfigFile>,
    fetch: Option<FetchConfigFile>,
    streams: Option<Vec<StreamConfigFile>>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RetentionConfigFile {
    buffer_capacity: Option<usize>,
    seconds: Option<u64>,
    keep_all_frames: Option<bool>,
    sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct MotionConfigFile {
    threshold: Option<f64>,
    scoring: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct FetchConfigFile {
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct StreamConfigFile {
    name: String,
    url: String,
    interval_secs: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct MotionKeepConfig {
    pub db_path: String,
    pub frames_dir: PathBuf,
    pub api_addr: String,
    pub retention: RetentionSettings,
    pub motion: MotionSettings,
    pub fetch_timeout: Duration,
    /// Streams started together with the background work.
    pub streams: Vec<StreamConfig>,
}

#[derive(Debug, Clone)]
pub struct RetentionSettings {
    pub buffer_capacity: usize,
    pub retention: Duration,
    pub keep_all_frames: bool,
    pub sweep_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct MotionSettings {
    pub threshold: f64,
    pub scoring: ScoringMode,
}

impl MotionKeepConfig {
    /// Load from the file named by `MOTIONKEEP_CONFIG` (if any), then apply
    /// environment overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("MOTIONKEEP_CONFIG")
            .ok()
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Same as [`load`](Self::load) with an explicit config file path.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self> {
        let file_cfg = match config_path {
            Some(path) => read_config_file(path)?,
            None => MotionKeepConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: MotionKeepConfigFile) -> Result<Self> {
        let db_path = file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let frames_dir = file
            .frames_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_FRAMES_DIR));
        let api_addr = file
            .api
            .and_then(|api| api.addr)
            .unwrap_or_else(|| DEFAULT_API_ADDR.to_string());
        let retention_file = file.retention.unwrap_or_default();
        let retention = RetentionSettings {
            buffer_capacity: retention_file
                .buffer_capacity
                .unwrap_or(DEFAULT_BUFFER_CAPACITY),
            retention: Duration::from_secs(
                retention_file.seconds.unwrap_or(DEFAULT_RETENTION_SECS),
            ),
            keep_all_frames: retention_file.keep_all_frames.unwrap_or(false),
            sweep_interval: Duration::from_secs(
                retention_file
                    .sweep_interval_secs
                    .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS),
            ),
        };
        let motion_file = file.motion.unwrap_or_default();
        let scoring = match motion_file.scoring.as_deref() {
            Some(value) => parse_scoring(value)?,
            None => ScoringMode::default(),
        };
        let motion = MotionSettings {
            threshold: motion_file.threshold.unwrap_or(DEFAULT_MOTION_THRESHOLD),
            scoring,
        };
        let fetch_timeout = file
            .fetch
            .and_then(|fetch| fetch.timeout_ms)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_FETCH_TIMEOUT);
        let streams = file
            .streams
            .unwrap_or_default()
            .into_iter()
            .map(|stream| {
                let name = stream.name.clone();
                StreamConfig::new(
                    stream.name,
                    stream.url,
                    stream.interval_secs.unwrap_or(DEFAULT_INTERVAL_SECS),
                )
                .with_context(|| format!("configured stream '{}'", name))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            db_path,
            frames_dir,
            api_addr,
            retention,
            motion,
            fetch_timeout,
            streams,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = env_value("MOTIONKEEP_DB_PATH") {
            self.db_path = path;
        }
        if let Some(dir) = env_value("MOTIONKEEP_FRAMES_DIR") {
            self.frames_dir = PathBuf::from(dir);
        }
        if let Some(addr) = env_value("MOTIONKEEP_API_ADDR") {
            self.api_addr = addr;
        }
        if let Some(capacity) = env_value("MOTIONKEEP_BUFFER_CAPACITY") {
            self.retention.buffer_capacity = capacity
                .parse()
                .map_err(|_| anyhow!("MOTIONKEEP_BUFFER_CAPACITY must be a positive integer"))?;
        }
        if let Some(seconds) = env_value("MOTIONKEEP_RETENTION_SECS") {
            let seconds: u64 = seconds.parse().map_err(|_| {
                anyhow!("MOTIONKEEP_RETENTION_SECS must be an integer number of seconds")
            })?;
            self.retention.retention = Duration::from_secs(seconds);
        }
        if let Some(keep_all) = env_value("MOTIONKEEP_KEEP_ALL_FRAMES") {
            self.retention.keep_all_frames = parse_bool(&keep_all)
                .ok_or_else(|| anyhow!("MOTIONKEEP_KEEP_ALL_FRAMES must be true or false"))?;
        }
        if let Some(seconds) = env_value("MOTIONKEEP_SWEEP_INTERVAL_SECS") {
            let seconds: u64 = seconds.parse().map_err(|_| {
                anyhow!("MOTIONKEEP_SWEEP_INTERVAL_SECS must be an integer number of seconds")
            })?;
            self.retention.sweep_interval = Duration::from_secs(seconds);
        }
        if let Some(threshold) = env_value("MOTIONKEEP_MOTION_THRESHOLD") {
            self.motion.threshold = threshold
                .parse()
                .map_err(|_| anyhow!("MOTIONKEEP_MOTION_THRESHOLD must be a number"))?;
        }
        if let Some(scoring) = env_value("MOTIONKEEP_SCORING") {
            self.motion.scoring = parse_scoring(&scoring)?;
        }
        if let Some(timeout) = env_value("MOTIONKEEP_FETCH_TIMEOUT_MS") {
            let millis: u64 = timeout.parse().map_err(|_| {
                anyhow!("MOTIONKEEP_FETCH_TIMEOUT_MS must be an integer number of milliseconds")
            })?;
            self.fetch_timeout = Duration::from_millis(millis);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.retention.buffer_capacity == 0 {
            return Err(anyhow!("buffer_capacity must be at least 1"));
        }
        if self.retention.retention.is_zero() {
            return Err(anyhow!("retention must be greater than zero"));
        }
        if self.retention.sweep_interval.is_zero() {
            return Err(anyhow!("sweep interval must be greater than zero"));
        }
        if self.retention.sweep_interval > Duration::from_secs(MAX_SWEEP_INTERVAL_SECS) {
            return Err(anyhow!(
                "sweep interval must be at most {} seconds",
                MAX_SWEEP_INTERVAL_SECS
            ));
        }
        if !self.motion.threshold.is_finite() || self.motion.threshold < 0.0 {
            return Err(anyhow!(
                "motion threshold must be a finite non-negative number"
            ));
        }
        if self.fetch_timeout.is_zero() {
            return Err(anyhow!("fetch timeout must be greater than zero"));
        }
        let mut names = std::collections::HashSet::new();
        for stream in &self.streams {
            if !names.insert(stream.name()) {
                return Err(anyhow!("stream '{}' is configured twice", stream.name()));
            }
        }
        Ok(())
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            buffer_capacity: self.retention.buffer_capacity,
            keep_all_frames: self.retention.keep_all_frames,
        }
    }

    pub fn sweeper_config(&self) -> SweeperConfig {
        SweeperConfig {
            retention: self.retention.retention,
            interval: self.retention.sweep_interval,
            ..SweeperConfig::default()
        }
    }
}

fn read_config_file(path: &Path) -> Result<MotionKeepConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_scoring(value: &str) -> Result<ScoringMode> {
    ScoringMode::parse(value)
        .ok_or_else(|| anyhow!("scoring must be 'per_source' or 'shared', got '{}'", value))
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
