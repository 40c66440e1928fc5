//! Motion-aware frame ingestion and retention.
//!
//! Frames arrive either as uploads or from named HTTP snapshot streams. Every
//! frame is stored, scored against the previous frame of its source, and then
//! retention decides what survives:
//!
//! - a sliding window of the most recent frames is always kept;
//! - a motion frame preserves the whole window, so the lead-up survives;
//! - a quiet frame deletes everything outside the window and the preserved set;
//! - a background sweeper deletes anything older than the retention age.
//!
//! # Module Structure
//!
//! - `storage`: frame files plus the SQLite / in-memory record stores
//! - `motion`: per-source frame differencing
//! - `retention`: window, preserved set and the age sweeper
//! - `pipeline`: the single ingest path shared by uploads and streams
//! - `ingest`: HTTP fetcher, stream pollers and their registry
//! - `service`, `api`, `config`: process wiring for the `motionkeepd` daemon

use std::time::{SystemTime, UNIX_EPOCH};

pub mod api;
pub mod config;
pub mod error;
pub mod ingest;
pub mod motion;
pub mod pipeline;
pub mod retention;
pub mod service;
pub mod signal;
pub mod stats;
pub mod storage;

#[cfg(test)]
mod test_support;

pub use api::{ApiConfig, ApiHandle, ApiServer};
pub use config::MotionKeepConfig;
pub use error::{DecodeError, FetchError, StoreError, StreamError};
pub use ingest::{FrameFetcher, HttpFetcher, StreamConfig, StreamInfo, StreamRegistry};
pub use motion::{FrameSource, MotionScorer, ScoreResult, ScoringMode};
pub use pipeline::{IngestResult, IngestionPipeline, SkippedStep};
pub use retention::{RetentionBuffer, RetentionPolicy, RetentionReport, RetentionSweeper};
pub use service::{FrameService, ServiceSettings};
pub use stats::{PipelineStats, StatsSnapshot};
pub use storage::{
    Frame, FrameId, FrameStore, InMemoryFrameStore, MotionOutcome, MotionOutcomeStore,
    SqliteFrameStore,
};

/// Current wall-clock time in Unix epoch milliseconds.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
