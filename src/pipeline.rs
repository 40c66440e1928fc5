//! Single-frame ingestion shared by uploads and every stream poller.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::StoreError;
use crate::motion::{FrameSource, MotionScorer};
use crate::retention::{RetentionBuffer, RetentionReport};
use crate::stats::PipelineStats;
use crate::storage::{Frame, FrameStore, MotionOutcome, MotionOutcomeStore};
use crate::now_ms;

/// Why a frame was kept without a retention decision.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", content = "error", rename_all = "snake_case")]
pub enum SkippedStep {
    Register(String),
    Decode(String),
    RecordOutcome(String),
    Retention(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IngestResult {
    pub frame: Frame,
    pub motion_event: Option<MotionOutcome>,
    /// Frames deleted as a consequence of this frame's outcome.
    pub retention: RetentionReport,
    pub skipped: Vec<SkippedStep>,
}

pub struct IngestionPipeline {
    frames: Arc<dyn FrameStore>,
    outcomes: Arc<dyn MotionOutcomeStore>,
    scorer: MotionScorer,
    retention: Arc<RetentionBuffer>,
    stats: Arc<PipelineStats>,
}

impl IngestionPipeline {
    pub fn new(
        frames: Arc<dyn FrameStore>,
        outcomes: Arc<dyn MotionOutcomeStore>,
        scorer: MotionScorer,
        retention: Arc<RetentionBuffer>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            frames,
            outcomes,
            scorer,
            retention,
            stats,
        }
    }

    pub fn frames(&self) -> &Arc<dyn FrameStore> {
        &self.frames
    }

    pub fn outcomes(&self) -> &Arc<dyn MotionOutcomeStore> {
        &self.outcomes
    }

    pub fn retention(&self) -> &Arc<RetentionBuffer> {
        &self.retention
    }

    pub fn scorer(&self) -> &MotionScorer {
        &self.scorer
    }

    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }

    /// Persist `bytes` as a new frame, then score it and apply retention.
    ///
    /// Only a failure to persist the bytes is returned. Every later step is
    /// best-effort: failures are logged, counted and listed in
    /// [`IngestResult::skipped`], and the frame stays stored.
    pub fn ingest(
        &self,
        bytes: &[u8],
        source: &FrameSource,
        source_timestamp_ms: Option<i64>,
    ) -> Result<IngestResult, StoreError> {
        let created_at_ms = source_timestamp_ms.unwrap_or_else(now_ms);
        let frame = self
            .retention
            .track_save(|| self.frames.save(bytes, created_at_ms))?;
        self.stats.frame_ingested();

        let mut result = IngestResult {
            frame,
            motion_event: None,
            retention: RetentionReport::default(),
            skipped: Vec::new(),
        };
        let frame_id = result.frame.id;

        if let Err(err) = self.retention.register(frame_id, created_at_ms) {
            log::warn!("frame {} ({}): register failed: {:#}", frame_id, source, err);
            self.stats.retention_failed();
            result.skipped.push(SkippedStep::Register(format!("{:#}", err)));
        }

        let score = match self.scorer.score(source, bytes) {
            Ok(score) => score,
            Err(err) => {
                log::warn!("frame {} ({}): {}", frame_id, source, err);
                self.stats.decode_failed();
                result.skipped.push(SkippedStep::Decode(err.to_string()));
                return Ok(result);
            }
        };

        let outcome = match self
            .outcomes
            .save_outcome(frame_id, score.score, score.is_motion)
        {
            Ok(outcome) => outcome,
            Err(err) => {
                log::warn!(
                    "frame {} ({}): recording motion outcome failed: {:#}",
                    frame_id,
                    source,
                    err
                );
                self.stats.outcome_failed();
                result
                    .skipped
                    .push(SkippedStep::RecordOutcome(format!("{:#}", err)));
                return Ok(result);
            }
        };
        self.stats.outcome_recorded(outcome.is_motion);
        if outcome.is_motion {
            log::info!(
                "motion on frame {} ({}): score={:.0}",
                frame_id,
                source,
                outcome.score
            );
        }

        match self.retention.on_motion_outcome(frame_id, outcome.is_motion) {
            Ok(report) => result.retention = report,
            Err(err) => {
                log::warn!(
                    "frame {} ({}): retention decision failed: {:#}",
                    frame_id,
                    source,
                    err
                );
                self.stats.retention_failed();
                result
                    .skipped
                    .push(SkippedStep::Retention(format!("{:#}", err)));
            }
        }
        result.motion_event = Some(outcome);
        Ok(result)
    }
}
