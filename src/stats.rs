use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide counters for the best-effort paths of the pipeline.
///
/// Failures that are never surfaced to a caller are counted here (and logged)
/// so they stay inspectable.
#[derive(Debug, Default)]
pub struct PipelineStats {
    frames_ingested: AtomicU64,
    decode_failures: AtomicU64,
    outcomes_recorded: AtomicU64,
    outcome_failures: AtomicU64,
    motion_events: AtomicU64,
    retention_failures: AtomicU64,
    frames_deleted: AtomicU64,
    deletion_failures: AtomicU64,
    fetch_failures: AtomicU64,
    sweep_cycles: AtomicU64,
    sweep_failures: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub frames_ingested: u64,
    pub decode_failures: u64,
    pub outcomes_recorded: u64,
    pub outcome_failures: u64,
    pub motion_events: u64,
    pub retention_failures: u64,
    pub frames_deleted: u64,
    pub deletion_failures: u64,
    pub fetch_failures: u64,
    pub sweep_cycles: u64,
    pub sweep_failures: u64,
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn frame_ingested(&self) {
        bump(&self.frames_ingested, 1);
    }

    pub(crate) fn decode_failed(&self) {
        bump(&self.decode_failures, 1);
    }

    pub(crate) fn outcome_recorded(&self, is_motion: bool) {
        bump(&self.outcomes_recorded, 1);
        if is_motion {
            bump(&self.motion_events, 1);
        }
    }

    pub(crate) fn outcome_failed(&self) {
        bump(&self.outcome_failures, 1);
    }

    pub(crate) fn retention_failed(&self) {
        bump(&self.retention_failures, 1);
    }

    pub(crate) fn frames_deleted(&self, deleted: usize, failed: usize) {
        bump(&self.frames_deleted, deleted as u64);
        bump(&self.deletion_failures, failed as u64);
    }

    pub(crate) fn fetch_failed(&self) {
        bump(&self.fetch_failures, 1);
    }

    pub(crate) fn sweep_completed(&self) {
        bump(&self.sweep_cycles, 1);
    }

    pub(crate) fn sweep_failed(&self) {
        bump(&self.sweep_cycles, 1);
        bump(&self.sweep_failures, 1);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        StatsSnapshot {
            frames_ingested: load(&self.frames_ingested),
            decode_failures: load(&self.decode_failures),
            outcomes_recorded: load(&self.outcomes_recorded),
            outcome_failures: load(&self.outcome_failures),
            motion_events: load(&self.motion_events),
            retention_failures: load(&self.retention_failures),
            frames_deleted: load(&self.frames_deleted),
            deletion_failures: load(&self.deletion_failures),
            fetch_failures: load(&self.fetch_failures),
            sweep_cycles: load(&self.sweep_cycles),
            sweep_failures: load(&self.sweep_failures),
        }
    }
}
