//! Frame retention policy.
//!
//! Two independent expiry mechanisms decide when stored frames go away:
//!
//! - **Collapse on quiet**: every non-motion outcome deletes each stored frame
//!   that is neither in the sliding window of the most recent frames nor in
//!   the preserved set. A motion outcome moves the whole window into the
//!   preserved set, so frames captured just before the motion survive.
//! - **Age sweep**: frames older than the retention duration are deleted
//!   regardless of preservation. This is the only way a preserved frame is
//!   ever reclaimed.
//!
//! The window and preserved set are in-memory indexes over the store and
//! start empty after a restart.

mod sweeper;

pub use sweeper::{
    RetentionSweeper, SweeperConfig, SweeperState, DEFAULT_RETENTION_SECS,
    DEFAULT_SWEEP_INTERVAL_SECS, MAX_SWEEP_INTERVAL_SECS,
};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use crate::stats::PipelineStats;
use crate::storage::{Frame, FrameId, FrameStore};
use crate::now_ms;

pub const DEFAULT_BUFFER_CAPACITY: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Number of most recent frames kept in the sliding window.
    pub buffer_capacity: usize,
    /// Disables window-based deletion entirely.
    pub keep_all_frames: bool,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            keep_all_frames: false,
        }
    }
}

/// Result of a deletion pass. Per-frame failures never abort the pass.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionReport {
    pub deleted: Vec<FrameId>,
    pub failed: Vec<DeletionFailure>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionFailure {
    pub frame_id: FrameId,
    pub error: String,
}

impl RetentionReport {
    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty() && self.failed.is_empty()
    }
}

#[derive(Clone, Copy, Debug)]
struct WindowEntry {
    id: FrameId,
    registered_at_ms: i64,
}

#[derive(Debug, Default)]
struct RetentionState {
    window: VecDeque<WindowEntry>,
    preserved: HashSet<FrameId>,
    /// Saved through [`RetentionBuffer::track_save`] but not registered yet.
    pending: HashSet<FrameId>,
}

/// Sliding window plus preserved set, shared by every producer.
///
/// All bookkeeping happens under one lock; store and file I/O always happen
/// after the lock is released. `save_gate` orders saves and preservations
/// against collapses: they share it, a collapse holds it exclusively from its
/// listing to its last delete.
pub struct RetentionBuffer {
    policy: RetentionPolicy,
    store: Arc<dyn FrameStore>,
    stats: Arc<PipelineStats>,
    state: Mutex<RetentionState>,
    save_gate: RwLock<()>,
}

impl RetentionBuffer {
    pub fn new(
        policy: RetentionPolicy,
        store: Arc<dyn FrameStore>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        let policy = RetentionPolicy {
            buffer_capacity: policy.buffer_capacity.max(1),
            ..policy
        };
        Self {
            policy,
            store,
            stats,
            state: Mutex::new(RetentionState::default()),
            save_gate: RwLock::new(()),
        }
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    fn state(&self) -> Result<MutexGuard<'_, RetentionState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("retention state lock poisoned"))
    }

    /// Run `save` and mark the resulting frame pending until it is
    /// registered. A pending frame is never deleted by a collapse, whatever
    /// order concurrent ingests register in.
    pub fn track_save(&self, save: impl FnOnce() -> Result<Frame>) -> Result<Frame> {
        let _saving = self
            .save_gate
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let frame = save()?;
        self.state()?.pending.insert(frame.id);
        Ok(frame)
    }

    /// Append a freshly stored frame to the window. Falling out of the window
    /// never deletes anything by itself.
    pub fn register(&self, id: FrameId, registered_at_ms: i64) -> Result<()> {
        let mut state = self.state()?;
        state.pending.remove(&id);
        if state.window.len() >= self.policy.buffer_capacity {
            if let Some(evicted) = state.window.pop_front() {
                log::debug!(
                    "frame {} left the retention window (registered at {})",
                    evicted.id,
                    evicted.registered_at_ms
                );
            }
        }
        state.window.push_back(WindowEntry {
            id,
            registered_at_ms,
        });
        Ok(())
    }

    /// Apply a motion decision for `id`.
    ///
    /// Motion preserves the current window, including `id` while it is still
    /// a member. Quiet deletes every stored frame outside the window and the
    /// preserved set, unless `keep_all_frames` is set. Pending frames are left
    /// alone.
    pub fn on_motion_outcome(&self, id: FrameId, is_motion: bool) -> Result<RetentionReport> {
        if is_motion {
            let _deciding = self
                .save_gate
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            let mut state = self.state()?;
            let window: Vec<FrameId> = state.window.iter().map(|entry| entry.id).collect();
            if !window.contains(&id) {
                log::debug!("frame {} left the window before its motion decision", id);
            }
            state.preserved.extend(window);
            return Ok(RetentionReport::default());
        }
        if self.policy.keep_all_frames {
            return Ok(RetentionReport::default());
        }

        // Exclusive for the whole collapse: no save or preservation can land
        // between the listing and the deletes.
        let _collapsing = self
            .save_gate
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let stored = self.store.list_all()?;
        let doomed: Vec<FrameId> = {
            let state = self.state()?;
            let window: HashSet<FrameId> = state.window.iter().map(|entry| entry.id).collect();
            stored
                .into_iter()
                .map(|frame| frame.id)
                .filter(|frame_id| {
                    !window.contains(frame_id)
                        && !state.preserved.contains(frame_id)
                        && !state.pending.contains(frame_id)
                })
                .collect()
        };
        Ok(self.delete_frames(&doomed))
    }

    /// Delete every frame created more than `retention` ago, preserved or not.
    pub fn sweep_by_age(&self, retention: Duration) -> Result<RetentionReport> {
        let retention_ms = i64::try_from(retention.as_millis()).unwrap_or(i64::MAX);
        self.sweep_older_than(now_ms().saturating_sub(retention_ms))
    }

    /// Delete every frame with `created_at_ms < cutoff_ms`.
    pub fn sweep_older_than(&self, cutoff_ms: i64) -> Result<RetentionReport> {
        let expired: Vec<FrameId> = self
            .store
            .list_older_than(cutoff_ms)?
            .into_iter()
            .map(|frame| frame.id)
            .collect();
        let report = self.delete_frames(&expired);
        if !report.deleted.is_empty() {
            let mut state = self.state()?;
            for id in &report.deleted {
                state.preserved.remove(id);
                state.pending.remove(id);
            }
        }
        Ok(report)
    }

    /// Ids currently in the window, oldest first.
    pub fn window(&self) -> Result<Vec<FrameId>> {
        Ok(self.state()?.window.iter().map(|entry| entry.id).collect())
    }

    /// Preserved ids, ascending.
    pub fn preserved(&self) -> Result<Vec<FrameId>> {
        let mut ids: Vec<FrameId> = self.state()?.preserved.iter().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    fn delete_frames(&self, ids: &[FrameId]) -> RetentionReport {
        let mut report = RetentionReport::default();
        for &id in ids {
            match self.store.delete(id) {
                Ok(()) => {
                    log::debug!("frame {} deleted", id);
                    report.deleted.push(id);
                }
                Err(err) => {
                    log::warn!("frame {}: deletion failed: {:#}", id, err);
                    report.failed.push(DeletionFailure {
                        frame_id: id,
                        error: format!("{:#}", err),
                    });
                }
            }
        }
        self.stats
            .frames_deleted(report.deleted.len(), report.failed.len());
        report
    }
}
