use anyhow::{anyhow, Result};
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::{RetentionBuffer, RetentionReport};
use crate::signal::StopSignal;
use crate::stats::PipelineStats;

pub const DEFAULT_RETENTION_SECS: u64 = 60 * 60 * 24;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60 * 60;
/// Longest configurable pause between sweep cycles (one day).
pub const MAX_SWEEP_INTERVAL_SECS: u64 = 60 * 60 * 24;
const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SweeperConfig {
    /// Frames older than this are deleted, preserved or not.
    pub retention: Duration,
    /// Pause between sweep cycles.
    pub interval: Duration,
    /// How long `stop` waits for the worker to acknowledge.
    pub stop_timeout: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(DEFAULT_RETENTION_SECS),
            interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SweeperState {
    Stopped,
    Running,
    /// Stop was requested but the worker has not acknowledged yet.
    Stopping,
}

struct SweeperWorker {
    stop: Arc<StopSignal>,
    done: mpsc::Receiver<()>,
    join: JoinHandle<()>,
}

/// Background age-based cleanup.
///
/// Owned by whoever constructs it; several independent sweepers can exist in
/// one process. Dropping a running sweeper stops it.
pub struct RetentionSweeper {
    config: SweeperConfig,
    retention: Arc<RetentionBuffer>,
    stats: Arc<PipelineStats>,
    worker: Option<SweeperWorker>,
}

impl RetentionSweeper {
    pub fn new(
        config: SweeperConfig,
        retention: Arc<RetentionBuffer>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            config,
            retention,
            stats,
            worker: None,
        }
    }

    pub fn state(&self) -> SweeperState {
        match &self.worker {
            None => SweeperState::Stopped,
            Some(worker) if worker.stop.is_triggered() => SweeperState::Stopping,
            Some(_) => SweeperState::Running,
        }
    }

    /// Run one sweep on the calling thread.
    pub fn run_once(&self) -> Result<RetentionReport> {
        sweep_cycle(&self.retention, &self.stats, self.config.retention)
    }

    /// Start the background loop. A no-op while already running; fails while
    /// a previous worker is still finishing its last cycle.
    pub fn start(&mut self) -> Result<()> {
        if let Some(worker) = &self.worker {
            if !worker.stop.is_triggered() {
                return Ok(());
            }
            match worker.done.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => self.join_worker()?,
                Err(TryRecvError::Empty) => {
                    return Err(anyhow!("retention sweeper is still stopping"));
                }
            }
        }
        let stop = Arc::new(StopSignal::new());
        let (done_tx, done_rx) = mpsc::channel();
        let retention = self.retention.clone();
        let stats = self.stats.clone();
        let config = self.config;
        let stop_thread = stop.clone();
        let join = std::thread::Builder::new()
            .name("retention-sweeper".to_string())
            .spawn(move || {
                run_sweeper(&retention, &stats, config, &stop_thread);
                let _ = done_tx.send(());
            })?;
        log::info!(
            "retention sweeper started: retention={}s interval={}s",
            config.retention.as_secs(),
            config.interval.as_secs()
        );
        self.worker = Some(SweeperWorker {
            stop,
            done: done_rx,
            join,
        });
        Ok(())
    }

    /// Signal the loop and wait (bounded by `stop_timeout`) for it to exit.
    ///
    /// On timeout the worker stays owned and the sweeper reports
    /// [`SweeperState::Stopping`]; calling `stop` again resumes the wait.
    pub fn stop(&mut self) -> Result<()> {
        let Some(worker) = &self.worker else {
            return Ok(());
        };
        worker.stop.trigger();
        match worker.done.recv_timeout(self.config.stop_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => self.join_worker(),
            Err(RecvTimeoutError::Timeout) => Err(anyhow!(
                "retention sweeper did not stop within {:?}",
                self.config.stop_timeout
            )),
        }
    }

    fn join_worker(&mut self) -> Result<()> {
        if let Some(worker) = self.worker.take() {
            worker
                .join
                .join()
                .map_err(|_| anyhow!("retention sweeper thread panicked"))?;
            log::info!("retention sweeper stopped");
        }
        Ok(())
    }
}

impl Drop for RetentionSweeper {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            log::warn!("{:#}", err);
        }
    }
}

fn run_sweeper(
    retention: &RetentionBuffer,
    stats: &PipelineStats,
    config: SweeperConfig,
    stop: &StopSignal,
) {
    loop {
        if let Err(err) = sweep_cycle(retention, stats, config.retention) {
            log::warn!("retention sweep failed: {:#}", err);
        }
        if stop.wait_timeout(config.interval) {
            break;
        }
    }
}

fn sweep_cycle(
    retention: &RetentionBuffer,
    stats: &PipelineStats,
    max_age: Duration,
) -> Result<RetentionReport> {
    match retention.sweep_by_age(max_age) {
        Ok(report) => {
            stats.sweep_completed();
            if !report.is_empty() {
                log::info!(
                    "retention sweep: deleted={} failed={}",
                    report.deleted.len(),
                    report.failed.len()
                );
            }
            Ok(report)
        }
        Err(err) => {
            stats.sweep_failed();
            Err(err)
        }
    }
}
