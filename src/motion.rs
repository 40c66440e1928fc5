//! Frame-difference motion scoring.
//!
//! Each scoring context holds exactly one "previous frame". A frame is always
//! compared with the frame scored immediately before it in the same context,
//! never with a fixed baseline. Frames are reduced to 8-bit luminance, and the
//! previous frame is resized to the incoming frame's dimensions when they
//! differ.

use image::imageops::{self, FilterType};
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::DecodeError;

pub const DEFAULT_MOTION_THRESHOLD: f64 = 200_000.0;

const SHARED_CONTEXT: &str = "*";

/// How frames from different sources share previous-frame state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMode {
    /// One context per stream name, plus one for uploads.
    #[default]
    PerSource,
    /// A single context for every source in the process.
    Shared,
}

impl ScoringMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "per_source" | "per-source" => Some(Self::PerSource),
            "shared" => Some(Self::Shared),
            _ => None,
        }
    }
}

/// Where a frame came from.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FrameSource {
    Upload,
    Stream(String),
}

impl FrameSource {
    pub fn stream(name: impl Into<String>) -> Self {
        Self::Stream(name.into())
    }
}

impl fmt::Display for FrameSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameSource::Upload => write!(f, "upload"),
            FrameSource::Stream(name) => write!(f, "stream:{}", name),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub score: f64,
    pub is_motion: bool,
}

#[derive(Default)]
struct ScoringContext {
    previous: Option<GrayImage>,
}

impl ScoringContext {
    fn score(&mut self, current: GrayImage) -> f64 {
        let score = match self.previous.take() {
            None => 0.0,
            Some(previous) => {
                let previous = if previous.dimensions() != current.dimensions() {
                    imageops::resize(
                        &previous,
                        current.width(),
                        current.height(),
                        FilterType::CatmullRom,
                    )
                } else {
                    previous
                };
                difference_sum(&current, &previous)
            }
        };
        self.previous = Some(current);
        score
    }
}

/// Sum of per-pixel absolute differences. An all-zero difference image (an
/// empty bounding box) sums to exactly 0.0.
fn difference_sum(current: &GrayImage, previous: &GrayImage) -> f64 {
    current
        .pixels()
        .zip(previous.pixels())
        .map(|(a, b)| u64::from(a.0[0].abs_diff(b.0[0])))
        .sum::<u64>() as f64
}

/// Thread-safe motion scorer with keyed scoring contexts.
///
/// Calls for the same context are serialized on that context's lock; calls for
/// different contexts proceed in parallel.
pub struct MotionScorer {
    threshold: f64,
    mode: ScoringMode,
    contexts: Mutex<HashMap<String, Arc<Mutex<ScoringContext>>>>,
}

impl MotionScorer {
    pub fn new(threshold: f64, mode: ScoringMode) -> Self {
        Self {
            threshold,
            mode,
            contexts: Mutex::new(HashMap::new()),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn mode(&self) -> ScoringMode {
        self.mode
    }

    pub fn is_motion(&self, score: f64) -> bool {
        score > self.threshold
    }

    /// Score `bytes` against the previous frame of `source`'s context.
    ///
    /// On a decode failure the context is left untouched.
    pub fn score(&self, source: &FrameSource, bytes: &[u8]) -> Result<ScoreResult, DecodeError> {
        let current = image::load_from_memory(bytes)?.into_luma8();
        let context = self.context(source);
        let score = context
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .score(current);
        Ok(ScoreResult {
            score,
            is_motion: self.is_motion(score),
        })
    }

    /// Drop the previous-frame state held for `source`. A no-op in shared mode.
    pub fn forget(&self, source: &FrameSource) {
        if self.mode == ScoringMode::Shared {
            return;
        }
        self.contexts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.context_key(source));
    }

    fn context_key(&self, source: &FrameSource) -> String {
        match self.mode {
            ScoringMode::Shared => SHARED_CONTEXT.to_string(),
            ScoringMode::PerSource => source.to_string(),
        }
    }

    fn context(&self, source: &FrameSource) -> Arc<Mutex<ScoringContext>> {
        let key = self.context_key(source);
        self.contexts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_default()
            .clone()
    }
}

impl Default for MotionScorer {
    fn default() -> Self {
        Self::new(DEFAULT_MOTION_THRESHOLD, ScoringMode::default())
    }
}
