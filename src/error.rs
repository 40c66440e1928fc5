//! Caller-facing error taxonomy.
//!
//! Internal plumbing (store, files, config) reports `anyhow::Error`. The types
//! here are what crosses the pipeline boundary: the only error an ingest can
//! return is a [`StoreError`] from persisting the incoming bytes; everything
//! else downstream degrades to "frame kept, decision skipped".

use thiserror::Error;

/// The frame bytes could not be decoded as an image.
#[derive(Debug, Error)]
#[error("decode frame: {0}")]
pub struct DecodeError(#[from] pub image::ImageError);

/// A single poll of a remote source failed.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected http status {0}")]
    Status(u16),
    #[error("empty response body")]
    EmptyBody,
    #[error("response body exceeds {0} bytes")]
    TooLarge(usize),
    #[error("read response body: {0}")]
    Read(#[from] std::io::Error),
}

/// Stream lifecycle misuse, surfaced to the caller as a rejected request.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("stream '{0}' already exists")]
    DuplicateName(String),
    #[error("stream '{0}' not found")]
    NotFound(String),
    #[error("stream '{0}' is still stopping")]
    Stopping(String),
    #[error("invalid stream url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("invalid stream name '{0}': expected 1-64 of [A-Za-z0-9_.-]")]
    InvalidName(String),
    #[error("invalid stream interval {0}")]
    InvalidInterval(f64),
    #[error("spawn poller thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("stream registry lock poisoned")]
    Poisoned,
}

/// Persisting a frame failed. Fatal only for the initial save of an ingest.
#[derive(Debug, Error)]
#[error("store error: {0:#}")]
pub struct StoreError(pub anyhow::Error);

impl From<anyhow::Error> for StoreError {
    fn from(err: anyhow::Error) -> Self {
        Self(err)
    }
}
