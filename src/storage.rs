use anyhow::{anyhow, Context, Result};
use rand::RngCore;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Params, Row};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use crate::now_ms;

pub type FrameId = i64;

/// A stored frame. The record is the authority on whether a frame exists.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub id: FrameId,
    pub file_path: PathBuf,
    /// Unix epoch milliseconds.
    pub created_at_ms: i64,
}

/// Motion decision recorded for one scored frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MotionOutcome {
    pub id: i64,
    pub frame_id: FrameId,
    pub score: f64,
    pub is_motion: bool,
    pub evaluated_at_ms: i64,
}

pub trait FrameStore: Send + Sync {
    /// Write the bytes to disk and register the frame record.
    fn save(&self, bytes: &[u8], created_at_ms: i64) -> Result<Frame>;

    fn get(&self, id: FrameId) -> Result<Option<Frame>>;

    /// Every stored frame, oldest id first.
    fn list_all(&self) -> Result<Vec<Frame>>;

    /// Frames with `created_at_ms < cutoff_ms`, oldest id first.
    fn list_older_than(&self, cutoff_ms: i64) -> Result<Vec<Frame>>;

    /// Remove the backing file (tolerating its absence), then the record.
    /// Deleting an unknown id is not an error.
    fn delete(&self, id: FrameId) -> Result<()>;

    /// Newest frames first.
    fn recent_frames(&self, limit: usize) -> Result<Vec<Frame>>;
}

pub trait MotionOutcomeStore: Send + Sync {
    fn save_outcome(&self, frame_id: FrameId, score: f64, is_motion: bool)
        -> Result<MotionOutcome>;

    /// Newest outcomes first.
    fn recent_outcomes(&self, limit: usize) -> Result<Vec<MotionOutcome>>;
}

// -------------------- Frame files --------------------

/// Directory holding the raw frame files.
#[derive(Clone, Debug)]
pub struct FrameFiles {
    dir: PathBuf,
}

impl FrameFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn write(&self, bytes: &[u8], created_at_ms: i64) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("create frames dir {}", self.dir.display()))?;
        let mut suffix = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut suffix);
        let name = format!(
            "{}_{}.{}",
            created_at_ms,
            hex::encode(suffix),
            frame_extension(bytes)
        );
        let path = self.dir.join(name);
        std::fs::write(&path, bytes)
            .with_context(|| format!("write frame file {}", path.display()))?;
        Ok(path)
    }

    fn remove(&self, frame: &Frame) {
        match std::fs::remove_file(&frame.file_path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => log::warn!(
                "frame {}: failed to remove file {}: {}",
                frame.id,
                frame.file_path.display(),
                err
            ),
        }
    }
}

fn frame_extension(bytes: &[u8]) -> &'static str {
    match image::guess_format(bytes) {
        Ok(image::ImageFormat::Png) => "png",
        Ok(image::ImageFormat::Jpeg) => "jpg",
        Ok(other) => other.extensions_str().first().copied().unwrap_or("jpg"),
        Err(_) => "jpg",
    }
}

// -------------------- SQLite --------------------

pub struct SqliteFrameStore {
    conn: Mutex<Connection>,
    files: FrameFiles,
}

impl SqliteFrameStore {
    pub fn open(db_path: &str, frames_dir: impl Into<PathBuf>) -> Result<Self> {
        let conn = open_db_connection(db_path)
            .with_context(|| format!("open frame database {}", db_path))?;
        Self::with_connection(conn, frames_dir)
    }

    pub fn open_in_memory(frames_dir: impl Into<PathBuf>) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, frames_dir)
    }

    fn with_connection(conn: Connection, frames_dir: impl Into<PathBuf>) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
            files: FrameFiles::new(frames_dir),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<()> {
        self.conn()?.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS frames (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              file_path TEXT NOT NULL,
              created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS motion_events (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              frame_id INTEGER NOT NULL,
              score REAL NOT NULL,
              is_motion INTEGER NOT NULL,
              evaluated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_frames_created ON frames(created_at);
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("sqlite connection lock poisoned"))
    }

    fn query_frames<P: Params>(&self, sql: &str, params: P) -> Result<Vec<Frame>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, frame_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

fn open_db_connection(db_path: &str) -> Result<Connection> {
    if db_path.starts_with("file:") {
        return Ok(Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?);
    }
    Ok(Connection::open(db_path)?)
}

fn frame_from_row(row: &Row<'_>) -> rusqlite::Result<Frame> {
    let path: String = row.get(1)?;
    Ok(Frame {
        id: row.get(0)?,
        file_path: PathBuf::from(path),
        created_at_ms: row.get(2)?,
    })
}

fn outcome_from_row(row: &Row<'_>) -> rusqlite::Result<MotionOutcome> {
    Ok(MotionOutcome {
        id: row.get(0)?,
        frame_id: row.get(1)?,
        score: row.get(2)?,
        is_motion: row.get(3)?,
        evaluated_at_ms: row.get(4)?,
    })
}

impl FrameStore for SqliteFrameStore {
    fn save(&self, bytes: &[u8], created_at_ms: i64) -> Result<Frame> {
        let file_path = self.files.write(bytes, created_at_ms)?;
        let inserted = self.conn().and_then(|conn| {
            conn.execute(
                "INSERT INTO frames(file_path, created_at) VALUES (?1, ?2)",
                params![file_path.to_string_lossy(), created_at_ms],
            )?;
            Ok(conn.last_insert_rowid())
        });
        match inserted {
            Ok(id) => Ok(Frame {
                id,
                file_path,
                created_at_ms,
            }),
            Err(err) => {
                let _ = std::fs::remove_file(&file_path);
                Err(err.context("insert frame record"))
            }
        }
    }

    fn get(&self, id: FrameId) -> Result<Option<Frame>> {
        let conn = self.conn()?;
        let frame = conn
            .query_row(
                "SELECT id, file_path, created_at FROM frames WHERE id = ?1",
                params![id],
                frame_from_row,
            )
            .optional()?;
        Ok(frame)
    }

    fn list_all(&self) -> Result<Vec<Frame>> {
        self.query_frames(
            "SELECT id, file_path, created_at FROM frames ORDER BY id ASC",
            [],
        )
    }

    fn list_older_than(&self, cutoff_ms: i64) -> Result<Vec<Frame>> {
        self.query_frames(
            "SELECT id, file_path, created_at FROM frames WHERE created_at < ?1 ORDER BY id ASC",
            params![cutoff_ms],
        )
    }

    fn delete(&self, id: FrameId) -> Result<()> {
        let Some(frame) = self.get(id)? else {
            return Ok(());
        };
        self.files.remove(&frame);
        self.conn()?
            .execute("DELETE FROM frames WHERE id = ?1", params![id])
            .with_context(|| format!("delete frame record {}", id))?;
        Ok(())
    }

    fn recent_frames(&self, limit: usize) -> Result<Vec<Frame>> {
        self.query_frames(
            "SELECT id, file_path, created_at FROM frames ORDER BY id DESC LIMIT ?1",
            params![limit as i64],
        )
    }
}

impl MotionOutcomeStore for SqliteFrameStore {
    fn save_outcome(
        &self,
        frame_id: FrameId,
        score: f64,
        is_motion: bool,
    ) -> Result<MotionOutcome> {
        let evaluated_at_ms = now_ms();
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO motion_events(frame_id, score, is_motion, evaluated_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![frame_id, score, is_motion, evaluated_at_ms],
        )?;
        Ok(MotionOutcome {
            id: conn.last_insert_rowid(),
            frame_id,
            score,
            is_motion,
            evaluated_at_ms,
        })
    }

    fn recent_outcomes(&self, limit: usize) -> Result<Vec<MotionOutcome>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, frame_id, score, is_motion, evaluated_at
            FROM motion_events ORDER BY id DESC LIMIT ?1
            "#,
        )?;
        let rows = stmt.query_map(params![limit as i64], outcome_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

// -------------------- In-memory --------------------

#[derive(Debug, Default)]
struct InMemoryState {
    last_frame_id: FrameId,
    frames: BTreeMap<FrameId, Frame>,
    last_outcome_id: i64,
    outcomes: Vec<MotionOutcome>,
}

/// Frame records held in memory; files still land in `frames_dir`.
pub struct InMemoryFrameStore {
    state: Mutex<InMemoryState>,
    files: FrameFiles,
}

impl InMemoryFrameStore {
    pub fn new(frames_dir: impl Into<PathBuf>) -> Self {
        Self {
            state: Mutex::new(InMemoryState::default()),
            files: FrameFiles::new(frames_dir),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, InMemoryState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

impl FrameStore for InMemoryFrameStore {
    fn save(&self, bytes: &[u8], created_at_ms: i64) -> Result<Frame> {
        let file_path = self.files.write(bytes, created_at_ms)?;
        let mut state = self.state()?;
        state.last_frame_id += 1;
        let frame = Frame {
            id: state.last_frame_id,
            file_path,
            created_at_ms,
        };
        state.frames.insert(frame.id, frame.clone());
        Ok(frame)
    }

    fn get(&self, id: FrameId) -> Result<Option<Frame>> {
        Ok(self.state()?.frames.get(&id).cloned())
    }

    fn list_all(&self) -> Result<Vec<Frame>> {
        Ok(self.state()?.frames.values().cloned().collect())
    }

    fn list_older_than(&self, cutoff_ms: i64) -> Result<Vec<Frame>> {
        Ok(self
            .state()?
            .frames
            .values()
            .filter(|frame| frame.created_at_ms < cutoff_ms)
            .cloned()
            .collect())
    }

    fn delete(&self, id: FrameId) -> Result<()> {
        let Some(frame) = self.get(id)? else {
            return Ok(());
        };
        self.files.remove(&frame);
        self.state()?.frames.remove(&id);
        Ok(())
    }

    fn recent_frames(&self, limit: usize) -> Result<Vec<Frame>> {
        Ok(self
            .state()?
            .frames
            .values()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }
}

impl MotionOutcomeStore for InMemoryFrameStore {
    fn save_outcome(
        &self,
        frame_id: FrameId,
        score: f64,
        is_motion: bool,
    ) -> Result<MotionOutcome> {
        let mut state = self.state()?;
        state.last_outcome_id += 1;
        let outcome = MotionOutcome {
            id: state.last_outcome_id,
            frame_id,
            score,
            is_motion,
            evaluated_at_ms: now_ms(),
        };
        state.outcomes.push(outcome.clone());
        Ok(outcome)
    }

    fn recent_outcomes(&self, limit: usize) -> Result<Vec<MotionOutcome>> {
        Ok(self
            .state()?
            .outcomes
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }
}
