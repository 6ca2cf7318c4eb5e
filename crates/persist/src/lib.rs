//! Conflux persistence: the long-lived status record of each unit of work.
//!
//! The engine only reads prior conditions and returns merged ones; this
//! crate is where they live between cycles. SQLite, synchronous, one JSON
//! column per record.

#![forbid(unsafe_code)]

use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use conflux_core::WorkStatus;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Records kept per work; older ones are rotated out on write.
pub const HISTORY_DEPTH: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub work: String,
    pub recorded_at: DateTime<Utc>,
    pub status: WorkStatus,
}

pub trait StatusStore {
    fn put_status(&self, work: &str, status: &WorkStatus, at: DateTime<Utc>) -> Result<()>;
    /// Latest status, if the work was ever recorded.
    fn get_status(&self, work: &str) -> Result<Option<WorkStatus>>;
    /// Newest first, at most `limit` (default [`HISTORY_DEPTH`]).
    fn history(&self, work: &str, limit: Option<usize>) -> Result<Vec<StatusRecord>>;
    /// Forget every record of the work. Returns the number of rows removed.
    fn delete_status(&self, work: &str) -> Result<usize>;
}

pub struct SqliteStatusStore {
    db: Mutex<rusqlite::Connection>,
}

impl SqliteStatusStore {
    pub fn open_default() -> Result<Self> {
        let path = std::env::var("CONFLUX_DB_PATH").unwrap_or_else(|_| default_db_path());
        Self::open(&path)
    }

    pub fn open(path: &str) -> Result<Self> {
        let started = std::time::Instant::now();
        let db = rusqlite::Connection::open(path).with_context(|| format!("opening sqlite db at {}", path))?;
        db.pragma_update(None, "journal_mode", "WAL").ok();
        db.pragma_update(None, "synchronous", "NORMAL").ok();
        db.execute(
            "CREATE TABLE IF NOT EXISTS work_status (
                work   TEXT NOT NULL,
                ts     INTEGER NOT NULL,
                status TEXT NOT NULL
            )",
            [],
        )
        .context("creating work_status table")?;
        db.execute("CREATE INDEX IF NOT EXISTS idx_work_status_work_ts ON work_status(work, ts DESC)", []).ok();
        histogram!("persist_open_ms", started.elapsed().as_secs_f64() * 1000.0);
        debug!(path, "status store opened");
        Ok(Self { db: Mutex::new(db) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, rusqlite::Connection>> {
        self.db.lock().map_err(|_| anyhow!("status store lock poisoned"))
    }
}

impl StatusStore for SqliteStatusStore {
    fn put_status(&self, work: &str, status: &WorkStatus, at: DateTime<Utc>) -> Result<()> {
        let started = std::time::Instant::now();
        let body = serde_json::to_string(status).context("encoding work status")?;
        let mut db = self.conn()?;
        let tx = db.transaction()?;
        tx.execute("INSERT INTO work_status(work, ts, status) VALUES (?1, ?2, ?3)", (work, at.timestamp_micros(), &body))?;
        tx.execute(
            "DELETE FROM work_status
             WHERE work = ?1
               AND rowid NOT IN (
                   SELECT rowid FROM work_status WHERE work = ?1 ORDER BY ts DESC, rowid DESC LIMIT ?2
               )",
            (work, HISTORY_DEPTH as i64),
        )?;
        tx.commit()?;
        histogram!("persist_put_ms", started.elapsed().as_secs_f64() * 1000.0);
        counter!("persist_put_total", 1u64);
        Ok(())
    }

    fn get_status(&self, work: &str) -> Result<Option<WorkStatus>> {
        Ok(self.history(work, Some(1))?.into_iter().next().map(|r| r.status))
    }

    fn history(&self, work: &str, limit: Option<usize>) -> Result<Vec<StatusRecord>> {
        let started = std::time::Instant::now();
        let cap = limit.unwrap_or(HISTORY_DEPTH);
        let db = self.conn()?;
        let mut stmt =
            db.prepare("SELECT ts, status FROM work_status WHERE work = ?1 ORDER BY ts DESC, rowid DESC LIMIT ?2")?;
        let mut rows = stmt.query((work, cap as i64))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let ts: i64 = row.get(0)?;
            let body: String = row.get(1)?;
            let status: WorkStatus =
                serde_json::from_str(&body).with_context(|| format!("decoding stored status for work {}", work))?;
            let recorded_at = Utc
                .timestamp_micros(ts)
                .single()
                .ok_or_else(|| anyhow!("stored timestamp out of range: {}", ts))?;
            out.push(StatusRecord { work: work.to_string(), recorded_at, status });
        }
        histogram!("persist_get_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(out)
    }

    fn delete_status(&self, work: &str) -> Result<usize> {
        let db = self.conn()?;
        let removed = db.execute("DELETE FROM work_status WHERE work = ?1", [work]).context("deleting work status")?;
        counter!("persist_delete_total", 1u64);
        Ok(removed)
    }
}

fn default_db_path() -> String {
    if let Some(home) = std::env::var_os("HOME") {
        let mut p = std::path::PathBuf::from(home);
        p.push(".conflux");
        let _ = std::fs::create_dir_all(&p);
        p.push("conflux.db");
        return p.to_string_lossy().to_string();
    }
    "conflux.db".to_string()
}
