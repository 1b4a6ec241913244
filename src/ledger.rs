// src/ledger.rs
//! Persistent record of which feed items were delivered, and how it went.
//!
//! One SQLite connection, opened on first use and held until `close()` or
//! drop. Every method takes `&mut self`: the ledger is a single-writer
//! resource owned by whoever drives the pipeline.
//!
//! Reads fail open (a storage error reads as "not delivered"); writes
//! surface their errors so nothing is marked that did not actually land.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use thiserror::Error;

use crate::ingest::types::FeedItem;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("cannot create ledger directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("ledger is closed")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryRecord {
    pub identity: String,
    pub title: String,
    pub link: String,
    pub delivered_at: DateTime<Utc>,
    pub channel_name: String,
    pub success: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LedgerStats {
    pub total: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub delivered_today: u64,
    pub delivered_this_week: u64,
    pub last_delivered_at: Option<DateTime<Utc>>,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS delivered_items (
    identity     TEXT PRIMARY KEY,
    title        TEXT NOT NULL DEFAULT '',
    link         TEXT NOT NULL DEFAULT '',
    delivered_at INTEGER NOT NULL,
    channel_name TEXT NOT NULL DEFAULT '',
    success      INTEGER NOT NULL DEFAULT 1
);
CREATE INDEX IF NOT EXISTS idx_delivered_items_delivered_at
    ON delivered_items(delivered_at);
";

const UPSERT: &str = "
INSERT INTO delivered_items (identity, title, link, delivered_at, channel_name, success)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)
ON CONFLICT(identity) DO UPDATE SET
    title = excluded.title,
    link = excluded.link,
    delivered_at = excluded.delivered_at,
    channel_name = excluded.channel_name,
    success = excluded.success
";

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ledger_marked_total", "Delivery records written.");
        describe_counter!("ledger_errors_total", "Ledger storage errors (reads and writes).");
    });
}

pub struct DeliveryLedger {
    path: PathBuf,
    conn: Option<Connection>,
    closed: bool,
}

impl DeliveryLedger {
    /// Nothing is opened yet; the first operation opens (and creates) the file.
    pub fn new(path: impl AsRef<Path>) -> Self {
        ensure_metrics_described();
        Self {
            path: path.as_ref().to_path_buf(),
            conn: None,
            closed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&mut self) -> Result<&mut Connection, LedgerError> {
        if self.closed {
            return Err(LedgerError::Closed);
        }
        if self.conn.is_none() {
            let conn = open_store(&self.path)?;
            tracing::info!(target: "ledger", path = %self.path.display(), "ledger opened");
            self.conn = Some(conn);
        }
        self.conn.as_mut().ok_or(LedgerError::Closed)
    }

    /// Delivered successfully at least once. Storage errors read as `false`.
    pub fn is_delivered(&mut self, identity: &str) -> bool {
        let res = self.conn().and_then(|c| {
            c.query_row(
                "SELECT 1 FROM delivered_items WHERE identity = ?1 AND success = 1",
                params![identity],
                |_| Ok(()),
            )
            .optional()
            .map_err(LedgerError::from)
        });
        match res {
            Ok(found) => found.is_some(),
            Err(e) => {
                tracing::warn!(target: "ledger", error = %e, identity, "ledger read failed; treating as undelivered");
                counter!("ledger_errors_total").increment(1);
                false
            }
        }
    }

    /// Items not yet delivered successfully, in input order.
    pub fn filter_undelivered(&mut self, items: Vec<FeedItem>) -> Vec<FeedItem> {
        let before = items.len();
        let out: Vec<FeedItem> = items
            .into_iter()
            .filter(|it| !self.is_delivered(&it.identity))
            .collect();
        tracing::info!(
            target: "ledger",
            before,
            undelivered = out.len(),
            "filtered against ledger"
        );
        out
    }

    pub fn mark_delivered(
        &mut self,
        items: &[FeedItem],
        channel_name: &str,
        success: bool,
    ) -> Result<usize, LedgerError> {
        self.mark_delivered_at(items, channel_name, success, Utc::now())
    }

    /// Upsert one record per item in a single transaction; all or nothing.
    pub fn mark_delivered_at(
        &mut self,
        items: &[FeedItem],
        channel_name: &str,
        success: bool,
        now: DateTime<Utc>,
    ) -> Result<usize, LedgerError> {
        if items.is_empty() {
            return Ok(0);
        }
        let res = self.write_records(items, channel_name, success, now);
        match &res {
            Ok(n) => {
                counter!("ledger_marked_total").increment(*n as u64);
                tracing::info!(target: "ledger", rows = n, channel = channel_name, success, "delivery recorded");
            }
            Err(e) => {
                counter!("ledger_errors_total").increment(1);
                tracing::error!(target: "ledger", error = %e, items = items.len(), channel = channel_name, "ledger write failed");
            }
        }
        res
    }

    fn write_records(
        &mut self,
        items: &[FeedItem],
        channel_name: &str,
        success: bool,
        now: DateTime<Utc>,
    ) -> Result<usize, LedgerError> {
        let tx = self.conn()?.transaction()?;
        let mut written = 0usize;
        {
            let mut stmt = tx.prepare_cached(UPSERT)?;
            for it in items {
                written += stmt.execute(params![
                    it.identity,
                    it.title,
                    it.link,
                    now.timestamp(),
                    channel_name,
                    success,
                ])?;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    pub fn statistics(&mut self) -> LedgerStats {
        self.statistics_at(Utc::now())
    }

    /// Aggregate counts. "today" starts at UTC midnight; "this week" is the last 7 days.
    /// Storage errors yield zeros.
    pub fn statistics_at(&mut self, now: DateTime<Utc>) -> LedgerStats {
        let midnight = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|d| d.and_utc().timestamp())
            .unwrap_or_else(|| now.timestamp());
        let week_ago = (now - Duration::days(7)).timestamp();

        let res = self.conn().and_then(|c| {
            c.query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(success = 1), 0),
                        COALESCE(SUM(success = 0), 0),
                        COALESCE(SUM(delivered_at >= ?1), 0),
                        COALESCE(SUM(delivered_at >= ?2), 0),
                        MAX(delivered_at)
                 FROM delivered_items",
                params![midnight, week_ago],
                |row| {
                    let last: Option<i64> = row.get(5)?;
                    Ok(LedgerStats {
                        total: row.get::<_, i64>(0)? as u64,
                        success_count: row.get::<_, i64>(1)? as u64,
                        failure_count: row.get::<_, i64>(2)? as u64,
                        delivered_today: row.get::<_, i64>(3)? as u64,
                        delivered_this_week: row.get::<_, i64>(4)? as u64,
                        last_delivered_at: last.and_then(|s| DateTime::from_timestamp(s, 0)),
                    })
                },
            )
            .map_err(LedgerError::from)
        });

        res.unwrap_or_else(|e| {
            tracing::warn!(target: "ledger", error = %e, "statistics unavailable");
            counter!("ledger_errors_total").increment(1);
            LedgerStats::default()
        })
    }

    pub fn cleanup(&mut self, retention_days: u32) -> Result<usize, LedgerError> {
        self.cleanup_at(retention_days, Utc::now())
    }

    /// Delete records older than the horizon, whatever their outcome.
    pub fn cleanup_at(&mut self, retention_days: u32, now: DateTime<Utc>) -> Result<usize, LedgerError> {
        let horizon = (now - Duration::days(i64::from(retention_days))).timestamp();
        let deleted = self
            .conn()?
            .execute("DELETE FROM delivered_items WHERE delivered_at < ?1", params![horizon])?;
        tracing::info!(target: "ledger", deleted, retention_days, "ledger cleanup");
        Ok(deleted)
    }

    /// Most recent records first. Storage errors yield an empty list.
    pub fn recent(&mut self, limit: usize) -> Vec<DeliveryRecord> {
        let res = self.conn().and_then(|c| {
            let mut stmt = c.prepare(
                "SELECT identity, title, link, delivered_at, channel_name, success
                 FROM delivered_items
                 ORDER BY delivered_at DESC, rowid DESC
                 LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit as i64], |row| {
                let ts: i64 = row.get(3)?;
                Ok(DeliveryRecord {
                    identity: row.get(0)?,
                    title: row.get(1)?,
                    link: row.get(2)?,
                    delivered_at: DateTime::from_timestamp(ts, 0).unwrap_or_default(),
                    channel_name: row.get(4)?,
                    success: row.get(5)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>().map_err(LedgerError::from)
        });
        res.unwrap_or_else(|e| {
            tracing::warn!(target: "ledger", error = %e, "history unavailable");
            Vec::new()
        })
    }

    /// Release the connection. Later operations fail (reads fail open).
    pub fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err((_, e)) = conn.close() {
                tracing::warn!(target: "ledger", error = %e, "ledger close failed");
            } else {
                tracing::info!(target: "ledger", "ledger closed");
            }
        }
        self.closed = true;
    }
}

fn open_store(path: &Path) -> Result<Connection, LedgerError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| LedgerError::Directory {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let conn = Connection::open(path)?;
    conn.execute_batch(SCHEMA)?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn item(id: &str) -> FeedItem {
        FeedItem::new(id, &format!("title {id}"), &format!("https://x/{id}"), "", None)
    }

    #[test]
    fn opens_lazily_and_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/ledger.db");
        let mut ledger = DeliveryLedger::new(&path);
        assert!(!path.exists());
        assert!(!ledger.is_delivered("nope"));
        assert!(path.exists());
    }

    #[test]
    fn statistics_windows() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = DeliveryLedger::new(dir.path().join("l.db"));
        let now = Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap();

        ledger.mark_delivered_at(&[item("old")], "c", true, now - Duration::days(10)).unwrap();
        ledger.mark_delivered_at(&[item("week")], "c", false, now - Duration::days(3)).unwrap();
        ledger.mark_delivered_at(&[item("today")], "c", true, now - Duration::hours(2)).unwrap();

        let s = ledger.statistics_at(now);
        assert_eq!(s.total, 3);
        assert_eq!(s.success_count, 2);
        assert_eq!(s.failure_count, 1);
        assert_eq!(s.delivered_today, 1);
        assert_eq!(s.delivered_this_week, 2);
        assert_eq!(s.last_delivered_at, Some(now - Duration::hours(2)));
    }

    #[test]
    fn closed_ledger_fails_open_for_reads_and_loud_for_writes() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = DeliveryLedger::new(dir.path().join("l.db"));
        ledger.mark_delivered(&[item("a")], "c", true).unwrap();
        ledger.close();
        assert!(!ledger.is_delivered("a"));
        assert!(matches!(
            ledger.mark_delivered(&[item("b")], "c", true),
            Err(LedgerError::Closed)
        ));
        assert_eq!(ledger.statistics(), LedgerStats::default());
    }
}
