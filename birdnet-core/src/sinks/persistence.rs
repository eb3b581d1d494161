//! SQLite persistence sink (SPEC_FULL §4.8).
//!
//! Schema and connection-handling style grounded on the teacher's
//! `LocalStore` (`dictum-app/src/storage.rs`): `rusqlite` with `WAL` mode,
//! a schema created idempotently at startup, and synchronous blocking DB
//! calls dispatched onto `spawn_blocking` rather than an async driver. The
//! teacher's `TextCipher` field-level encryption is dropped — no spec field
//! requires encryption at rest (recorded in `DESIGN.md`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{BirdnetError, Result};
use crate::model::Detection;

const MAX_BATCH_ROWS: usize = 32;
const MAX_BATCH_DELAY: Duration = Duration::from_millis(250);
const MAX_RETRY_ATTEMPTS: u32 = 5;
const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(30);

pub struct PersistenceSink {
    db_path: PathBuf,
    read_only: std::sync::atomic::AtomicBool,
}

impl PersistenceSink {
    pub fn open(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        init_schema(&db_path)?;
        Ok(Self {
            db_path,
            read_only: std::sync::atomic::AtomicBool::new(false),
        })
    }

    /// Entered when the watchdog reports disk-critical (SPEC_FULL §4.9):
    /// batches are accepted but not written until disk pressure clears.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only
            .store(read_only, std::sync::atomic::Ordering::Relaxed);
    }

    fn is_read_only(&self) -> bool {
        self.read_only.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Attaches a clip path to an already-persisted detection row, once the
    /// clip writer finishes its pre-roll/post-roll capture (SPEC_FULL
    /// §4.6). A no-op while read-only, since the row it would touch may not
    /// have been written yet either.
    pub async fn update_clip_path(&self, detection_id: uuid::Uuid, clip_path: PathBuf) {
        if self.is_read_only() {
            return;
        }
        let db_path = self.db_path.clone();
        let result = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)?;
            conn.execute(
                "UPDATE detections SET clip_path = ?1 WHERE id = ?2",
                params![clip_path.to_string_lossy(), detection_id.to_string()],
            )?;
            Result::Ok(())
        })
        .await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "failed to update clip_path"),
            Err(e) => warn!(error = %e, "clip_path update task panicked"),
        }
    }

    /// Consumes detections from `rx`, batching up to `MAX_BATCH_ROWS` rows
    /// or `MAX_BATCH_DELAY`, whichever comes first.
    pub async fn run(self: std::sync::Arc<Self>, mut rx: mpsc::Receiver<Detection>, cancel: CancellationToken) {
        let mut batch = Vec::with_capacity(MAX_BATCH_ROWS);
        loop {
            let deadline = tokio::time::sleep(MAX_BATCH_DELAY);
            tokio::pin!(deadline);

            tokio::select! {
                _ = cancel.cancelled() => {
                    self.flush(&mut batch).await;
                    break;
                }
                _ = &mut deadline => {
                    self.flush(&mut batch).await;
                }
                received = rx.recv() => {
                    match received {
                        Some(detection) => {
                            batch.push(detection);
                            if batch.len() >= MAX_BATCH_ROWS {
                                self.flush(&mut batch).await;
                            }
                        }
                        None => {
                            self.flush(&mut batch).await;
                            break;
                        }
                    }
                }
            }
        }
        info!("persistence sink stopped");
    }

    async fn flush(&self, batch: &mut Vec<Detection>) {
        if batch.is_empty() || self.is_read_only() {
            if self.is_read_only() && !batch.is_empty() {
                warn!(pending = batch.len(), "persistence in read-only mode, holding batch");
            }
            return;
        }
        let rows = std::mem::take(batch);
        let path = self.db_path.clone();
        let result = tokio::task::spawn_blocking(move || write_batch_with_retry(&path, &rows))
            .await
            .map_err(|e| BirdnetError::Other(e.into()));

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                metrics::counter!(crate::sinks::prometheus::metric_names::PERSISTENCE_ERRORS_TOTAL)
                    .increment(1);
                error!(error = %e, "persistence_error after retry budget exhausted");
            }
            Err(e) => {
                metrics::counter!(crate::sinks::prometheus::metric_names::PERSISTENCE_ERRORS_TOTAL)
                    .increment(1);
                error!(error = %e, "persistence task panicked");
            }
        }
    }
}

fn init_schema(db_path: &Path) -> Result<()> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        CREATE TABLE IF NOT EXISTS detections (
          id TEXT PRIMARY KEY,
          source_id TEXT NOT NULL,
          begin_ts INTEGER NOT NULL,
          end_ts INTEGER NOT NULL,
          detected_at INTEGER NOT NULL,
          scientific_name TEXT NOT NULL,
          common_name TEXT NOT NULL,
          species_code TEXT NOT NULL,
          confidence REAL NOT NULL,
          clip_path TEXT,
          weather_json TEXT,
          time_of_day TEXT,
          verification TEXT NOT NULL DEFAULT 'unverified',
          locked INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS detection_comments (
          detection_id TEXT NOT NULL REFERENCES detections(id),
          comment TEXT NOT NULL,
          created_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_detections_species ON detections(species_code);
        CREATE INDEX IF NOT EXISTS idx_detections_detected_at ON detections(detected_at DESC);
        "#,
    )?;
    Ok(())
}

fn write_batch_with_retry(db_path: &Path, rows: &[Detection]) -> Result<()> {
    let mut attempt = 0;
    loop {
        match write_batch(db_path, rows) {
            Ok(()) => return Ok(()),
            Err(e) if attempt + 1 >= MAX_RETRY_ATTEMPTS => return Err(e),
            Err(e) => {
                attempt += 1;
                let backoff = std::cmp::min(
                    Duration::from_millis(200 * 2u64.pow(attempt)),
                    MAX_RETRY_BACKOFF,
                );
                warn!(attempt, error = %e, "persistence write failed, retrying");
                std::thread::sleep(backoff);
            }
        }
    }
}

fn write_batch(db_path: &Path, rows: &[Detection]) -> Result<()> {
    let mut conn = Connection::open(db_path)?;
    let tx = conn.transaction()?;
    for detection in rows {
        let weather_json = detection
            .weather
            .as_ref()
            .map(|w| serde_json::to_string(w).unwrap_or_default());
        let time_of_day = detection.time_of_day.map(|t| format!("{t:?}").to_lowercase());

        // INSERT OR IGNORE keeps a retry that resubmits the same id
        // (unique_violation) idempotent, per SPEC_FULL §4.8.
        tx.execute(
            "INSERT OR IGNORE INTO detections
                (id, source_id, begin_ts, end_ts, detected_at, scientific_name, common_name,
                 species_code, confidence, clip_path, weather_json, time_of_day, verification, locked)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                detection.id.to_string(),
                detection.source_id,
                detection.begin.timestamp(),
                detection.end.timestamp(),
                detection.detected_at.timestamp(),
                detection.scientific_name,
                detection.common_name,
                detection.species_code,
                detection.confidence,
                detection.clip_path,
                weather_json,
                time_of_day,
                "unverified",
                detection.locked as i64,
            ],
        )?;
    }
    tx.commit()?;
    Ok(())
}

/// Deletes detections older than `retention_days` (0 disables pruning).
/// Grounded on the teacher's `LocalStore::prune_history`.
pub fn prune_older_than(db_path: &Path, retention_days: i64) -> Result<usize> {
    if retention_days <= 0 {
        return Ok(0);
    }
    let cutoff = Utc::now() - chrono::Duration::days(retention_days);
    let conn = Connection::open(db_path)?;
    let deleted = conn.execute(
        "DELETE FROM detections WHERE detected_at < ?1 AND locked = 0",
        params![cutoff.timestamp()],
    )?;
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::VerificationStatus;

    fn sample_detection(id: uuid::Uuid, species: &str) -> Detection {
        let now = Utc::now();
        Detection {
            id,
            source_id: "mic0".into(),
            begin: now,
            end: now,
            detected_at: now,
            scientific_name: species.into(),
            common_name: species.into(),
            species_code: "amerob".into(),
            confidence: 0.9,
            clip_path: None,
            weather: None,
            time_of_day: None,
            verification: VerificationStatus::Unverified,
            locked: false,
            comments: Vec::new(),
        }
    }

    fn temp_db() -> PathBuf {
        std::env::temp_dir().join(format!("birdnet-test-{}.db", uuid::Uuid::new_v4()))
    }

    #[test]
    fn write_batch_is_idempotent_on_duplicate_id() {
        let path = temp_db();
        init_schema(&path).unwrap();
        let id = uuid::Uuid::new_v4();
        let rows = vec![sample_detection(id, "Turdus migratorius")];
        write_batch(&path, &rows).unwrap();
        write_batch(&path, &rows).unwrap();

        let conn = Connection::open(&path).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM detections WHERE id = ?1", params![id.to_string()], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn prune_removes_only_rows_past_retention() {
        let path = temp_db();
        init_schema(&path).unwrap();
        let mut old = sample_detection(uuid::Uuid::new_v4(), "Turdus migratorius");
        old.detected_at = Utc::now() - chrono::Duration::days(400);
        write_batch(&path, &[old]).unwrap();

        let deleted = prune_older_than(&path, 365).unwrap();
        assert_eq!(deleted, 1);
        std::fs::remove_file(&path).ok();
    }
}
