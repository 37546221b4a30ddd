//! Durable transfer ledger.
//!
//! Three record kinds in one SQLite store: committed transfers (hash
//! unique-indexed), verification detail rows, and the offline queue.
//! Writes are append-only or idempotent inserts — concurrent readers of
//! the statistics surface never observe partial state.

use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::Mode;
use crate::errors::AutomationError;
use crate::record::StagedRecord;
use crate::verify::{VerificationResult, VerificationStatus};

/// Content hash giving at-most-once accounting under retries.
pub fn content_hash(record: &StagedRecord, mode: Mode) -> String {
    let canonical = format!(
        "{}|{}|{:.2}|{:.2}|{}|{mode}",
        record.employee_code,
        record.attendance_date,
        record.regular_hours,
        record.overtime_hours,
        record.charge_job,
    );
    blake3::hash(canonical.as_bytes()).to_hex().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    Inserted,
    Duplicate,
}

/// One ledgered transfer, as returned by the history surface.
#[derive(Debug, Clone, Serialize)]
pub struct TransferRow {
    pub id: i64,
    pub record_hash: String,
    pub source_record_id: String,
    pub employee_code: String,
    pub employee_name: String,
    pub attendance_date: String,
    pub regular_hours: f64,
    pub overtime_hours: f64,
    pub charge_job: String,
    pub mode: String,
    pub verification_status: String,
    pub verification_detail: String,
    pub committed_at: String,
}

/// A pending offline-queue item claimed for reconciliation.
#[derive(Debug, Clone)]
pub struct OfflineQueueItem {
    pub id: i64,
    pub record: StagedRecord,
    pub record_hash: String,
    pub mode: Mode,
    pub sql_date: String,
    pub expected_regular: f64,
    pub expected_overtime: f64,
    pub retry_count: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LedgerStats {
    pub total_transfers: i64,
    pub by_mode: Vec<(String, i64)>,
    pub by_status: Vec<(String, i64)>,
    pub by_day: Vec<(String, i64)>,
    pub unique_employees: i64,
    pub total_regular_hours: f64,
    pub total_overtime_hours: f64,
    pub queue_pending: i64,
    pub queue_abandoned: i64,
}

pub struct TransferLedger {
    conn: Mutex<Connection>,
}

impl TransferLedger {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AutomationError> {
        let conn = Connection::open(path.as_ref())?;
        let ledger = Self {
            conn: Mutex::new(conn),
        };
        ledger.migrate()?;
        Ok(ledger)
    }

    fn migrate(&self) -> Result<(), AutomationError> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA foreign_keys=ON;

            CREATE TABLE IF NOT EXISTS transfers (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              record_hash TEXT NOT NULL UNIQUE,
              source_record_id TEXT NOT NULL DEFAULT '',
              employee_code TEXT NOT NULL,
              employee_name TEXT NOT NULL DEFAULT '',
              attendance_date TEXT NOT NULL,
              regular_hours REAL NOT NULL DEFAULT 0,
              overtime_hours REAL NOT NULL DEFAULT 0,
              charge_job TEXT NOT NULL DEFAULT '',
              mode TEXT NOT NULL,
              verification_status TEXT NOT NULL,
              verification_detail TEXT NOT NULL DEFAULT '',
              record_json TEXT NOT NULL,
              committed_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_transfers_employee_date
              ON transfers (employee_code, attendance_date);
            CREATE INDEX IF NOT EXISTS idx_transfers_mode ON transfers (mode);

            CREATE TABLE IF NOT EXISTS verifications (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              transfer_id INTEGER REFERENCES transfers(id),
              employee_code TEXT NOT NULL,
              transaction_date TEXT NOT NULL DEFAULT '',
              status TEXT NOT NULL,
              expected_regular REAL NOT NULL DEFAULT 0,
              expected_overtime REAL NOT NULL DEFAULT 0,
              actual_regular REAL NOT NULL DEFAULT 0,
              actual_overtime REAL NOT NULL DEFAULT 0,
              detail TEXT NOT NULL DEFAULT '',
              profile TEXT,
              checked_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_verifications_transfer
              ON verifications (transfer_id);

            CREATE TABLE IF NOT EXISTS offline_queue (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              record_hash TEXT NOT NULL,
              record_json TEXT NOT NULL,
              mode TEXT NOT NULL,
              sql_date TEXT NOT NULL,
              expected_regular REAL NOT NULL DEFAULT 0,
              expected_overtime REAL NOT NULL DEFAULT 0,
              status TEXT NOT NULL DEFAULT 'pending',
              retry_count INTEGER NOT NULL DEFAULT 0,
              last_attempt TEXT,
              queued_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_offline_queue_status
              ON offline_queue (status);
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, AutomationError> {
        self.conn
            .lock()
            .map_err(|_| AutomationError::LedgerError("ledger lock poisoned".into()))
    }

    /// Idempotent insert: an identical transfer is a no-op reported as
    /// `Duplicate`. A definitive verification (Verified/Mismatch)
    /// arriving for a transfer previously stored as Unreachable upgrades
    /// the stored classification in place. The verification detail row
    /// is recorded either way.
    pub fn store(
        &self,
        record: &StagedRecord,
        result: &VerificationResult,
        mode: Mode,
    ) -> Result<StoreOutcome, AutomationError> {
        let hash = content_hash(record, mode);
        let record_json = serde_json::to_string(record)
            .map_err(|e| AutomationError::LedgerError(format!("serialize record: {e}")))?;
        let now = Utc::now().to_rfc3339();

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute(
            r#"INSERT OR IGNORE INTO transfers (
                 record_hash, source_record_id, employee_code, employee_name,
                 attendance_date, regular_hours, overtime_hours, charge_job,
                 mode, verification_status, verification_detail, record_json,
                 committed_at
               ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"#,
            params![
                hash,
                record.id,
                record.employee_code,
                record.employee_name,
                record.attendance_date,
                record.regular_hours,
                record.overtime_hours,
                record.charge_job,
                mode.to_string(),
                result.status.to_string(),
                result.detail,
                record_json,
                now,
            ],
        )?;
        let inserted = tx.changes() > 0;

        let transfer_id: i64 = tx.query_row(
            "SELECT id FROM transfers WHERE record_hash = ?1",
            params![hash],
            |row| row.get(0),
        )?;

        if !inserted {
            debug!("transfer already ledgered (hash {hash}); duplicate skip");
            let definitive = matches!(
                result.status,
                VerificationStatus::Verified | VerificationStatus::Mismatch
            );
            if definitive {
                tx.execute(
                    r#"UPDATE transfers
                       SET verification_status = ?1, verification_detail = ?2
                       WHERE id = ?3 AND verification_status = 'Unreachable'"#,
                    params![result.status.to_string(), result.detail, transfer_id],
                )?;
            }
        }

        tx.execute(
            r#"INSERT INTO verifications (
                 transfer_id, employee_code, transaction_date, status,
                 expected_regular, expected_overtime, actual_regular,
                 actual_overtime, detail, profile, checked_at
               ) VALUES (?1, ?2, '', ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"#,
            params![
                transfer_id,
                record.employee_code,
                result.status.to_string(),
                result.expected_regular,
                result.expected_overtime,
                result.actual_regular,
                result.actual_overtime,
                result.detail,
                result.profile,
                now,
            ],
        )?;

        tx.commit()?;
        Ok(if inserted {
            StoreOutcome::Inserted
        } else {
            StoreOutcome::Duplicate
        })
    }

    /// Drop candidates whose would-be hash is already ledgered, so the
    /// selection surface only shows untransferred work.
    pub fn filter(
        &self,
        candidates: Vec<StagedRecord>,
        mode: Mode,
    ) -> Result<Vec<StagedRecord>, AutomationError> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT 1 FROM transfers WHERE record_hash = ?1 LIMIT 1")?;
        let mut kept = Vec::with_capacity(candidates.len());
        for record in candidates {
            let hash = content_hash(&record, mode);
            let exists = stmt
                .query_row(params![hash], |_| Ok(()))
                .optional()?
                .is_some();
            if exists {
                debug!(
                    "filtering already-transferred record {} ({})",
                    record.id, record.employee_code
                );
            } else {
                kept.push(record);
            }
        }
        Ok(kept)
    }

    pub fn is_transferred(
        &self,
        record: &StagedRecord,
        mode: Mode,
    ) -> Result<bool, AutomationError> {
        let conn = self.lock()?;
        let hash = content_hash(record, mode);
        Ok(conn
            .query_row(
                "SELECT 1 FROM transfers WHERE record_hash = ?1 LIMIT 1",
                params![hash],
                |_| Ok(()),
            )
            .optional()?
            .is_some())
    }

    /// Paginated history, newest first.
    pub fn history(&self, limit: u32, offset: u32) -> Result<Vec<TransferRow>, AutomationError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"SELECT id, record_hash, source_record_id, employee_code,
                      employee_name, attendance_date, regular_hours,
                      overtime_hours, charge_job, mode, verification_status,
                      verification_detail, committed_at
               FROM transfers ORDER BY id DESC LIMIT ?1 OFFSET ?2"#,
        )?;
        let rows = stmt
            .query_map(params![limit, offset], |row| {
                Ok(TransferRow {
                    id: row.get(0)?,
                    record_hash: row.get(1)?,
                    source_record_id: row.get(2)?,
                    employee_code: row.get(3)?,
                    employee_name: row.get(4)?,
                    attendance_date: row.get(5)?,
                    regular_hours: row.get(6)?,
                    overtime_hours: row.get(7)?,
                    charge_job: row.get(8)?,
                    mode: row.get(9)?,
                    verification_status: row.get(10)?,
                    verification_detail: row.get(11)?,
                    committed_at: row.get(12)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Aggregates for the statistics surface.
    pub fn statistics(&self) -> Result<LedgerStats, AutomationError> {
        let conn = self.lock()?;
        let mut stats = LedgerStats::default();

        conn.query_row(
            r#"SELECT COUNT(*), COUNT(DISTINCT employee_code),
                      COALESCE(SUM(regular_hours), 0),
                      COALESCE(SUM(overtime_hours), 0)
               FROM transfers"#,
            [],
            |row| {
                stats.total_transfers = row.get(0)?;
                stats.unique_employees = row.get(1)?;
                stats.total_regular_hours = row.get(2)?;
                stats.total_overtime_hours = row.get(3)?;
                Ok(())
            },
        )?;

        let grouped = |sql: &str| -> Result<Vec<(String, i64)>, rusqlite::Error> {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        };
        stats.by_mode =
            grouped("SELECT mode, COUNT(*) FROM transfers GROUP BY mode ORDER BY mode")?;
        stats.by_status = grouped(
            "SELECT verification_status, COUNT(*) FROM transfers GROUP BY verification_status ORDER BY verification_status",
        )?;
        stats.by_day = grouped(
            "SELECT substr(committed_at, 1, 10), COUNT(*) FROM transfers GROUP BY 1 ORDER BY 1 DESC LIMIT 30",
        )?;

        conn.query_row(
            r#"SELECT
                 COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0),
                 COALESCE(SUM(CASE WHEN status = 'abandoned' THEN 1 ELSE 0 END), 0)
               FROM offline_queue"#,
            [],
            |row| {
                stats.queue_pending = row.get(0)?;
                stats.queue_abandoned = row.get(1)?;
                Ok(())
            },
        )?;

        Ok(stats)
    }

    /// Queue a committed-but-unverified transfer for later
    /// reconciliation. One pending item per hash — a second entry of the
    /// same record does not double-queue it.
    pub fn enqueue_offline(
        &self,
        record: &StagedRecord,
        mode: Mode,
        sql_date: &str,
        expected_regular: f64,
        expected_overtime: f64,
    ) -> Result<(), AutomationError> {
        let hash = content_hash(record, mode);
        let record_json = serde_json::to_string(record)
            .map_err(|e| AutomationError::LedgerError(format!("serialize record: {e}")))?;
        let conn = self.lock()?;
        let changed = conn.execute(
            r#"INSERT INTO offline_queue (
                 record_hash, record_json, mode, sql_date,
                 expected_regular, expected_overtime, queued_at
               )
               SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7
               WHERE NOT EXISTS (
                 SELECT 1 FROM offline_queue
                 WHERE record_hash = ?1 AND status IN ('pending', 'claimed')
               )"#,
            params![
                hash,
                record_json,
                mode.to_string(),
                sql_date,
                expected_regular,
                expected_overtime,
                Utc::now().to_rfc3339(),
            ],
        )?;
        if changed > 0 {
            debug!("queued {} for offline reconciliation", record.employee_code);
        }
        Ok(())
    }

    /// Claim the oldest pending item with id greater than `after_id`.
    /// The claim flag keeps the reconciler a single worker even if
    /// invoked concurrently with a run loop, and the id cursor lets one
    /// reconciliation pass walk the queue exactly once even as it
    /// requeues items behind itself.
    pub fn claim_next_offline(
        &self,
        after_id: i64,
    ) -> Result<Option<OfflineQueueItem>, AutomationError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let candidate = tx
            .query_row(
                r#"SELECT id, record_hash, record_json, mode, sql_date,
                          expected_regular, expected_overtime, retry_count
                   FROM offline_queue WHERE status = 'pending' AND id > ?1
                   ORDER BY id LIMIT 1"#,
                params![after_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, f64>(5)?,
                        row.get::<_, f64>(6)?,
                        row.get::<_, u32>(7)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, hash, record_json, mode_str, sql_date, er, eo, retry_count)) = candidate
        else {
            return Ok(None);
        };

        let claimed = tx.execute(
            "UPDATE offline_queue SET status = 'claimed' WHERE id = ?1 AND status = 'pending'",
            params![id],
        )?;
        tx.commit()?;
        if claimed == 0 {
            return Ok(None);
        }

        let record: StagedRecord = serde_json::from_str(&record_json).unwrap_or_else(|e| {
            warn!("offline item {id}: unreadable record snapshot ({e})");
            StagedRecord::default()
        });
        let mode = match mode_str.as_str() {
            "production" => Mode::Production,
            _ => Mode::Rehearsal,
        };
        Ok(Some(OfflineQueueItem {
            id,
            record,
            record_hash: hash,
            mode,
            sql_date,
            expected_regular: er,
            expected_overtime: eo,
            retry_count,
        }))
    }

    /// A claimed item whose verification concluded: remove it from the
    /// queue.
    pub fn resolve_offline(&self, id: i64) -> Result<(), AutomationError> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM offline_queue WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// A claimed item whose verification still cannot reach the store:
    /// bump the retry count and requeue, or mark it abandoned at the
    /// ceiling. Abandoned rows stay in the table and show up in stats.
    pub fn requeue_offline(&self, id: i64, ceiling: u32) -> Result<bool, AutomationError> {
        let conn = self.lock()?;
        conn.execute(
            r#"UPDATE offline_queue
               SET retry_count = retry_count + 1,
                   last_attempt = ?2,
                   status = CASE
                     WHEN retry_count + 1 >= ?3 THEN 'abandoned'
                     ELSE 'pending'
                   END
               WHERE id = ?1"#,
            params![id, Utc::now().to_rfc3339(), ceiling],
        )?;
        let abandoned: bool = conn.query_row(
            "SELECT status = 'abandoned' FROM offline_queue WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        if abandoned {
            warn!("offline item {id} hit the retry ceiling; marked abandoned");
        }
        Ok(abandoned)
    }
}
