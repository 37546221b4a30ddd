//! Post-commit verification against the target system's backing store.
//!
//! After the form accepts an entry, the store is queried for the rows it
//! should have produced and the hours are compared within a small
//! tolerance. Unreachability is a classification, not an error: the run
//! keeps going and the entry lands in the offline queue.

use std::sync::Arc;

use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::config::ConnectionProfile;
use crate::dates;
use crate::errors::AutomationError;
use crate::record::{ErpEntry, TransactionKind};
use crate::retry::{with_retry, RetryPolicy};

/// Comparison tolerance in hours.
pub const HOURS_TOLERANCE: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationStatus {
    Verified,
    Mismatch,
    Unreachable,
    Invalid,
}

impl std::fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            VerificationStatus::Verified => "Verified",
            VerificationStatus::Mismatch => "Mismatch",
            VerificationStatus::Unreachable => "Unreachable",
            VerificationStatus::Invalid => "Invalid",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub status: VerificationStatus,
    pub expected_regular: f64,
    pub expected_overtime: f64,
    pub actual_regular: f64,
    pub actual_overtime: f64,
    pub detail: String,
    /// Connection profile that answered, when one did.
    pub profile: Option<String>,
}

impl VerificationResult {
    fn unreachable(expected: &[(TransactionKind, f64)], detail: String) -> Self {
        let (er, eo) = expected_pair(expected);
        Self {
            status: VerificationStatus::Unreachable,
            expected_regular: er,
            expected_overtime: eo,
            actual_regular: 0.0,
            actual_overtime: 0.0,
            detail,
            profile: None,
        }
    }

    pub fn invalid(detail: String) -> Self {
        Self {
            status: VerificationStatus::Invalid,
            expected_regular: 0.0,
            expected_overtime: 0.0,
            actual_regular: 0.0,
            actual_overtime: 0.0,
            detail,
            profile: None,
        }
    }
}

/// One stored transaction row, already reduced to what comparison needs.
#[derive(Debug, Clone, Copy)]
pub struct HoursRow {
    pub kind: TransactionKind,
    pub hours: f64,
}

/// Seam to the backing store. Production talks to the ERP database; the
/// in-repo backend reads a SQLite mirror (rehearsal targets and tests).
#[async_trait::async_trait]
pub trait HoursBackend: Send + Sync {
    async fn fetch_hours(
        &self,
        profile: &ConnectionProfile,
        employee_code: &str,
        sql_date: &str,
    ) -> Result<Vec<HoursRow>, AutomationError>;
}

/// Reads the task-register line table from a SQLite file named by the
/// profile URL.
pub struct SqliteHoursBackend;

#[async_trait::async_trait]
impl HoursBackend for SqliteHoursBackend {
    async fn fetch_hours(
        &self,
        profile: &ConnectionProfile,
        employee_code: &str,
        sql_date: &str,
    ) -> Result<Vec<HoursRow>, AutomationError> {
        let path = profile.url.clone();
        let employee_code = employee_code.to_string();
        let sql_date = sql_date.to_string();
        tokio::task::spawn_blocking(move || {
            // Read-only: a missing mirror must surface as unreachable,
            // not be created empty.
            let conn = Connection::open_with_flags(
                &path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
            .map_err(|e| AutomationError::StoreUnreachable(format!("open {path}: {e}")))?;
            let mut stmt = conn
                .prepare("SELECT OT, Hours FROM PR_TASKREGLN WHERE EmpCode = ?1 AND TrxDate = ?2")
                .map_err(|e| AutomationError::StoreUnreachable(format!("prepare: {e}")))?;
            let rows = stmt
                .query_map(rusqlite::params![employee_code, sql_date], |row| {
                    let ot: i64 = row.get(0)?;
                    let hours: f64 = row.get(1)?;
                    Ok(HoursRow {
                        kind: if ot == 1 {
                            TransactionKind::Overtime
                        } else {
                            TransactionKind::Regular
                        },
                        hours,
                    })
                })
                .map_err(|e| AutomationError::StoreUnreachable(format!("query: {e}")))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| AutomationError::StoreUnreachable(format!("row: {e}")))?;
            Ok(rows)
        })
        .await
        .map_err(|e| AutomationError::StoreUnreachable(format!("join: {e}")))?
    }
}

fn expected_pair(expected: &[(TransactionKind, f64)]) -> (f64, f64) {
    let mut regular = 0.0;
    let mut overtime = 0.0;
    for (kind, hours) in expected {
        match kind {
            TransactionKind::Regular => regular += hours,
            TransactionKind::Overtime => overtime += hours,
        }
    }
    (regular, overtime)
}

/// Queries profiles in order and classifies the comparison.
pub struct VerificationClient {
    backend: Arc<dyn HoursBackend>,
    profiles: Vec<ConnectionProfile>,
    retry: RetryPolicy,
}

impl VerificationClient {
    pub fn new(
        backend: Arc<dyn HoursBackend>,
        profiles: Vec<ConnectionProfile>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            backend,
            profiles,
            retry,
        }
    }

    /// Verify one committed entry: only its own kind is asserted.
    pub async fn verify_entry(&self, entry: &ErpEntry) -> VerificationResult {
        let Some(sql_date) = dates::to_sql_date(&entry.transaction_date) else {
            return VerificationResult::invalid(format!(
                "transaction date {:?} is not queryable",
                entry.transaction_date
            ));
        };
        self.verify_hours(&entry.employee_code, &sql_date, &[(entry.kind, entry.hours)])
            .await
    }

    /// Compare each expected (kind, hours) pair against the store
    /// aggregate for that kind, within [`HOURS_TOLERANCE`].
    #[instrument(level = "debug", skip(self, expected))]
    pub async fn verify_hours(
        &self,
        employee_code: &str,
        sql_date: &str,
        expected: &[(TransactionKind, f64)],
    ) -> VerificationResult {
        if self.profiles.is_empty() {
            return VerificationResult::unreachable(
                expected,
                "no backing-store profiles configured".into(),
            );
        }

        let mut last_error = String::new();
        for profile in &self.profiles {
            let attempt = with_retry("fetch_hours", self.retry, || async move {
                self.backend
                    .fetch_hours(profile, employee_code, sql_date)
                    .await
                    .map_err(|e| match e {
                        // Unreachability is transient for retry purposes
                        AutomationError::StoreUnreachable(msg) => {
                            AutomationError::Timeout(msg)
                        }
                        other => other,
                    })
            })
            .await;

            match attempt {
                Ok(rows) => {
                    debug!(
                        "profile {:?} answered with {} rows for {employee_code} @ {sql_date}",
                        profile.name,
                        rows.len()
                    );
                    return self.classify(profile, expected, &rows);
                }
                Err(e) => {
                    warn!("profile {:?} failed: {e}", profile.name);
                    last_error = format!("{}: {e}", profile.name);
                }
            }
        }

        VerificationResult::unreachable(
            expected,
            format!(
                "all {} profiles failed; last: {last_error}",
                self.profiles.len()
            ),
        )
    }

    fn classify(
        &self,
        profile: &ConnectionProfile,
        expected: &[(TransactionKind, f64)],
        rows: &[HoursRow],
    ) -> VerificationResult {
        let mut actual_regular = 0.0;
        let mut actual_overtime = 0.0;
        for row in rows {
            match row.kind {
                TransactionKind::Regular => actual_regular += row.hours,
                TransactionKind::Overtime => actual_overtime += row.hours,
            }
        }

        let (expected_regular, expected_overtime) = expected_pair(expected);
        let mut mismatches = Vec::new();
        for (kind, hours) in expected {
            let actual = match kind {
                TransactionKind::Regular => actual_regular,
                TransactionKind::Overtime => actual_overtime,
            };
            if (hours - actual).abs() > HOURS_TOLERANCE {
                mismatches.push(format!("{kind}: expected {hours:.1}, store has {actual:.1}"));
            }
        }

        let (status, detail) = if mismatches.is_empty() {
            (
                VerificationStatus::Verified,
                format!("hours match within {HOURS_TOLERANCE}"),
            )
        } else {
            (VerificationStatus::Mismatch, mismatches.join("; "))
        };

        VerificationResult {
            status,
            expected_regular,
            expected_overtime,
            actual_regular,
            actual_overtime,
            detail,
            profile: Some(profile.name.clone()),
        }
    }
}
