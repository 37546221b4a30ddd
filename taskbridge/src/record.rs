//! Staged records and their expansion into ERP-bound entries.

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::chargejob::ChargeJob;
use crate::config::Mode;
use crate::dates;
use crate::errors::AutomationError;

/// Hours credited for a full regular day, Monday through Friday.
pub const WEEKDAY_REGULAR_HOURS: f64 = 7.0;
/// Hours credited for a regular Saturday.
pub const SATURDAY_REGULAR_HOURS: f64 = 5.0;

/// One staged attendance record as supplied by the selection surface.
/// Owned by the collaborator; read-only here apart from boundary
/// sanitation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StagedRecord {
    /// Source record id in the staging store.
    #[serde(default)]
    pub id: String,
    pub employee_name: String,
    /// External employee code used by the target system.
    pub employee_code: String,
    /// `YYYY-MM-DD` or `DD/MM/YYYY`.
    pub attendance_date: String,
    #[serde(default)]
    pub regular_hours: f64,
    #[serde(default)]
    pub overtime_hours: f64,
    /// Composite charge-job string, split by [`ChargeJob::parse`].
    #[serde(default)]
    pub charge_job: String,
    #[serde(default)]
    pub status: String,
}

impl StagedRecord {
    /// Trim and normalize fields at the ingestion boundary. Unknown or
    /// ragged shapes are cleaned up here so nothing downstream has to
    /// deal with them.
    pub fn sanitize(&mut self) {
        self.id = self.id.trim().to_string();
        self.employee_name = self.employee_name.trim().to_string();
        self.employee_code = self.employee_code.trim().to_uppercase();
        self.attendance_date = self.attendance_date.trim().to_string();
        self.charge_job = self.charge_job.trim().to_string();
        for hours in [&mut self.regular_hours, &mut self.overtime_hours] {
            if !hours.is_finite() {
                *hours = 0.0;
            }
        }
    }

    /// Reject records the form can never accept. Failing records are
    /// reported per-record; they never abort a run.
    pub fn validate(&self) -> Result<(), AutomationError> {
        if self.employee_code.is_empty() && self.employee_name.is_empty() {
            return Err(AutomationError::DataError(format!(
                "record {}: no employee identity",
                self.id
            )));
        }
        if self.regular_hours < 0.0 || self.overtime_hours < 0.0 {
            return Err(AutomationError::DataError(format!(
                "record {}: negative hours ({}, {})",
                self.id, self.regular_hours, self.overtime_hours
            )));
        }
        Ok(())
    }
}

/// Kind of a posted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionKind {
    Regular,
    Overtime,
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionKind::Regular => write!(f, "Regular"),
            TransactionKind::Overtime => write!(f, "Overtime"),
        }
    }
}

/// One ERP-bound transaction derived from a staged record. Created per
/// run, consumed by the form driver, discarded after verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErpEntry {
    pub record_id: String,
    pub employee_name: String,
    pub employee_code: String,
    /// Original attendance date, kept for ledger hashing.
    pub attendance_date: String,
    /// `DD/MM/YYYY`, or the original string when unparseable.
    pub document_date: String,
    /// `DD/MM/YYYY`, or the original string when unparseable.
    pub transaction_date: String,
    pub kind: TransactionKind,
    pub hours: f64,
    pub charge: ChargeJob,
}

/// Regular-day hours mandated by the calendar: 7.0 Monday–Friday, 5.0
/// Saturday. Sunday and unparseable dates have no rule.
fn rule_regular_hours(attendance: &str) -> Option<f64> {
    let date: NaiveDate = dates::parse_flexible(attendance)?;
    match date.weekday() {
        Weekday::Sat => Some(SATURDAY_REGULAR_HOURS),
        Weekday::Sun => None,
        _ => Some(WEEKDAY_REGULAR_HOURS),
    }
}

/// Expand one staged record into its ERP entries.
///
/// Both figures positive: two entries, Regular first with calendar-rule
/// hours and Overtime second with the reported overtime verbatim.
/// Exactly one positive: one entry of that kind. Both zero: a single
/// zero-hour Regular entry so the attempt is still accounted for.
pub fn split_entries(record: &StagedRecord, today: NaiveDate, mode: Mode) -> Vec<ErpEntry> {
    let charge = ChargeJob::parse(&record.charge_job);
    let transaction_date = dates::transaction_date(&record.attendance_date, mode);
    let document_date = dates::document_date(today, &transaction_date, mode);

    let entry = |kind: TransactionKind, hours: f64| ErpEntry {
        record_id: record.id.clone(),
        employee_name: record.employee_name.clone(),
        employee_code: record.employee_code.clone(),
        attendance_date: record.attendance_date.clone(),
        document_date: document_date.clone(),
        transaction_date: transaction_date.clone(),
        kind,
        hours,
        charge: charge.clone(),
    };

    let regular_hours = if record.regular_hours > 0.0 {
        match rule_regular_hours(&record.attendance_date) {
            Some(rule) => rule,
            None => {
                warn!(
                    "no calendar rule for {:?}; keeping reported regular hours {}",
                    record.attendance_date, record.regular_hours
                );
                record.regular_hours
            }
        }
    } else {
        0.0
    };

    let mut entries = Vec::with_capacity(2);
    if record.regular_hours > 0.0 {
        entries.push(entry(TransactionKind::Regular, regular_hours));
    }
    if record.overtime_hours > 0.0 {
        entries.push(entry(TransactionKind::Overtime, record.overtime_hours));
    }
    if entries.is_empty() {
        entries.push(entry(TransactionKind::Regular, 0.0));
    }
    entries
}
