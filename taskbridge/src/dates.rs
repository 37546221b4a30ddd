//! Date policy calculation.
//!
//! Rehearsal runs post against the previous accounting month so the live
//! period stays untouched; production runs post as-is. All functions are
//! pure over their inputs and degrade to the original string (with a
//! warning) on malformed dates — a bad date never aborts a run.

use chrono::{Datelike, Months, NaiveDate};
use tracing::warn;

use crate::config::Mode;

/// Accepts both collaborator date shapes: `YYYY-MM-DD` and `DD/MM/YYYY`.
pub fn parse_flexible(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%d/%m/%Y"))
        .ok()
}

/// Form entry format.
pub fn format_form(d: NaiveDate) -> String {
    d.format("%d/%m/%Y").to_string()
}

/// Backing-store query format.
pub fn format_sql(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

/// The transaction date typed into the form: attendance date, shifted
/// back one calendar month in rehearsal mode (month-aware — 31 Mar goes
/// to the last day of Feb, not 30 days back).
pub fn transaction_date(attendance: &str, mode: Mode) -> String {
    match parse_flexible(attendance) {
        Some(date) => {
            let shifted = match mode {
                Mode::Rehearsal => date.checked_sub_months(Months::new(1)).unwrap_or(date),
                Mode::Production => date,
            };
            format_form(shifted)
        }
        None => {
            warn!("unparseable attendance date {attendance:?}; using it verbatim");
            attendance.to_string()
        }
    }
}

/// The document date typed into the form.
///
/// Production posts under today's date. Rehearsal composes today's
/// day-of-month onto the base date's month and year, clamped to that
/// month's last valid day; the caller passes the already-shifted
/// transaction date as the base so both fields land in the same period.
pub fn document_date(today: NaiveDate, base: &str, mode: Mode) -> String {
    if mode == Mode::Production {
        return format_form(today);
    }
    match parse_flexible(base) {
        Some(date) => {
            let day = today.day().min(last_day_of_month(date.year(), date.month()));
            let composed = NaiveDate::from_ymd_opt(date.year(), date.month(), day)
                .unwrap_or(date);
            format_form(composed)
        }
        None => {
            warn!("unparseable base date {base:?} for document date; using it verbatim");
            base.to_string()
        }
    }
}

/// Convert either accepted shape to the backing-store query format.
pub fn to_sql_date(s: &str) -> Option<String> {
    parse_flexible(s).map(format_sql)
}

pub fn last_day_of_month(year: i32, month: u32) -> u32 {
    // The first of the following month, minus one day
    let (ny, nm) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(ny, nm, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}
