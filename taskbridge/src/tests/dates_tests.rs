//! Date policy calculation.

use chrono::NaiveDate;

use crate::config::Mode;
use crate::dates::{document_date, parse_flexible, to_sql_date, transaction_date};

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[test]
fn accepts_both_collaborator_formats() {
    assert_eq!(parse_flexible("2025-06-14"), Some(day(2025, 6, 14)));
    assert_eq!(parse_flexible("14/06/2025"), Some(day(2025, 6, 14)));
    assert_eq!(parse_flexible("garbage"), None);
}

#[test]
fn rehearsal_transaction_date_shifts_one_calendar_month() {
    let shifted = transaction_date("2024-01-15", Mode::Rehearsal);
    assert_eq!(shifted, "15/12/2023");
    assert_eq!(to_sql_date(&shifted).as_deref(), Some("2023-12-15"));
}

#[test]
fn month_shift_is_month_aware_not_thirty_days() {
    // 31 Mar in a leap year lands on 29 Feb, not 1 Mar
    assert_eq!(transaction_date("2024-03-31", Mode::Rehearsal), "29/02/2024");
    assert_eq!(transaction_date("2023-03-31", Mode::Rehearsal), "28/02/2023");
}

#[test]
fn production_transaction_date_is_unchanged() {
    assert_eq!(transaction_date("2025-06-14", Mode::Production), "14/06/2025");
}

#[test]
fn malformed_transaction_date_falls_back_to_the_original_string() {
    assert_eq!(transaction_date("31-31-31", Mode::Rehearsal), "31-31-31");
}

#[test]
fn rehearsal_document_date_clamps_to_the_base_month() {
    // today 31 May, base 15 Feb non-leap: day 31 does not exist in Feb
    let doc = document_date(day(2023, 5, 31), "2023-02-15", Mode::Rehearsal);
    assert_eq!(doc, "28/02/2023");
}

#[test]
fn rehearsal_document_date_keeps_todays_day_when_valid() {
    let doc = document_date(day(2025, 6, 23), "20/12/2024", Mode::Rehearsal);
    assert_eq!(doc, "23/12/2024");
}

#[test]
fn production_document_date_is_today() {
    let doc = document_date(day(2025, 6, 23), "2025-01-20", Mode::Production);
    assert_eq!(doc, "23/06/2025");
}

#[test]
fn malformed_document_base_falls_back_to_the_original_string() {
    let doc = document_date(day(2025, 6, 23), "??", Mode::Rehearsal);
    assert_eq!(doc, "??");
}

#[test]
fn sql_date_round_trips_form_format() {
    assert_eq!(to_sql_date("20/12/2024").as_deref(), Some("2024-12-20"));
    assert_eq!(to_sql_date("2024-12-20").as_deref(), Some("2024-12-20"));
    assert_eq!(to_sql_date("nope"), None);
}
