//! Ledger idempotence, filtering and queue bookkeeping.

use tempfile::TempDir;

use crate::config::Mode;
use crate::ledger::{content_hash, StoreOutcome, TransferLedger};
use crate::record::StagedRecord;
use crate::verify::{VerificationResult, VerificationStatus};

fn open_ledger() -> (TempDir, TransferLedger) {
    let dir = tempfile::tempdir().expect("tempdir");
    let ledger = TransferLedger::open(dir.path().join("ledger.db")).expect("open ledger");
    (dir, ledger)
}

fn record(code: &str, date: &str) -> StagedRecord {
    StagedRecord {
        id: format!("src-{code}"),
        employee_name: format!("Employee {code}"),
        employee_code: code.into(),
        attendance_date: date.into(),
        regular_hours: 7.0,
        overtime_hours: 2.0,
        charge_job: "(OC7190) BOILER OPERATION".into(),
        status: "staged".into(),
    }
}

fn verified() -> VerificationResult {
    VerificationResult {
        status: VerificationStatus::Verified,
        expected_regular: 7.0,
        expected_overtime: 2.0,
        actual_regular: 7.0,
        actual_overtime: 2.0,
        detail: "hours match".into(),
        profile: Some("primary".into()),
    }
}

fn unreachable() -> VerificationResult {
    VerificationResult {
        status: VerificationStatus::Unreachable,
        expected_regular: 7.0,
        expected_overtime: 2.0,
        actual_regular: 0.0,
        actual_overtime: 0.0,
        detail: "all profiles failed".into(),
        profile: None,
    }
}

#[test]
fn storing_the_same_transfer_twice_inserts_exactly_once() {
    let (_dir, ledger) = open_ledger();
    let rec = record("E001", "2025-06-14");

    let first = ledger.store(&rec, &verified(), Mode::Rehearsal).unwrap();
    let second = ledger.store(&rec, &verified(), Mode::Rehearsal).unwrap();

    assert_eq!(first, StoreOutcome::Inserted);
    assert_eq!(second, StoreOutcome::Duplicate);
    assert_eq!(ledger.history(10, 0).unwrap().len(), 1);
}

#[test]
fn hash_distinguishes_mode_and_hours() {
    let rec = record("E001", "2025-06-14");
    assert_ne!(
        content_hash(&rec, Mode::Rehearsal),
        content_hash(&rec, Mode::Production)
    );
    let mut other = rec.clone();
    other.overtime_hours = 3.0;
    assert_ne!(
        content_hash(&rec, Mode::Rehearsal),
        content_hash(&other, Mode::Rehearsal)
    );
}

#[test]
fn filter_removes_already_transferred_candidates() {
    let (_dir, ledger) = open_ledger();
    let a = record("A", "2025-06-10");
    let b = record("B", "2025-06-11");
    let c = record("C", "2025-06-12");

    ledger.store(&b, &verified(), Mode::Rehearsal).unwrap();

    let kept = ledger
        .filter(vec![a.clone(), b.clone(), c.clone()], Mode::Rehearsal)
        .unwrap();
    let codes: Vec<&str> = kept.iter().map(|r| r.employee_code.as_str()).collect();
    assert_eq!(codes, ["A", "C"]);

    // A different mode is a different transfer
    let kept = ledger.filter(vec![b], Mode::Production).unwrap();
    assert_eq!(kept.len(), 1);
}

#[test]
fn definitive_verification_upgrades_an_unreachable_row() {
    let (_dir, ledger) = open_ledger();
    let rec = record("E001", "2025-06-14");

    ledger.store(&rec, &unreachable(), Mode::Rehearsal).unwrap();
    let outcome = ledger.store(&rec, &verified(), Mode::Rehearsal).unwrap();

    assert_eq!(outcome, StoreOutcome::Duplicate);
    let rows = ledger.history(10, 0).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].verification_status, "Verified");
}

#[test]
fn verified_status_is_not_downgraded_by_a_later_unreachable() {
    let (_dir, ledger) = open_ledger();
    let rec = record("E001", "2025-06-14");

    ledger.store(&rec, &verified(), Mode::Rehearsal).unwrap();
    ledger.store(&rec, &unreachable(), Mode::Rehearsal).unwrap();

    assert_eq!(
        ledger.history(10, 0).unwrap()[0].verification_status,
        "Verified"
    );
}

#[test]
fn offline_queue_claims_are_exclusive_and_deduplicated() {
    let (_dir, ledger) = open_ledger();
    let rec = record("E001", "2025-06-14");

    ledger
        .enqueue_offline(&rec, Mode::Rehearsal, "2025-05-14", 7.0, 2.0)
        .unwrap();
    // Second entry of the same record must not double-queue it
    ledger
        .enqueue_offline(&rec, Mode::Rehearsal, "2025-05-14", 7.0, 2.0)
        .unwrap();

    let item = ledger.claim_next_offline(0).unwrap().expect("one item");
    assert_eq!(item.record.employee_code, "E001");
    assert_eq!(item.sql_date, "2025-05-14");
    // Claimed: no second claim from the same cursor position
    assert!(ledger.claim_next_offline(0).unwrap().is_none());
}

#[test]
fn requeue_hits_the_abandonment_ceiling_explicitly() {
    let (_dir, ledger) = open_ledger();
    let rec = record("E001", "2025-06-14");
    ledger
        .enqueue_offline(&rec, Mode::Rehearsal, "2025-05-14", 7.0, 2.0)
        .unwrap();
    let item = ledger.claim_next_offline(0).unwrap().unwrap();

    assert!(!ledger.requeue_offline(item.id, 2).unwrap());
    let item = ledger.claim_next_offline(0).unwrap().unwrap();
    assert!(ledger.requeue_offline(item.id, 2).unwrap());

    // Abandoned rows stay visible instead of vanishing
    let stats = ledger.statistics().unwrap();
    assert_eq!(stats.queue_pending, 0);
    assert_eq!(stats.queue_abandoned, 1);
}

#[test]
fn statistics_aggregate_by_mode_status_and_employee() {
    let (_dir, ledger) = open_ledger();
    ledger
        .store(&record("E001", "2025-06-14"), &verified(), Mode::Rehearsal)
        .unwrap();
    ledger
        .store(&record("E002", "2025-06-14"), &unreachable(), Mode::Rehearsal)
        .unwrap();
    ledger
        .store(&record("E001", "2025-06-15"), &verified(), Mode::Production)
        .unwrap();

    let stats = ledger.statistics().unwrap();
    assert_eq!(stats.total_transfers, 3);
    assert_eq!(stats.unique_employees, 2);
    assert_eq!(stats.total_regular_hours, 21.0);
    assert_eq!(stats.total_overtime_hours, 6.0);
    assert!(stats.by_mode.contains(&("rehearsal".to_string(), 2)));
    assert!(stats.by_mode.contains(&("production".to_string(), 1)));
    assert!(stats.by_status.contains(&("Verified".to_string(), 2)));
    assert!(stats.by_status.contains(&("Unreachable".to_string(), 1)));
}

#[test]
fn history_pages_newest_first() {
    let (_dir, ledger) = open_ledger();
    for i in 0..5 {
        ledger
            .store(
                &record(&format!("E{i:03}"), "2025-06-14"),
                &verified(),
                Mode::Rehearsal,
            )
            .unwrap();
    }
    let page = ledger.history(2, 0).unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].employee_code, "E004");
    let page = ledger.history(2, 4).unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].employee_code, "E000");
}
