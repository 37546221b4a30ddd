//! Form-driver state machine behavior.

use std::sync::Arc;
use std::time::Duration;

use crate::chargejob::ChargeJob;
use crate::config::{Credentials, EndpointConfig, TimingConfig};
use crate::driver::{format_hours, EntryOutcome, FormDriver};
use crate::progress::RunProgress;
use crate::record::{ErpEntry, TransactionKind};
use crate::resolver::ElementResolver;
use crate::retry::RetryPolicy;
use crate::session::SessionManager;
use crate::tests::mock_engine::MockEngine;

const LOGIN_URL: &str = "http://erp.test/login";
const FORM_URL: &str = "http://erp.test/form";

fn fast_timing() -> TimingConfig {
    TimingConfig {
        element_wait_ms: 300,
        suggestion_wait_ms: 150,
        poll_interval_ms: 10,
        settle_after_submit_ms: 10,
    }
}

/// Register the whole task-register form plus the login page.
fn register_form(engine: &MockEngine) {
    engine.register("#MainContent_txtDocDate", &["doc"]);
    engine.register("#MainContent_txtTrxDate", &["trx"]);
    engine.register(
        "css:.ui-autocomplete-input.ui-widget.ui-widget-content",
        &["emp"],
    );
    engine.register_class(
        "ui-autocomplete-input",
        &["emp", "task", "station", "machine", "expense"],
    );
    engine.register("css:input[name*='Task']", &["task"]);
    engine.register("css:input[name*='Station']", &["station"]);
    engine.register("css:input[name*='Machine']", &["machine"]);
    engine.register("css:input[name*='Expense']", &["expense"]);
    engine.register("#MainContent_rblOT_0", &["radio_regular"]);
    engine.register("#MainContent_rblOT_1", &["radio_overtime"]);
    engine.register("#MainContent_txtHours", &["hours"]);
    engine.register("#MainContent_btnAdd", &["add"]);
    engine.register("css:ul.ui-autocomplete li.ui-menu-item", &["sugg-1"]);

    engine.register("#txtUsername", &["user"]);
    engine.register("#txtPassword", &["pass"]);
    engine.register("#btnLogin", &["login"]);
}

fn driver_for(engine: &Arc<MockEngine>) -> FormDriver {
    let timing = fast_timing();
    let retry = RetryPolicy::new(3, Duration::from_millis(5));
    let session = SessionManager::new(
        engine.clone() as Arc<dyn crate::engine::UiEngine>,
        EndpointConfig {
            login_url: LOGIN_URL.into(),
            form_url: FORM_URL.into(),
        },
        Credentials {
            username: "operator".into(),
            password: "secret".into(),
        },
        timing.clone(),
        retry,
    );
    let resolver = ElementResolver::new(
        engine.clone() as Arc<dyn crate::engine::UiEngine>,
        timing.clone(),
        retry,
    );
    FormDriver::new(resolver, session, timing, RunProgress::new())
}

fn entry(kind: TransactionKind, hours: f64) -> ErpEntry {
    ErpEntry {
        record_id: "r1".into(),
        employee_name: "Jane Doe".into(),
        employee_code: "E001".into(),
        attendance_date: "2025-01-20".into(),
        document_date: "23/12/2024".into(),
        transaction_date: "20/12/2024".into(),
        kind,
        hours,
        charge: ChargeJob::parse(
            "(OC7190) BOILER OPERATION / STN-BLR (STATION BOILER) / BLR00000 (LABOUR COST) / L (LABOUR)",
        ),
    }
}

#[tokio::test]
async fn happy_path_walks_every_state_in_order() {
    crate::tests::init_tracing();
    let engine = Arc::new(MockEngine::new());
    register_form(&engine);
    let driver = driver_for(&engine);

    let outcome = driver
        .drive_entry(0, &entry(TransactionKind::Regular, 7.0))
        .await
        .expect("no fatal error");
    assert!(matches!(outcome, EntryOutcome::Committed));

    assert_eq!(engine.value_of("doc"), "23/12/2024");
    assert_eq!(engine.value_of("trx"), "20/12/2024");
    assert_eq!(engine.value_of("emp"), "E001");
    assert!(engine.clicked("radio_regular"));
    assert_eq!(engine.value_of("task"), "OC7190");
    assert_eq!(engine.value_of("station"), "STN-BLR");
    assert_eq!(engine.value_of("machine"), "BLR00000");
    assert_eq!(engine.value_of("expense"), "L");
    assert_eq!(engine.value_of("hours"), "7.0");
    assert!(engine.clicked("add"));
}

#[tokio::test]
async fn overtime_entry_selects_the_overtime_radio() {
    let engine = Arc::new(MockEngine::new());
    register_form(&engine);
    let driver = driver_for(&engine);

    let outcome = driver
        .drive_entry(0, &entry(TransactionKind::Overtime, 2.0))
        .await
        .unwrap();
    assert!(matches!(outcome, EntryOutcome::Committed));
    assert!(engine.clicked("radio_overtime"));
    assert!(!engine.clicked("radio_regular"));
    assert_eq!(engine.value_of("hours"), "2.0");
}

#[tokio::test]
async fn a_states_exhaustion_fails_the_entry_without_aborting() {
    let engine = Arc::new(MockEngine::new());
    register_form(&engine);
    // The hours field never materializes
    engine.register("#MainContent_txtHours", &[]);
    engine.register("css:input[id*='Hours']", &[]);
    let driver = driver_for(&engine);

    let outcome = driver
        .drive_entry(0, &entry(TransactionKind::Regular, 7.0))
        .await
        .expect("entry failure is not a run failure");
    match outcome {
        EntryOutcome::Failed { state, error } => {
            assert_eq!(state, "FillHours");
            assert!(error.contains("no strategy yielded"));
        }
        other => panic!("expected Failed, got {other:?}"),
    }
    // Earlier states did run
    assert_eq!(engine.value_of("doc"), "23/12/2024");
    assert!(!engine.clicked("add"));
}

#[tokio::test]
async fn failed_liveness_probe_triggers_reauth_and_entry_reset() {
    let engine = Arc::new(MockEngine::new());
    register_form(&engine);
    // The session is dead and the first field permanently stale until a
    // navigation (the login) heals both.
    engine.set_alive(false);
    engine.set_stale_budget("doc", 50);
    engine.state.lock().unwrap().revive_on_navigate = true;
    let driver = driver_for(&engine);

    let outcome = driver
        .drive_entry(0, &entry(TransactionKind::Regular, 7.0))
        .await
        .expect("recovered");
    assert!(matches!(outcome, EntryOutcome::Committed));

    let navs = engine.navigations();
    assert!(navs.contains(&LOGIN_URL.to_string()));
    assert!(navs.contains(&FORM_URL.to_string()));
    assert_eq!(engine.value_of("user"), "operator");
    // The entry restarted from the top and completed
    assert_eq!(engine.value_of("doc"), "23/12/2024");
    assert!(engine.clicked("add"));
}

#[test]
fn hours_format_matches_the_form() {
    assert_eq!(format_hours(7.0), "7.0");
    assert_eq!(format_hours(2.5), "2.5");
    assert_eq!(format_hours(0.0), "0.0");
}
