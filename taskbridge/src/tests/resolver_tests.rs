//! Element resolution strategies and the autocomplete protocol.

use std::sync::Arc;
use std::time::Duration;

use crate::config::TimingConfig;
use crate::errors::AutomationError;
use crate::record::TransactionKind;
use crate::resolver::{normalize_employee_code, ElementResolver, FieldRole, FormState};
use crate::retry::RetryPolicy;
use crate::tests::mock_engine::MockEngine;

fn fast_timing() -> TimingConfig {
    TimingConfig {
        element_wait_ms: 300,
        suggestion_wait_ms: 150,
        poll_interval_ms: 10,
        settle_after_submit_ms: 10,
    }
}

fn resolver(engine: &Arc<MockEngine>) -> ElementResolver {
    ElementResolver::new(
        engine.clone() as Arc<dyn crate::engine::UiEngine>,
        fast_timing(),
        RetryPolicy::new(3, Duration::from_millis(5)),
    )
}

#[tokio::test]
async fn stable_identifier_strategy_wins_when_present() {
    crate::tests::init_tracing();
    let engine = Arc::new(MockEngine::new());
    engine.register("#MainContent_txtTrxDate", &["trx"]);

    let el = resolver(&engine)
        .resolve(FieldRole::TransactionDate, &FormState::default())
        .await
        .expect("resolved");
    assert_eq!(el.description(), "#MainContent_txtTrxDate");
}

#[tokio::test]
async fn positional_strategy_succeeds_when_identifiers_are_unavailable() {
    let engine = Arc::new(MockEngine::new());
    // No ids, no name-based css: only the repeating widget class exists
    engine.register_class("ui-autocomplete-input", &["emp", "task", "station"]);

    let state = FormState::default();
    let el = resolver(&engine)
        .resolve(FieldRole::ChargeTask, &state)
        .await
        .expect("resolved positionally");
    assert_eq!(el.handle().0, "task");
    assert_eq!(el.description(), "nth:ui-autocomplete-input:1");
}

#[tokio::test]
async fn positional_ordinal_tracks_committed_charge_fields() {
    let engine = Arc::new(MockEngine::new());
    engine.register_class(
        "ui-autocomplete-input",
        &["emp", "task", "station", "machine"],
    );

    let state = FormState {
        charge_committed: 2,
    };
    let el = resolver(&engine)
        .resolve(FieldRole::ChargeMachine, &state)
        .await
        .expect("resolved");
    assert_eq!(el.handle().0, "machine");
}

#[tokio::test]
async fn hidden_elements_are_not_interactable_matches() {
    let engine = Arc::new(MockEngine::new());
    engine.register("#MainContent_txtHours", &["hours"]);
    engine.hide("hours");

    let err = resolver(&engine)
        .resolve(FieldRole::Hours, &FormState::default())
        .await
        .expect_err("hidden element must not resolve");
    assert!(matches!(err, AutomationError::ElementNotFound(_)));
}

#[tokio::test]
async fn interaction_retries_with_fresh_resolution_on_staleness() {
    let engine = Arc::new(MockEngine::new());
    engine.register("#MainContent_txtHours", &["hours"]);
    // First two touches detach mid-interaction
    engine.set_stale_budget("hours", 2);

    resolver(&engine)
        .fill_text(FieldRole::Hours, &FormState::default(), "7.0", None)
        .await
        .expect("third attempt succeeds");
    assert_eq!(engine.value_of("hours"), "7.0");
}

#[tokio::test]
async fn staleness_beyond_the_retry_budget_fails_the_step() {
    let engine = Arc::new(MockEngine::new());
    engine.register("#MainContent_txtHours", &["hours"]);
    engine.set_stale_budget("hours", 10);

    let err = resolver(&engine)
        .fill_text(FieldRole::Hours, &FormState::default(), "7.0", None)
        .await
        .expect_err("retries must be bounded");
    assert!(err.is_transient());
}

#[tokio::test]
async fn single_suggestion_is_selected_directly() {
    let engine = Arc::new(MockEngine::new());
    engine.register_class("ui-autocomplete-input", &["emp", "task"]);
    engine.register("css:input[name*='Task']", &["task"]);
    engine.register("css:ul.ui-autocomplete li.ui-menu-item", &["sugg-1"]);

    resolver(&engine)
        .commit_autocomplete(FieldRole::ChargeTask, &FormState::default(), "OC7190", false)
        .await
        .expect("committed");
    assert_eq!(engine.value_of("task"), "OC7190");
    assert!(engine.clicked("sugg-1"));
    assert!(engine.keys_for("task").is_empty());
}

#[tokio::test]
async fn multiple_suggestions_use_directional_key_selection() {
    let engine = Arc::new(MockEngine::new());
    engine.register_class("ui-autocomplete-input", &["emp", "task"]);
    engine.register("css:input[name*='Task']", &["task"]);
    engine.register(
        "css:ul.ui-autocomplete li.ui-menu-item",
        &["sugg-1", "sugg-2", "sugg-3"],
    );

    resolver(&engine)
        .commit_autocomplete(FieldRole::ChargeTask, &FormState::default(), "OC", false)
        .await
        .expect("committed");
    assert_eq!(engine.keys_for("task"), ["ArrowDown", "Enter"]);
}

#[tokio::test]
async fn no_suggestions_within_the_wait_fails_the_step() {
    let engine = Arc::new(MockEngine::new());
    engine.register_class("ui-autocomplete-input", &["emp", "task"]);
    engine.register("css:input[name*='Task']", &["task"]);
    // Suggestion list registered but every item hidden
    engine.register("css:ul.ui-autocomplete li.ui-menu-item", &["sugg-1"]);
    engine.hide("sugg-1");

    let err = resolver(&engine)
        .commit_autocomplete(FieldRole::ChargeTask, &FormState::default(), "ZZZ", false)
        .await
        .expect_err("no suggestion, no commit");
    assert!(matches!(err, AutomationError::ElementNotFound(_)));
}

#[tokio::test]
async fn employee_code_fast_path_falls_back_to_name_entry() {
    let engine = Arc::new(MockEngine::new());
    engine.register(
        "css:.ui-autocomplete-input.ui-widget.ui-widget-content",
        &["emp"],
    );
    engine.register_class("ui-autocomplete-input", &["emp"]);
    // No suggestions at all: the code path exhausts, then the name path
    // runs and exhausts too — the final error must come from name entry.
    let err = resolver(&engine)
        .select_employee(&FormState::default(), "E 001", "Jane Doe")
        .await
        .expect_err("nothing to select");
    assert!(err.is_transient());
    // Name entry typed character by character after the code attempt
    assert!(engine.value_of("emp").ends_with("Jane Doe"));
}

#[test]
fn employee_code_normalization_strips_whitespace_and_uppercases() {
    assert_eq!(normalize_employee_code(" e 001 "), "E001");
    assert_eq!(normalize_employee_code("POM0123"), "POM0123");
}
