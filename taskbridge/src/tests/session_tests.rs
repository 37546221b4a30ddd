//! Session lifecycle: background login, readiness, liveness.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{Credentials, EndpointConfig, TimingConfig};
use crate::session::SessionManager;
use crate::retry::RetryPolicy;
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

fn register_login(engine: &MockEngine) {
    engine.register("#txtUsername", &["user"]);
    engine.register("#txtPassword", &["pass"]);
    engine.register("#btnLogin", &["login"]);
    engine.register("#MainContent_txtTrxDate", &["trx"]);
}

fn manager(engine: &Arc<MockEngine>) -> Arc<SessionManager> {
    SessionManager::new(
        engine.clone() as Arc<dyn crate::engine::UiEngine>,
        EndpointConfig {
            login_url: LOGIN_URL.into(),
            form_url: FORM_URL.into(),
        },
        Credentials {
            username: "operator".into(),
            password: "secret".into(),
        },
        fast_timing(),
        RetryPolicy::new(3, Duration::from_millis(5)),
    )
}

#[tokio::test]
async fn background_login_flips_the_polled_readiness_flag() {
    crate::tests::init_tracing();
    let engine = Arc::new(MockEngine::new());
    register_login(&engine);
    let session = manager(&engine);

    assert!(!session.is_ready());
    session.start_background_login();
    session
        .ensure_ready(Duration::from_secs(2))
        .await
        .expect("login completes");
    assert!(session.is_ready());

    let navs = engine.navigations();
    assert_eq!(navs, vec![LOGIN_URL.to_string(), FORM_URL.to_string()]);
    assert_eq!(engine.value_of("user"), "operator");
    assert_eq!(engine.value_of("pass"), "secret");
    assert!(engine.clicked("login"));
}

#[tokio::test]
async fn ensure_ready_times_out_when_login_never_finishes() {
    let engine = Arc::new(MockEngine::new());
    // No login fields registered: authentication cannot complete
    let session = manager(&engine);
    session.start_background_login();

    let err = session
        .ensure_ready(Duration::from_millis(100))
        .await
        .expect_err("must time out");
    assert!(err.is_session_lost());
}

#[tokio::test]
async fn recent_activity_short_circuits_the_probe_but_not_probe_now() {
    let engine = Arc::new(MockEngine::new());
    register_login(&engine);
    let session = manager(&engine);
    session.authenticate().await.expect("login");

    engine.set_alive(false);
    // Keepalive bookkeeping answers for the windowed probe
    assert!(session.probe().await);
    // The forced probe sees the truth and drops readiness
    assert!(!session.probe_now().await);
    assert!(!session.is_ready());
}

#[tokio::test]
async fn interstitial_confirm_button_is_dismissed_when_present() {
    let engine = Arc::new(MockEngine::new());
    register_login(&engine);
    engine.register("css:input[value='OK']", &["ok_button"]);
    let session = manager(&engine);

    session.authenticate().await.expect("login");
    assert!(engine.clicked("ok_button"));
}

#[tokio::test]
async fn reauthentication_is_bounded_and_fatal_on_exhaustion() {
    let engine = Arc::new(MockEngine::new());
    // Login page never renders its fields
    let session = manager(&engine);

    let err = session.reauthenticate().await.expect_err("must give up");
    assert!(err.is_session_lost());
    assert!(err.to_string().contains("re-authentication exhausted"));
}
