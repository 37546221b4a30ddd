//! Authenticated session ownership.
//!
//! Exactly one session exists per run. Authentication happens once, in
//! the background, ahead of record processing; callers poll
//! [`SessionManager::is_ready`] instead of blocking on login. Session
//! loss mid-run is recovered by bounded re-authentication — its
//! exhaustion is the only error that aborts a whole run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::config::{Credentials, EndpointConfig, TimingConfig};
use crate::element::UiElement;
use crate::engine::{poll_until, Key, UiEngine};
use crate::errors::AutomationError;
use crate::retry::{with_retry, RetryPolicy};
use crate::selector::Selector;

/// A probe within this window of the last successful interaction is
/// answered from bookkeeping instead of a round-trip.
const KEEPALIVE_WINDOW: Duration = Duration::from_secs(30);

/// Login field selectors; the login page, unlike the form, has stable ids.
const USERNAME_SELECTORS: &[&str] = &["#txtUsername", "css:input[name*='Username']"];
const PASSWORD_SELECTORS: &[&str] = &["#txtPassword", "css:input[type='password']"];
const LOGIN_BUTTON_SELECTORS: &[&str] = &["#btnLogin", "css:input[type='submit']"];
/// Post-login interstitial confirm buttons, tried before falling back to
/// direct navigation.
const INTERSTITIAL_CONFIRM: &[&str] = &[
    "css:input[value='OK']",
    "css:button[id*='OK']",
    "css:input[id*='btnContinue']",
];

pub struct SessionManager {
    engine: Arc<dyn UiEngine>,
    endpoints: EndpointConfig,
    credentials: Credentials,
    timing: TimingConfig,
    retry: RetryPolicy,
    ready: AtomicBool,
    last_activity: Mutex<Option<Instant>>,
}

impl SessionManager {
    pub fn new(
        engine: Arc<dyn UiEngine>,
        endpoints: EndpointConfig,
        credentials: Credentials,
        timing: TimingConfig,
        retry: RetryPolicy,
    ) -> Arc<Self> {
        Arc::new(Self {
            engine,
            endpoints,
            credentials,
            timing,
            retry,
            ready: AtomicBool::new(false),
            last_activity: Mutex::new(None),
        })
    }

    pub fn engine(&self) -> &Arc<dyn UiEngine> {
        &self.engine
    }

    /// Readiness flag polled by callers; login cost stays off the run's
    /// critical path.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Kick off authentication in the background.
    pub fn start_background_login(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.authenticate().await {
                warn!("background login failed: {e}");
            }
        })
    }

    /// Wait (bounded) until the background login has finished.
    pub async fn ensure_ready(&self, timeout: Duration) -> Result<(), AutomationError> {
        if self.is_ready() {
            return Ok(());
        }
        poll_until(timeout, self.timing.poll_interval(), || async move {
            Ok(self.is_ready().then_some(()))
        })
        .await
        .map_err(|_| {
            AutomationError::SessionLost(format!("session not ready within {timeout:?}"))
        })
    }

    /// Full login sequence: credentials, interstitial dismissal, then
    /// navigation to the entry form.
    #[instrument(skip(self))]
    pub async fn authenticate(&self) -> Result<(), AutomationError> {
        self.ready.store(false, Ordering::Release);
        self.engine.navigate(&self.endpoints.login_url).await?;

        self.fill_first_match(USERNAME_SELECTORS, &self.credentials.username)
            .await?;
        self.fill_first_match(PASSWORD_SELECTORS, &self.credentials.password)
            .await?;
        let button = self.find_first_match(LOGIN_BUTTON_SELECTORS).await?;
        button.click().await?;

        self.dismiss_interstitials().await;
        self.engine.navigate(&self.endpoints.form_url).await?;

        // The transaction-date input doubles as the logged-in marker: an
        // expired session bounces this navigation back to the login page.
        self.find_first_match(&["#MainContent_txtTrxDate", "css:input[id*='TrxDate']"])
            .await
            .map_err(|e| {
                AutomationError::SessionLost(format!("entry form not reachable after login: {e}"))
            })?;

        self.note_activity().await;
        self.ready.store(true, Ordering::Release);
        info!("session authenticated and form reached");
        Ok(())
    }

    /// Bounded re-authentication. Exhaustion here is run-fatal.
    pub async fn reauthenticate(&self) -> Result<(), AutomationError> {
        warn!("session lost; re-authenticating");
        with_retry("reauthenticate", self.retry, || async move {
            self.authenticate().await.map_err(|e| match e {
                // Connection-level losses are what we are recovering
                // from; keep them retryable inside the bounded loop.
                AutomationError::SessionLost(msg) => AutomationError::Timeout(msg),
                other => other,
            })
        })
        .await
        .map_err(|e| AutomationError::SessionLost(format!("re-authentication exhausted: {e}")))
    }

    /// Session-liveness probe, short-circuited by recent activity.
    pub async fn probe(&self) -> bool {
        if let Some(last) = *self.last_activity.lock().await {
            if last.elapsed() < KEEPALIVE_WINDOW {
                return true;
            }
        }
        self.probe_now().await
    }

    /// Actual round-trip probe, bypassing keepalive bookkeeping. Used
    /// after a state failure, where recent activity proves nothing.
    pub async fn probe_now(&self) -> bool {
        let alive = self.engine.is_alive().await;
        if alive {
            self.note_activity().await;
        } else {
            self.ready.store(false, Ordering::Release);
        }
        alive
    }

    /// Record a successful interaction for keepalive bookkeeping.
    pub async fn note_activity(&self) {
        *self.last_activity.lock().await = Some(Instant::now());
    }

    pub async fn close(&self) {
        self.ready.store(false, Ordering::Release);
        if let Err(e) = self.engine.close().await {
            warn!("session teardown failed: {e}");
        }
    }

    /// The target app sometimes puts a notice page or popup between login
    /// and the form. Try the confirm buttons briefly; direct navigation
    /// to the form URL afterwards covers the rest.
    async fn dismiss_interstitials(&self) {
        for selector in INTERSTITIAL_CONFIRM {
            let sel = Selector::from(*selector);
            if let Ok(found) = self.engine.find_elements(&sel).await {
                if let Some(handle) = found.into_iter().next() {
                    let el = UiElement::new(self.engine.clone(), handle, sel.describe());
                    if el.is_interactable().await.unwrap_or(false) {
                        if el.click().await.is_ok() {
                            info!("dismissed post-login interstitial via {}", sel.describe());
                            tokio::time::sleep(self.timing.poll_interval()).await;
                        }
                        return;
                    }
                }
            }
        }
    }

    async fn find_first_match(
        &self,
        selectors: &[&str],
    ) -> Result<UiElement, AutomationError> {
        let parsed: Vec<Selector> = selectors.iter().map(|s| Selector::from(*s)).collect();
        poll_until(self.timing.element_wait(), self.timing.poll_interval(), || {
            let parsed = parsed.clone();
            async move {
                for sel in &parsed {
                    if let Ok(found) = self.engine.find_elements(sel).await {
                        if let Some(handle) = found.into_iter().next() {
                            let el =
                                UiElement::new(self.engine.clone(), handle, sel.describe());
                            if el.is_interactable().await.unwrap_or(false) {
                                return Ok(Some(el));
                            }
                        }
                    }
                }
                Ok(None)
            }
        })
        .await
        .map_err(|_| {
            AutomationError::ElementNotFound(format!(
                "none of {selectors:?} yielded an interactable element"
            ))
        })
    }

    async fn fill_first_match(
        &self,
        selectors: &[&str],
        text: &str,
    ) -> Result<(), AutomationError> {
        let el = self.find_first_match(selectors).await?;
        el.clear().await?;
        el.type_text(text).await?;
        // Some login pages validate on blur
        el.press_key(Key::Tab).await.ok();
        Ok(())
    }
}
