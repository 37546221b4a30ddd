use std::time::Duration;

use crate::errors::AutomationError;
use crate::selector::Selector;

/// Opaque reference to a DOM node held by the driver session. Handles are
/// positional snapshots: the node behind one can detach at any postback,
/// which surfaces as `AutomationError::StaleElement` on the next
/// interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementHandle(pub String);

/// Keys the form driver sends to committed fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Enter,
    Tab,
    ArrowDown,
    Escape,
}

/// The seam to the browser automation driver.
///
/// Everything above this trait is engine-agnostic: the form driver,
/// resolver and session manager only see `UiEngine`, so tests run against
/// a scripted in-memory engine and production runs against the WebDriver
/// wire client.
#[async_trait::async_trait]
pub trait UiEngine: Send + Sync {
    /// Navigate the single owned window to `url`.
    async fn navigate(&self, url: &str) -> Result<(), AutomationError>;

    async fn current_url(&self) -> Result<String, AutomationError>;

    /// Evaluate a synchronous script in the page, returning its JSON result.
    async fn execute_script(
        &self,
        script: &str,
        args: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, AutomationError>;

    /// Find all currently attached nodes matching `selector`, in document
    /// order. An empty result is not an error.
    async fn find_elements(
        &self,
        selector: &Selector,
    ) -> Result<Vec<ElementHandle>, AutomationError>;

    async fn click(&self, el: &ElementHandle) -> Result<(), AutomationError>;

    async fn clear(&self, el: &ElementHandle) -> Result<(), AutomationError>;

    async fn type_text(&self, el: &ElementHandle, text: &str) -> Result<(), AutomationError>;

    async fn press_key(&self, el: &ElementHandle, key: Key) -> Result<(), AutomationError>;

    async fn text(&self, el: &ElementHandle) -> Result<String, AutomationError>;

    async fn property(
        &self,
        el: &ElementHandle,
        name: &str,
    ) -> Result<Option<String>, AutomationError>;

    async fn is_displayed(&self, el: &ElementHandle) -> Result<bool, AutomationError>;

    async fn is_enabled(&self, el: &ElementHandle) -> Result<bool, AutomationError>;

    /// Cheap session-liveness probe; false means the authenticated session
    /// (or the driver connection behind it) is gone.
    async fn is_alive(&self) -> bool;

    /// Tear the session down. Idempotent.
    async fn close(&self) -> Result<(), AutomationError>;
}

/// Poll `op` until it yields `Some`, or `timeout` elapses.
///
/// This is the single bounded cooperative wait used for element
/// appearance and suggestion-list population; nothing in the crate blocks
/// indefinitely on the UI.
pub async fn poll_until<T, F, Fut>(
    timeout: Duration,
    interval: Duration,
    mut op: F,
) -> Result<T, AutomationError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<Option<T>, AutomationError>>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(value) = op().await? {
            return Ok(value);
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(AutomationError::Timeout(format!(
                "condition not met within {timeout:?}"
            )));
        }
        tokio::time::sleep(interval).await;
    }
}
