use std::sync::Arc;

use tracing::debug;

use crate::engine::{ElementHandle, Key, UiEngine};
use crate::errors::AutomationError;

/// A live, interactable node in the target form.
///
/// The handle is only valid until the next postback; the resolver
/// re-resolves before every interaction rather than caching these across
/// suspension points.
#[derive(Clone)]
pub struct UiElement {
    engine: Arc<dyn UiEngine>,
    handle: ElementHandle,
    description: String,
}

impl UiElement {
    pub fn new(engine: Arc<dyn UiEngine>, handle: ElementHandle, description: String) -> Self {
        Self {
            engine,
            handle,
            description,
        }
    }

    /// The selector description that produced this element, for error
    /// detail and progress events.
    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn handle(&self) -> &ElementHandle {
        &self.handle
    }

    pub async fn click(&self) -> Result<(), AutomationError> {
        debug!("click {}", self.description);
        self.engine.click(&self.handle).await
    }

    pub async fn clear(&self) -> Result<(), AutomationError> {
        self.engine.clear(&self.handle).await
    }

    pub async fn type_text(&self, text: &str) -> Result<(), AutomationError> {
        debug!("type into {}: {text:?}", self.description);
        self.engine.type_text(&self.handle, text).await
    }

    pub async fn press_key(&self, key: Key) -> Result<(), AutomationError> {
        self.engine.press_key(&self.handle, key).await
    }

    pub async fn text(&self) -> Result<String, AutomationError> {
        self.engine.text(&self.handle).await
    }

    pub async fn value(&self) -> Result<String, AutomationError> {
        Ok(self
            .engine
            .property(&self.handle, "value")
            .await?
            .unwrap_or_default())
    }

    /// Displayed and enabled; the interactability gate every resolved
    /// element must pass before the driver acts on it.
    pub async fn is_interactable(&self) -> Result<bool, AutomationError> {
        Ok(self.engine.is_displayed(&self.handle).await?
            && self.engine.is_enabled(&self.handle).await?)
    }
}

impl std::fmt::Debug for UiElement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UiElement")
            .field("handle", &self.handle)
            .field("description", &self.description)
            .finish()
    }
}
