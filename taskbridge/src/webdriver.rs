//! W3C WebDriver wire client.
//!
//! Speaks the REST protocol directly to a local driver endpoint
//! (chromedriver/geckodriver) rather than going through a vendored
//! browser SDK, so the session stays a plain HTTP resource the rest of
//! the crate can own behind `UiEngine`.

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::engine::{ElementHandle, Key, UiEngine};
use crate::errors::AutomationError;
use crate::selector::Selector;

static HTTP: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_default()
});

// W3C key codepoints (WebDriver spec §17.4.2)
const KEY_ENTER: &str = "\u{E007}";
const KEY_TAB: &str = "\u{E004}";
const KEY_ARROW_DOWN: &str = "\u{E015}";
const KEY_ESCAPE: &str = "\u{E00C}";

fn key_sequence(key: Key) -> &'static str {
    match key {
        Key::Enter => KEY_ENTER,
        Key::Tab => KEY_TAB,
        Key::ArrowDown => KEY_ARROW_DOWN,
        Key::Escape => KEY_ESCAPE,
    }
}

/// `UiEngine` implementation over a WebDriver remote end.
pub struct WebDriverEngine {
    endpoint: String,
    session_id: Mutex<Option<String>>,
}

impl WebDriverEngine {
    /// Create a session against `endpoint` (e.g. `http://127.0.0.1:9515`).
    #[instrument(skip(endpoint))]
    pub async fn connect(endpoint: &str) -> Result<Arc<Self>, AutomationError> {
        let engine = Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            session_id: Mutex::new(None),
        };
        let caps = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": {
                        "args": ["--disable-notifications", "--start-maximized"]
                    },
                    "unhandledPromptBehavior": "dismiss"
                }
            }
        });
        let body: Value = HTTP
            .post(format!("{}/session", engine.endpoint))
            .json(&caps)
            .send()
            .await?
            .json()
            .await?;
        let session_id = body
            .pointer("/value/sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                AutomationError::WireError(format!("session create returned no id: {body}"))
            })?
            .to_string();
        debug!("webdriver session established: {session_id}");
        *engine.session_id.lock().await = Some(session_id);
        Ok(Arc::new(engine))
    }

    async fn session(&self) -> Result<String, AutomationError> {
        self.session_id
            .lock()
            .await
            .clone()
            .ok_or_else(|| AutomationError::SessionLost("no active webdriver session".into()))
    }

    async fn command(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, AutomationError> {
        let session = self.session().await?;
        let url = format!("{}/session/{session}{path}", self.endpoint);
        let is_post = method == reqwest::Method::POST;
        let mut req = HTTP.request(method, &url);
        if let Some(body) = body {
            req = req.json(&body);
        } else if is_post {
            // Remote ends reject POST without a body
            req = req.json(&json!({}));
        }
        let resp = req.send().await?;
        let status = resp.status();
        let payload: Value = resp.json().await?;
        if status.is_success() {
            return Ok(payload);
        }
        Err(Self::map_wire_error(&payload, status))
    }

    /// Map the remote end's error document onto the crate taxonomy.
    fn map_wire_error(payload: &Value, status: reqwest::StatusCode) -> AutomationError {
        let error = payload
            .pointer("/value/error")
            .and_then(Value::as_str)
            .unwrap_or("");
        let message = payload
            .pointer("/value/message")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        match error {
            "stale element reference" => AutomationError::StaleElement(message),
            "no such element" => AutomationError::ElementNotFound(message),
            "element not interactable" | "element click intercepted" => {
                AutomationError::NotInteractable(message)
            }
            "invalid session id" | "no such window" | "session not created" => {
                AutomationError::SessionLost(message)
            }
            "timeout" | "script timeout" => AutomationError::Timeout(message),
            "invalid selector" => AutomationError::InvalidSelector(message),
            _ => AutomationError::WireError(format!("{status}: {error}: {message}")),
        }
    }

    fn locator_for(selector: &Selector) -> Result<(String, String), AutomationError> {
        match selector {
            Selector::Css(css) => Ok(("css selector".into(), css.clone())),
            Selector::DomId(id) => Ok(("css selector".into(), format!("#{id}"))),
            Selector::NthOfClass { class, .. } => {
                Ok(("css selector".into(), format!(".{class}")))
            }
            Selector::XPath(path) => Ok(("xpath".into(), path.clone())),
            Selector::Text(text) => {
                let escaped = text.replace('\'', "\\'");
                Ok((
                    "xpath".into(),
                    format!("//*[contains(normalize-space(.), '{escaped}')]"),
                ))
            }
            Selector::Invalid(reason) => Err(AutomationError::InvalidSelector(reason.clone())),
        }
    }

    fn element_ref(value: &Value) -> Option<ElementHandle> {
        value
            .as_object()?
            .values()
            .next()?
            .as_str()
            .map(|id| ElementHandle(id.to_string()))
    }
}

#[async_trait::async_trait]
impl UiEngine for WebDriverEngine {
    async fn navigate(&self, url: &str) -> Result<(), AutomationError> {
        self.command(reqwest::Method::POST, "/url", Some(json!({ "url": url })))
            .await?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String, AutomationError> {
        let body = self.command(reqwest::Method::GET, "/url", None).await?;
        body.pointer("/value")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| AutomationError::WireError("current url missing from response".into()))
    }

    async fn execute_script(
        &self,
        script: &str,
        args: Vec<Value>,
    ) -> Result<Value, AutomationError> {
        let body = self
            .command(
                reqwest::Method::POST,
                "/execute/sync",
                Some(json!({ "script": script, "args": args })),
            )
            .await?;
        Ok(body.pointer("/value").cloned().unwrap_or(Value::Null))
    }

    async fn find_elements(
        &self,
        selector: &Selector,
    ) -> Result<Vec<ElementHandle>, AutomationError> {
        let (using, value) = Self::locator_for(selector)?;
        let body = self
            .command(
                reqwest::Method::POST,
                "/elements",
                Some(json!({ "using": using, "value": value })),
            )
            .await?;
        let found = body
            .pointer("/value")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Self::element_ref).collect())
            .unwrap_or_default();
        Ok(found)
    }

    async fn click(&self, el: &ElementHandle) -> Result<(), AutomationError> {
        self.command(reqwest::Method::POST, &format!("/element/{}/click", el.0), None)
            .await?;
        Ok(())
    }

    async fn clear(&self, el: &ElementHandle) -> Result<(), AutomationError> {
        self.command(reqwest::Method::POST, &format!("/element/{}/clear", el.0), None)
            .await?;
        Ok(())
    }

    async fn type_text(&self, el: &ElementHandle, text: &str) -> Result<(), AutomationError> {
        self.command(
            reqwest::Method::POST,
            &format!("/element/{}/value", el.0),
            Some(json!({ "text": text })),
        )
        .await?;
        Ok(())
    }

    async fn press_key(&self, el: &ElementHandle, key: Key) -> Result<(), AutomationError> {
        self.type_text(el, key_sequence(key)).await
    }

    async fn text(&self, el: &ElementHandle) -> Result<String, AutomationError> {
        let body = self
            .command(reqwest::Method::GET, &format!("/element/{}/text", el.0), None)
            .await?;
        Ok(body
            .pointer("/value")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    async fn property(
        &self,
        el: &ElementHandle,
        name: &str,
    ) -> Result<Option<String>, AutomationError> {
        let body = self
            .command(
                reqwest::Method::GET,
                &format!("/element/{}/property/{name}", el.0),
                None,
            )
            .await?;
        Ok(body
            .pointer("/value")
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    async fn is_displayed(&self, el: &ElementHandle) -> Result<bool, AutomationError> {
        let body = self
            .command(
                reqwest::Method::GET,
                &format!("/element/{}/displayed", el.0),
                None,
            )
            .await?;
        Ok(body.pointer("/value").and_then(Value::as_bool).unwrap_or(false))
    }

    async fn is_enabled(&self, el: &ElementHandle) -> Result<bool, AutomationError> {
        let body = self
            .command(
                reqwest::Method::GET,
                &format!("/element/{}/enabled", el.0),
                None,
            )
            .await?;
        Ok(body.pointer("/value").and_then(Value::as_bool).unwrap_or(false))
    }

    async fn is_alive(&self) -> bool {
        // A title fetch exercises both the driver connection and the window
        self.command(reqwest::Method::GET, "/title", None).await.is_ok()
    }

    async fn close(&self) -> Result<(), AutomationError> {
        let session = { self.session_id.lock().await.take() };
        if let Some(session) = session {
            let url = format!("{}/session/{session}", self.endpoint);
            if let Err(e) = HTTP.delete(&url).send().await {
                warn!("webdriver session teardown failed: {e}");
            }
        }
        Ok(())
    }
}
