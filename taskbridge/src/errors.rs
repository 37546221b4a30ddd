use thiserror::Error;

/// Errors produced while driving the target form or its backing stores.
#[derive(Error, Debug)]
pub enum AutomationError {
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Stale element reference: {0}")]
    StaleElement(String),

    #[error("Element not interactable: {0}")]
    NotInteractable(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Session lost: {0}")]
    SessionLost(String),

    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Data error: {0}")]
    DataError(String),

    #[error("Backing store unreachable: {0}")]
    StoreUnreachable(String),

    #[error("Ledger store error: {0}")]
    LedgerError(String),

    #[error("Wire protocol error: {0}")]
    WireError(String),
}

impl AutomationError {
    /// Whether a bounded local retry with fresh element resolution can
    /// plausibly recover this error. Session loss is excluded: it needs
    /// re-authentication, not another resolution pass.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AutomationError::ElementNotFound(_)
                | AutomationError::StaleElement(_)
                | AutomationError::NotInteractable(_)
                | AutomationError::Timeout(_)
        )
    }

    pub fn is_session_lost(&self) -> bool {
        matches!(self, AutomationError::SessionLost(_))
    }
}

impl From<rusqlite::Error> for AutomationError {
    fn from(e: rusqlite::Error) -> Self {
        AutomationError::LedgerError(e.to_string())
    }
}

impl From<reqwest::Error> for AutomationError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AutomationError::Timeout(format!("http request timed out: {e}"))
        } else if e.is_connect() {
            AutomationError::SessionLost(format!("driver endpoint unreachable: {e}"))
        } else {
            AutomationError::WireError(e.to_string())
        }
    }
}
