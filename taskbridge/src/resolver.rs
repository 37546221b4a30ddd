//! Logical-field resolution with ordered fallback strategies.
//!
//! The target form has no automation contract: ids exist for some fields
//! only, the charge-job autocompletes materialize one by one as earlier
//! selections commit, and any postback can detach a previously found
//! node. Fields are therefore addressed by *role*; each role maps to an
//! ordered list of selectors tried until one yields an attached,
//! interactable node. Handles are never cached across a suspension
//! point — every interaction re-resolves first, and staleness mid-step
//! retries the whole step with fresh resolution.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::config::TimingConfig;
use crate::element::UiElement;
use crate::engine::{poll_until, Key, UiEngine};
use crate::errors::AutomationError;
use crate::record::TransactionKind;
use crate::retry::{with_retry, RetryPolicy};
use crate::selector::Selector;

/// Repeating widget class of the autocomplete inputs.
pub const AUTOCOMPLETE_CLASS: &str = "ui-autocomplete-input";
/// Suggestion items rendered by the autocomplete widget.
const SUGGESTION_CSS: &str = "ul.ui-autocomplete li.ui-menu-item";

/// Logical field roles on the task-register form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRole {
    DocumentDate,
    TransactionDate,
    Employee,
    KindRadio(TransactionKind),
    ChargeTask,
    ChargeStation,
    ChargeMachine,
    ChargeExpense,
    Hours,
    Submit,
}

impl FieldRole {
    pub fn name(&self) -> &'static str {
        match self {
            FieldRole::DocumentDate => "document_date",
            FieldRole::TransactionDate => "transaction_date",
            FieldRole::Employee => "employee",
            FieldRole::KindRadio(TransactionKind::Regular) => "kind_regular",
            FieldRole::KindRadio(TransactionKind::Overtime) => "kind_overtime",
            FieldRole::ChargeTask => "charge_task",
            FieldRole::ChargeStation => "charge_station",
            FieldRole::ChargeMachine => "charge_machine",
            FieldRole::ChargeExpense => "charge_expense",
            FieldRole::Hours => "hours",
            FieldRole::Submit => "submit",
        }
    }

    /// Ordinal of this field among the autocomplete widgets, given how
    /// many charge-job fields have committed so far. The widgets only
    /// materialize after the previous selection, so the position of the
    /// *next* charge field is always one past the committed count.
    fn autocomplete_ordinal(&self, state: &FormState) -> Option<usize> {
        match self {
            FieldRole::Employee => Some(0),
            FieldRole::ChargeTask
            | FieldRole::ChargeStation
            | FieldRole::ChargeMachine
            | FieldRole::ChargeExpense => Some(1 + state.charge_committed),
            _ => None,
        }
    }
}

/// What the form currently shows, as far as resolution cares.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormState {
    /// Charge-job autocomplete fields committed so far for this entry.
    pub charge_committed: usize,
}

/// Ordered fallback strategies for a role: stable identifier first,
/// structural adjacency second, positional last.
pub fn strategies(role: FieldRole, state: &FormState) -> Vec<Selector> {
    let nth = |index: usize| Selector::NthOfClass {
        class: AUTOCOMPLETE_CLASS.to_string(),
        index,
    };
    match role {
        FieldRole::DocumentDate => vec![
            Selector::DomId("MainContent_txtDocDate".into()),
            Selector::Css("input[id*='DocDate']".into()),
            Selector::XPath("//td[contains(normalize-space(.),'Document Date')]/following::input[1]".into()),
        ],
        FieldRole::TransactionDate => vec![
            Selector::DomId("MainContent_txtTrxDate".into()),
            Selector::Css("input[id*='TrxDate']".into()),
            Selector::XPath("//td[contains(normalize-space(.),'Transaction Date')]/following::input[1]".into()),
        ],
        FieldRole::Employee => vec![
            Selector::Css(format!(".{AUTOCOMPLETE_CLASS}.ui-widget.ui-widget-content")),
            nth(0),
        ],
        FieldRole::KindRadio(kind) => {
            let (id, pos) = match kind {
                TransactionKind::Regular => ("MainContent_rblOT_0", 1),
                TransactionKind::Overtime => ("MainContent_rblOT_1", 2),
            };
            vec![
                Selector::DomId(id.into()),
                Selector::XPath(format!("(//input[@type='radio'][contains(@id,'rblOT')])[{pos}]")),
            ]
        }
        FieldRole::ChargeTask => vec![
            Selector::Css("input[name*='Task']".into()),
            nth(role.autocomplete_ordinal(state).unwrap_or(1)),
        ],
        FieldRole::ChargeStation => vec![
            Selector::Css("input[name*='Station']".into()),
            nth(role.autocomplete_ordinal(state).unwrap_or(2)),
        ],
        FieldRole::ChargeMachine => vec![
            Selector::Css("input[name*='Machine']".into()),
            nth(role.autocomplete_ordinal(state).unwrap_or(3)),
        ],
        FieldRole::ChargeExpense => vec![
            Selector::Css("input[name*='Expense']".into()),
            nth(role.autocomplete_ordinal(state).unwrap_or(4)),
        ],
        FieldRole::Hours => vec![
            Selector::DomId("MainContent_txtHours".into()),
            Selector::Css("input[id*='Hours']".into()),
            Selector::XPath("//td[contains(normalize-space(.),'Hours')]/following::input[1]".into()),
        ],
        FieldRole::Submit => vec![
            Selector::DomId("MainContent_btnAdd".into()),
            Selector::Css("input[value='Add']".into()),
            Selector::Css("input[id*='Add'], button[id*='Add']".into()),
        ],
    }
}

/// Resolves roles to live elements and performs staleness-tolerant
/// interactions on them.
#[derive(Clone)]
pub struct ElementResolver {
    engine: Arc<dyn UiEngine>,
    timing: TimingConfig,
    retry: RetryPolicy,
}

impl ElementResolver {
    pub fn new(engine: Arc<dyn UiEngine>, timing: TimingConfig, retry: RetryPolicy) -> Self {
        Self {
            engine,
            timing,
            retry,
        }
    }

    pub fn engine(&self) -> &Arc<dyn UiEngine> {
        &self.engine
    }

    /// Resolve `role` to a currently attached, interactable element,
    /// trying each strategy in order within one bounded wait.
    #[instrument(level = "debug", skip(self, state))]
    pub async fn resolve(
        &self,
        role: FieldRole,
        state: &FormState,
    ) -> Result<UiElement, AutomationError> {
        let candidates = strategies(role, state);
        let engine = self.engine.clone();
        let result = poll_until(self.timing.element_wait(), self.timing.poll_interval(), || {
            let candidates = candidates.clone();
            let engine = engine.clone();
            async move {
                for selector in &candidates {
                    let found = match engine.find_elements(selector).await {
                        Ok(found) => found,
                        // A strategy that cannot even be evaluated just
                        // falls through to the next one.
                        Err(AutomationError::InvalidSelector(_)) => continue,
                        Err(e) if e.is_transient() => continue,
                        Err(e) => return Err(e),
                    };
                    let picked = match selector {
                        Selector::NthOfClass { index, .. } => found.get(*index),
                        _ => found.first(),
                    };
                    if let Some(handle) = picked {
                        let el =
                            UiElement::new(engine.clone(), handle.clone(), selector.describe());
                        if el.is_interactable().await.unwrap_or(false) {
                            return Ok(Some(el));
                        }
                    }
                }
                Ok(None)
            }
        })
        .await;

        result.map_err(|e| match e {
            AutomationError::Timeout(_) => AutomationError::ElementNotFound(format!(
                "{}: no strategy yielded an interactable element (tried: {})",
                role.name(),
                candidates
                    .iter()
                    .map(Selector::describe)
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
            other => other,
        })
    }

    /// Run `op` against a freshly resolved element, retrying the whole
    /// step (fresh resolution included) on transient failures.
    pub async fn interact<T, F, Fut>(
        &self,
        role: FieldRole,
        state: &FormState,
        op: F,
    ) -> Result<T, AutomationError>
    where
        F: Fn(UiElement) -> Fut,
        Fut: Future<Output = Result<T, AutomationError>>,
    {
        let op = &op;
        with_retry(role.name(), self.retry, move || async move {
            let element = self.resolve(role, state).await?;
            op(element).await
        })
        .await
    }

    /// Clear a plain input and type `text`, confirming with `commit_key`.
    pub async fn fill_text(
        &self,
        role: FieldRole,
        state: &FormState,
        text: &str,
        commit_key: Option<Key>,
    ) -> Result<(), AutomationError> {
        let text = text.to_string();
        self.interact(role, state, |el| {
            let text = text.clone();
            async move {
                el.clear().await?;
                el.type_text(&text).await?;
                if let Some(key) = commit_key {
                    el.press_key(key).await?;
                }
                Ok(())
            }
        })
        .await
    }

    /// Click a button or radio.
    pub async fn click(&self, role: FieldRole, state: &FormState) -> Result<(), AutomationError> {
        self.interact(role, state, |el| async move { el.click().await })
            .await
    }

    /// Count currently visible suggestion items.
    async fn visible_suggestions(&self) -> Result<Vec<UiElement>, AutomationError> {
        let selector = Selector::Css(SUGGESTION_CSS.into());
        let mut visible = Vec::new();
        for handle in self.engine.find_elements(&selector).await? {
            let el = UiElement::new(self.engine.clone(), handle, selector.describe());
            if self.engine.is_displayed(el.handle()).await.unwrap_or(false) {
                visible.push(el);
            }
        }
        Ok(visible)
    }

    /// Autocomplete commit protocol: clear, enter the target text, wait
    /// for the suggestion list, then select. A single remaining
    /// suggestion is clicked directly; more than one goes through
    /// directional-key selection (first item, confirm). No suggestions
    /// within the bounded wait fails the step (retryable) — committing
    /// without a suggestion leaves the field unvalidated in the form.
    #[instrument(level = "debug", skip(self, state))]
    pub async fn commit_autocomplete(
        &self,
        role: FieldRole,
        state: &FormState,
        text: &str,
        char_by_char: bool,
    ) -> Result<(), AutomationError> {
        let text = text.to_string();
        self.interact(role, state, |el| {
            let text = text.clone();
            async move {
                el.clear().await?;
                if char_by_char {
                    // Incremental entry keeps the widget filtering on
                    // every keystroke, which some fields require.
                    for ch in text.chars() {
                        el.type_text(&ch.to_string()).await?;
                        tokio::time::sleep(std::time::Duration::from_millis(60)).await;
                    }
                } else {
                    el.type_text(&text).await?;
                }

                let suggestions = poll_until(
                    self.timing.suggestion_wait(),
                    self.timing.poll_interval(),
                    || async move {
                        let visible = self.visible_suggestions().await?;
                        Ok(if visible.is_empty() { None } else { Some(visible) })
                    },
                )
                .await
                .map_err(|_| {
                    AutomationError::ElementNotFound(format!(
                        "{}: no autocomplete suggestions for {text:?}",
                        role.name()
                    ))
                })?;

                if suggestions.len() == 1 {
                    debug!("{}: single suggestion, selecting directly", role.name());
                    suggestions[0].click().await?;
                } else {
                    debug!(
                        "{}: {} suggestions, keyboard selection",
                        role.name(),
                        suggestions.len()
                    );
                    el.press_key(Key::ArrowDown).await?;
                    el.press_key(Key::Enter).await?;
                }
                tokio::time::sleep(self.timing.poll_interval()).await;
                Ok(())
            }
        })
        .await
    }

    /// Employee selection: exact-identifier fast path on the normalized
    /// external code, then name-based incremental entry when the code
    /// path is unavailable or yields nothing.
    pub async fn select_employee(
        &self,
        state: &FormState,
        employee_code: &str,
        employee_name: &str,
    ) -> Result<(), AutomationError> {
        let code = normalize_employee_code(employee_code);
        if !code.is_empty() {
            match self
                .commit_autocomplete(FieldRole::Employee, state, &code, false)
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() => {
                    warn!("employee code path failed ({e}); falling back to name entry");
                }
                Err(e) => return Err(e),
            }
        }
        self.commit_autocomplete(FieldRole::Employee, state, employee_name, true)
            .await
    }
}

/// Normalize an external employee code for exact-match entry.
pub fn normalize_employee_code(code: &str) -> String {
    code.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase()
}
