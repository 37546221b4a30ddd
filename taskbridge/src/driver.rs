//! Per-entry form driving.
//!
//! Each entry walks a strictly ordered state machine. A state that fails
//! retries itself (fresh element resolution each attempt) without
//! restarting the entry; exhausting a state marks the entry Failed and
//! the run moves on. The form is assumed to reset itself after submit —
//! there is no navigation between entries, only a fixed settle wait.
//! A failed session-liveness probe is the one event that triggers
//! re-authentication plus a reset to the top of the current entry.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::config::TimingConfig;
use crate::engine::Key;
use crate::errors::AutomationError;
use crate::progress::{ProgressEvent, RunProgress};
use crate::record::ErpEntry;
use crate::resolver::{ElementResolver, FieldRole, FormState};
use crate::session::SessionManager;

/// States in execution order. Charge-job states are skipped when their
/// segment is empty (a degraded charge-job never blocks the entry).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveState {
    FillDocumentDate,
    FillTransactionDate,
    SelectEmployee,
    SelectTransactionKind,
    FillChargeTask,
    FillChargeStation,
    FillChargeMachine,
    FillChargeExpense,
    FillHours,
    Submit,
}

impl DriveState {
    pub const SEQUENCE: [DriveState; 10] = [
        DriveState::FillDocumentDate,
        DriveState::FillTransactionDate,
        DriveState::SelectEmployee,
        DriveState::SelectTransactionKind,
        DriveState::FillChargeTask,
        DriveState::FillChargeStation,
        DriveState::FillChargeMachine,
        DriveState::FillChargeExpense,
        DriveState::FillHours,
        DriveState::Submit,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DriveState::FillDocumentDate => "FillDocumentDate",
            DriveState::FillTransactionDate => "FillTransactionDate",
            DriveState::SelectEmployee => "SelectEmployee",
            DriveState::SelectTransactionKind => "SelectTransactionKind",
            DriveState::FillChargeTask => "FillChargeTask",
            DriveState::FillChargeStation => "FillChargeStation",
            DriveState::FillChargeMachine => "FillChargeMachine",
            DriveState::FillChargeExpense => "FillChargeExpense",
            DriveState::FillHours => "FillHours",
            DriveState::Submit => "Submit",
        }
    }
}

/// Outcome of driving one entry. `Failed` never aborts the run.
#[derive(Debug, Clone)]
pub enum EntryOutcome {
    Committed,
    Failed { state: &'static str, error: String },
}

pub struct FormDriver {
    resolver: ElementResolver,
    session: Arc<SessionManager>,
    timing: TimingConfig,
    progress: RunProgress,
}

impl FormDriver {
    pub fn new(
        resolver: ElementResolver,
        session: Arc<SessionManager>,
        timing: TimingConfig,
        progress: RunProgress,
    ) -> Self {
        Self {
            resolver,
            session,
            timing,
            progress,
        }
    }

    /// Drive one entry through the full state sequence.
    ///
    /// Returns `Err` only for run-fatal conditions (re-authentication
    /// exhausted); everything else is folded into the outcome.
    #[instrument(skip(self, entry), fields(employee = %entry.employee_code, kind = %entry.kind))]
    pub async fn drive_entry(
        &self,
        index: usize,
        entry: &ErpEntry,
    ) -> Result<EntryOutcome, AutomationError> {
        let mut form_state = FormState::default();
        let mut position = 0usize;
        let mut resets = 0u8;

        while position < DriveState::SEQUENCE.len() {
            let state = DriveState::SEQUENCE[position];
            self.progress.set_state(state.name());

            match self.run_state(state, entry, &mut form_state).await {
                Ok(()) => {
                    self.session.note_activity().await;
                    position += 1;
                }
                Err(e) => {
                    // Only a failed liveness probe escalates past the
                    // state's own retries.
                    let session_down = e.is_session_lost() || !self.session.probe_now().await;
                    if session_down && resets < 2 {
                        warn!(
                            "session lost in {} (entry {index}): {e}; re-authenticating",
                            state.name()
                        );
                        self.session.reauthenticate().await?;
                        form_state = FormState::default();
                        position = 0;
                        resets += 1;
                        continue;
                    }
                    let detail = format!("{}: {e}", state.name());
                    self.push_event(index, entry, state.name(), Some("Failed"), Some(&detail));
                    return Ok(EntryOutcome::Failed {
                        state: state.name(),
                        error: detail,
                    });
                }
            }
        }

        // Let the form reset itself before the next entry's first state.
        tokio::time::sleep(self.timing.settle_after_submit()).await;
        self.push_event(index, entry, "Submit", Some("Committed"), None);
        info!(
            "entry {index} committed: {} {} {}h",
            entry.employee_code, entry.kind, entry.hours
        );
        Ok(EntryOutcome::Committed)
    }

    async fn run_state(
        &self,
        state: DriveState,
        entry: &ErpEntry,
        form_state: &mut FormState,
    ) -> Result<(), AutomationError> {
        match state {
            DriveState::FillDocumentDate => {
                self.resolver
                    .fill_text(
                        FieldRole::DocumentDate,
                        form_state,
                        &entry.document_date,
                        Some(Key::Tab),
                    )
                    .await
            }
            DriveState::FillTransactionDate => {
                self.resolver
                    .fill_text(
                        FieldRole::TransactionDate,
                        form_state,
                        &entry.transaction_date,
                        Some(Key::Enter),
                    )
                    .await?;
                // The date commit posts back and redraws the widget row
                tokio::time::sleep(self.timing.settle_after_submit()).await;
                Ok(())
            }
            DriveState::SelectEmployee => {
                self.resolver
                    .select_employee(form_state, &entry.employee_code, &entry.employee_name)
                    .await
            }
            DriveState::SelectTransactionKind => {
                self.resolver
                    .click(FieldRole::KindRadio(entry.kind), form_state)
                    .await
            }
            DriveState::FillChargeTask
            | DriveState::FillChargeStation
            | DriveState::FillChargeMachine
            | DriveState::FillChargeExpense => {
                let (role, segment) = match state {
                    DriveState::FillChargeTask => (FieldRole::ChargeTask, &entry.charge.task),
                    DriveState::FillChargeStation => {
                        (FieldRole::ChargeStation, &entry.charge.station)
                    }
                    DriveState::FillChargeMachine => {
                        (FieldRole::ChargeMachine, &entry.charge.machine)
                    }
                    _ => (FieldRole::ChargeExpense, &entry.charge.expense),
                };
                if segment.is_empty() {
                    warn!("{}: empty charge segment, skipping", role.name());
                    return Ok(());
                }
                self.resolver
                    .commit_autocomplete(role, form_state, &segment.code, false)
                    .await?;
                form_state.charge_committed += 1;
                Ok(())
            }
            DriveState::FillHours => {
                self.resolver
                    .fill_text(
                        FieldRole::Hours,
                        form_state,
                        &format_hours(entry.hours),
                        Some(Key::Tab),
                    )
                    .await
            }
            DriveState::Submit => self.resolver.click(FieldRole::Submit, form_state).await,
        }
    }

    fn push_event(
        &self,
        index: usize,
        entry: &ErpEntry,
        state: &str,
        outcome: Option<&str>,
        error: Option<&str>,
    ) {
        self.progress.push_event(ProgressEvent {
            entry_index: index,
            employee: entry.employee_code.clone(),
            document_date: entry.document_date.clone(),
            transaction_date: entry.transaction_date.clone(),
            hours: entry.hours,
            kind: entry.kind.to_string(),
            state: state.to_string(),
            outcome: outcome.map(str::to_string),
            verification: None,
            error: error.map(str::to_string),
            timestamp: Utc::now().to_rfc3339(),
        });
    }
}

/// Hours as the form expects them: one decimal place.
pub fn format_hours(hours: f64) -> String {
    format!("{hours:.1}")
}
