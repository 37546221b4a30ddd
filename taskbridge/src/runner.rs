//! Run orchestration.
//!
//! candidates → ledger filter → sanitize → split → sequential per-entry
//! drive → verify → ledger (or offline queue). One browser session, one
//! entry at a time; entries of one record go Regular before Overtime,
//! records keep the caller-supplied order. Cancellation is honored only
//! between entries — a partially filled form cannot be abandoned safely.

use std::sync::Arc;

use chrono::{Local, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::config::RunContext;
use crate::dates;
use crate::driver::{EntryOutcome, FormDriver};
use crate::errors::AutomationError;
use crate::ledger::TransferLedger;
use crate::progress::{EntryTally, ProgressEvent, RunProgress};
use crate::record::{split_entries, ErpEntry, StagedRecord, TransactionKind};
use crate::resolver::ElementResolver;
use crate::session::SessionManager;
use crate::verify::{VerificationClient, VerificationStatus};

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub candidates: usize,
    pub filtered_out: usize,
    pub invalid_records: usize,
    pub entries_driven: usize,
    pub committed: usize,
    pub failed: usize,
    pub verified: usize,
    pub mismatched: usize,
    pub unreachable: usize,
    pub cancelled: bool,
}

/// Everything a caller needs to drive and observe one run.
pub struct BridgeHandles {
    pub run: TransferRun,
    pub session: Arc<SessionManager>,
    pub ledger: Arc<TransferLedger>,
    pub progress: RunProgress,
    pub cancel: CancellationToken,
}

/// Wire the full stack for `ctx` on top of an engine and a backing-store
/// backend. Starts the background login so record preparation overlaps
/// authentication.
pub fn assemble(
    ctx: RunContext,
    engine: Arc<dyn crate::engine::UiEngine>,
    backend: Arc<dyn crate::verify::HoursBackend>,
) -> Result<BridgeHandles, AutomationError> {
    let ledger = Arc::new(TransferLedger::open(&ctx.ledger_path)?);
    let session = SessionManager::new(
        engine.clone(),
        ctx.endpoints.clone(),
        ctx.credentials.clone(),
        ctx.timing.clone(),
        ctx.retry,
    );
    session.start_background_login();
    let resolver = ElementResolver::new(engine, ctx.timing.clone(), ctx.retry);
    let verifier = VerificationClient::new(backend, ctx.profiles.clone(), ctx.retry);
    let progress = RunProgress::new();
    let cancel = CancellationToken::new();
    let run = TransferRun::new(
        ctx,
        session.clone(),
        resolver,
        verifier,
        ledger.clone(),
        progress.clone(),
        cancel.clone(),
    );
    Ok(BridgeHandles {
        run,
        session,
        ledger,
        progress,
        cancel,
    })
}

pub struct TransferRun {
    ctx: RunContext,
    session: Arc<SessionManager>,
    driver: FormDriver,
    verifier: VerificationClient,
    ledger: Arc<TransferLedger>,
    progress: RunProgress,
    cancel: CancellationToken,
}

impl TransferRun {
    pub fn new(
        ctx: RunContext,
        session: Arc<SessionManager>,
        resolver: ElementResolver,
        verifier: VerificationClient,
        ledger: Arc<TransferLedger>,
        progress: RunProgress,
        cancel: CancellationToken,
    ) -> Self {
        let driver = FormDriver::new(
            resolver,
            session.clone(),
            ctx.timing.clone(),
            progress.clone(),
        );
        Self {
            ctx,
            session,
            driver,
            verifier,
            ledger,
            progress,
            cancel,
        }
    }

    /// Execute a full run over the caller-ordered candidate list.
    ///
    /// Returns `Err` only when the session cannot be (re)established;
    /// every per-record and per-entry failure is isolated and reported.
    #[instrument(skip(self, candidates))]
    pub async fn execute(
        &self,
        candidates: Vec<StagedRecord>,
    ) -> Result<RunSummary, AutomationError> {
        let mut summary = RunSummary {
            candidates: candidates.len(),
            ..Default::default()
        };

        let before = candidates.len();
        let candidates = self.ledger.filter(candidates, self.ctx.mode)?;
        summary.filtered_out = before - candidates.len();

        let today = Local::now().date_naive();
        let mut work: Vec<(StagedRecord, Vec<ErpEntry>)> = Vec::with_capacity(candidates.len());
        let mut rejected: Vec<(StagedRecord, String)> = Vec::new();
        for mut record in candidates {
            record.sanitize();
            if let Err(e) = record.validate() {
                warn!("rejecting record at ingestion: {e}");
                summary.invalid_records += 1;
                rejected.push((record, e.to_string()));
                continue;
            }
            let entries = split_entries(&record, today, self.ctx.mode);
            work.push((record, entries));
        }

        let total_entries: usize = work.iter().map(|(_, e)| e.len()).sum();
        self.progress.begin_run(self.ctx.mode, total_entries);
        for (record, reason) in &rejected {
            self.progress.entry_done(EntryTally::Invalid);
            self.push_record_event(record, "Ingestion", "Invalid", Some(reason));
        }

        // Login ran in the background while candidates were prepared.
        self.session
            .ensure_ready(self.ctx.timing.element_wait())
            .await?;

        let mut entry_index = 0usize;
        'records: for (record, entries) in &work {
            for entry in entries {
                if self.cancel.is_cancelled() {
                    info!("cancellation requested; stopping before entry {entry_index}");
                    summary.cancelled = true;
                    break 'records;
                }

                summary.entries_driven += 1;
                match self.driver.drive_entry(entry_index, entry).await? {
                    EntryOutcome::Committed => {
                        summary.committed += 1;
                        self.progress.entry_done(EntryTally::Committed);
                        self.settle_verification(record, entry, &mut summary).await?;
                    }
                    EntryOutcome::Failed { state, error } => {
                        summary.failed += 1;
                        self.progress.entry_done(EntryTally::Failed);
                        warn!("entry {entry_index} failed in {state}: {error}");
                    }
                }
                entry_index += 1;
            }
        }

        self.progress.finish(summary.cancelled);
        info!(
            "run complete: {} committed, {} failed, {} verified, {} unreachable",
            summary.committed, summary.failed, summary.verified, summary.unreachable
        );
        Ok(summary)
    }

    /// Post-commit accounting for one entry: verify, then ledger or
    /// queue. The entry is already committed in the UI, so every path
    /// here must leave it accounted for.
    async fn settle_verification(
        &self,
        record: &StagedRecord,
        entry: &ErpEntry,
        summary: &mut RunSummary,
    ) -> Result<(), AutomationError> {
        let result = self.verifier.verify_entry(entry).await;
        self.progress.record_verification(&result.status.to_string());
        self.push_record_event(
            record,
            "Verification",
            &result.status.to_string(),
            Some(&result.detail),
        );

        match result.status {
            VerificationStatus::Verified => summary.verified += 1,
            VerificationStatus::Mismatch => summary.mismatched += 1,
            VerificationStatus::Unreachable => summary.unreachable += 1,
            VerificationStatus::Invalid => {}
        }

        self.ledger.store(record, &result, self.ctx.mode)?;

        if result.status == VerificationStatus::Unreachable {
            // Optimistic accounting: the commit stands, verification is
            // deferred to the reconciler.
            let sql_date = dates::to_sql_date(&entry.transaction_date).unwrap_or_default();
            let (expected_regular, expected_overtime) =
                expected_for_record(record, self.ctx.mode);
            self.ledger.enqueue_offline(
                record,
                self.ctx.mode,
                &sql_date,
                expected_regular,
                expected_overtime,
            )?;
        }
        Ok(())
    }

    fn push_record_event(
        &self,
        record: &StagedRecord,
        state: &str,
        outcome: &str,
        detail: Option<&str>,
    ) {
        self.progress.push_event(ProgressEvent {
            entry_index: 0,
            employee: record.employee_code.clone(),
            document_date: String::new(),
            transaction_date: String::new(),
            hours: record.regular_hours + record.overtime_hours,
            kind: String::new(),
            state: state.to_string(),
            outcome: Some(outcome.to_string()),
            verification: Some(outcome.to_string()),
            error: detail.map(str::to_string),
            timestamp: Utc::now().to_rfc3339(),
        });
    }
}

/// The hours the reconciler must find in the store for this record:
/// the calendar-rule regular hours actually typed, plus the reported
/// overtime. Reconciliation runs after the whole record has been driven,
/// so the expectation covers both kinds.
fn expected_for_record(record: &StagedRecord, mode: crate::config::Mode) -> (f64, f64) {
    let today = Local::now().date_naive();
    let mut regular = 0.0;
    let mut overtime = 0.0;
    for entry in split_entries(record, today, mode) {
        match entry.kind {
            TransactionKind::Regular => regular = entry.hours,
            TransactionKind::Overtime => overtime = entry.hours,
        }
    }
    (regular, overtime)
}
