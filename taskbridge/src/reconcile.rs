//! Offline reconciliation.
//!
//! Entries committed while the backing store was unreachable sit in the
//! offline queue. The reconciler drains it one claimed item at a time —
//! the claim flag keeps this a single worker even next to a live run
//! loop — and re-runs verification. A definitive answer promotes the
//! item onto its ledger row and removes it; another unreachable pass
//! increments the retry count; the ceiling marks the item abandoned,
//! never silently dropped.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::errors::AutomationError;
use crate::ledger::TransferLedger;
use crate::record::TransactionKind;
use crate::verify::{VerificationClient, VerificationStatus};

/// Attempts before an item is abandoned.
pub const DEFAULT_RETRY_CEILING: u32 = 10;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileSummary {
    pub processed: usize,
    pub promoted: usize,
    pub mismatched: usize,
    pub requeued: usize,
    pub abandoned: usize,
}

pub struct OfflineReconciler {
    ledger: Arc<TransferLedger>,
    verifier: VerificationClient,
    retry_ceiling: u32,
}

impl OfflineReconciler {
    pub fn new(ledger: Arc<TransferLedger>, verifier: VerificationClient) -> Self {
        Self {
            ledger,
            verifier,
            retry_ceiling: DEFAULT_RETRY_CEILING,
        }
    }

    pub fn with_retry_ceiling(mut self, ceiling: u32) -> Self {
        self.retry_ceiling = ceiling.max(1);
        self
    }

    /// Drain everything currently pending. Items requeued by this pass
    /// are not revisited within it.
    #[instrument(skip(self))]
    pub async fn process_queue(&self) -> Result<ReconcileSummary, AutomationError> {
        let mut summary = ReconcileSummary::default();
        let mut cursor = 0i64;

        while let Some(item) = self.ledger.claim_next_offline(cursor)? {
            cursor = item.id;
            summary.processed += 1;

            let expected: Vec<(TransactionKind, f64)> = [
                (TransactionKind::Regular, item.expected_regular),
                (TransactionKind::Overtime, item.expected_overtime),
            ]
            .into_iter()
            .filter(|(_, hours)| *hours > 0.0)
            .collect();

            let result = if expected.is_empty() {
                // Zero-hour record: absent store rows verify it.
                self.verifier
                    .verify_hours(
                        &item.record.employee_code,
                        &item.sql_date,
                        &[(TransactionKind::Regular, 0.0)],
                    )
                    .await
            } else {
                self.verifier
                    .verify_hours(&item.record.employee_code, &item.sql_date, &expected)
                    .await
            };

            match result.status {
                VerificationStatus::Verified | VerificationStatus::Mismatch => {
                    // store() upgrades the ledger row's Unreachable
                    // classification in place and records the detail row.
                    self.ledger.store(&item.record, &result, item.mode)?;
                    self.ledger.resolve_offline(item.id)?;
                    if result.status == VerificationStatus::Verified {
                        summary.promoted += 1;
                        info!(
                            "reconciled {} @ {}: verified",
                            item.record.employee_code, item.sql_date
                        );
                    } else {
                        summary.mismatched += 1;
                        warn!(
                            "reconciled {} @ {}: mismatch ({})",
                            item.record.employee_code, item.sql_date, result.detail
                        );
                    }
                }
                VerificationStatus::Unreachable => {
                    if self.ledger.requeue_offline(item.id, self.retry_ceiling)? {
                        summary.abandoned += 1;
                    } else {
                        summary.requeued += 1;
                    }
                }
                VerificationStatus::Invalid => {
                    // Unqueryable snapshot can never verify; keep it out
                    // of the hot path but visible.
                    warn!(
                        "offline item {} is unverifiable: {}",
                        item.id, result.detail
                    );
                    if self.ledger.requeue_offline(item.id, self.retry_ceiling)? {
                        summary.abandoned += 1;
                    } else {
                        summary.requeued += 1;
                    }
                }
            }
        }

        Ok(summary)
    }
}
