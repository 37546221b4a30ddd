//! Pull-model run status.
//!
//! The status surface is a low-frequency poller, so progress is a
//! snapshot query over shared state rather than a stream: writers update
//! under a lock, readers clone the current snapshot.

use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

use serde::Serialize;
use uuid::Uuid;

use crate::config::Mode;

const MAX_EVENTS: usize = 256;

/// One progress event, detailed enough to reconstruct a failure's root
/// cause without re-running.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub entry_index: usize,
    pub employee: String,
    pub document_date: String,
    pub transaction_date: String,
    pub hours: f64,
    pub kind: String,
    /// State machine state the event refers to.
    pub state: String,
    /// `Committed` / `Failed` / `Invalid`, absent while in flight.
    pub outcome: Option<String>,
    /// Verification classification once known.
    pub verification: Option<String>,
    /// Last error detail, including the strategies tried.
    pub error: Option<String>,
    pub timestamp: String,
}

/// Aggregate counters plus the bounded event log.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSnapshot {
    pub run_id: String,
    pub mode: Option<Mode>,
    pub total_entries: usize,
    pub processed: usize,
    pub committed: usize,
    pub failed: usize,
    pub invalid: usize,
    pub verified: usize,
    pub mismatched: usize,
    pub unreachable: usize,
    pub current_state: Option<String>,
    pub finished: bool,
    pub cancelled: bool,
    pub events: VecDeque<ProgressEvent>,
}

/// Shared handle; writers and pollers both clone this.
#[derive(Clone, Default)]
pub struct RunProgress {
    inner: Arc<RwLock<RunSnapshot>>,
}

impl RunProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_run(&self, mode: Mode, total_entries: usize) {
        if let Ok(mut s) = self.inner.write() {
            *s = RunSnapshot {
                run_id: Uuid::new_v4().to_string(),
                mode: Some(mode),
                total_entries,
                ..Default::default()
            };
        }
    }

    pub fn set_state(&self, state: &str) {
        if let Ok(mut s) = self.inner.write() {
            s.current_state = Some(state.to_string());
        }
    }

    pub fn push_event(&self, event: ProgressEvent) {
        if let Ok(mut s) = self.inner.write() {
            if s.events.len() >= MAX_EVENTS {
                s.events.pop_front();
            }
            s.events.push_back(event);
        }
    }

    pub fn entry_done(&self, outcome: EntryTally) {
        if let Ok(mut s) = self.inner.write() {
            match outcome {
                EntryTally::Committed => {
                    s.processed += 1;
                    s.committed += 1;
                }
                EntryTally::Failed => {
                    s.processed += 1;
                    s.failed += 1;
                }
                // Rejected at ingestion: never became a driveable entry
                EntryTally::Invalid => s.invalid += 1,
            }
            s.current_state = None;
        }
    }

    pub fn record_verification(&self, status: &str) {
        if let Ok(mut s) = self.inner.write() {
            match status {
                "Verified" => s.verified += 1,
                "Mismatch" => s.mismatched += 1,
                "Unreachable" => s.unreachable += 1,
                _ => {}
            }
        }
    }

    pub fn finish(&self, cancelled: bool) {
        if let Ok(mut s) = self.inner.write() {
            s.finished = true;
            s.cancelled = cancelled;
            s.current_state = None;
        }
    }

    /// Current snapshot for the polling status surface.
    pub fn snapshot(&self) -> RunSnapshot {
        self.inner.read().map(|s| s.clone()).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy)]
pub enum EntryTally {
    Committed,
    Failed,
    Invalid,
}
