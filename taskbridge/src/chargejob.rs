//! Charge-job string splitting.
//!
//! Staged records carry one composite string of the form
//! `"(OC7190) BOILER OPERATION / STN-BLR (STATION BOILER) / BLR00000 (LABOUR COST) / L (LABOUR)"`
//! which expands into the four autocomplete fields of the task-register
//! chain.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

static CODE_RE: Lazy<Regex> = Lazy::new(|| {
    // Either a leading "(CODE) LABEL" or "CODE (LABEL)"
    Regex::new(r"^\(([^)]+)\)\s*(.*)$|^(\S+)\s*\(([^)]*)\)$").unwrap_or_else(|e| {
        // The pattern is a literal; a failure here is a programming error
        // caught by the parser tests.
        panic!("charge code pattern: {e}")
    })
});

/// One segment of the charge-job chain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChargeSegment {
    /// The short code typed into the autocomplete field.
    pub code: String,
    /// The descriptive label, when the segment carried one.
    pub label: String,
}

impl ChargeSegment {
    fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Some(caps) = CODE_RE.captures(raw) {
            // Group 1/2: "(CODE) LABEL"; group 3/4: "CODE (LABEL)"
            if let Some(code) = caps.get(1) {
                return Self {
                    code: code.as_str().trim().to_string(),
                    label: caps.get(2).map(|m| m.as_str().trim().to_string()).unwrap_or_default(),
                };
            }
            if let Some(code) = caps.get(3) {
                return Self {
                    code: code.as_str().trim().to_string(),
                    label: caps.get(4).map(|m| m.as_str().trim().to_string()).unwrap_or_default(),
                };
            }
        }
        Self {
            code: raw.to_string(),
            label: String::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }
}

/// The four-segment task/station/machine/expense chain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChargeJob {
    pub task: ChargeSegment,
    pub station: ChargeSegment,
    pub machine: ChargeSegment,
    pub expense: ChargeSegment,
}

impl ChargeJob {
    /// Split a composite charge-job string on ` / ` into its segments.
    ///
    /// Degrades instead of failing: missing trailing segments come back
    /// empty, and an entirely empty input produces an all-empty chain
    /// with a warning so one malformed record cannot stop a run.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() {
            warn!("empty charge-job string; emitting empty chain");
            return Self::default();
        }
        let mut parts = raw.split('/').map(ChargeSegment::parse);
        let job = Self {
            task: parts.next().unwrap_or_default(),
            station: parts.next().unwrap_or_default(),
            machine: parts.next().unwrap_or_default(),
            expense: parts.next().unwrap_or_default(),
        };
        if parts.next().is_some() {
            warn!("charge-job string has more than four segments; extras ignored: {raw:?}");
        }
        job
    }

    /// Segments in the order the form materializes them.
    pub fn segments(&self) -> [(&'static str, &ChargeSegment); 4] {
        [
            ("task", &self.task),
            ("station", &self.station),
            ("machine", &self.machine),
            ("expense", &self.expense),
        ]
    }
}
