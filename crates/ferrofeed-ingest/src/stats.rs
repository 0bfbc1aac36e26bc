//! Run statistics.

use std::time::Duration;

use ferrofeed_core::FetcherStats;
use ferrofeed_warehouse::SessionStatus;
use serde::Serialize;

/// Counters for one epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EpochOutcome {
    pub epoch: u64,
    pub endpoints_attempted: usize,
    pub endpoints_succeeded: usize,
    pub endpoints_failed: usize,
    /// Endpoints skipped because the checkpoint already covers them.
    pub endpoints_skipped: usize,
    pub records_written: usize,
    pub duplicates: usize,
}

impl EpochOutcome {
    pub fn new(epoch: u64) -> Self {
        Self {
            epoch,
            ..Self::default()
        }
    }

    /// Fewer than half of the attempted endpoints failed.
    pub fn succeeded(&self) -> bool {
        self.endpoints_failed * 2 < self.endpoints_attempted
            || (self.endpoints_attempted == 0 && self.endpoints_failed == 0)
    }
}

/// Final statistics of one `run` invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub session_id: String,
    pub mode: &'static str,
    pub status: SessionStatus,
    pub start_epoch: u64,
    /// Epoch a resume would start at.
    pub next_epoch: u64,
    pub epochs_attempted: u64,
    pub epochs_succeeded: u64,
    pub epochs_failed: u64,
    pub records_written: u64,
    pub duplicates: u64,
    pub api_calls: u64,
    pub endpoint_successes: u64,
    pub endpoint_failures: u64,
    pub elapsed_seconds: f64,
    pub records_per_second: f64,
    /// Stopped by the operator or by `max_epochs` before the universe ran out.
    pub stopped_early: bool,
    pub fetcher: FetcherStats,
}

/// Accumulates epoch outcomes for the current invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct RunTally {
    pub epochs_attempted: u64,
    pub epochs_succeeded: u64,
    pub epochs_failed: u64,
    pub records_written: u64,
    pub duplicates: u64,
    pub endpoint_successes: u64,
    pub endpoint_failures: u64,
}

impl RunTally {
    pub fn record(&mut self, outcome: &EpochOutcome) {
        self.epochs_attempted += 1;
        if outcome.succeeded() {
            self.epochs_succeeded += 1;
        } else {
            self.epochs_failed += 1;
        }
        self.records_written += outcome.records_written as u64;
        self.duplicates += outcome.duplicates as u64;
        self.endpoint_successes += outcome.endpoints_succeeded as u64;
        self.endpoint_failures += outcome.endpoints_failed as u64;
    }
}

pub(crate) fn records_per_second(records: u64, elapsed: Duration) -> f64 {
    let seconds = elapsed.as_secs_f64();
    if seconds <= f64::EPSILON {
        return 0.0;
    }
    records as f64 / seconds
}
