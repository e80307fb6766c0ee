//! Shared health state for the /health endpoint.
//! Updated around each reconciliation run, read by the API.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use crate::types::RunStats;

#[derive(Default)]
pub struct HealthState {
    /// True while a reconciliation run holds the ledger.
    pub reconcile_running: AtomicBool,
    /// Unix seconds when the last run finished (0 = never).
    pub last_run_at: AtomicU64,
    pub runs_total: AtomicU64,
    pub runs_failed: AtomicU64,
    last_run_stats: Mutex<Option<RunStats>>,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run_started(&self) {
        self.reconcile_running.store(true, Ordering::Relaxed);
    }

    /// Record the end of a run. `stats` is None when the run aborted.
    pub fn run_finished(&self, stats: Option<&RunStats>, at_secs: u64) {
        self.reconcile_running.store(false, Ordering::Relaxed);
        self.last_run_at.store(at_secs, Ordering::Relaxed);
        self.runs_total.fetch_add(1, Ordering::Relaxed);
        match stats {
            Some(s) => {
                if let Ok(mut last) = self.last_run_stats.lock() {
                    *last = Some(s.clone());
                }
            }
            None => {
                self.runs_failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn reconcile_running(&self) -> bool {
        self.reconcile_running.load(Ordering::Relaxed)
    }

    pub fn last_run_at(&self) -> u64 {
        self.last_run_at.load(Ordering::Relaxed)
    }

    pub fn runs_total(&self) -> u64 {
        self.runs_total.load(Ordering::Relaxed)
    }

    pub fn runs_failed(&self) -> u64 {
        self.runs_failed.load(Ordering::Relaxed)
    }

    pub fn last_run_stats(&self) -> Option<RunStats> {
        self.last_run_stats.lock().ok().and_then(|s| s.clone())
    }
}
