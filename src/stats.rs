//! Running pipeline counters.
//!
//! All counters are monotonic for the lifetime of the process; they reset
//! only on restart.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared monotonic counters for the pipeline.
#[derive(Debug)]
pub struct PipelineStats {
    /// Raw records accepted into the pipeline
    records_processed: AtomicU64,
    /// Raw records dropped by noise rules
    records_discarded: AtomicU64,
    /// Events created (including fallback-summarized ones)
    events_created: AtomicU64,
    /// Events whose summary came from the deterministic fallback
    fallback_summaries: AtomicU64,
    /// Activities opened
    activities_created: AtomicU64,
    /// Events merged into an already-open activity
    activities_merged: AtomicU64,
    /// Process start time
    started_at: DateTime<Utc>,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self {
            records_processed: AtomicU64::new(0),
            records_discarded: AtomicU64::new(0),
            events_created: AtomicU64::new(0),
            fallback_summaries: AtomicU64::new(0),
            activities_created: AtomicU64::new(0),
            activities_merged: AtomicU64::new(0),
            started_at: Utc::now(),
        }
    }

    pub fn record_records_processed(&self, count: u64) {
        self.records_processed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_records_discarded(&self, count: u64) {
        self.records_discarded.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_event_created(&self, fallback: bool) {
        self.events_created.fetch_add(1, Ordering::Relaxed);
        if fallback {
            self.fallback_summaries.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_activity_created(&self) {
        self.activities_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_activity_merged(&self) {
        self.activities_merged.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            records_processed: self.records_processed.load(Ordering::Relaxed),
            records_discarded: self.records_discarded.load(Ordering::Relaxed),
            events_created: self.events_created.load(Ordering::Relaxed),
            fallback_summaries: self.fallback_summaries.load(Ordering::Relaxed),
            activities_created: self.activities_created.load(Ordering::Relaxed),
            activities_merged: self.activities_merged.load(Ordering::Relaxed),
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
        }
    }

    /// Human-readable summary for CLI display.
    pub fn summary(&self) -> String {
        let s = self.snapshot();
        format!(
            "Pipeline statistics:\n\
             - Raw records processed: {}\n\
             - Raw records discarded (noise): {}\n\
             - Events created: {}\n\
             - Fallback summaries: {}\n\
             - Activities created: {}\n\
             - Activities merged: {}\n\
             - Uptime: {} seconds",
            s.records_processed,
            s.records_discarded,
            s.events_created,
            s.fallback_summaries,
            s.activities_created,
            s.activities_merged,
            s.uptime_secs
        )
    }
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of the pipeline counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub records_processed: u64,
    pub records_discarded: u64,
    pub events_created: u64,
    pub fallback_summaries: u64,
    pub activities_created: u64,
    pub activities_merged: u64,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
}

/// Thread-safe shared stats handle.
pub type SharedStats = Arc<PipelineStats>;
