//! Noise reduction and event-boundary detection.
//!
//! The filter is purely computational: it drops records matching documented
//! noise rules and coalesces the survivors into candidate event groups,
//! splitting wherever the inter-record gap reaches the event boundary
//! threshold.

use crate::config::FilterConfig;
use crate::record::{PointerAction, RawRecord, RecordPayload};
use tracing::debug;

/// Result of filtering one batch.
#[derive(Debug, Default)]
pub struct FilterOutput {
    /// Candidate event groups, chronological, each non-empty
    pub groups: Vec<Vec<RawRecord>>,
    /// Records dropped as sub-threshold pointer movement
    pub dropped_pointer_noise: usize,
    /// Records dropped as redundant key repeats
    pub dropped_key_repeats: usize,
}

impl FilterOutput {
    pub fn dropped_total(&self) -> usize {
        self.dropped_pointer_noise + self.dropped_key_repeats
    }

    pub fn surviving_total(&self) -> usize {
        self.groups.iter().map(Vec::len).sum()
    }
}

/// Applies noise rules and gap-based grouping to raw record batches.
pub struct EventFilter {
    config: FilterConfig,
}

impl EventFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    /// Split a timestamp-ordered batch into candidate event groups.
    ///
    /// Every input record is either placed in exactly one output group or
    /// counted against one of the drop rules; nothing vanishes silently.
    /// An empty batch yields an empty output, and a single surviving record
    /// still forms a one-record group.
    pub fn filter(&self, batch: &[RawRecord]) -> FilterOutput {
        let mut output = FilterOutput::default();
        let gap_threshold =
            chrono::Duration::from_std(self.config.event_gap_threshold).unwrap_or_else(|_| {
                chrono::Duration::seconds(10)
            });

        let mut current: Vec<RawRecord> = Vec::new();
        let mut last_key: Option<String> = None;

        for record in batch {
            if self.is_pointer_noise(record) {
                output.dropped_pointer_noise += 1;
                continue;
            }
            if Self::is_redundant_repeat(record, &last_key) {
                output.dropped_key_repeats += 1;
                continue;
            }
            if let RecordPayload::Keyboard { key, .. } = &record.payload {
                last_key = Some(key.clone());
            } else {
                last_key = None;
            }

            // A gap at or beyond the threshold closes the current group
            if let Some(previous) = current.last() {
                if record.timestamp - previous.timestamp >= gap_threshold {
                    output.groups.push(std::mem::take(&mut current));
                }
            }
            current.push(record.clone());
        }

        if !current.is_empty() {
            output.groups.push(current);
        }

        if output.dropped_total() > 0 {
            debug!(
                pointer_noise = output.dropped_pointer_noise,
                key_repeats = output.dropped_key_repeats,
                "filter dropped noise records"
            );
        }

        output
    }

    /// Noise rule: pointer movement below the significance threshold.
    fn is_pointer_noise(&self, record: &RawRecord) -> bool {
        matches!(
            record.payload,
            RecordPayload::Pointer {
                action: PointerAction::Move,
                delta_magnitude: Some(m),
            } if m < self.config.pointer_move_min_magnitude
        )
    }

    /// Noise rule: an OS auto-repeat of the key we just kept.
    fn is_redundant_repeat(record: &RawRecord, last_key: &Option<String>) -> bool {
        match &record.payload {
            RecordPayload::Keyboard { key, repeat: true } => last_key.as_deref() == Some(key),
            _ => false,
        }
    }
}
