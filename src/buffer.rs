//! Bounded holding area for raw records awaiting classification.
//!
//! If producers outpace the pipeline, the buffer applies a configurable
//! overflow policy instead of growing without bound.

use crate::record::RawRecord;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::warn;

/// What to do when the buffer is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Shed the oldest unprocessed record and log a warning.
    DropOldest,
    /// Refuse the push; the producer must retry later.
    Block,
}

/// Outcome of a push against a full buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Record accepted without shedding.
    Accepted,
    /// Record accepted; the oldest buffered record was dropped to make room.
    DroppedOldest,
    /// Buffer full and policy is `Block`; the record was not accepted.
    Rejected,
}

/// Ordered, bounded holding area for raw records.
pub struct RecordBuffer {
    records: VecDeque<RawRecord>,
    capacity: usize,
    policy: OverflowPolicy,
    dropped: u64,
}

impl RecordBuffer {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            policy,
            dropped: 0,
        }
    }

    /// Push one record, applying the overflow policy if the buffer is full.
    pub fn push(&mut self, record: RawRecord) -> PushOutcome {
        if self.records.len() < self.capacity {
            self.records.push_back(record);
            return PushOutcome::Accepted;
        }

        match self.policy {
            OverflowPolicy::DropOldest => {
                let shed = self.records.pop_front();
                self.dropped += 1;
                if let Some(shed) = shed {
                    warn!(
                        kind = %shed.kind(),
                        timestamp = %shed.timestamp,
                        total_dropped = self.dropped,
                        "record buffer full, dropping oldest unprocessed record"
                    );
                }
                self.records.push_back(record);
                PushOutcome::DroppedOldest
            }
            OverflowPolicy::Block => PushOutcome::Rejected,
        }
    }

    /// Push a batch; returns the number of records accepted.
    pub fn push_batch(&mut self, batch: Vec<RawRecord>) -> usize {
        let mut accepted = 0;
        for record in batch {
            if self.push(record) != PushOutcome::Rejected {
                accepted += 1;
            }
        }
        accepted
    }

    /// Drain everything currently buffered, oldest first.
    pub fn drain(&mut self) -> Vec<RawRecord> {
        self.records.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Total records shed by the drop-oldest policy since creation.
    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RawRecord;

    #[test]
    fn test_push_within_capacity() {
        let mut buffer = RecordBuffer::new(4, OverflowPolicy::DropOldest);
        for _ in 0..4 {
            assert_eq!(buffer.push(RawRecord::keystroke("a")), PushOutcome::Accepted);
        }
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.dropped_count(), 0);
    }

    #[test]
    fn test_drop_oldest_on_overflow() {
        let mut buffer = RecordBuffer::new(2, OverflowPolicy::DropOldest);
        buffer.push(RawRecord::keystroke("first"));
        buffer.push(RawRecord::keystroke("second"));
        assert_eq!(
            buffer.push(RawRecord::keystroke("third")),
            PushOutcome::DroppedOldest
        );

        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.dropped_count(), 1);
        let drained = buffer.drain();
        match &drained[0].payload {
            crate::record::RecordPayload::Keyboard { key, .. } => assert_eq!(key, "second"),
            _ => panic!("expected keyboard record"),
        }
    }

    #[test]
    fn test_block_policy_rejects() {
        let mut buffer = RecordBuffer::new(1, OverflowPolicy::Block);
        buffer.push(RawRecord::keystroke("a"));
        assert_eq!(buffer.push(RawRecord::keystroke("b")), PushOutcome::Rejected);
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.dropped_count(), 0);
    }

    #[test]
    fn test_drain_empties_buffer() {
        let mut buffer = RecordBuffer::new(8, OverflowPolicy::DropOldest);
        buffer.push_batch(vec![RawRecord::keystroke("a"), RawRecord::click(true)]);
        assert_eq!(buffer.drain().len(), 2);
        assert!(buffer.is_empty());
    }
}
