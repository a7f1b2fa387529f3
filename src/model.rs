//! Distilled domain types: events and activities.
//!
//! An `Event` is a time-bounded group of raw records with a generated
//! summary; it is immutable after creation. An `Activity` is a chronological
//! sequence of events judged to form one continuous task; at most one is
//! open at any time, and closing it is terminal.

use crate::record::RawRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A time-bounded burst of related raw activity with a generated summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Natural-language description of what the records show.
    pub summary: String,
    /// True when the summary was produced without the external service.
    pub fallback: bool,
    /// The records this event was distilled from, in timestamp order.
    pub source_records: Vec<RawRecord>,
}

impl Event {
    /// Create an event from a non-empty, timestamp-ordered record group.
    ///
    /// Start and end times are derived from the first and last record, never
    /// supplied independently, so the timing invariants hold by construction.
    ///
    /// # Panics
    ///
    /// Panics if `source_records` is empty. Callers own that contract; the
    /// filter never emits an empty group.
    pub fn from_records(source_records: Vec<RawRecord>, summary: String, fallback: bool) -> Self {
        assert!(
            !source_records.is_empty(),
            "an event requires at least one source record"
        );
        debug_assert!(
            source_records
                .windows(2)
                .all(|w| w[0].timestamp <= w[1].timestamp),
            "source records must be ordered by timestamp"
        );

        let start_time = source_records[0].timestamp;
        let end_time = source_records[source_records.len() - 1].timestamp;

        Self {
            id: Uuid::new_v4(),
            start_time,
            end_time,
            summary,
            fallback,
            source_records,
        }
    }

    pub fn record_count(&self) -> usize {
        self.source_records.len()
    }

    /// Event duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        (self.end_time - self.start_time).num_milliseconds() as f64 / 1000.0
    }
}

/// A sequence of events judged to form one continuous task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub id: Uuid,
    /// Short human-readable title, derived from the first event's summary.
    pub title: String,
    /// Running description, extended as events are merged in.
    pub description: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Ids of member events, ordered by the events' start_time.
    pub source_event_ids: Vec<Uuid>,
    /// Whether this activity is still accepting events.
    pub open: bool,
}

impl Activity {
    /// Open a new activity seeded from a single event.
    pub fn open_from(event: &Event) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title_from_summary(&event.summary),
            description: event.summary.clone(),
            start_time: event.start_time,
            end_time: event.end_time,
            source_event_ids: vec![event.id],
            open: true,
        }
    }

    /// Append an event to this activity, widening its time span to cover
    /// the event. Only valid on an open activity; the aggregator guarantees
    /// that and keeps `source_event_ids` in start_time order when events
    /// arrive out of order.
    pub fn append(&mut self, event: &Event) {
        debug_assert!(self.open, "cannot append to a closed activity");
        self.source_event_ids.push(event.id);
        if event.start_time < self.start_time {
            self.start_time = event.start_time;
        }
        if event.end_time > self.end_time {
            self.end_time = event.end_time;
        }
    }

    /// Close this activity. Terminal: a closed activity is never reopened.
    pub fn close(&mut self) {
        self.open = false;
    }

    pub fn event_count(&self) -> usize {
        self.source_event_ids.len()
    }
}

/// First sentence of a summary, clipped to a displayable length.
fn title_from_summary(summary: &str) -> String {
    let first = summary
        .split(['.', '\n'])
        .next()
        .unwrap_or(summary)
        .trim();
    const MAX_TITLE: usize = 80;
    if first.chars().count() <= MAX_TITLE {
        first.to_string()
    } else {
        let clipped: String = first.chars().take(MAX_TITLE - 1).collect();
        format!("{clipped}…")
    }
}
