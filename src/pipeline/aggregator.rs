//! Activity aggregation: the single open activity and its merge decisions.
//!
//! The aggregator is the sole owner of the "current activity" state. For
//! each incoming event it either extends the open activity or closes it and
//! opens a new one, first by the gap rule, then by a pluggable semantic
//! continuation judgment. Callers must feed events in non-decreasing
//! start_time order and must serialize calls (the coordinator holds the
//! aggregator behind one async mutex).

use crate::config::AggregatorConfig;
use crate::llm::parse::{parse_verdict, Verdict, VerdictReply};
use crate::llm::{SummaryClient, SummaryError};
use crate::model::{Activity, Event};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What `merge` did with one event.
#[derive(Debug, Default)]
pub struct MergeOutcome {
    /// Activity closed by this decision, if any. Emitted exactly once.
    pub closed: Option<Activity>,
    /// Whether a new activity was opened for the event.
    pub opened: bool,
    /// Whether the event was merged into an already-open activity.
    pub merged: bool,
}

/// Semantic judgment on whether an event continues the open activity.
///
/// Only consulted when the gap rule has not already forced a split. The
/// precise heuristic is deliberately pluggable.
#[async_trait]
pub trait ContinuationJudge: Send + Sync {
    async fn judge(&self, current: &Activity, event: &Event) -> VerdictReply;
}

/// Judge that trusts the gap rule alone: anything within the activity
/// boundary threshold continues the current activity.
pub struct GapOnlyJudge;

#[async_trait]
impl ContinuationJudge for GapOnlyJudge {
    async fn judge(&self, _current: &Activity, _event: &Event) -> VerdictReply {
        VerdictReply {
            verdict: Verdict::Merge,
            description: None,
        }
    }
}

/// LLM-backed judge: asks the summarization service for a structured
/// verdict and runs the reply through the layered parse chain. Anything
/// unusable defaults to split, so unrelated activities are never silently
/// conflated.
pub struct LlmJudge {
    client: Arc<dyn SummaryClient>,
    call_timeout: std::time::Duration,
}

impl LlmJudge {
    pub fn new(client: Arc<dyn SummaryClient>, call_timeout: std::time::Duration) -> Self {
        Self {
            client,
            call_timeout,
        }
    }

    fn prompt(current: &Activity, event: &Event) -> String {
        format!(
            "An ongoing user activity is described as:\n{}\n\n\
             A new burst of interaction just occurred, summarized as:\n{}\n\n\
             Does the new burst continue the same task?\n\
             Answer with JSON only: {{\"verdict\": \"merge\" or \"split\", \
             \"description\": an updated one-paragraph description of the \
             activity if merging}}",
            current.description, event.summary
        )
    }
}

#[async_trait]
impl ContinuationJudge for LlmJudge {
    async fn judge(&self, current: &Activity, event: &Event) -> VerdictReply {
        let prompt = Self::prompt(current, event);

        let reply = tokio::time::timeout(self.call_timeout, self.client.generate(&prompt))
            .await
            .map_err(|_| SummaryError::Timeout)
            .and_then(|r| r);

        match reply {
            Ok(text) => parse_verdict(&text).unwrap_or_else(|| {
                warn!("continuation reply unparseable, defaulting to split");
                VerdictReply {
                    verdict: Verdict::Split,
                    description: None,
                }
            }),
            Err(e) => {
                warn!(error = %e, "continuation judgment failed, defaulting to split");
                VerdictReply {
                    verdict: Verdict::Split,
                    description: None,
                }
            }
        }
    }
}

/// Owns the single open activity and applies the merge decision rule.
pub struct ActivityAggregator {
    config: AggregatorConfig,
    judge: Arc<dyn ContinuationJudge>,
    current: Option<Activity>,
    /// (start_time, id) of the open activity's member events. Concurrent
    /// batches can reach the merge lock out of start_time order, so the
    /// id ordering is maintained here rather than by append order.
    members: Vec<(chrono::DateTime<chrono::Utc>, uuid::Uuid)>,
}

impl ActivityAggregator {
    pub fn new(config: AggregatorConfig, judge: Arc<dyn ContinuationJudge>) -> Self {
        Self {
            config,
            judge,
            current: None,
            members: Vec::new(),
        }
    }

    /// The open activity, if any.
    pub fn current(&self) -> Option<&Activity> {
        self.current.as_ref()
    }

    /// Apply the merge decision rule to one event.
    ///
    /// Decisions mutate the open-activity state, so events must arrive in
    /// non-decreasing start_time order and calls must not interleave.
    pub async fn merge(&mut self, event: &Event) -> MergeOutcome {
        let Some(current) = self.current.as_ref() else {
            return self.open_new(event, None);
        };

        let gap = event.start_time - current.end_time;
        let threshold = chrono::Duration::from_std(self.config.activity_gap_threshold)
            .unwrap_or_else(|_| chrono::Duration::seconds(180));

        if gap > threshold {
            debug!(gap_secs = gap.num_seconds(), "activity gap exceeded, splitting");
            let closed = self.close_current();
            return self.open_new(event, closed);
        }

        let reply = self.judge.judge(current, event).await;
        match reply.verdict {
            Verdict::Merge => {
                let pos = self
                    .members
                    .partition_point(|&(start, _)| start <= event.start_time);
                self.members.insert(pos, (event.start_time, event.id));

                let current = self.current.as_mut().expect("open activity checked above");
                current.append(event);
                current.source_event_ids = self.members.iter().map(|&(_, id)| id).collect();
                match reply.description {
                    Some(description) => current.description = description,
                    None => {
                        current.description.push('\n');
                        current.description.push_str(&event.summary);
                    }
                }
                debug!(activity_id = %current.id, event_id = %event.id, "merged event into open activity");
                MergeOutcome {
                    closed: None,
                    opened: false,
                    merged: true,
                }
            }
            Verdict::Split => {
                debug!("continuation judged split");
                let closed = self.close_current();
                self.open_new(event, closed)
            }
        }
    }

    /// Close the open activity unconditionally (stop or stale flush).
    pub fn flush(&mut self) -> Option<Activity> {
        let closed = self.close_current();
        if let Some(ref activity) = closed {
            info!(activity_id = %activity.id, events = activity.event_count(), "flushed open activity");
        }
        closed
    }

    /// Whether the open activity has been idle longer than the configured
    /// staleness bound.
    pub fn is_stale(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        let stale_after = chrono::Duration::from_std(self.config.stale_after)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));
        self.current
            .as_ref()
            .is_some_and(|a| now - a.end_time > stale_after)
    }

    fn open_new(&mut self, event: &Event, closed: Option<Activity>) -> MergeOutcome {
        let activity = Activity::open_from(event);
        info!(activity_id = %activity.id, "opened new activity");
        self.members = vec![(event.start_time, event.id)];
        self.current = Some(activity);
        MergeOutcome {
            closed,
            opened: true,
            merged: false,
        }
    }

    fn close_current(&mut self) -> Option<Activity> {
        self.members.clear();
        self.current.take().map(|mut activity| {
            activity.close();
            activity
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RawRecord;
    use chrono::{DateTime, Duration, Utc};

    fn event_at(base: DateTime<Utc>, start_secs: i64, span_secs: i64, summary: &str) -> Event {
        let records: Vec<RawRecord> = [start_secs, start_secs + span_secs]
            .iter()
            .map(|&s| {
                let mut r = RawRecord::keystroke("a");
                r.timestamp = base + Duration::seconds(s);
                r
            })
            .collect();
        Event::from_records(records, summary.to_string(), false)
    }

    fn aggregator(judge: Arc<dyn ContinuationJudge>) -> ActivityAggregator {
        ActivityAggregator::new(AggregatorConfig::default(), judge)
    }

    struct FixedJudge(Verdict);

    #[async_trait]
    impl ContinuationJudge for FixedJudge {
        async fn judge(&self, _current: &Activity, _event: &Event) -> VerdictReply {
            VerdictReply {
                verdict: self.0,
                description: None,
            }
        }
    }

    #[tokio::test]
    async fn test_first_event_opens_activity() {
        let mut agg = aggregator(Arc::new(GapOnlyJudge));
        let base = Utc::now();
        let event = event_at(base, 0, 5, "typing");

        let outcome = agg.merge(&event).await;
        assert!(outcome.opened);
        assert!(!outcome.merged);
        assert!(outcome.closed.is_none());
        assert_eq!(agg.current().unwrap().source_event_ids, vec![event.id]);
    }

    // Scenario: event 2 starts 5s after event 1 ends, judged continuous.
    #[tokio::test]
    async fn test_continuous_events_merge() {
        let mut agg = aggregator(Arc::new(FixedJudge(Verdict::Merge)));
        let base = Utc::now();
        let first = event_at(base, 0, 10, "typing a report");
        let second = event_at(base, 15, 5, "more typing");

        agg.merge(&first).await;
        let outcome = agg.merge(&second).await;

        assert!(outcome.merged);
        assert!(outcome.closed.is_none());
        let current = agg.current().unwrap();
        assert_eq!(current.source_event_ids, vec![first.id, second.id]);
        assert_eq!(current.end_time, second.end_time);
    }

    #[tokio::test]
    async fn test_gap_exceeded_closes_and_opens() {
        let mut agg = aggregator(Arc::new(FixedJudge(Verdict::Merge)));
        let base = Utc::now();
        let first = event_at(base, 0, 10, "typing");
        // 300s after the first event ends, beyond the 180s default
        let second = event_at(base, 310, 5, "reading");

        agg.merge(&first).await;
        let outcome = agg.merge(&second).await;

        assert!(outcome.opened);
        assert!(!outcome.merged);
        let closed = outcome.closed.expect("first activity should close");
        assert!(!closed.open);
        assert_eq!(closed.source_event_ids, vec![first.id]);
        assert_eq!(agg.current().unwrap().source_event_ids, vec![second.id]);
    }

    #[tokio::test]
    async fn test_split_verdict_closes_current() {
        let mut agg = aggregator(Arc::new(FixedJudge(Verdict::Split)));
        let base = Utc::now();
        let first = event_at(base, 0, 10, "writing code");
        let second = event_at(base, 15, 5, "watching a video");

        agg.merge(&first).await;
        let outcome = agg.merge(&second).await;

        assert!(outcome.opened);
        assert!(outcome.closed.is_some());
    }

    #[tokio::test]
    async fn test_judge_description_replaces_running_description() {
        struct Describing;

        #[async_trait]
        impl ContinuationJudge for Describing {
            async fn judge(&self, _current: &Activity, _event: &Event) -> VerdictReply {
                VerdictReply {
                    verdict: Verdict::Merge,
                    description: Some("Drafting the quarterly report.".to_string()),
                }
            }
        }

        let mut agg = aggregator(Arc::new(Describing));
        let base = Utc::now();
        agg.merge(&event_at(base, 0, 5, "typing")).await;
        agg.merge(&event_at(base, 10, 5, "more typing")).await;

        assert_eq!(
            agg.current().unwrap().description,
            "Drafting the quarterly report."
        );
    }

    // Concurrent batches can reach the merge lock out of start_time order:
    // an event that started earlier than the open activity's members may
    // arrive after them. Member id order must still follow start_time, and
    // the activity span must widen to cover the late arrival.
    #[tokio::test]
    async fn test_out_of_order_merge_keeps_start_time_ordering() {
        let mut agg = aggregator(Arc::new(FixedJudge(Verdict::Merge)));
        let base = Utc::now();
        let later = event_at(base, 60, 5, "typing");
        let earlier = event_at(base, 0, 5, "typing before");
        let middle = event_at(base, 30, 5, "typing between");

        agg.merge(&later).await;
        let outcome = agg.merge(&earlier).await;
        assert!(outcome.merged, "negative gap is within the threshold");
        agg.merge(&middle).await;

        let current = agg.current().unwrap();
        assert_eq!(
            current.source_event_ids,
            vec![earlier.id, middle.id, later.id]
        );
        assert_eq!(current.start_time, earlier.start_time);
        assert_eq!(current.end_time, later.end_time);
    }

    #[tokio::test]
    async fn test_flush_closes_open_activity() {
        let mut agg = aggregator(Arc::new(GapOnlyJudge));
        let base = Utc::now();
        agg.merge(&event_at(base, 0, 5, "typing")).await;

        let flushed = agg.flush().expect("open activity");
        assert!(!flushed.open);
        assert!(agg.current().is_none());
        assert!(agg.flush().is_none());
    }

    #[tokio::test]
    async fn test_staleness() {
        let mut agg = aggregator(Arc::new(GapOnlyJudge));
        let base = Utc::now() - Duration::seconds(1000);
        agg.merge(&event_at(base, 0, 5, "typing")).await;

        assert!(agg.is_stale(Utc::now()));
        assert!(!agg.is_stale(base + Duration::seconds(10)));
    }

    #[tokio::test]
    async fn test_llm_judge_defaults_to_split_on_garbage() {
        struct Garbage;

        #[async_trait]
        impl SummaryClient for Garbage {
            async fn generate(&self, _prompt: &str) -> Result<String, SummaryError> {
                Ok("no idea, sorry".to_string())
            }
        }

        let judge = LlmJudge::new(Arc::new(Garbage), std::time::Duration::from_millis(100));
        let base = Utc::now();
        let first = event_at(base, 0, 5, "typing");
        let activity = Activity::open_from(&first);
        let second = event_at(base, 10, 5, "typing more");

        let reply = judge.judge(&activity, &second).await;
        assert_eq!(reply.verdict, Verdict::Split);
    }
}
