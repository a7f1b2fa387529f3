//! Pipeline orchestration and lifecycle.
//!
//! The coordinator drives Filter → Summarize → Merge for each incoming
//! batch. Filtering is pure; summarization of independent candidate groups
//! runs concurrently; the merge step rejoins a single serialized path, in
//! event start_time order, because every merge decision mutates the one
//! open-activity state.

use crate::config::Config;
use crate::llm::SummaryClient;
use crate::model::{Activity, Event};
use crate::pipeline::aggregator::{ActivityAggregator, ContinuationJudge};
use crate::pipeline::filter::EventFilter;
use crate::pipeline::summarizer::EventSummarizer;
use crate::pipeline::{PipelineError, PipelineState};
use crate::record::RawRecord;
use crate::stats::{PipelineStats, SharedStats, StatsSnapshot};
use crate::store::PersistenceGateway;
use futures::future::join_all;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// What one `process_raw_records` call produced.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Events created from this batch, in start_time order
    pub events: Vec<Event>,
    /// Activities created, updated, or closed by this batch
    pub activities: Vec<Activity>,
    /// Whether any event merged into an already-open activity
    pub merged: bool,
}

/// Orchestrates the full pipeline and owns its lifecycle.
pub struct PipelineCoordinator {
    filter: EventFilter,
    summarizer: EventSummarizer,
    /// The serialized critical resource: all merge decisions run under this
    /// lock, so no two can interleave even across concurrent batches.
    merge_state: Arc<tokio::sync::Mutex<ActivityAggregator>>,
    gateway: Arc<dyn PersistenceGateway>,
    stats: SharedStats,
    state: Mutex<PipelineState>,
    flush_task: Mutex<Option<FlushTask>>,
    flush_interval: Duration,
    stop_grace: Duration,
}

struct FlushTask {
    handle: tokio::task::JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl PipelineCoordinator {
    pub fn new(
        config: &Config,
        client: Arc<dyn SummaryClient>,
        judge: Arc<dyn ContinuationJudge>,
        gateway: Arc<dyn PersistenceGateway>,
    ) -> Self {
        // Stop must outlast the longest possible in-flight summarization
        // (initial call plus all retries), so the open activity can always
        // be flushed rather than abandoned.
        let worst_case_call = config.summarizer.call_timeout
            * (config.summarizer.max_retries + 1)
            + config.summarizer.backoff_base * (1u32 << config.summarizer.max_retries.min(16));

        Self {
            filter: EventFilter::new(config.filter.clone()),
            summarizer: EventSummarizer::new(client, config.summarizer.clone()),
            merge_state: Arc::new(tokio::sync::Mutex::new(ActivityAggregator::new(
                config.aggregator.clone(),
                judge,
            ))),
            gateway,
            stats: Arc::new(PipelineStats::new()),
            state: Mutex::new(PipelineState::Stopped),
            flush_task: Mutex::new(None),
            flush_interval: config.aggregator.flush_interval,
            stop_grace: worst_case_call + Duration::from_secs(1),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PipelineState {
        *self.state.lock().expect("state lock poisoned")
    }

    /// Start the pipeline and its background stale-activity flusher.
    ///
    /// Idempotent when already running.
    pub fn start(&self) -> Result<(), PipelineError> {
        {
            let mut state = self.state.lock().expect("state lock poisoned");
            match *state {
                PipelineState::Running => return Ok(()),
                PipelineState::Stopped => *state = PipelineState::Starting,
                other => {
                    return Err(PipelineError::InvalidState {
                        operation: "start",
                        state: other,
                    })
                }
            }
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let merge_state = Arc::clone(&self.merge_state);
        let gateway = Arc::clone(&self.gateway);
        let interval = self.flush_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        Self::flush_if_stale(&merge_state, gateway.as_ref()).await;
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });

        *self.flush_task.lock().expect("flush task lock poisoned") = Some(FlushTask {
            handle,
            shutdown: shutdown_tx,
        });

        *self.state.lock().expect("state lock poisoned") = PipelineState::Running;
        info!("pipeline started");
        Ok(())
    }

    /// Run one batch of raw records through the full pipeline.
    ///
    /// Summarization of independent candidate groups overlaps; merge
    /// decisions are applied strictly in event start_time order under the
    /// merge lock. A persistence failure propagates without rolling back
    /// in-memory state; retrying the call is safe because all writes upsert
    /// by id.
    pub async fn process_raw_records(
        &self,
        batch: Vec<RawRecord>,
    ) -> Result<BatchOutcome, PipelineError> {
        let state = self.state();
        if state != PipelineState::Running {
            return Err(PipelineError::InvalidState {
                operation: "process records",
                state,
            });
        }

        self.stats.record_records_processed(batch.len() as u64);

        let filtered = self.filter.filter(&batch);
        self.stats
            .record_records_discarded(filtered.dropped_total() as u64);

        if filtered.groups.is_empty() {
            return Ok(BatchOutcome::default());
        }

        // Summaries for independent groups may complete out of order
        let mut events: Vec<Event> = join_all(
            filtered
                .groups
                .into_iter()
                .map(|group| self.summarizer.summarize(group)),
        )
        .await;
        events.sort_by_key(|e| e.start_time);

        // Serialized section: merge decisions and their persistence
        let mut merge_state = self.merge_state.lock().await;

        // Stop may have flushed the open activity while summarization was
        // in flight; merging now would reopen an activity nothing will
        // ever close again. The state check before summarization is not
        // enough because that phase runs outside the merge lock.
        let state = self.state();
        if state != PipelineState::Running {
            warn!(%state, "batch finished summarizing after shutdown, discarding");
            return Err(PipelineError::InvalidState {
                operation: "process records",
                state,
            });
        }

        let mut outcome = BatchOutcome {
            events: Vec::with_capacity(events.len()),
            ..Default::default()
        };

        for event in events {
            self.stats.record_event_created(event.fallback);
            self.gateway.insert_event(&event).await?;

            let decision = merge_state.merge(&event).await;
            if let Some(closed) = decision.closed {
                self.gateway.update_activity(&closed).await?;
                outcome.activities.push(closed);
            }
            if decision.opened {
                self.stats.record_activity_created();
                let opened = merge_state
                    .current()
                    .expect("merge just opened an activity")
                    .clone();
                self.gateway.insert_activity(&opened).await?;
            } else if decision.merged {
                self.stats.record_activity_merged();
                outcome.merged = true;
                let updated = merge_state
                    .current()
                    .expect("merge extended the open activity")
                    .clone();
                self.gateway.update_activity(&updated).await?;
            }

            outcome.events.push(event);
        }

        // Report the open activity's latest shape once per batch
        if let Some(current) = merge_state.current() {
            outcome.activities.push(current.clone());
        }

        Ok(outcome)
    }

    /// Most recent events, newest first. Read-through; no side effects.
    pub async fn get_recent_events(&self, limit: usize) -> Result<Vec<Event>, PipelineError> {
        Ok(self.gateway.recent_events(limit).await?)
    }

    /// Most recent activities, newest first. Read-through; no side effects.
    pub async fn get_recent_activities(
        &self,
        limit: usize,
    ) -> Result<Vec<Activity>, PipelineError> {
        Ok(self.gateway.recent_activities(limit).await?)
    }

    /// Snapshot of the monotonic pipeline counters.
    pub fn get_stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Human-readable counters for CLI display.
    pub fn stats_summary(&self) -> String {
        self.stats.summary()
    }

    /// Stop the pipeline: flush and persist the open activity, then stop
    /// the background task.
    ///
    /// Waits up to a grace period for in-flight batches (every in-flight
    /// summarization is itself time-bounded, so the wait terminates); the
    /// open activity is closed with whatever description it has and its
    /// persistence outcome is reported, never silently dropped.
    pub async fn stop(&self) -> Result<(), PipelineError> {
        {
            let mut state = self.state.lock().expect("state lock poisoned");
            match *state {
                PipelineState::Stopped => return Ok(()),
                PipelineState::Running => *state = PipelineState::Stopping,
                other => {
                    return Err(PipelineError::InvalidState {
                        operation: "stop",
                        state: other,
                    })
                }
            }
        }

        // Stop the periodic flusher first so it cannot race the final flush
        if let Some(task) = self.flush_task.lock().expect("flush task lock poisoned").take() {
            let _ = task.shutdown.send(true);
            task.handle.abort();
        }

        let flush_result = match tokio::time::timeout(self.stop_grace, self.merge_state.lock()).await
        {
            Ok(mut merge_state) => match merge_state.flush() {
                Some(closed) => self.gateway.update_activity(&closed).await,
                None => Ok(()),
            },
            Err(_) => {
                // In-flight work exceeded the grace period; the merge lock is
                // held by a batch whose summarization timeouts have not yet
                // fired. Wait it out rather than abandoning the activity.
                warn!("stop grace period elapsed, waiting for in-flight batch");
                let mut merge_state = self.merge_state.lock().await;
                match merge_state.flush() {
                    Some(closed) => self.gateway.update_activity(&closed).await,
                    None => Ok(()),
                }
            }
        };

        *self.state.lock().expect("state lock poisoned") = PipelineState::Stopped;

        match flush_result {
            Ok(()) => {
                info!("pipeline stopped");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "failed to persist flushed activity during stop");
                Err(e.into())
            }
        }
    }

    async fn flush_if_stale(
        merge_state: &tokio::sync::Mutex<ActivityAggregator>,
        gateway: &dyn PersistenceGateway,
    ) {
        let mut merge_state = merge_state.lock().await;
        if !merge_state.is_stale(chrono::Utc::now()) {
            return;
        }
        if let Some(closed) = merge_state.flush() {
            info!(activity_id = %closed.id, "closing stale open activity");
            if let Err(e) = gateway.update_activity(&closed).await {
                error!(error = %e, "failed to persist stale-flushed activity");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::llm::SummaryError;
    use crate::pipeline::aggregator::GapOnlyJudge;
    use crate::store::MemoryGateway;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};

    struct EchoClient;

    #[async_trait]
    impl SummaryClient for EchoClient {
        async fn generate(&self, _prompt: &str) -> Result<String, SummaryError> {
            Ok("Typing in an editor.".to_string())
        }
    }

    fn fast_config() -> Config {
        let mut config = Config::default();
        config.summarizer.call_timeout = Duration::from_millis(200);
        config.summarizer.backoff_base = Duration::from_millis(1);
        config
    }

    fn coordinator_with(
        client: Arc<dyn SummaryClient>,
        gateway: Arc<MemoryGateway>,
    ) -> PipelineCoordinator {
        PipelineCoordinator::new(&fast_config(), client, Arc::new(GapOnlyJudge), gateway)
    }

    fn typing_batch(n: i64) -> Vec<RawRecord> {
        let base = Utc::now();
        (0..n)
            .map(|i| {
                let mut r = RawRecord::keystroke("a");
                r.timestamp = base + ChronoDuration::milliseconds(i * 500);
                r
            })
            .collect()
    }

    #[tokio::test]
    async fn test_process_requires_running() {
        let coordinator = coordinator_with(Arc::new(EchoClient), Arc::new(MemoryGateway::new()));

        let err = coordinator
            .process_raw_records(typing_batch(3))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let coordinator = coordinator_with(Arc::new(EchoClient), Arc::new(MemoryGateway::new()));
        coordinator.start().unwrap();
        coordinator.start().unwrap();
        assert_eq!(coordinator.state(), PipelineState::Running);
        coordinator.stop().await.unwrap();
        assert_eq!(coordinator.state(), PipelineState::Stopped);
    }

    #[tokio::test]
    async fn test_batch_produces_event_and_activity() {
        let gateway = Arc::new(MemoryGateway::new());
        let coordinator = coordinator_with(Arc::new(EchoClient), gateway.clone());
        coordinator.start().unwrap();

        let outcome = coordinator
            .process_raw_records(typing_batch(11))
            .await
            .unwrap();

        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.events[0].record_count(), 11);
        assert!(!outcome.merged);
        assert_eq!(gateway.event_count(), 1);
        assert_eq!(gateway.activity_count(), 1);

        let stats = coordinator.get_stats();
        assert_eq!(stats.records_processed, 11);
        assert_eq!(stats.events_created, 1);
        assert_eq!(stats.activities_created, 1);

        coordinator.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_second_batch_merges() {
        let gateway = Arc::new(MemoryGateway::new());
        let coordinator = coordinator_with(Arc::new(EchoClient), gateway.clone());
        coordinator.start().unwrap();

        coordinator
            .process_raw_records(typing_batch(5))
            .await
            .unwrap();
        let outcome = coordinator
            .process_raw_records(typing_batch(5))
            .await
            .unwrap();

        assert!(outcome.merged);
        assert_eq!(gateway.activity_count(), 1);
        assert_eq!(coordinator.get_stats().activities_merged, 1);

        coordinator.stop().await.unwrap();
    }

    // Scenario: service down for every call in the batch; events still come
    // out, with fallback summaries and a well-defined merge decision.
    #[tokio::test]
    async fn test_unreachable_service_degrades() {
        struct Down;

        #[async_trait]
        impl SummaryClient for Down {
            async fn generate(&self, _prompt: &str) -> Result<String, SummaryError> {
                Err(SummaryError::Network("connection refused".into()))
            }
        }

        let gateway = Arc::new(MemoryGateway::new());
        let coordinator = coordinator_with(Arc::new(Down), gateway.clone());
        coordinator.start().unwrap();

        let outcome = coordinator
            .process_raw_records(typing_batch(6))
            .await
            .unwrap();

        assert_eq!(outcome.events.len(), 1);
        assert!(outcome.events[0].fallback);
        assert!(!outcome.merged);
        assert_eq!(coordinator.get_stats().fallback_summaries, 1);

        coordinator.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_flushes_open_activity() {
        let gateway = Arc::new(MemoryGateway::new());
        let coordinator = coordinator_with(Arc::new(EchoClient), gateway.clone());
        coordinator.start().unwrap();
        coordinator
            .process_raw_records(typing_batch(3))
            .await
            .unwrap();

        coordinator.stop().await.unwrap();

        let activities = gateway.recent_activities(10).await.unwrap();
        assert_eq!(activities.len(), 1);
        assert!(!activities[0].open, "stop must close the open activity");
    }

    // A batch can pass the Running check and still be summarizing when
    // stop runs. It must not reach the merge step afterwards: that would
    // open and persist an activity nothing will ever close.
    #[tokio::test]
    async fn test_stop_during_inflight_batch_leaves_nothing_open() {
        struct Slow;

        #[async_trait]
        impl SummaryClient for Slow {
            async fn generate(&self, _prompt: &str) -> Result<String, SummaryError> {
                tokio::time::sleep(Duration::from_millis(150)).await;
                Ok("Typing in an editor.".to_string())
            }
        }

        let gateway = Arc::new(MemoryGateway::new());
        let coordinator = Arc::new(coordinator_with(Arc::new(Slow), gateway.clone()));
        coordinator.start().unwrap();

        let inflight = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.process_raw_records(typing_batch(3)).await })
        };

        // Let the batch get past the state check and into summarization
        tokio::time::sleep(Duration::from_millis(50)).await;
        coordinator.stop().await.unwrap();

        let result = inflight.await.unwrap();
        assert!(matches!(result, Err(PipelineError::InvalidState { .. })));

        let open = gateway
            .recent_activities(usize::MAX)
            .await
            .unwrap()
            .iter()
            .filter(|a| a.open)
            .count();
        assert_eq!(open, 0, "a post-stop batch must not reopen an activity");
        assert_eq!(coordinator.get_stats().events_created, 0);
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let coordinator = coordinator_with(Arc::new(EchoClient), Arc::new(MemoryGateway::new()));
        coordinator.start().unwrap();

        let outcome = coordinator.process_raw_records(vec![]).await.unwrap();
        assert!(outcome.events.is_empty());
        assert!(outcome.activities.is_empty());
        assert!(!outcome.merged);

        coordinator.stop().await.unwrap();
    }
}
