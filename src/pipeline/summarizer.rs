//! Event summarization with bounded retries and a deterministic fallback.
//!
//! One external call per candidate group, wrapped in a per-call timeout and
//! retried with exponential backoff on transient failure. When the service
//! stays unreachable or keeps replying garbage, the group still becomes an
//! event: the summary degrades to a deterministic digest of the group's
//! statistics and the event is flagged as `fallback`.

use crate::config::SummarizerConfig;
use crate::llm::{SummaryClient, SummaryError};
use crate::model::Event;
use crate::record::{PointerAction, RawRecord, RecordKind, RecordPayload};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Turns candidate record groups into summarized events.
pub struct EventSummarizer {
    client: Arc<dyn SummaryClient>,
    config: SummarizerConfig,
}

impl EventSummarizer {
    pub fn new(client: Arc<dyn SummaryClient>, config: SummarizerConfig) -> Self {
        Self { client, config }
    }

    /// Summarize one candidate group into an `Event`.
    ///
    /// # Panics
    ///
    /// Panics if `group` is empty; the filter never emits empty groups, so
    /// an empty group here is a programming error rather than a runtime
    /// condition to recover from.
    pub async fn summarize(&self, group: Vec<RawRecord>) -> Event {
        assert!(!group.is_empty(), "cannot summarize an empty record group");

        let digest = GroupDigest::from_records(&group);
        let prompt = digest.prompt();

        match self.generate_with_retry(&prompt).await {
            Ok(summary) => Event::from_records(group, summary, false),
            Err(e) => {
                warn!(error = %e, "summarization exhausted, using fallback summary");
                let summary = digest.fallback_summary();
                Event::from_records(group, summary, true)
            }
        }
    }

    /// One bounded call plus up to `max_retries` retries with exponential
    /// backoff. Non-transient failures are not retried.
    async fn generate_with_retry(&self, prompt: &str) -> Result<String, SummaryError> {
        let mut backoff = self.config.backoff_base;
        let mut attempt = 0u32;

        loop {
            let result = tokio::time::timeout(self.config.call_timeout, self.client.generate(prompt))
                .await
                .map_err(|_| SummaryError::Timeout)
                .and_then(|r| r);

            match result {
                Ok(summary) => return Ok(summary),
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    attempt += 1;
                    debug!(attempt, error = %e, "transient summarization failure, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Structured digest of a record group, used both as prompt material and as
/// the deterministic fallback summary.
struct GroupDigest {
    start: chrono::DateTime<chrono::Utc>,
    end: chrono::DateTime<chrono::Utc>,
    kind_counts: BTreeMap<RecordKind, usize>,
    typed_text: String,
    click_count: usize,
    screenshot_refs: Vec<String>,
}

impl GroupDigest {
    fn from_records(group: &[RawRecord]) -> Self {
        let mut kind_counts: BTreeMap<RecordKind, usize> = BTreeMap::new();
        let mut typed_text = String::new();
        let mut click_count = 0;
        let mut screenshot_refs = Vec::new();

        for record in group {
            *kind_counts.entry(record.kind()).or_insert(0) += 1;
            match &record.payload {
                RecordPayload::Keyboard { key, .. } => {
                    if key.chars().count() == 1 {
                        typed_text.push_str(key);
                    } else if key == "Space" {
                        typed_text.push(' ');
                    } else {
                        typed_text.push_str(&format!("<{key}>"));
                    }
                }
                RecordPayload::Pointer { action, .. } => {
                    if matches!(action, PointerAction::LeftClick | PointerAction::RightClick) {
                        click_count += 1;
                    }
                }
                RecordPayload::Screenshot { reference } => {
                    screenshot_refs.push(reference.clone());
                }
            }
        }

        Self {
            start: group[0].timestamp,
            end: group[group.len() - 1].timestamp,
            kind_counts,
            typed_text,
            click_count,
            screenshot_refs,
        }
    }

    fn kind_line(&self) -> String {
        self.kind_counts
            .iter()
            .map(|(kind, count)| format!("{kind}: {count}"))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Prompt sent to the summarization service.
    fn prompt(&self) -> String {
        let mut prompt = format!(
            "Below is a burst of computer interaction telemetry from {} to {}.\n\
             Record counts: {}.\n",
            self.start.format("%H:%M:%S"),
            self.end.format("%H:%M:%S"),
            self.kind_line(),
        );

        if !self.typed_text.is_empty() {
            prompt.push_str(&format!("Typed content: {}\n", self.typed_text));
        }
        if self.click_count > 0 {
            prompt.push_str(&format!("Pointer clicks: {}\n", self.click_count));
        }
        if !self.screenshot_refs.is_empty() {
            prompt.push_str(&format!(
                "Screen captures taken: {}\n",
                self.screenshot_refs.len()
            ));
        }

        prompt.push_str(
            "\nDescribe in one or two sentences what the user was doing. \
             Focus on the task, not individual keystrokes or clicks.",
        );
        prompt
    }

    /// Deterministic summary derived only from group statistics.
    fn fallback_summary(&self) -> String {
        let span_secs = (self.end - self.start).num_seconds().max(0);
        let mut parts = vec![format!(
            "Interaction burst over {span_secs}s ({})",
            self.kind_line()
        )];

        if !self.typed_text.is_empty() {
            let preview: String = self.typed_text.chars().take(60).collect();
            parts.push(format!("typed \"{preview}\""));
        }
        if self.click_count > 0 {
            parts.push(format!("{} clicks", self.click_count));
        }
        if !self.screenshot_refs.is_empty() {
            parts.push(format!("{} screen captures", self.screenshot_refs.len()));
        }

        parts.join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Client scripted to fail a fixed number of times before succeeding.
    struct FlakyClient {
        failures_before_success: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl SummaryClient for FlakyClient {
        async fn generate(&self, _prompt: &str) -> Result<String, SummaryError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                Err(SummaryError::Network("connection refused".into()))
            } else {
                Ok("Writing an email.".to_string())
            }
        }
    }

    struct AlwaysDown;

    #[async_trait]
    impl SummaryClient for AlwaysDown {
        async fn generate(&self, _prompt: &str) -> Result<String, SummaryError> {
            Err(SummaryError::Network("connection refused".into()))
        }
    }

    fn fast_config() -> SummarizerConfig {
        SummarizerConfig {
            call_timeout: std::time::Duration::from_millis(200),
            max_retries: 2,
            backoff_base: std::time::Duration::from_millis(1),
        }
    }

    fn typing_group(n: usize) -> Vec<RawRecord> {
        let base = chrono::Utc::now();
        (0..n)
            .map(|i| {
                let mut r = RawRecord::keystroke("a");
                r.timestamp = base + chrono::Duration::milliseconds(i as i64 * 100);
                r
            })
            .collect()
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let client = Arc::new(FlakyClient {
            failures_before_success: 2,
            calls: AtomicU32::new(0),
        });
        let summarizer = EventSummarizer::new(client.clone(), fast_config());

        let event = summarizer.summarize(typing_group(3)).await;
        assert!(!event.fallback);
        assert_eq!(event.summary, "Writing an email.");
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fall_back() {
        let summarizer = EventSummarizer::new(Arc::new(AlwaysDown), fast_config());

        let event = summarizer.summarize(typing_group(5)).await;
        assert!(event.fallback);
        assert!(event.summary.contains("keyboard: 5"));
        assert_eq!(event.record_count(), 5);
    }

    #[tokio::test]
    async fn test_hung_call_is_bounded() {
        struct Hangs;

        #[async_trait]
        impl SummaryClient for Hangs {
            async fn generate(&self, _prompt: &str) -> Result<String, SummaryError> {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                Ok("unreachable".to_string())
            }
        }

        let config = SummarizerConfig {
            call_timeout: std::time::Duration::from_millis(20),
            max_retries: 1,
            backoff_base: std::time::Duration::from_millis(1),
        };
        let summarizer = EventSummarizer::new(Arc::new(Hangs), config);

        let started = std::time::Instant::now();
        let event = summarizer.summarize(typing_group(2)).await;
        assert!(event.fallback);
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
    }

    #[tokio::test]
    #[should_panic(expected = "empty record group")]
    async fn test_empty_group_is_contract_violation() {
        let summarizer = EventSummarizer::new(Arc::new(AlwaysDown), fast_config());
        let _ = summarizer.summarize(vec![]).await;
    }

    #[test]
    fn test_digest_prompt_contents() {
        let base = chrono::Utc::now();
        let mut group = typing_group(3);
        let mut shot = RawRecord::screenshot("cap-01.png");
        shot.timestamp = base + chrono::Duration::seconds(1);
        group.push(shot);
        group.sort_by_key(|r| r.timestamp);

        let digest = GroupDigest::from_records(&group);
        let prompt = digest.prompt();
        assert!(prompt.contains("keyboard: 3"));
        assert!(prompt.contains("Screen captures taken: 1"));
        assert!(prompt.contains("Typed content: aaa"));
    }

    #[test]
    fn test_fallback_summary_is_deterministic() {
        let group = typing_group(4);
        let digest_a = GroupDigest::from_records(&group);
        let digest_b = GroupDigest::from_records(&group);
        assert_eq!(digest_a.fallback_summary(), digest_b.fallback_summary());
    }
}
