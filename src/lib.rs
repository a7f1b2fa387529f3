//! Tracewell - distills raw interaction telemetry into semantic records.
//!
//! This library ingests batches of low-level interaction telemetry
//! (keystrokes, pointer actions, periodic screen captures) and progressively
//! distills them into **events** (bounded bursts of related raw activity)
//! and **activities** (sequences of events judged to form one continuous
//! task), summarized through an external language-model service that is
//! treated as slow and fallible throughout.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Processing Pipeline                       │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌──────────┐   ┌────────────┐   ┌────────────┐             │
//! │  │  Filter  │──▶│ Summarizer │──▶│ Aggregator │             │
//! │  │ (noise + │   │ (LLM call, │   │ (merge or  │             │
//! │  │  gaps)   │   │  fallback) │   │  split)    │             │
//! │  └──────────┘   └────────────┘   └────────────┘             │
//! │        ▲               │                │                   │
//! │        │               ▼                ▼                   │
//! │  ┌──────────┐   ┌────────────┐   ┌────────────┐             │
//! │  │  Record  │   │  Summary   │   │Persistence │             │
//! │  │  Buffer  │   │  Service   │   │  Gateway   │             │
//! │  └──────────┘   └────────────┘   └────────────┘             │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Guarantees
//!
//! - Every raw record is either grouped into exactly one event or dropped
//!   by a documented noise rule, never lost from ambiguity.
//! - At most one activity is open at any instant; merge decisions run in a
//!   single serialized sequence even across concurrent batches.
//! - An unreachable summarization service degrades summaries, never drops
//!   events: the pipeline stays available with deterministic fallback text.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tracewell::config::Config;
//! use tracewell::llm::HttpSummaryClient;
//! use tracewell::pipeline::{GapOnlyJudge, PipelineCoordinator};
//! use tracewell::record::RawRecord;
//! use tracewell::store::MemoryGateway;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let client = Arc::new(HttpSummaryClient::new(&config.llm)?);
//! let coordinator = PipelineCoordinator::new(
//!     &config,
//!     client,
//!     Arc::new(GapOnlyJudge),
//!     Arc::new(MemoryGateway::new()),
//! );
//!
//! coordinator.start()?;
//! let outcome = coordinator
//!     .process_raw_records(vec![RawRecord::keystroke("h"), RawRecord::keystroke("i")])
//!     .await?;
//! println!("created {} events", outcome.events.len());
//! coordinator.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod config;
pub mod llm;
pub mod model;
pub mod pipeline;
pub mod record;
pub mod stats;
pub mod store;

// Re-export key types at crate root for convenience
pub use buffer::{OverflowPolicy, PushOutcome, RecordBuffer};
pub use config::Config;
pub use llm::{HttpSummaryClient, SummaryClient, SummaryError};
pub use model::{Activity, Event};
pub use pipeline::{
    ActivityAggregator, BatchOutcome, ContinuationJudge, EventFilter, EventSummarizer,
    GapOnlyJudge, LlmJudge, PipelineCoordinator, PipelineError, PipelineState,
};
pub use record::{RawRecord, RecordKind, RecordPayload};
pub use stats::{PipelineStats, SharedStats, StatsSnapshot};
pub use store::{JsonlGateway, MemoryGateway, PersistenceGateway, StoreError};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
