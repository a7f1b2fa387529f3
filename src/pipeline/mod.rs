//! The processing pipeline: filtering, summarization orchestration, and
//! activity merge decisions.
//!
//! Raw record batches flow through `EventFilter` (pure grouping),
//! `EventSummarizer` (bounded external calls with fallback), and
//! `ActivityAggregator` (serialized merge decisions against the single open
//! activity), all driven by `PipelineCoordinator`.

pub mod aggregator;
pub mod coordinator;
pub mod filter;
pub mod summarizer;

pub use aggregator::{ActivityAggregator, ContinuationJudge, GapOnlyJudge, LlmJudge, MergeOutcome};
pub use coordinator::{BatchOutcome, PipelineCoordinator};
pub use filter::EventFilter;
pub use summarizer::EventSummarizer;

use serde::{Deserialize, Serialize};

/// Coordinator lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineState::Stopped => write!(f, "stopped"),
            PipelineState::Starting => write!(f, "starting"),
            PipelineState::Running => write!(f, "running"),
            PipelineState::Stopping => write!(f, "stopping"),
        }
    }
}

/// Pipeline operation failures.
#[derive(Debug)]
pub enum PipelineError {
    /// The operation is not valid in the coordinator's current state
    InvalidState {
        operation: &'static str,
        state: PipelineState,
    },
    /// A persistence call failed; in-memory state is not rolled back
    Store(crate::store::StoreError),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::InvalidState { operation, state } => {
                write!(f, "cannot {operation} while pipeline is {state}")
            }
            PipelineError::Store(e) => write!(f, "persistence failure: {e}"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<crate::store::StoreError> for PipelineError {
    fn from(e: crate::store::StoreError) -> Self {
        PipelineError::Store(e)
    }
}
