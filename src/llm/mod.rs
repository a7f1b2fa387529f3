//! Summarization service boundary.
//!
//! The pipeline treats the summarization capability as slow and fallible:
//! every call is bounded by a timeout upstream, and callers must be prepared
//! for any `SummaryError` (or well-formed garbage in the reply text).

pub mod http;
pub mod parse;

pub use http::HttpSummaryClient;

use async_trait::async_trait;

/// Client for the external summarization service.
///
/// Implementations perform exactly one service call per `generate`
/// invocation; retry policy lives in the summarizer, not here.
#[async_trait]
pub trait SummaryClient: Send + Sync {
    /// Turn a structured prompt into a natural-language reply.
    async fn generate(&self, prompt: &str) -> Result<String, SummaryError>;
}

/// Summarization service call failures.
#[derive(Debug, Clone)]
pub enum SummaryError {
    /// Network-level failure reaching the service
    Network(String),
    /// The service did not respond within the bounded call timeout
    Timeout,
    /// The service responded but the reply was unusable (empty, wrong shape)
    Unusable(String),
}

impl SummaryError {
    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, SummaryError::Network(_) | SummaryError::Timeout)
    }
}

impl std::fmt::Display for SummaryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SummaryError::Network(msg) => write!(f, "summarization network error: {msg}"),
            SummaryError::Timeout => write!(f, "summarization call timed out"),
            SummaryError::Unusable(msg) => write!(f, "unusable summarization reply: {msg}"),
        }
    }
}

impl std::error::Error for SummaryError {}
