//! Configuration for the tracewell pipeline.

use crate::buffer::OverflowPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Noise-reduction and event-boundary policy
    pub filter: FilterConfig,

    /// Summarization retry/timeout policy
    pub summarizer: SummarizerConfig,

    /// Activity merge policy
    pub aggregator: AggregatorConfig,

    /// Intake buffer policy
    pub buffer: BufferConfig,

    /// Summarization service endpoint
    pub llm: LlmConfig,

    /// Path for storing persisted events/activities
    pub data_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tracewell");

        Self {
            filter: FilterConfig::default(),
            summarizer: SummarizerConfig::default(),
            aggregator: AggregatorConfig::default(),
            buffer: BufferConfig::default(),
            llm: LlmConfig::default(),
            data_path: data_dir,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .map_err(|e| ConfigError::Io(e.to_string()))?;
            let config: Config =
                serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }

        let content =
            serde_json::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;

        std::fs::write(&config_path, content).map_err(|e| ConfigError::Io(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tracewell")
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Ok(())
    }
}

/// Noise-reduction and event-boundary policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Gap between surviving records that starts a new candidate event
    #[serde(with = "duration_serde")]
    pub event_gap_threshold: Duration,

    /// Pointer Move records below this magnitude (pixels) are noise
    pub pointer_move_min_magnitude: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            event_gap_threshold: Duration::from_secs(10),
            pointer_move_min_magnitude: 2.0,
        }
    }
}

/// Summarization retry/timeout policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizerConfig {
    /// Per-call timeout for the summarization service
    #[serde(with = "duration_serde")]
    pub call_timeout: Duration,

    /// Retries after the first failed call
    pub max_retries: u32,

    /// Backoff before the first retry; doubles per attempt
    #[serde(with = "duration_serde")]
    pub backoff_base: Duration,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            max_retries: 2,
            backoff_base: Duration::from_millis(500),
        }
    }
}

/// Activity merge policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Gap between an event and the open activity that forces a split
    #[serde(with = "duration_serde")]
    pub activity_gap_threshold: Duration,

    /// How often the background task checks for a stale open activity
    #[serde(with = "duration_serde")]
    pub flush_interval: Duration,

    /// How long the open activity may sit idle before the periodic flush
    /// closes it
    #[serde(with = "duration_serde")]
    pub stale_after: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            activity_gap_threshold: Duration::from_secs(180),
            flush_interval: Duration::from_secs(30),
            stale_after: Duration::from_secs(300),
        }
    }
}

/// Intake buffer policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Maximum records held while awaiting processing
    pub capacity: usize,

    /// What to do when the buffer is full
    pub overflow: OverflowPolicy,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            overflow: OverflowPolicy::DropOldest,
        }
    }
}

/// Summarization service endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of an Ollama-style generate endpoint
    pub base_url: String,

    /// Model name to request
    pub model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: std::env::var("TRACEWELL_LLM_HOST")
                .unwrap_or_else(|_| "http://localhost:11434".to_string()),
            model: "llama3.2".to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    Serialize(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {e}"),
            ConfigError::Parse(e) => write!(f, "Parse error: {e}"),
            ConfigError::Serialize(e) => write!(f, "Serialize error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration.
pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
