//! Raw telemetry record types.
//!
//! A `RawRecord` is one timestamped unit of captured input telemetry as
//! pushed by the capture source. Records are immutable once created; the
//! pipeline only groups, drops, or references them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kind of telemetry a record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Keyboard,
    Pointer,
    Screenshot,
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordKind::Keyboard => write!(f, "keyboard"),
            RecordKind::Pointer => write!(f, "pointer"),
            RecordKind::Screenshot => write!(f, "screenshot"),
        }
    }
}

/// Pointer action classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointerAction {
    Move,
    LeftClick,
    RightClick,
    Scroll,
}

/// Kind-specific payload of a raw record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordPayload {
    Keyboard {
        /// The key as reported by the capture source (e.g. "a", "Enter").
        key: String,
        /// Whether the OS flagged this as an auto-repeat of a held key.
        repeat: bool,
    },
    Pointer {
        action: PointerAction,
        /// Movement magnitude for Move actions, in pixels.
        #[serde(skip_serializing_if = "Option::is_none")]
        delta_magnitude: Option<f64>,
    },
    Screenshot {
        /// Opaque reference to the stored capture (path or object key).
        reference: String,
    },
}

/// One timestamped unit of captured input telemetry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    /// When the underlying input occurred.
    pub timestamp: DateTime<Utc>,
    /// Kind-specific data.
    pub payload: RecordPayload,
}

impl RawRecord {
    pub fn new(timestamp: DateTime<Utc>, payload: RecordPayload) -> Self {
        Self { timestamp, payload }
    }

    /// Create a keyboard record stamped with the current time.
    pub fn keystroke(key: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            payload: RecordPayload::Keyboard {
                key: key.into(),
                repeat: false,
            },
        }
    }

    /// Create a pointer movement record stamped with the current time.
    pub fn pointer_move(delta_x: f64, delta_y: f64) -> Self {
        let magnitude = (delta_x * delta_x + delta_y * delta_y).sqrt();
        Self {
            timestamp: Utc::now(),
            payload: RecordPayload::Pointer {
                action: PointerAction::Move,
                delta_magnitude: Some(magnitude),
            },
        }
    }

    /// Create a click record stamped with the current time.
    pub fn click(is_left: bool) -> Self {
        Self {
            timestamp: Utc::now(),
            payload: RecordPayload::Pointer {
                action: if is_left {
                    PointerAction::LeftClick
                } else {
                    PointerAction::RightClick
                },
                delta_magnitude: None,
            },
        }
    }

    /// Create a screenshot marker record stamped with the current time.
    pub fn screenshot(reference: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            payload: RecordPayload::Screenshot {
                reference: reference.into(),
            },
        }
    }

    pub fn kind(&self) -> RecordKind {
        match self.payload {
            RecordPayload::Keyboard { .. } => RecordKind::Keyboard,
            RecordPayload::Pointer { .. } => RecordKind::Pointer,
            RecordPayload::Screenshot { .. } => RecordKind::Screenshot,
        }
    }

    /// Screenshot reference, if this record carries one.
    pub fn screenshot_reference(&self) -> Option<&str> {
        match &self.payload {
            RecordPayload::Screenshot { reference } => Some(reference.as_str()),
            _ => None,
        }
    }
}
