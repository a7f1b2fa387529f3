//! Persistence gateway boundary.
//!
//! The pipeline only needs atomic-per-call inserts/updates with upsert
//! semantics (same id never duplicates) and synchronous error reporting.
//! Mapping to an actual storage engine is the gateway's business.

use crate::model::{Activity, Event};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Durable storage for events and activities.
///
/// Every method is atomic per call; failures surface synchronously as
/// `StoreError`. Implementations must upsert by id so that a caller
/// retrying after a reported failure cannot create duplicates.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn insert_event(&self, event: &Event) -> Result<(), StoreError>;
    async fn insert_activity(&self, activity: &Activity) -> Result<(), StoreError>;
    async fn update_activity(&self, activity: &Activity) -> Result<(), StoreError>;
    /// Most recent events, newest first.
    async fn recent_events(&self, limit: usize) -> Result<Vec<Event>, StoreError>;
    /// Most recent activities, newest first.
    async fn recent_activities(&self, limit: usize) -> Result<Vec<Activity>, StoreError>;
}

/// Persistence failures.
#[derive(Debug)]
pub enum StoreError {
    Io(String),
    Serialize(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "store IO error: {e}"),
            StoreError::Serialize(e) => write!(f, "store serialization error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// In-memory gateway with upsert-by-id semantics.
///
/// Used by the test suite and by standalone runs without a database.
#[derive(Default)]
pub struct MemoryGateway {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    events: HashMap<Uuid, Event>,
    activities: HashMap<Uuid, Activity>,
    // Insertion order, for recency queries
    event_order: Vec<Uuid>,
    activity_order: Vec<Uuid>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_count(&self) -> usize {
        self.inner.lock().expect("gateway lock poisoned").events.len()
    }

    pub fn activity_count(&self) -> usize {
        self.inner
            .lock()
            .expect("gateway lock poisoned")
            .activities
            .len()
    }
}

#[async_trait]
impl PersistenceGateway for MemoryGateway {
    async fn insert_event(&self, event: &Event) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("gateway lock poisoned");
        if inner.events.insert(event.id, event.clone()).is_none() {
            inner.event_order.push(event.id);
        }
        Ok(())
    }

    async fn insert_activity(&self, activity: &Activity) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("gateway lock poisoned");
        if inner
            .activities
            .insert(activity.id, activity.clone())
            .is_none()
        {
            inner.activity_order.push(activity.id);
        }
        Ok(())
    }

    async fn update_activity(&self, activity: &Activity) -> Result<(), StoreError> {
        // Same upsert path; an update of an unknown id inserts it
        self.insert_activity(activity).await
    }

    async fn recent_events(&self, limit: usize) -> Result<Vec<Event>, StoreError> {
        let inner = self.inner.lock().expect("gateway lock poisoned");
        Ok(inner
            .event_order
            .iter()
            .rev()
            .take(limit)
            .filter_map(|id| inner.events.get(id).cloned())
            .collect())
    }

    async fn recent_activities(&self, limit: usize) -> Result<Vec<Activity>, StoreError> {
        let inner = self.inner.lock().expect("gateway lock poisoned");
        Ok(inner
            .activity_order
            .iter()
            .rev()
            .take(limit)
            .filter_map(|id| inner.activities.get(id).cloned())
            .collect())
    }
}

/// File-backed gateway that appends records to per-type JSONL files and
/// keeps an in-memory index for upserts and recency queries.
pub struct JsonlGateway {
    events_path: PathBuf,
    activities_path: PathBuf,
    memory: MemoryGateway,
}

impl JsonlGateway {
    /// Open (or create) a gateway under the given data directory.
    pub fn open(data_dir: &std::path::Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(data_dir).map_err(|e| StoreError::Io(e.to_string()))?;

        let gateway = Self {
            events_path: data_dir.join("events.jsonl"),
            activities_path: data_dir.join("activities.jsonl"),
            memory: MemoryGateway::new(),
        };
        gateway.load()?;
        Ok(gateway)
    }

    /// Replay the JSONL files into the in-memory index. Later lines for the
    /// same id win, which is what makes appended updates upserts.
    fn load(&self) -> Result<(), StoreError> {
        if self.events_path.exists() {
            let content = std::fs::read_to_string(&self.events_path)
                .map_err(|e| StoreError::Io(e.to_string()))?;
            let mut inner = self.memory.inner.lock().expect("gateway lock poisoned");
            for line in content.lines().filter(|l| !l.trim().is_empty()) {
                let event: Event =
                    serde_json::from_str(line).map_err(|e| StoreError::Serialize(e.to_string()))?;
                if inner.events.insert(event.id, event.clone()).is_none() {
                    inner.event_order.push(event.id);
                }
            }
        }

        if self.activities_path.exists() {
            let content = std::fs::read_to_string(&self.activities_path)
                .map_err(|e| StoreError::Io(e.to_string()))?;
            let mut inner = self.memory.inner.lock().expect("gateway lock poisoned");
            for line in content.lines().filter(|l| !l.trim().is_empty()) {
                let activity: Activity =
                    serde_json::from_str(line).map_err(|e| StoreError::Serialize(e.to_string()))?;
                if inner.activities.insert(activity.id, activity.clone()).is_none() {
                    inner.activity_order.push(activity.id);
                }
            }
        }

        debug!(
            events = self.memory.event_count(),
            activities = self.memory.activity_count(),
            "loaded persisted records"
        );
        Ok(())
    }

    fn append_line<T: serde::Serialize>(path: &PathBuf, value: &T) -> Result<(), StoreError> {
        use std::io::Write;

        let line =
            serde_json::to_string(value).map_err(|e| StoreError::Serialize(e.to_string()))?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| StoreError::Io(e.to_string()))?;
        writeln!(file, "{line}").map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl PersistenceGateway for JsonlGateway {
    async fn insert_event(&self, event: &Event) -> Result<(), StoreError> {
        Self::append_line(&self.events_path, event)?;
        self.memory.insert_event(event).await
    }

    async fn insert_activity(&self, activity: &Activity) -> Result<(), StoreError> {
        Self::append_line(&self.activities_path, activity)?;
        self.memory.insert_activity(activity).await
    }

    async fn update_activity(&self, activity: &Activity) -> Result<(), StoreError> {
        Self::append_line(&self.activities_path, activity)?;
        self.memory.update_activity(activity).await
    }

    async fn recent_events(&self, limit: usize) -> Result<Vec<Event>, StoreError> {
        self.memory.recent_events(limit).await
    }

    async fn recent_activities(&self, limit: usize) -> Result<Vec<Activity>, StoreError> {
        self.memory.recent_activities(limit).await
    }
}
