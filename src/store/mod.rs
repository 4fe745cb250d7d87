//! Status stores polled by the API while operations run
//!
//! A store only ever hands out owned copies of what it holds and only keeps
//! values it owns, so neither the running operation nor a poller can change
//! the other's view through a shared reference. Every field is locked on its
//! own and only for the duration of a copy, so reads never wait for an
//! operation to finish.

mod stores;

pub use stores::{AirgapStore, AppStore, InfraStore, LogSink, PreflightStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{PoisonError, RwLock};

use crate::types::{ConfigValues, InstallationConfig};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Succeeded | Status::Failed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRecord {
    pub state: Status,
    pub description: String,
    pub last_updated: DateTime<Utc>,
}

impl StatusRecord {
    pub fn new(state: Status, description: impl Into<String>) -> Self {
        Self {
            state,
            description: description.into(),
            last_updated: Utc::now(),
        }
    }

    pub fn pending(description: impl Into<String>) -> Self {
        Self::new(Status::Pending, description)
    }

    pub fn running(description: impl Into<String>) -> Self {
        Self::new(Status::Running, description)
    }

    pub fn succeeded(description: impl Into<String>) -> Self {
        Self::new(Status::Succeeded, description)
    }

    pub fn failed(description: impl Into<String>) -> Self {
        Self::new(Status::Failed, description)
    }
}

/// One independently synchronised value.
#[derive(Debug, Default)]
pub struct Field<T> {
    inner: RwLock<T>,
}

impl<T: Clone> Field<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: RwLock::new(value),
        }
    }

    pub fn get(&self) -> T {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set(&self, value: T) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = value;
    }

    /// Mutate in place under the write lock.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.inner.write().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Anything carrying a status record.
pub trait StatusTracking {
    fn status_field(&self) -> &Field<StatusRecord>;

    fn status(&self) -> StatusRecord {
        self.status_field().get()
    }

    fn set_status(&self, record: StatusRecord) {
        self.status_field().set(record);
    }

    fn set_running(&self, description: &str) {
        self.set_status(StatusRecord::running(description));
    }

    fn set_succeeded(&self, description: &str) {
        self.set_status(StatusRecord::succeeded(description));
    }

    fn set_failed(&self, description: &str) {
        self.set_status(StatusRecord::failed(description));
    }
}

/// A status record plus a workflow specific result.
#[derive(Debug)]
pub struct StatusStore<R> {
    status: Field<StatusRecord>,
    result: Field<Option<R>>,
}

impl<R: Clone> Default for StatusStore<R> {
    fn default() -> Self {
        Self {
            status: Field::new(StatusRecord::default()),
            result: Field::new(None),
        }
    }
}

impl<R: Clone> StatusStore<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_result(result: R) -> Self {
        let store = Self::default();
        store.set_result(Some(result));
        store
    }

    pub fn result(&self) -> Option<R> {
        self.result.get()
    }

    pub fn set_result(&self, result: Option<R>) {
        self.result.set(result);
    }

    /// Reset to the zero record and drop the result.
    pub fn clear(&self) {
        self.status.set(StatusRecord::default());
        self.result.set(None);
    }
}

impl<R> StatusTracking for StatusStore<R> {
    fn status_field(&self) -> &Field<StatusRecord> {
        &self.status
    }
}

/// Application config values and the status of the last patch.
pub type ConfigStore = StatusStore<ConfigValues>;

/// Installation settings and the status of the last configure call.
pub type InstallationStore = StatusStore<InstallationConfig>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_zero_record() {
        let store: StatusStore<String> = StatusStore::new();
        let record = store.status();
        assert_eq!(record.state, Status::Pending);
        assert!(record.description.is_empty());
        assert_eq!(record.last_updated, DateTime::<Utc>::default());
        assert_eq!(store.result(), None);
    }

    #[test]
    fn test_returned_copies_are_isolated() {
        let store = ConfigStore::with_result(ConfigValues::from([(
            "hostname".to_string(),
            json!("node-1"),
        )]));
        store.set_running("Applying");

        let mut record = store.status();
        record.description.push_str(" tampered");
        record.state = Status::Failed;
        let mut values = store.result().unwrap();
        values.insert("hostname".to_string(), json!("tampered"));

        assert_eq!(store.status().state, Status::Running);
        assert_eq!(store.status().description, "Applying");
        assert_eq!(store.result().unwrap()["hostname"], json!("node-1"));
    }

    #[test]
    fn test_clear_resets_everything() {
        let store = StatusStore::with_result(3u32);
        store.set_failed("boom");
        store.clear();
        assert_eq!(store.status(), StatusRecord::default());
        assert_eq!(store.result(), None);
    }

    #[test]
    fn test_status_record_serialization() {
        let record = StatusRecord::succeeded("done");
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["state"], json!("Succeeded"));
        assert_eq!(value["description"], json!("done"));
        assert!(value.get("lastUpdated").is_some());
        assert!(Status::Failed.is_terminal());
        assert!(!Status::Running.is_terminal());
    }

    #[test]
    fn test_field_update() {
        let field = Field::new(vec![1, 2]);
        let len = field.update(|v| {
            v.push(3);
            v.len()
        });
        assert_eq!(len, 3);
        assert_eq!(field.get(), vec![1, 2, 3]);
    }

    #[test]
    fn test_concurrent_readers_and_writer() {
        let store = std::sync::Arc::new(StatusStore::<u64>::new());
        let writer = {
            let store = std::sync::Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 0..1000 {
                    store.set_result(Some(i));
                    store.set_running(&format!("step {i}"));
                }
                store.set_succeeded("finished");
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = std::sync::Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        let _ = store.status();
                        let _ = store.result();
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(store.status().state, Status::Succeeded);
        assert_eq!(store.result(), Some(999));
    }
}
