//! Event store - durable event records with an append-only log
//!
//! Events are held in memory behind a single write lock, which serializes
//! writes per event id. When a persistence root is configured every mutation
//! is written to disk before the call returns, and existing rows are loaded
//! back on construction.

use std::collections::HashMap;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::ConclaveError;
use crate::types::{Event, EventId, EventKind, EventLog, EventStatus, Priority};

/// Aggregate counts over the store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStatistics {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub notifications: usize,
    pub tasks: usize,
    pub log_entries: usize,
}

/// Durable store of events and their logs
pub struct EventStore {
    events: RwLock<HashMap<EventId, Event>>,
    logs: RwLock<HashMap<EventId, Vec<EventLog>>>,
    /// Persistence root; None means in-memory only
    root: Option<PathBuf>,
}

impl EventStore {
    /// Create an in-memory store (tests, embedded use)
    pub fn in_memory() -> Self {
        Self {
            events: RwLock::new(HashMap::new()),
            logs: RwLock::new(HashMap::new()),
            root: None,
        }
    }

    /// Create a store persisting under `root/events`, loading existing rows
    pub fn with_root(root: impl AsRef<Path>) -> Result<Self, ConclaveError> {
        let dir = root.as_ref().join("events");
        fs::create_dir_all(&dir)?;

        let store = Self {
            events: RwLock::new(HashMap::new()),
            logs: RwLock::new(HashMap::new()),
            root: Some(dir.clone()),
        };
        store.load_existing(&dir)?;
        Ok(store)
    }

    fn load_existing(&self, dir: &Path) -> Result<(), ConclaveError> {
        let mut events = self.events.write();
        let mut logs = self.logs.write();

        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if name.ends_with(".log.jsonl") {
                let content = fs::read_to_string(&path)?;
                for line in content.lines().filter(|l| !l.trim().is_empty()) {
                    match serde_json::from_str::<EventLog>(line) {
                        Ok(log) => logs.entry(log.event_id).or_default().push(log),
                        Err(e) => warn!(file = %path.display(), error = %e, "Skipping corrupt log line"),
                    }
                }
            } else if name.ends_with(".json") {
                let content = fs::read_to_string(&path)?;
                match serde_json::from_str::<Event>(&content) {
                    Ok(event) => {
                        events.insert(event.id, event);
                    }
                    Err(e) => warn!(file = %path.display(), error = %e, "Skipping corrupt event row"),
                }
            }
        }

        info!(count = events.len(), "Loaded persisted events");
        Ok(())
    }

    /// Create a new event in Pending state
    ///
    /// Fails validation if the title is empty, or if `kind` is `Task` and
    /// requirements or criteria are missing.
    pub fn create(
        &self,
        title: &str,
        description: &str,
        kind: EventKind,
        priority: Priority,
        requirements: Option<String>,
        criteria: Option<String>,
    ) -> Result<Event, ConclaveError> {
        if title.trim().is_empty() {
            return Err(ConclaveError::Validation("event title is empty".into()));
        }
        if kind == EventKind::Task {
            if requirements.as_deref().map_or(true, |r| r.trim().is_empty()) {
                return Err(ConclaveError::Validation(
                    "a task requires task_requirements".into(),
                ));
            }
            if criteria.as_deref().map_or(true, |c| c.trim().is_empty()) {
                return Err(ConclaveError::Validation(
                    "a task requires completion_criteria".into(),
                ));
            }
        }

        let now = Utc::now();
        let event = Event {
            id: EventId::new(),
            title: title.to_string(),
            description: description.to_string(),
            kind,
            priority,
            status: EventStatus::Pending,
            created_at: now,
            updated_at: now,
            completed_at: None,
            metadata: serde_json::Map::new(),
            task_requirements: requirements,
            completion_criteria: criteria,
        };

        {
            let mut events = self.events.write();
            self.persist_event(&event)?;
            events.insert(event.id, event.clone());
        }

        info!(event_id = %event.id, kind = ?kind, priority = ?priority, "Created event");
        Ok(event)
    }

    /// Get an event by id
    pub fn get(&self, id: EventId) -> Option<Event> {
        self.events.read().get(&id).cloned()
    }

    /// Pending events ordered priority desc, then created_at asc
    pub fn list_pending(&self, limit: usize) -> Vec<Event> {
        let mut pending: Vec<Event> = self
            .events
            .read()
            .values()
            .filter(|e| e.status == EventStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        pending.truncate(limit);
        pending
    }

    /// Transition an event to a new status
    ///
    /// Rejects monotonicity violations; otherwise mutates atomically, sets
    /// `updated_at` (and `completed_at` on terminal states), persists before
    /// returning, and appends a status_change log.
    pub fn update_status(
        &self,
        id: EventId,
        new_status: EventStatus,
        message: Option<&str>,
    ) -> Result<Event, ConclaveError> {
        let updated = {
            let mut events = self.events.write();
            let event = events
                .get_mut(&id)
                .ok_or(ConclaveError::EventNotFound(id))?;

            if !event.status.can_transition_to(new_status) {
                return Err(ConclaveError::InvalidTransition {
                    from: event.status,
                    to: new_status,
                });
            }

            let now = Utc::now();
            event.status = new_status;
            event.updated_at = now;
            if new_status.is_terminal() {
                event.completed_at = Some(now);
            }

            self.persist_event(event)?;
            event.clone()
        };

        let content = match message {
            Some(m) => format!("{new_status}: {m}"),
            None => new_status.to_string(),
        };
        self.append_log(id, "status_change", &content)?;

        debug!(event_id = %id, status = %new_status, "Updated event status");
        Ok(updated)
    }

    /// Set a metadata key on an event
    pub fn set_metadata(
        &self,
        id: EventId,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), ConclaveError> {
        let mut events = self.events.write();
        let event = events
            .get_mut(&id)
            .ok_or(ConclaveError::EventNotFound(id))?;
        event.metadata.insert(key.to_string(), value);
        event.updated_at = Utc::now();
        self.persist_event(event)
    }

    /// Append a log row to an event
    pub fn append_log(
        &self,
        id: EventId,
        log_type: &str,
        content: &str,
    ) -> Result<EventLog, ConclaveError> {
        if !self.events.read().contains_key(&id) {
            return Err(ConclaveError::EventNotFound(id));
        }

        let log = EventLog::new(id, log_type, content);
        {
            let mut logs = self.logs.write();
            self.persist_log_line(&log)?;
            logs.entry(id).or_default().push(log.clone());
        }
        Ok(log)
    }

    /// All log rows for an event, in append order
    pub fn get_logs(&self, id: EventId) -> Vec<EventLog> {
        self.logs.read().get(&id).cloned().unwrap_or_default()
    }

    /// Delete an event, cascading its logs
    pub fn delete(&self, id: EventId) -> Result<(), ConclaveError> {
        let removed = self.events.write().remove(&id);
        if removed.is_none() {
            return Err(ConclaveError::EventNotFound(id));
        }
        self.logs.write().remove(&id);

        if let Some(dir) = &self.root {
            let _ = fs::remove_file(dir.join(format!("{id}.json")));
            let _ = fs::remove_file(dir.join(format!("{id}.log.jsonl")));
        }

        info!(event_id = %id, "Deleted event");
        Ok(())
    }

    /// Aggregate counts
    pub fn statistics(&self) -> StoreStatistics {
        let events = self.events.read();
        let mut stats = StoreStatistics {
            total: events.len(),
            ..Default::default()
        };
        for event in events.values() {
            match event.status {
                EventStatus::Pending => stats.pending += 1,
                EventStatus::Processing => stats.processing += 1,
                EventStatus::Completed => stats.completed += 1,
                EventStatus::Failed => stats.failed += 1,
                EventStatus::Cancelled => stats.cancelled += 1,
            }
            match event.kind {
                EventKind::Notification => stats.notifications += 1,
                EventKind::Task => stats.tasks += 1,
            }
        }
        stats.log_entries = self.logs.read().values().map(|v| v.len()).sum();
        stats
    }

    fn persist_event(&self, event: &Event) -> Result<(), ConclaveError> {
        let Some(dir) = &self.root else {
            return Ok(());
        };
        let payload = serde_json::to_string_pretty(event)?;
        fs::write(dir.join(format!("{}.json", event.id)), payload)?;
        Ok(())
    }

    fn persist_log_line(&self, log: &EventLog) -> Result<(), ConclaveError> {
        let Some(dir) = &self.root else {
            return Ok(());
        };
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(format!("{}.log.jsonl", log.event_id)))?;
        writeln!(file, "{}", serde_json::to_string(log)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_task(store: &EventStore, title: &str, priority: Priority) -> Event {
        store
            .create(
                title,
                "desc",
                EventKind::Task,
                priority,
                Some("do the thing".into()),
                Some("thing is done".into()),
            )
            .unwrap()
    }

    #[test]
    fn test_create_task_requires_requirements_and_criteria() {
        let store = EventStore::in_memory();

        let missing_reqs = store.create(
            "t",
            "d",
            EventKind::Task,
            Priority::Medium,
            None,
            Some("c".into()),
        );
        assert!(matches!(missing_reqs, Err(ConclaveError::Validation(_))));

        let missing_criteria = store.create(
            "t",
            "d",
            EventKind::Task,
            Priority::Medium,
            Some("r".into()),
            None,
        );
        assert!(matches!(missing_criteria, Err(ConclaveError::Validation(_))));

        // Notifications need neither
        let notification = store.create(
            "ping",
            "d",
            EventKind::Notification,
            Priority::Low,
            None,
            None,
        );
        assert!(notification.is_ok());
    }

    #[test]
    fn test_list_pending_ordering() {
        let store = EventStore::in_memory();
        let low = make_task(&store, "low", Priority::Low);
        let urgent = make_task(&store, "urgent", Priority::Urgent);
        let medium = make_task(&store, "medium", Priority::Medium);

        let pending = store.list_pending(10);
        assert_eq!(pending.len(), 3);
        assert_eq!(pending[0].id, urgent.id);
        assert_eq!(pending[1].id, medium.id);
        assert_eq!(pending[2].id, low.id);

        let limited = store.list_pending(1);
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].id, urgent.id);
    }

    #[test]
    fn test_update_status_rejects_invalid_transition() {
        let store = EventStore::in_memory();
        let event = make_task(&store, "t", Priority::Medium);

        // Pending -> Completed skips Processing
        let err = store.update_status(event.id, EventStatus::Completed, None);
        assert!(matches!(
            err,
            Err(ConclaveError::InvalidTransition { .. })
        ));

        store
            .update_status(event.id, EventStatus::Processing, Some("started"))
            .unwrap();
        let done = store
            .update_status(event.id, EventStatus::Completed, None)
            .unwrap();
        assert!(done.completed_at.is_some());

        // Terminal is frozen
        let frozen = store.update_status(event.id, EventStatus::Processing, None);
        assert!(matches!(
            frozen,
            Err(ConclaveError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_completed_at_set_only_on_terminal() {
        let store = EventStore::in_memory();
        let event = make_task(&store, "t", Priority::Medium);

        let processing = store
            .update_status(event.id, EventStatus::Processing, None)
            .unwrap();
        assert!(processing.completed_at.is_none());

        let failed = store
            .update_status(event.id, EventStatus::Failed, Some("boom"))
            .unwrap();
        assert!(failed.completed_at.is_some());
    }

    #[test]
    fn test_delete_cascades_logs() {
        let store = EventStore::in_memory();
        let event = make_task(&store, "t", Priority::Medium);
        store.append_log(event.id, "note", "hello").unwrap();
        assert_eq!(store.get_logs(event.id).len(), 1);

        store.delete(event.id).unwrap();
        assert!(store.get(event.id).is_none());
        assert!(store.get_logs(event.id).is_empty());

        let again = store.delete(event.id);
        assert!(matches!(again, Err(ConclaveError::EventNotFound(_))));
    }

    #[test]
    fn test_statistics() {
        let store = EventStore::in_memory();
        let a = make_task(&store, "a", Priority::Medium);
        let _b = make_task(&store, "b", Priority::Medium);
        store
            .create("n", "d", EventKind::Notification, Priority::Low, None, None)
            .unwrap();

        store
            .update_status(a.id, EventStatus::Processing, None)
            .unwrap();

        let stats = store.statistics();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.processing, 1);
        assert_eq!(stats.tasks, 2);
        assert_eq!(stats.notifications, 1);
        // update_status appends a status_change log
        assert_eq!(stats.log_entries, 1);
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();

        let id = {
            let store = EventStore::with_root(dir.path()).unwrap();
            let event = make_task(&store, "persisted", Priority::High);
            store
                .update_status(event.id, EventStatus::Processing, Some("go"))
                .unwrap();
            store.append_log(event.id, "note", "remember me").unwrap();
            event.id
        };

        let reloaded = EventStore::with_root(dir.path()).unwrap();
        let event = reloaded.get(id).expect("event survives restart");
        assert_eq!(event.title, "persisted");
        assert_eq!(event.status, EventStatus::Processing);

        let logs = reloaded.get_logs(id);
        assert_eq!(logs.len(), 2);
        assert!(logs.iter().any(|l| l.content == "remember me"));
    }
}
