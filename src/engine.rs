//! Caller-facing engine surface
//!
//! Wires the event store, skill registry, interrupt channel, checkpoint
//! store and orchestrator together behind the operations a GUI or CLI
//! collaborator consumes.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::backend::{GenerationBackend, DEFAULT_CALL_TIMEOUT};
use crate::channel::ProgressChannel;
use crate::checkpoint::CheckpointStore;
use crate::error::ConclaveError;
use crate::interrupt::{InterruptChannel, Responder};
use crate::orchestrator::Orchestrator;
use crate::skills::SkillRegistry;
use crate::store::{EventStore, StoreStatistics};
use crate::types::{
    Event, EventId, EventKind, EventLog, Priority, Skill, SkillCategory, TaskOutcome,
};

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root directory for persisted rows; None keeps everything in memory
    pub persist_root: Option<PathBuf>,
    /// Timeout applied to each backend call
    pub call_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            persist_root: None,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

/// The orchestration engine
pub struct Engine {
    store: Arc<EventStore>,
    skills: Arc<SkillRegistry>,
    interrupt: Arc<InterruptChannel>,
    orchestrator: Orchestrator,
}

impl Engine {
    /// Create an engine and the progress channel for its notifications
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        config: EngineConfig,
    ) -> Result<(Self, ProgressChannel), ConclaveError> {
        let (store, skills, checkpoints) = match &config.persist_root {
            Some(root) => (
                Arc::new(EventStore::with_root(root)?),
                Arc::new(SkillRegistry::with_root(root)?),
                Arc::new(CheckpointStore::with_root(root)?),
            ),
            None => (
                Arc::new(EventStore::in_memory()),
                Arc::new(SkillRegistry::in_memory()),
                Arc::new(CheckpointStore::in_memory()),
            ),
        };
        let interrupt = Arc::new(InterruptChannel::new());

        let (channel, sender) = ProgressChannel::new();
        let orchestrator = Orchestrator::new(
            Arc::clone(&store),
            Arc::clone(&skills),
            Arc::clone(&interrupt),
            checkpoints,
            backend,
            sender,
            Some(config.call_timeout),
        );

        info!(persistent = config.persist_root.is_some(), "Engine started");
        Ok((
            Self {
                store,
                skills,
                interrupt,
                orchestrator,
            },
            channel,
        ))
    }

    /// Create a task event in Pending state
    pub fn create_task(
        &self,
        title: &str,
        description: &str,
        requirements: &str,
        criteria: &str,
        priority: Priority,
    ) -> Result<EventId, ConclaveError> {
        let event = self.store.create(
            title,
            description,
            EventKind::Task,
            priority,
            Some(requirements.to_string()),
            Some(criteria.to_string()),
        )?;
        Ok(event.id)
    }

    /// Create a notification event in Pending state
    pub fn create_notification(
        &self,
        title: &str,
        description: &str,
        priority: Priority,
    ) -> Result<EventId, ConclaveError> {
        let event = self
            .store
            .create(title, description, EventKind::Notification, priority, None, None)?;
        Ok(event.id)
    }

    /// Run a task to its terminal outcome
    ///
    /// Progress notifications stream on the engine's [`ProgressChannel`];
    /// the returned outcome always carries a non-empty result string.
    pub async fn trigger(&self, event_id: EventId) -> Result<TaskOutcome, ConclaveError> {
        self.orchestrator.run_task(event_id).await
    }

    /// Acknowledge delivery of a ready result, completing the event
    pub fn acknowledge_delivery(&self, event_id: EventId) -> Result<Event, ConclaveError> {
        self.orchestrator.acknowledge_delivery(event_id)
    }

    /// Request cancellation of a task
    pub fn cancel(&self, event_id: EventId) -> Result<(), ConclaveError> {
        self.orchestrator.request_cancel(event_id)
    }

    pub fn get_event(&self, event_id: EventId) -> Option<Event> {
        self.store.get(event_id)
    }

    pub fn list_pending(&self, limit: usize) -> Vec<Event> {
        self.store.list_pending(limit)
    }

    pub fn delete(&self, event_id: EventId) -> Result<(), ConclaveError> {
        self.store.delete(event_id)
    }

    pub fn get_logs(&self, event_id: EventId) -> Vec<EventLog> {
        self.store.get_logs(event_id)
    }

    pub fn statistics(&self) -> StoreStatistics {
        self.store.statistics()
    }

    /// Register a user skill
    pub fn register_skill(
        &self,
        name: &str,
        content: &str,
        description: &str,
    ) -> Result<Skill, ConclaveError> {
        self.skills
            .add(name, content, SkillCategory::User, description)
    }

    pub fn list_skills(&self) -> Vec<Skill> {
        self.skills.list()
    }

    /// Install the interrupt responder used by agent units
    pub fn set_interrupt_responder(&self, responder: Responder) {
        self.interrupt.set_responder(responder);
    }

    pub fn clear_interrupt_responder(&self) {
        self.interrupt.clear_responder();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::ScriptedBackend;
    use crate::error::BackendError;
    use crate::types::EventStatus;
    use serde_json::json;

    fn plan_json(strategy: &str, roles: &[&str]) -> String {
        let agents: Vec<serde_json::Value> = roles
            .iter()
            .map(|r| json!({"role": r, "description": format!("act as {r}"), "skills": []}))
            .collect();
        json!({"strategy": strategy, "agents": agents}).to_string()
    }

    fn engine(responses: Vec<Result<String, BackendError>>) -> (Engine, ProgressChannel) {
        let backend: Arc<dyn GenerationBackend> = Arc::new(ScriptedBackend::new(responses));
        Engine::new(backend, EngineConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_end_to_end_sequential_task() {
        let (engine, channel) = engine(vec![
            Ok("understood".into()),
            Ok(plan_json("sequential", &["researcher", "writer"])),
            Ok("notes".into()),
            Ok("draft".into()),
            Ok("final report".into()),
            Ok(r#"[{"name": "weekly reports", "content": "list topics first", "description": "d"}]"#.into()),
        ]);

        let id = engine
            .create_task(
                "Weekly report",
                "Write it",
                "Summarize this week",
                "Must include topic list",
                Priority::High,
            )
            .unwrap();
        assert_eq!(engine.get_event(id).unwrap().status, EventStatus::Pending);

        let outcome = engine.trigger(id).await.unwrap();
        assert_eq!(outcome.status, EventStatus::Completed);
        assert_eq!(outcome.result, "final report");
        assert_eq!(outcome.learned_skills, vec!["weekly_reports".to_string()]);

        // The learned skill is now listed alongside the builtins
        assert!(engine
            .list_skills()
            .iter()
            .any(|s| s.name == "weekly_reports" && s.category == SkillCategory::Learned));

        // Notifications streamed throughout
        let notes = channel.drain();
        assert!(!notes.is_empty());
        assert!(notes.iter().any(|n| n.contains("learned skills")));
    }

    #[tokio::test]
    async fn test_create_task_validates_input() {
        let (engine, _channel) = engine(vec![]);
        let err = engine.create_task("t", "d", "", "criteria", Priority::Low);
        assert!(matches!(err, Err(ConclaveError::Validation(_))));
    }

    #[tokio::test]
    async fn test_skill_registration_and_listing() {
        let (engine, _channel) = engine(vec![]);
        let before = engine.list_skills().len();

        engine
            .register_skill("house style", "short sentences", "writing style")
            .unwrap();
        let skills = engine.list_skills();
        assert_eq!(skills.len(), before + 1);
        assert!(skills
            .iter()
            .any(|s| s.name == "house_style" && s.category == SkillCategory::User));
    }

    #[tokio::test]
    async fn test_pending_listing_and_delete() {
        let (engine, _channel) = engine(vec![]);
        let id = engine
            .create_task("t", "d", "r", "c", Priority::Urgent)
            .unwrap();
        engine.create_notification("n", "d", Priority::Low).unwrap();

        assert_eq!(engine.list_pending(10).len(), 2);
        assert_eq!(engine.statistics().tasks, 1);

        engine.delete(id).unwrap();
        assert!(engine.get_event(id).is_none());
        assert_eq!(engine.list_pending(10).len(), 1);
    }

    #[tokio::test]
    async fn test_persistent_engine_reloads_state() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            persist_root: Some(dir.path().to_path_buf()),
            ..Default::default()
        };

        let id = {
            let backend: Arc<dyn GenerationBackend> = Arc::new(ScriptedBackend::new(vec![]));
            let (engine, _channel) = Engine::new(backend, config.clone()).unwrap();
            engine
                .register_skill("filing", "file promptly", "d")
                .unwrap();
            engine
                .create_task("t", "d", "r", "c", Priority::Medium)
                .unwrap()
        };

        let backend: Arc<dyn GenerationBackend> = Arc::new(ScriptedBackend::new(vec![]));
        let (engine, _channel) = Engine::new(backend, config).unwrap();
        assert!(engine.get_event(id).is_some());
        assert!(engine.list_skills().iter().any(|s| s.name == "filing"));
    }

    #[tokio::test]
    async fn test_interrupt_responder_reaches_agents() {
        let (engine, _channel) = engine(vec![
            Ok("understood".into()),
            Ok(plan_json("sequential", &["asker"])),
            Ok("ASK: what deadline?".into()),
            Ok("done by Friday".into()),
            Ok("final".into()),
            Ok("[]".into()),
        ]);
        engine.set_interrupt_responder(Arc::new(|_, _| "Friday".to_string()));

        let id = engine
            .create_task("t", "d", "r", "c", Priority::Medium)
            .unwrap();
        let outcome = engine.trigger(id).await.unwrap();
        assert_eq!(outcome.status, EventStatus::Completed);
    }
}
