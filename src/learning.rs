//! Post-task skill learning
//!
//! After a task completes, one backend call drafts zero or more reusable
//! skills from the task description, the final result, and the per-agent
//! outcomes. The hook is fail-open: any error here is logged and swallowed,
//! never failing an already-completed task.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::backend::{extract_payload, GenerateRequest, GenerationBackend};
use crate::skills::SkillRegistry;
use crate::types::{AgentResult, AgentRunStatus, Event};

/// One skill drafted by the backend
#[derive(Debug, Deserialize)]
struct DraftSkill {
    name: String,
    content: String,
    #[serde(default)]
    description: String,
}

/// Draft and register skills from a completed task
///
/// Returns the names of skills actually recorded. Never fails.
pub async fn learn_from_task(
    backend: &Arc<dyn GenerationBackend>,
    registry: &Arc<SkillRegistry>,
    event: &Event,
    final_result: &str,
    agent_results: &[AgentResult],
    call_timeout: Duration,
) -> Vec<String> {
    let prompt = build_prompt(event, final_result, agent_results);
    let request = GenerateRequest::new(
        "You distill reusable skills from completed tasks. Reply with a JSON \
         array of objects with 'name', 'content' and 'description' fields. \
         Reply with [] when the task taught nothing reusable.",
        vec![prompt],
    )
    .with_timeout(call_timeout);

    // A stalled learning call must not hold up an already-computed task
    let output = match tokio::time::timeout(call_timeout, backend.generate(request)).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            warn!(event_id = %event.id, error = %e, "Skill learning call failed, skipping");
            return Vec::new();
        }
        Err(_) => {
            warn!(event_id = %event.id, "Skill learning call timed out, skipping");
            return Vec::new();
        }
    };

    let drafts: Vec<DraftSkill> = match serde_json::from_str(extract_payload(&output)) {
        Ok(drafts) => drafts,
        Err(e) => {
            warn!(event_id = %event.id, error = %e, "Unparseable skill draft, skipping");
            return Vec::new();
        }
    };

    let mut learned = Vec::new();
    for draft in drafts {
        match registry.learn(&draft.name, &draft.content, &draft.description, &event.title) {
            Ok(skill) => {
                info!(event_id = %event.id, skill = %skill.name, "Recorded learned skill");
                learned.push(skill.name);
            }
            Err(e) => {
                warn!(event_id = %event.id, skill = %draft.name, error = %e, "Skipping unlearnable skill");
            }
        }
    }

    debug!(event_id = %event.id, count = learned.len(), "Skill learning finished");
    learned
}

fn build_prompt(event: &Event, final_result: &str, agent_results: &[AgentResult]) -> String {
    let mut prompt = format!(
        "Task: {}\nDescription: {}\nFinal result:\n{}\n",
        event.title, event.description, final_result
    );
    if !agent_results.is_empty() {
        prompt.push_str("\nAgent outcomes:\n");
        for result in agent_results {
            let line = match result.status {
                AgentRunStatus::Completed => format!("- {} completed: {}\n", result.role, result.output),
                AgentRunStatus::Failed => format!(
                    "- {} failed: {}\n",
                    result.role,
                    result.error.as_deref().unwrap_or("unknown error")
                ),
                AgentRunStatus::Pending => format!("- {} never ran\n", result.role),
            };
            prompt.push_str(&line);
        }
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::ScriptedBackend;
    use crate::error::BackendError;
    use crate::store::EventStore;
    use crate::types::{EventKind, Priority, SkillCategory};
    use async_trait::async_trait;

    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    fn make_event() -> Event {
        let store = EventStore::in_memory();
        store
            .create(
                "Weekly report",
                "produce the report",
                EventKind::Task,
                Priority::Medium,
                Some("summarize".into()),
                Some("has topics".into()),
            )
            .unwrap()
    }

    #[tokio::test]
    async fn test_learn_registers_drafted_skills() {
        let backend: Arc<dyn GenerationBackend> = Arc::new(ScriptedBackend::new(vec![Ok(
            r#"```json
[{"name": "Weekly Summaries", "content": "group items by topic", "description": "summarizing weeks"}]
```"#
                .into(),
        )]));
        let registry = Arc::new(SkillRegistry::in_memory());
        let event = make_event();

        let learned =
            learn_from_task(&backend, &registry, &event, "the report", &[], TEST_TIMEOUT).await;
        assert_eq!(learned, vec!["weekly_summaries".to_string()]);

        let skill = registry.get("weekly_summaries").unwrap();
        assert_eq!(skill.category, SkillCategory::Learned);
        assert!(skill.content.contains("group items by topic"));
        assert!(skill.content.contains("Weekly report"));
    }

    #[tokio::test]
    async fn test_learning_is_fail_open_on_backend_error() {
        let backend: Arc<dyn GenerationBackend> =
            Arc::new(ScriptedBackend::new(vec![Err(BackendError::Timeout)]));
        let registry = Arc::new(SkillRegistry::in_memory());
        let event = make_event();

        let learned =
            learn_from_task(&backend, &registry, &event, "result", &[], TEST_TIMEOUT).await;
        assert!(learned.is_empty());
    }

    #[tokio::test]
    async fn test_learning_is_fail_open_on_garbage_output() {
        let backend: Arc<dyn GenerationBackend> =
            Arc::new(ScriptedBackend::new(vec![Ok("not json at all".into())]));
        let registry = Arc::new(SkillRegistry::in_memory());
        let event = make_event();

        let learned =
            learn_from_task(&backend, &registry, &event, "result", &[], TEST_TIMEOUT).await;
        assert!(learned.is_empty());
    }

    /// Backend that never answers within any reasonable test time
    struct StallingBackend;

    #[async_trait]
    impl GenerationBackend for StallingBackend {
        async fn generate(&self, _request: GenerateRequest) -> Result<String, BackendError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok("[]".into())
        }
    }

    #[tokio::test]
    async fn test_stalled_learning_call_is_bounded_by_timeout() {
        let backend: Arc<dyn GenerationBackend> = Arc::new(StallingBackend);
        let registry = Arc::new(SkillRegistry::in_memory());
        let event = make_event();

        let started = std::time::Instant::now();
        let learned = learn_from_task(
            &backend,
            &registry,
            &event,
            "result",
            &[],
            Duration::from_millis(100),
        )
        .await;

        assert!(learned.is_empty());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_empty_array_learns_nothing() {
        let backend: Arc<dyn GenerationBackend> =
            Arc::new(ScriptedBackend::new(vec![Ok("[]".into())]));
        let registry = Arc::new(SkillRegistry::in_memory());
        let event = make_event();
        let before = registry.list().len();

        let learned =
            learn_from_task(&backend, &registry, &event, "result", &[], TEST_TIMEOUT).await;
        assert!(learned.is_empty());
        assert_eq!(registry.list().len(), before);
    }
}
