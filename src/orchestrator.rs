//! Main orchestrator - drives a task through its state machine
//!
//! Understanding → Planning → Executing → Synthesizing → Verifying →
//! Delivered. Individual agent failures never propagate as errors; they are
//! captured as `AgentResult`s and folded into the success determination.
//! Only understanding/planning-phase and storage failures terminate a task
//! outright, and even then the caller receives a non-empty explanation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::agent::AgentUnit;
use crate::backend::{
    describe_backend_error, extract_payload, GenerateRequest, GenerationBackend,
    DEFAULT_CALL_TIMEOUT,
};
use crate::channel::ProgressSender;
use crate::checkpoint::CheckpointStore;
use crate::error::{BackendError, ConclaveError};
use crate::interrupt::InterruptChannel;
use crate::learning::learn_from_task;
use crate::skills::SkillRegistry;
use crate::store::EventStore;
use crate::types::{
    AgentId, AgentResult, AgentRunStatus, AgentSpec, Event, EventId, EventKind, EventStatus,
    OrchestrationPlan, Strategy, TaskOutcome,
};

/// Metadata key holding the candidate result text
const META_RESULT: &str = "result";
/// Metadata key marking a computed-but-unacknowledged result (simple strategy)
const META_RESULT_READY: &str = "result_ready";

/// Plan shape requested from the backend during the planning phase
#[derive(Debug, Deserialize)]
struct PlanDraft {
    strategy: String,
    #[serde(default)]
    agents: Vec<AgentDraft>,
}

#[derive(Debug, Deserialize)]
struct AgentDraft {
    role: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    skills: Vec<String>,
}

/// The task orchestrator
///
/// One invocation runs per task at a time; concurrently running tasks share
/// the event store and skill registry, which serialize their own writes.
pub struct Orchestrator {
    store: Arc<EventStore>,
    skills: Arc<SkillRegistry>,
    interrupt: Arc<InterruptChannel>,
    checkpoints: Arc<CheckpointStore>,
    backend: Arc<dyn GenerationBackend>,
    progress: ProgressSender,
    /// Cancel flags for tasks currently in flight
    cancel_flags: RwLock<HashMap<EventId, Arc<AtomicBool>>>,
    call_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        store: Arc<EventStore>,
        skills: Arc<SkillRegistry>,
        interrupt: Arc<InterruptChannel>,
        checkpoints: Arc<CheckpointStore>,
        backend: Arc<dyn GenerationBackend>,
        progress: ProgressSender,
        call_timeout: Option<Duration>,
    ) -> Self {
        Self {
            store,
            skills,
            interrupt,
            checkpoints,
            backend,
            progress,
            cancel_flags: RwLock::new(HashMap::new()),
            call_timeout: call_timeout.unwrap_or(DEFAULT_CALL_TIMEOUT),
        }
    }

    /// Request cancellation of a task
    ///
    /// A task in flight stops spawning further units; already-started units
    /// finish naturally. A pending task is cancelled directly.
    pub fn request_cancel(&self, event_id: EventId) -> Result<(), ConclaveError> {
        if let Some(flag) = self.cancel_flags.read().get(&event_id) {
            flag.store(true, Ordering::SeqCst);
            info!(event_id = %event_id, "Cancellation requested for running task");
            return Ok(());
        }
        self.store
            .update_status(event_id, EventStatus::Cancelled, Some("cancelled by caller"))?;
        Ok(())
    }

    /// Acknowledge delivery of a ready result, completing the event
    pub fn acknowledge_delivery(&self, event_id: EventId) -> Result<Event, ConclaveError> {
        let event = self
            .store
            .get(event_id)
            .ok_or(ConclaveError::EventNotFound(event_id))?;
        let ready = event
            .metadata
            .get(META_RESULT_READY)
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if !ready {
            return Err(ConclaveError::Delivery(format!(
                "event '{}' has no result awaiting delivery",
                event.title
            )));
        }
        let updated =
            self.store
                .update_status(event_id, EventStatus::Completed, Some("delivery acknowledged"))?;
        self.progress
            .notify(format!("{}: delivered", updated.title));
        Ok(updated)
    }

    /// Run one task to a terminal outcome
    ///
    /// Always returns a non-empty result string, even on total failure.
    #[instrument(skip(self))]
    pub async fn run_task(&self, event_id: EventId) -> Result<TaskOutcome, ConclaveError> {
        let event = self
            .store
            .get(event_id)
            .ok_or(ConclaveError::EventNotFound(event_id))?;
        if event.kind != EventKind::Task {
            return Err(ConclaveError::Validation(format!(
                "event '{}' is a notification, not a task",
                event.title
            )));
        }

        let cancel = Arc::new(AtomicBool::new(false));
        self.cancel_flags
            .write()
            .insert(event_id, Arc::clone(&cancel));

        let outcome = self.drive(event, &cancel).await;
        self.cancel_flags.write().remove(&event_id);
        outcome
    }

    async fn drive(
        &self,
        event: Event,
        cancel: &Arc<AtomicBool>,
    ) -> Result<TaskOutcome, ConclaveError> {
        self.store.update_status(
            event.id,
            EventStatus::Processing,
            Some("orchestration started"),
        )?;

        // Understanding
        self.progress.notify(format!("{}: understanding", event.title));
        let understanding = match self.understand(&event).await {
            Ok(understanding) => understanding,
            Err(err) => {
                let reason = format!(
                    "could not understand the task: {}",
                    describe_backend_error(&err)
                );
                return self.fail_task(&event, reason);
            }
        };
        if cancel.load(Ordering::SeqCst) {
            return self.cancel_task(&event, &[]);
        }

        // Planning
        self.progress.notify(format!("{}: planning", event.title));
        let plan = match self.plan(&event, &understanding).await {
            Ok(plan) => plan,
            Err(ConclaveError::Backend(err)) => {
                let reason = format!("planning failed: {}", describe_backend_error(&err));
                return self.fail_task(&event, reason);
            }
            Err(ConclaveError::Planning(reason)) => {
                return self.fail_task(&event, reason);
            }
            Err(other) => return Err(other),
        };
        self.store
            .append_log(event.id, "plan", &serde_json::to_string(&plan)?)?;
        if cancel.load(Ordering::SeqCst) {
            return self.cancel_task(&event, &[]);
        }

        // Executing
        self.progress.notify(format!(
            "{}: executing ({}, {} agents)",
            event.title,
            plan.strategy,
            plan.agents.len()
        ));

        if plan.strategy == Strategy::Simple {
            return self.run_simple(&event, &understanding).await;
        }

        let initial_context = self.initial_context(&event, &understanding);
        let results = match plan.strategy {
            Strategy::Sequential => {
                self.execute_sequential(&event, &plan, &initial_context, cancel)
                    .await
            }
            Strategy::Parallel => {
                self.execute_parallel(&event, &plan, &initial_context, cancel)
                    .await
            }
            Strategy::Simple => unreachable!("handled above"),
        };
        if cancel.load(Ordering::SeqCst) {
            return self.cancel_task(&event, &results);
        }

        // Synthesizing
        self.progress.notify(format!("{}: synthesizing", event.title));
        let candidate = self.synthesize(&event, &understanding, &results).await;

        // Verifying: among spawned agents, count completed and failed.
        // Units left pending (a stopped sequential chain) count toward
        // neither side.
        let completed = results
            .iter()
            .filter(|r| r.status == AgentRunStatus::Completed)
            .count();
        let failed: Vec<&AgentResult> = results
            .iter()
            .filter(|r| r.status == AgentRunStatus::Failed)
            .collect();

        if completed == 0 && !failed.is_empty() {
            // The synthesized text is preserved as explanatory content but
            // does not mark the task completed
            self.store.append_log(event.id, "result", &candidate)?;
            self.store
                .update_status(event.id, EventStatus::Failed, Some("all spawned agents failed"))?;
            self.progress
                .notify(format!("{}: failed (all agents failed)", event.title));
            return Ok(TaskOutcome {
                status: EventStatus::Failed,
                result: candidate,
                learned_skills: Vec::new(),
            });
        }

        if !failed.is_empty() {
            let names: Vec<&str> = failed.iter().map(|r| r.role.as_str()).collect();
            let content = format!("partial success, failed agents: {}", names.join(", "));
            warn!(event_id = %event.id, failed = ?names, "Task completed with failed agents");
            self.store.append_log(event.id, "warning", &content)?;
        }

        // Delivered: the terminal notification is pushed before the status
        // flips, so no caller can observe Completed ahead of the result
        self.store
            .set_metadata(event.id, META_RESULT, json!(candidate.clone()))?;
        self.store.append_log(event.id, "result", &candidate)?;
        self.progress.notify(format!("{}: completed", event.title));
        self.store
            .update_status(event.id, EventStatus::Completed, Some("result delivered"))?;

        let learned = learn_from_task(
            &self.backend,
            &self.skills,
            &event,
            &candidate,
            &results,
            self.call_timeout,
        )
        .await;
        if !learned.is_empty() {
            self.progress
                .notify(format!("{}: learned skills: {}", event.title, learned.join(", ")));
        }

        Ok(TaskOutcome {
            status: EventStatus::Completed,
            result: candidate,
            learned_skills: learned,
        })
    }

    /// Simple strategy: one backend call answers directly
    ///
    /// The result is marked ready-not-delivered; the event flips to
    /// Completed only on an explicit delivery acknowledgment.
    async fn run_simple(
        &self,
        event: &Event,
        understanding: &str,
    ) -> Result<TaskOutcome, ConclaveError> {
        let request = GenerateRequest::new(
            "Answer the task directly and completely.",
            vec![self.initial_context(event, understanding)],
        )
        .with_timeout(self.call_timeout);

        let answer = match self.call_backend(request).await {
            Ok(answer) => answer,
            Err(err) => {
                let reason = format!("direct answer failed: {}", describe_backend_error(&err));
                return self.fail_task(event, reason);
            }
        };
        // A succeeded call with empty text still owes the caller a
        // non-empty delivered string
        let answer = if answer.trim().is_empty() {
            format!(
                "Task '{}' was answered directly, but the answer had no content.",
                event.title
            )
        } else {
            answer
        };

        self.store
            .set_metadata(event.id, META_RESULT, json!(answer.clone()))?;
        self.store
            .set_metadata(event.id, META_RESULT_READY, json!(true))?;
        self.store.append_log(
            event.id,
            "result_ready",
            "result ready, awaiting delivery acknowledgment",
        )?;
        self.progress
            .notify(format!("{}: result ready, awaiting delivery", event.title));

        let learned =
            learn_from_task(&self.backend, &self.skills, event, &answer, &[], self.call_timeout)
                .await;

        Ok(TaskOutcome {
            status: EventStatus::Processing,
            result: answer,
            learned_skills: learned,
        })
    }

    async fn execute_sequential(
        &self,
        event: &Event,
        plan: &OrchestrationPlan,
        initial_context: &str,
        cancel: &Arc<AtomicBool>,
    ) -> Vec<AgentResult> {
        let mut results = Vec::with_capacity(plan.agents.len());
        let mut chained = String::new();
        let mut stopped = false;
        let thread_id = event.id.to_string();

        for spec in &plan.agents {
            // A failing unit stops the chain; the remainder is never executed
            if stopped || cancel.load(Ordering::SeqCst) {
                let result = AgentResult::pending(spec);
                self.report_agent_result(event, &result);
                results.push(result);
                continue;
            }

            let unit = self.make_unit(spec);
            let context = format!("{initial_context}{chained}");
            let result = unit.execute(&spec.description, &context, Some(&thread_id)).await;
            self.report_agent_result(event, &result);

            match result.status {
                AgentRunStatus::Completed => {
                    chained.push_str(&format!(
                        "\n## Output of '{}'\n{}\n",
                        result.role, result.output
                    ));
                }
                _ => stopped = true,
            }
            results.push(result);
        }
        results
    }

    async fn execute_parallel(
        &self,
        event: &Event,
        plan: &OrchestrationPlan,
        initial_context: &str,
        cancel: &Arc<AtomicBool>,
    ) -> Vec<AgentResult> {
        // Cancellation between planning and executing: spawn nothing
        if cancel.load(Ordering::SeqCst) {
            return plan.agents.iter().map(AgentResult::pending).collect();
        }

        let thread_id = event.id.to_string();
        let mut handles = Vec::with_capacity(plan.agents.len());
        for spec in &plan.agents {
            let unit = self.make_unit(spec);
            let description = spec.description.clone();
            let context = initial_context.to_string();
            let thread = thread_id.clone();
            handles.push(tokio::spawn(async move {
                unit.execute(&description, &context, Some(&thread)).await
            }));
        }

        // Wait for every spawned unit; no first-N-complete short-circuit
        let mut results = Vec::with_capacity(handles.len());
        for (handle, spec) in handles.into_iter().zip(&plan.agents) {
            let result = match handle.await {
                Ok(result) => result,
                Err(join_err) => AgentResult::failed(
                    spec.agent_id,
                    &spec.role,
                    format!("agent task aborted: {join_err}"),
                ),
            };
            self.report_agent_result(event, &result);
            results.push(result);
        }
        results
    }

    async fn understand(&self, event: &Event) -> Result<String, BackendError> {
        let prompt = format!(
            "Title: {}\nDescription: {}\nRequirements: {}\nCompletion criteria: {}\n\n\
             Restate what this task requires and how completion will be judged.",
            event.title,
            event.description,
            event.task_requirements.as_deref().unwrap_or("-"),
            event.completion_criteria.as_deref().unwrap_or("-"),
        );
        let request = GenerateRequest::new("You normalize task requirements.", vec![prompt])
            .with_timeout(self.call_timeout);
        self.call_backend(request).await
    }

    async fn plan(
        &self,
        event: &Event,
        understanding: &str,
    ) -> Result<OrchestrationPlan, ConclaveError> {
        let prompt = format!(
            "Task understanding:\n{understanding}\n\n\
             Known skills: {}\n\n\
             Decide how to execute this task. Reply with JSON: \
             {{\"strategy\": \"simple\"|\"sequential\"|\"parallel\", \
             \"agents\": [{{\"role\": ..., \"description\": ..., \"skills\": [...]}}]}}. \
             Use \"simple\" with no agents when a direct answer suffices.",
            self.skills
                .list()
                .iter()
                .map(|s| s.name.clone())
                .collect::<Vec<_>>()
                .join(", ")
        );
        let request = GenerateRequest::new("You plan task execution.", vec![prompt])
            .with_timeout(self.call_timeout);
        let output = self.call_backend(request).await?;

        let draft: PlanDraft = match serde_json::from_str(extract_payload(&output)) {
            Ok(draft) => draft,
            Err(e) => {
                // An unusable plan degrades to answering directly rather
                // than failing the task
                warn!(event_id = %event.id, error = %e, "Unparseable plan, degrading to simple");
                return Ok(OrchestrationPlan {
                    strategy: Strategy::Simple,
                    agents: Vec::new(),
                });
            }
        };

        let strategy = match draft.strategy.as_str() {
            "simple" => Strategy::Simple,
            "sequential" => Strategy::Sequential,
            "parallel" => Strategy::Parallel,
            other => {
                warn!(event_id = %event.id, strategy = %other, "Unknown strategy, degrading to simple");
                Strategy::Simple
            }
        };

        if strategy != Strategy::Simple && draft.agents.is_empty() {
            return Err(ConclaveError::Planning(format!(
                "cannot form a plan: strategy '{strategy}' with no agents"
            )));
        }

        let agents = if strategy == Strategy::Simple {
            // A simple plan never spawns units
            Vec::new()
        } else {
            draft
                .agents
                .into_iter()
                .map(|a| AgentSpec {
                    agent_id: AgentId::new(),
                    role: a.role,
                    description: a.description,
                    bound_skill_names: a.skills,
                })
                .collect()
        };

        Ok(OrchestrationPlan { strategy, agents })
    }

    /// Fold every agent outcome, including failures, into one candidate
    /// string; a local fallback guarantees explanatory text even when the
    /// synthesis call itself fails
    async fn synthesize(
        &self,
        event: &Event,
        understanding: &str,
        results: &[AgentResult],
    ) -> String {
        let mut prompt = format!(
            "Task understanding:\n{understanding}\n\nAgent outcomes:\n{}",
            outcome_digest(results)
        );
        prompt.push_str("\n\nIntegrate these outcomes into one final answer. Mention failures.");

        let request = GenerateRequest::new("You synthesize agent outputs.", vec![prompt])
            .with_timeout(self.call_timeout);
        match self.call_backend(request).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => fallback_synthesis(event, results),
            Err(err) => {
                warn!(event_id = %event.id, error = %err, "Synthesis call failed, using local fallback");
                fallback_synthesis(event, results)
            }
        }
    }

    fn fail_task(&self, event: &Event, reason: String) -> Result<TaskOutcome, ConclaveError> {
        self.store.append_log(event.id, "error", &reason)?;
        self.store
            .update_status(event.id, EventStatus::Failed, Some(&reason))?;
        self.progress
            .notify(format!("{}: failed - {reason}", event.title));
        Ok(TaskOutcome {
            status: EventStatus::Failed,
            result: reason,
            learned_skills: Vec::new(),
        })
    }

    fn cancel_task(
        &self,
        event: &Event,
        results: &[AgentResult],
    ) -> Result<TaskOutcome, ConclaveError> {
        let finished = results
            .iter()
            .filter(|r| r.status != AgentRunStatus::Pending)
            .count();
        let reason = format!(
            "task cancelled by caller; {finished} of {} agent units had run",
            results.len()
        );
        self.store
            .update_status(event.id, EventStatus::Cancelled, Some(&reason))?;
        self.progress
            .notify(format!("{}: cancelled", event.title));
        Ok(TaskOutcome {
            status: EventStatus::Cancelled,
            result: reason,
            learned_skills: Vec::new(),
        })
    }

    fn make_unit(&self, spec: &AgentSpec) -> AgentUnit {
        AgentUnit::from_spec(
            spec,
            Arc::clone(&self.backend),
            Arc::clone(&self.skills),
            Arc::clone(&self.interrupt),
            Arc::clone(&self.checkpoints),
            self.call_timeout,
        )
    }

    fn report_agent_result(&self, event: &Event, result: &AgentResult) {
        let (word, detail) = match result.status {
            AgentRunStatus::Completed => ("completed", result.output.clone()),
            AgentRunStatus::Failed => (
                "failed",
                result.error.clone().unwrap_or_else(|| "unknown".into()),
            ),
            AgentRunStatus::Pending => ("pending", String::new()),
        };
        self.progress.notify(format!(
            "{}: agent '{}' {word}",
            event.title, result.role
        ));
        if let Err(e) = self.store.append_log(
            event.id,
            "agent_result",
            &format!("{} {word}: {detail}", result.role),
        ) {
            warn!(event_id = %event.id, error = %e, "Failed to log agent result");
        }
    }

    fn initial_context(&self, event: &Event, understanding: &str) -> String {
        format!(
            "Task: {}\n{}\nRequirements: {}\nCompletion criteria: {}\n\nUnderstanding:\n{understanding}\n",
            event.title,
            event.description,
            event.task_requirements.as_deref().unwrap_or("-"),
            event.completion_criteria.as_deref().unwrap_or("-"),
        )
    }

    async fn call_backend(&self, request: GenerateRequest) -> Result<String, BackendError> {
        match tokio::time::timeout(self.call_timeout, self.backend.generate(request)).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout),
        }
    }
}

fn outcome_digest(results: &[AgentResult]) -> String {
    let mut digest = String::new();
    for result in results {
        let line = match result.status {
            AgentRunStatus::Completed => {
                format!("- '{}' completed: {}\n", result.role, result.output)
            }
            AgentRunStatus::Failed => format!(
                "- '{}' failed: {}\n",
                result.role,
                result.error.as_deref().unwrap_or("unknown error")
            ),
            AgentRunStatus::Pending => format!("- '{}' never ran\n", result.role),
        };
        digest.push_str(&line);
    }
    digest
}

fn fallback_synthesis(event: &Event, results: &[AgentResult]) -> String {
    format!(
        "Task '{}' ran {} agent unit(s):\n{}",
        event.title,
        results.len(),
        outcome_digest(results)
    )
}
