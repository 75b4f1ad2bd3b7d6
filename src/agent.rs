//! Agent unit - a single role-bound executor
//!
//! An agent unit loads its bound skills into working context, issues one or
//! more generation backend calls (possibly interleaved with interrupt
//! questions), records skill usage, and reports a terminal `AgentResult`.
//! Backend errors never escape: they are converted to a failed result with
//! human-readable error text. Retry policy belongs to the orchestrator.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::backend::{describe_backend_error, GenerateRequest, GenerationBackend};
use crate::checkpoint::CheckpointStore;
use crate::error::{BackendError, ConclaveError};
use crate::interrupt::{InterruptChannel, DEFAULT_ANSWER};
use crate::skills::{SkillRegistry, UsageOutcome};
use crate::types::{AgentId, AgentResult, AgentSpec};

/// Upper bound on interrupt-question rounds within one execution
const MAX_ASK_ROUNDS: usize = 3;

/// A single role-bound executor
pub struct AgentUnit {
    pub id: AgentId,
    pub role: String,
    description: String,
    bound_skill_names: Vec<String>,
    /// Materialized at spawn: virtual path -> skill content
    skills: BTreeMap<String, String>,
    backend: Arc<dyn GenerationBackend>,
    registry: Arc<SkillRegistry>,
    interrupt: Arc<InterruptChannel>,
    checkpoints: Arc<CheckpointStore>,
    call_timeout: Duration,
}

impl AgentUnit {
    /// Build a unit from its plan spec, materializing bound skills
    pub fn from_spec(
        spec: &AgentSpec,
        backend: Arc<dyn GenerationBackend>,
        registry: Arc<SkillRegistry>,
        interrupt: Arc<InterruptChannel>,
        checkpoints: Arc<CheckpointStore>,
        call_timeout: Duration,
    ) -> Self {
        let skills = registry.materialize_for_agent(Some(&spec.bound_skill_names));

        info!(
            agent_id = %spec.agent_id,
            role = %spec.role,
            skills = skills.len(),
            "Spawning agent unit"
        );

        Self {
            id: spec.agent_id,
            role: spec.role.clone(),
            description: spec.description.clone(),
            bound_skill_names: spec.bound_skill_names.clone(),
            skills,
            backend,
            registry,
            interrupt,
            checkpoints,
            call_timeout,
        }
    }

    /// Execute the unit's assignment
    ///
    /// `thread_id`, if given, is an opaque checkpoint key: a later call with
    /// the same id resumes from the saved transcript instead of restarting.
    pub async fn execute(
        &self,
        task_description: &str,
        context: &str,
        thread_id: Option<&str>,
    ) -> AgentResult {
        let mut messages = self.restore_transcript(thread_id);
        messages.push(format!("Task: {task_description}\n\nContext:\n{context}"));

        let system_prompt = self.system_prompt();
        let mut rounds = 0;
        let output = loop {
            let request = GenerateRequest::new(system_prompt.clone(), messages.clone())
                .with_timeout(self.call_timeout);

            let output = match self.call_backend(request).await {
                Ok(output) => output,
                Err(err) => {
                    let reason = describe_backend_error(&err);
                    warn!(agent_id = %self.id, role = %self.role, error = %err, "Agent unit failed");
                    self.record_skill_usage(UsageOutcome::Failure);
                    return AgentResult::failed(self.id, &self.role, reason);
                }
            };

            match parse_ask(&output) {
                Some(question) if rounds < MAX_ASK_ROUNDS => {
                    rounds += 1;
                    let answer = self.resolve_question(question).await;
                    messages.push(format!("Q: {question}\nA: {answer}"));
                }
                Some(question) => {
                    // Question budget spent; the caller gets plain text, not
                    // the internal ask marker
                    warn!(agent_id = %self.id, role = %self.role, "Ask rounds exhausted");
                    break format!("Stopped with an unanswered question: {question}");
                }
                None => break output,
            }
        };

        messages.push(output.clone());
        if let Some(tid) = thread_id {
            self.save_transcript(tid, &messages);
        }
        self.record_skill_usage(UsageOutcome::Success);

        debug!(agent_id = %self.id, role = %self.role, "Agent unit completed");
        AgentResult::completed(self.id, &self.role, output)
    }

    /// Backend call bounded by the caller-supplied timeout; an elapse is
    /// reported exactly like any other backend failure
    async fn call_backend(&self, request: GenerateRequest) -> Result<String, BackendError> {
        match tokio::time::timeout(self.call_timeout, self.backend.generate(request)).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout),
        }
    }

    /// Route a mid-execution question through the interrupt channel
    ///
    /// `NoResponder` is recoverable: the unit proceeds with the documented
    /// default answer instead of failing.
    async fn resolve_question(&self, question: &str) -> String {
        match self.interrupt.ask(question, Some(&self.role)).await {
            Ok(answer) => answer,
            Err(ConclaveError::NoResponder) => {
                debug!(agent_id = %self.id, "No interrupt responder, using default answer");
                DEFAULT_ANSWER.to_string()
            }
            Err(e) => {
                warn!(agent_id = %self.id, error = %e, "Interrupt ask failed, using default answer");
                DEFAULT_ANSWER.to_string()
            }
        }
    }

    fn system_prompt(&self) -> String {
        let mut prompt = format!(
            "You are the '{}' agent. {}\n\n\
             If one piece of information is missing, reply with a single line\n\
             'ASK: <question>' and wait for the answer.",
            self.role, self.description
        );
        if !self.skills.is_empty() {
            prompt.push_str("\n\nSkills available to you:\n");
            for (path, content) in &self.skills {
                prompt.push_str(&format!("\n## {path}\n{content}\n"));
            }
        }
        prompt
    }

    fn restore_transcript(&self, thread_id: Option<&str>) -> Vec<String> {
        let Some(tid) = thread_id else {
            return Vec::new();
        };
        let Some(blob) = self.checkpoints.load(&self.role, tid) else {
            return Vec::new();
        };
        match serde_json::from_str::<Vec<String>>(&blob) {
            Ok(transcript) => {
                debug!(agent_id = %self.id, thread_id = %tid, turns = transcript.len(), "Resumed from checkpoint");
                transcript
            }
            Err(e) => {
                warn!(agent_id = %self.id, thread_id = %tid, error = %e, "Corrupt checkpoint, starting fresh");
                Vec::new()
            }
        }
    }

    fn save_transcript(&self, thread_id: &str, messages: &[String]) {
        let blob = match serde_json::to_string(messages) {
            Ok(blob) => blob,
            Err(e) => {
                warn!(agent_id = %self.id, error = %e, "Failed to serialize checkpoint");
                return;
            }
        };
        if let Err(e) = self.checkpoints.save(&self.role, thread_id, &blob) {
            warn!(agent_id = %self.id, thread_id = %thread_id, error = %e, "Failed to save checkpoint");
        }
    }

    fn record_skill_usage(&self, outcome: UsageOutcome) {
        for name in &self.bound_skill_names {
            self.registry.record_usage(name, &self.role, outcome);
        }
    }
}

/// An `ASK: <question>` first line marks a request for missing information
fn parse_ask(output: &str) -> Option<&str> {
    let first_line = output.trim_start().lines().next()?;
    let question = first_line.strip_prefix("ASK:")?.trim();
    if question.is_empty() {
        None
    } else {
        Some(question)
    }
}
