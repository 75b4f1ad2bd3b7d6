//! Core protocol types shared across the engine

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique identifier for an agent unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(Uuid);

impl AgentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// What kind of record an event is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Requires only acknowledgment
    Notification,
    /// Requires decomposition and execution
    Task,
}

/// Event priority, ordered Low < Medium < High < Urgent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

/// Event lifecycle status
///
/// Transitions are monotonic: Pending → Processing → {Completed | Failed |
/// Cancelled}. An event never returns to Pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl EventStatus {
    /// Whether this status is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether a transition to `next` is allowed
    pub fn can_transition_to(&self, next: EventStatus) -> bool {
        match (self, next) {
            (Self::Pending, Self::Processing) => true,
            (Self::Pending, Self::Cancelled) => true,
            (Self::Processing, Self::Completed) => true,
            (Self::Processing, Self::Failed) => true,
            (Self::Processing, Self::Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A tracked event: either a notification or a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub title: String,
    pub description: String,
    pub kind: EventKind,
    pub priority: Priority,
    pub status: EventStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set iff status is terminal
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Task-only: what the task must do
    pub task_requirements: Option<String>,
    /// Task-only: how completion is judged
    pub completion_criteria: Option<String>,
}

/// Append-only log row owned by a single event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLog {
    pub id: Uuid,
    pub event_id: EventId,
    pub log_type: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl EventLog {
    pub fn new(event_id: EventId, log_type: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_id,
            log_type: log_type.into(),
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// Execution strategy chosen during planning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Answer directly, no agents spawned
    Simple,
    /// Agents run in order, each seeing prior outputs
    Sequential,
    /// Agents run concurrently with identical initial context
    Parallel,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Simple => "simple",
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
        };
        f.write_str(s)
    }
}

/// Specification of one agent unit inside a plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    pub agent_id: AgentId,
    pub role: String,
    pub description: String,
    pub bound_skill_names: Vec<String>,
}

/// Plan produced during the planning phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationPlan {
    pub strategy: Strategy,
    pub agents: Vec<AgentSpec>,
}

/// Terminal state of a single agent unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRunStatus {
    /// Never executed (e.g. a sequential chain stopped earlier)
    Pending,
    Completed,
    Failed,
}

/// Outcome of one agent unit
///
/// A completed agent may legitimately have empty output; contentless is not
/// the same as failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub agent_id: AgentId,
    pub role: String,
    pub status: AgentRunStatus,
    pub output: String,
    /// Present iff status is Failed
    pub error: Option<String>,
}

impl AgentResult {
    pub fn completed(agent_id: AgentId, role: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            agent_id,
            role: role.into(),
            status: AgentRunStatus::Completed,
            output: output.into(),
            error: None,
        }
    }

    pub fn failed(agent_id: AgentId, role: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            agent_id,
            role: role.into(),
            status: AgentRunStatus::Failed,
            output: String::new(),
            error: Some(error.into()),
        }
    }

    pub fn pending(spec: &AgentSpec) -> Self {
        Self {
            agent_id: spec.agent_id,
            role: spec.role.clone(),
            status: AgentRunStatus::Pending,
            output: String::new(),
            error: None,
        }
    }
}

/// Where a skill came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillCategory {
    /// Seeded at startup, immutable
    Builtin,
    /// Created by the post-task learning step
    Learned,
    /// Registered explicitly by the caller
    User,
}

impl SkillCategory {
    /// Namespace directory used when materializing skills for an agent
    pub fn as_dir(&self) -> &'static str {
        match self {
            Self::Builtin => "builtin",
            Self::Learned => "learned",
            Self::User => "user",
        }
    }
}

/// A reusable text document encoding an approach to a kind of task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    pub name: String,
    pub category: SkillCategory,
    pub content: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub usage_count: u64,
    pub success_count: u64,
}

/// Terminal result of a triggered task, handed to the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutcome {
    /// Event status at the time the outcome was handed over
    pub status: EventStatus,
    /// Always non-empty, even on total failure
    pub result: String,
    /// Names of skills drafted by the post-task learning step
    pub learned_skills: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions_forward() {
        assert!(EventStatus::Pending.can_transition_to(EventStatus::Processing));
        assert!(EventStatus::Pending.can_transition_to(EventStatus::Cancelled));
        assert!(EventStatus::Processing.can_transition_to(EventStatus::Completed));
        assert!(EventStatus::Processing.can_transition_to(EventStatus::Failed));
        assert!(EventStatus::Processing.can_transition_to(EventStatus::Cancelled));
    }

    #[test]
    fn test_status_never_revisits_pending() {
        for status in [
            EventStatus::Processing,
            EventStatus::Completed,
            EventStatus::Failed,
            EventStatus::Cancelled,
        ] {
            assert!(!status.can_transition_to(EventStatus::Pending));
        }
    }

    #[test]
    fn test_terminal_statuses_are_frozen() {
        for status in [
            EventStatus::Completed,
            EventStatus::Failed,
            EventStatus::Cancelled,
        ] {
            assert!(status.is_terminal());
            for next in [
                EventStatus::Pending,
                EventStatus::Processing,
                EventStatus::Completed,
                EventStatus::Failed,
                EventStatus::Cancelled,
            ] {
                assert!(!status.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Urgent > Priority::High);
        assert!(Priority::High > Priority::Medium);
        assert!(Priority::Medium > Priority::Low);
    }

    #[test]
    fn test_agent_result_constructors() {
        let id = AgentId::new();
        let ok = AgentResult::completed(id, "writer", "done");
        assert_eq!(ok.status, AgentRunStatus::Completed);
        assert!(ok.error.is_none());

        let bad = AgentResult::failed(id, "writer", "rate limited");
        assert_eq!(bad.status, AgentRunStatus::Failed);
        assert_eq!(bad.error.as_deref(), Some("rate limited"));
    }

    #[test]
    fn test_strategy_serde_names() {
        let json = serde_json::to_string(&Strategy::Sequential).unwrap();
        assert_eq!(json, "\"sequential\"");
        let parsed: Strategy = serde_json::from_str("\"parallel\"").unwrap();
        assert_eq!(parsed, Strategy::Parallel);
    }
}
