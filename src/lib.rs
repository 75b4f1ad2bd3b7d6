//! # Conclave
//!
//! Event and task orchestration engine - the deciding circle.
//!
//! This crate accepts asynchronously created tasks, decides how to
//! decompose and execute them - potentially via multiple cooperating agent
//! units - tracks partial failure, persists cross-invocation state, and
//! grows a library of reusable skills from successful runs.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                             ENGINE                               │
//! │  create_task / trigger / skills / interrupt responder            │
//! └────────────────────────────┬────────────────────────────────────┘
//!                              │
//!                   ┌──────────▼──────────┐
//!                   │     ORCHESTRATOR     │
//!                   │ understand → plan →  │
//!                   │ execute → synthesize │
//!                   │ → verify → deliver   │
//!                   └──────────┬──────────┘
//!          ┌───────────────────┼───────────────────┐
//!          ▼                   ▼                   ▼
//!   ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//!   │ Agent Unit  │     │ Agent Unit  │     │ Agent Unit  │
//!   │ (role-bound)│     │ (role-bound)│     │ (role-bound)│
//!   └──────┬──────┘     └──────┬──────┘     └──────┬──────┘
//!          │                   │                   │
//!    ┌─────┴─────┬─────────────┴───────┬───────────┘
//!    ▼           ▼                     ▼
//! ┌───────┐ ┌──────────┐ ┌──────────────────────┐
//! │ Event │ │  Skill   │ │ Interrupt Question    │
//! │ Store │ │ Registry │ │ Channel               │
//! └───────┘ └──────────┘ └──────────────────────┘
//! ```
//!
//! ## Key Concepts
//!
//! - **Event**: a notification or task record tracked through a status
//!   lifecycle
//! - **Strategy**: simple | sequential | parallel - how many agent units
//!   run and in what order
//! - **Agent Unit**: a role-bound executor calling the generation backend
//!   and consulting skills
//! - **Skill**: a named text document encoding a reusable approach,
//!   categorized builtin/learned/user

pub mod agent;
pub mod backend;
pub mod channel;
pub mod checkpoint;
pub mod engine;
pub mod error;
pub mod interrupt;
pub mod learning;
pub mod orchestrator;
pub mod skills;
pub mod store;
pub mod types;

pub use agent::AgentUnit;
pub use backend::{GenerateRequest, GenerationBackend};
pub use channel::{ProgressChannel, ProgressSender};
pub use checkpoint::CheckpointStore;
pub use engine::{Engine, EngineConfig};
pub use error::{BackendError, ConclaveError};
pub use interrupt::{InterruptChannel, Responder, DEFAULT_ANSWER};
pub use orchestrator::Orchestrator;
pub use skills::{SkillRegistry, UsageOutcome};
pub use store::{EventStore, StoreStatistics};

// Re-export commonly used protocol types
pub use types::{
    AgentId, AgentResult, AgentRunStatus, AgentSpec, Event, EventId, EventKind, EventLog,
    EventStatus, OrchestrationPlan, Priority, Skill, SkillCategory, Strategy, TaskOutcome,
};
