//! Skill registry - durable keyed store of reusable text skills
//!
//! Skills are addressable documents, not code: consuming one means reading
//! its content into an agent's working context, and learning one means
//! writing (appending) content back. Builtin skills are seeded at startup
//! and immutable; learned and user skills are upserted freely.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::error::ConclaveError;
use crate::types::{Skill, SkillCategory};

/// Outcome reported when recording skill usage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageOutcome {
    Success,
    Failure,
}

/// Normalize a raw skill name: trimmed, lowercased, whitespace collapsed to
/// underscores
pub fn normalize_name(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

const BUILTIN_SKILLS: &[(&str, &str, &str)] = &[
    (
        "task_decomposition",
        "Break a task into the smallest set of independent or ordered steps.\n\
         Prefer two or three focused sub-steps over many shallow ones, and\n\
         state for each step what input it needs and what output it produces.",
        "How to split a task into workable sub-steps",
    ),
    (
        "report_writing",
        "Structure reports as: one-line summary, key findings as a short\n\
         list, then supporting detail. Name every source used.",
        "House style for written reports",
    ),
    (
        "result_verification",
        "Before declaring a task done, re-read its completion criteria and\n\
         check each one explicitly against the produced output.",
        "Checking output against completion criteria",
    ),
];

/// Keyed store of reusable skills
pub struct SkillRegistry {
    skills: RwLock<HashMap<String, Skill>>,
    /// Persistence root; None means in-memory only
    root: Option<PathBuf>,
}

impl SkillRegistry {
    /// Create an in-memory registry seeded with the builtin skills
    pub fn in_memory() -> Self {
        let registry = Self {
            skills: RwLock::new(HashMap::new()),
            root: None,
        };
        registry.seed_builtins();
        registry
    }

    /// Create a registry persisting under `root/skills`, loading existing
    /// rows, then seeding any missing builtins
    pub fn with_root(root: impl AsRef<Path>) -> Result<Self, ConclaveError> {
        let dir = root.as_ref().join("skills");
        fs::create_dir_all(&dir)?;

        let registry = Self {
            skills: RwLock::new(HashMap::new()),
            root: Some(dir.clone()),
        };
        registry.load_existing(&dir)?;
        registry.seed_builtins();
        Ok(registry)
    }

    fn load_existing(&self, dir: &Path) -> Result<(), ConclaveError> {
        let mut skills = self.skills.write();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = fs::read_to_string(&path)?;
            match serde_json::from_str::<Skill>(&content) {
                Ok(skill) => {
                    skills.insert(skill.name.clone(), skill);
                }
                Err(e) => warn!(file = %path.display(), error = %e, "Skipping corrupt skill row"),
            }
        }
        info!(count = skills.len(), "Loaded persisted skills");
        Ok(())
    }

    fn seed_builtins(&self) {
        let mut skills = self.skills.write();
        for (name, content, description) in BUILTIN_SKILLS {
            skills.entry((*name).to_string()).or_insert_with(|| Skill {
                name: (*name).to_string(),
                category: SkillCategory::Builtin,
                content: (*content).to_string(),
                description: (*description).to_string(),
                created_at: Utc::now(),
                usage_count: 0,
                success_count: 0,
            });
        }
    }

    /// All skills, sorted by name
    pub fn list(&self) -> Vec<Skill> {
        let mut all: Vec<Skill> = self.skills.read().values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Get a skill by (raw or normalized) name
    pub fn get(&self, name: &str) -> Option<Skill> {
        self.skills.read().get(&normalize_name(name)).cloned()
    }

    /// Add or upsert a skill
    ///
    /// Fails with a conflict when the name is already taken by a builtin.
    pub fn add(
        &self,
        name: &str,
        content: &str,
        category: SkillCategory,
        description: &str,
    ) -> Result<Skill, ConclaveError> {
        let name = normalize_name(name);
        if name.is_empty() {
            return Err(ConclaveError::Validation("skill name is empty".into()));
        }

        let mut skills = self.skills.write();
        if let Some(existing) = skills.get(&name) {
            if existing.category == SkillCategory::Builtin {
                return Err(ConclaveError::Conflict(format!(
                    "skill '{name}' is builtin and immutable"
                )));
            }
        }

        let skill = Skill {
            name: name.clone(),
            category,
            content: content.to_string(),
            description: description.to_string(),
            created_at: Utc::now(),
            usage_count: 0,
            success_count: 0,
        };
        self.persist_skill(&skill)?;
        skills.insert(name.clone(), skill.clone());

        info!(skill = %name, category = ?category, "Registered skill");
        Ok(skill)
    }

    /// Record a skill drafted by the post-task learning step
    ///
    /// Forces category Learned. If the skill already exists its content is
    /// accumulated, never overwritten: the new content plus a provenance
    /// footer is appended below the existing text.
    pub fn learn(
        &self,
        name: &str,
        content: &str,
        description: &str,
        source_task: &str,
    ) -> Result<Skill, ConclaveError> {
        let name = normalize_name(name);
        if name.is_empty() {
            return Err(ConclaveError::Validation("skill name is empty".into()));
        }

        let footer = format!(
            "\n\n--- learned from \"{source_task}\" at {}",
            Utc::now().to_rfc3339()
        );

        let mut skills = self.skills.write();
        if let Some(existing) = skills.get(&name) {
            if existing.category == SkillCategory::Builtin {
                return Err(ConclaveError::Conflict(format!(
                    "skill '{name}' is builtin and immutable"
                )));
            }
        }

        let skill = match skills.get_mut(&name) {
            Some(existing) => {
                existing.content = format!("{}\n\n{content}{footer}", existing.content);
                existing.category = SkillCategory::Learned;
                if !description.trim().is_empty() {
                    existing.description = description.to_string();
                }
                existing.clone()
            }
            None => {
                let skill = Skill {
                    name: name.clone(),
                    category: SkillCategory::Learned,
                    content: format!("{content}{footer}"),
                    description: description.to_string(),
                    created_at: Utc::now(),
                    usage_count: 0,
                    success_count: 0,
                };
                skills.insert(name.clone(), skill.clone());
                skill
            }
        };

        self.persist_skill(&skill)?;
        info!(skill = %name, source = %source_task, "Learned skill");
        Ok(skill)
    }

    /// Increment usage counters for a skill; no-op on unknown names
    pub fn record_usage(&self, name: &str, task_type: &str, outcome: UsageOutcome) {
        let name = normalize_name(name);
        let mut skills = self.skills.write();
        let Some(skill) = skills.get_mut(&name) else {
            debug!(skill = %name, "record_usage on unknown skill, ignoring");
            return;
        };

        skill.usage_count += 1;
        if outcome == UsageOutcome::Success {
            skill.success_count += 1;
        }
        debug!(skill = %name, task_type = %task_type, outcome = ?outcome, "Recorded skill usage");

        if let Err(e) = self.persist_skill(skill) {
            warn!(skill = %name, error = %e, "Failed to persist skill usage counters");
        }
    }

    /// Materialize skills as a virtual-path → content map for an agent
    ///
    /// Paths are namespaced by category (`builtin/`, `learned/`, `user/`).
    /// `None` returns every skill; a name list returns only matches.
    pub fn materialize_for_agent(&self, skill_names: Option<&[String]>) -> BTreeMap<String, String> {
        let skills = self.skills.read();
        let mut out = BTreeMap::new();

        match skill_names {
            None => {
                for skill in skills.values() {
                    out.insert(virtual_path(skill), skill.content.clone());
                }
            }
            Some(names) => {
                for raw in names {
                    if let Some(skill) = skills.get(&normalize_name(raw)) {
                        out.insert(virtual_path(skill), skill.content.clone());
                    }
                }
            }
        }
        out
    }

    fn persist_skill(&self, skill: &Skill) -> Result<(), ConclaveError> {
        let Some(dir) = &self.root else {
            return Ok(());
        };
        let payload = serde_json::to_string_pretty(skill)?;
        fs::write(dir.join(format!("{}.json", skill.name)), payload)?;
        Ok(())
    }
}

fn virtual_path(skill: &Skill) -> String {
    format!("{}/{}.md", skill.category.as_dir(), skill.name)
}
