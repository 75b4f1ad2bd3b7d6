//! Checkpoint store - opaque working state keyed by (role, thread id)
//!
//! Agent units read and write one blob per (role, thread_id) pair; nothing
//! else interprets the content. The orchestrator only threads the key
//! through.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::error::ConclaveError;

/// Key-value store of opaque checkpoint blobs
pub struct CheckpointStore {
    blobs: RwLock<HashMap<(String, String), String>>,
    /// Persistence root; None means in-memory only
    root: Option<PathBuf>,
}

impl CheckpointStore {
    pub fn in_memory() -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
            root: None,
        }
    }

    /// Create a store persisting under `root/checkpoints`, loading existing
    /// blobs
    pub fn with_root(root: impl AsRef<Path>) -> Result<Self, ConclaveError> {
        let dir = root.as_ref().join("checkpoints");
        fs::create_dir_all(&dir)?;

        let mut blobs = HashMap::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            // File names are <role>__<thread_id>.json
            let Some((role, thread_id)) = stem.split_once("__") else {
                warn!(file = %path.display(), "Skipping checkpoint with malformed name");
                continue;
            };
            let blob = fs::read_to_string(&path)?;
            blobs.insert((role.to_string(), thread_id.to_string()), blob);
        }
        info!(count = blobs.len(), "Loaded persisted checkpoints");

        Ok(Self {
            blobs: RwLock::new(blobs),
            root: Some(dir),
        })
    }

    /// Load the blob for a (role, thread_id) pair
    pub fn load(&self, role: &str, thread_id: &str) -> Option<String> {
        self.blobs
            .read()
            .get(&(role.to_string(), thread_id.to_string()))
            .cloned()
    }

    /// Save the blob for a (role, thread_id) pair, replacing any prior one
    pub fn save(&self, role: &str, thread_id: &str, blob: &str) -> Result<(), ConclaveError> {
        if let Some(dir) = &self.root {
            let name = format!("{}__{}.json", sanitize(role), sanitize(thread_id));
            fs::write(dir.join(name), blob)?;
        }
        self.blobs
            .write()
            .insert((role.to_string(), thread_id.to_string()), blob.to_string());
        Ok(())
    }
}

/// Keep file names portable: anything outside [a-zA-Z0-9_-] becomes '-'
fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}
