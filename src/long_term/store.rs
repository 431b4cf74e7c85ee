use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::MemoryError;

/// Categories for long-term memory entries. The set is closed at build time;
/// each category maps to one YAML file on disk.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum MemoryCategory {
    Decisions,
    Preferences,
    Facts,
}

impl MemoryCategory {
    pub const ALL: [MemoryCategory; 3] = [
        MemoryCategory::Decisions,
        MemoryCategory::Preferences,
        MemoryCategory::Facts,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryCategory::Decisions => "decisions",
            MemoryCategory::Preferences => "preferences",
            MemoryCategory::Facts => "facts",
        }
    }

    fn file_name(&self) -> String {
        format!("{}.yaml", self.as_str())
    }
}

impl std::fmt::Display for MemoryCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entries per category — the full long-term state.
pub type CategoryEntries = BTreeMap<MemoryCategory, Vec<String>>;

/// An empty state with every category present.
pub fn empty_entries() -> CategoryEntries {
    MemoryCategory::ALL.iter().map(|&c| (c, Vec::new())).collect()
}

/// Git-backed store for the long-term memory files.
///
/// The directory is a local git repo: HEAD snapshots detect external
/// mutation (a user editing a YAML file and committing), and consolidation
/// results land as commits. Reads tolerate anything — a missing or mangled
/// category file is an empty list, never an error.
pub struct GitMemoryStore {
    dir: PathBuf,
    loaded_head: Option<String>,
}

impl GitMemoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            loaded_head: None,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Initialize the git repo if the directory doesn't have one yet.
    pub async fn ensure_repo(&self) -> Result<(), MemoryError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| MemoryError::Persistence(e.to_string()))?;
        if !self.dir.join(".git").is_dir() {
            let output = self.run_git(&["init"]).await?;
            if !output.status.success() {
                return Err(MemoryError::Persistence(format!(
                    "git init failed: {}",
                    String::from_utf8_lossy(&output.stderr)
                )));
            }
            info!(dir = %self.dir.display(), "initialized long-term memory repo");
        }
        Ok(())
    }

    /// Current HEAD commit hash, or `None` before the first commit.
    pub async fn current_head(&self) -> Result<Option<String>, MemoryError> {
        let output = self.run_git(&["rev-parse", "HEAD"]).await?;
        if !output.status.success() {
            return Ok(None);
        }
        let head = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!head.is_empty()).then_some(head))
    }

    /// True if HEAD moved since the last `load_all` — someone else wrote.
    pub async fn has_changed_since_load(&self) -> Result<bool, MemoryError> {
        Ok(self.current_head().await? != self.loaded_head)
    }

    /// Read every category file and snapshot HEAD for staleness detection.
    pub async fn load_all(&mut self) -> Result<CategoryEntries, MemoryError> {
        self.ensure_repo().await?;
        self.loaded_head = self.current_head().await?;

        let mut memories = CategoryEntries::new();
        for category in MemoryCategory::ALL {
            let path = self.dir.join(category.file_name());
            memories.insert(category, read_category_file(&path).await);
        }
        Ok(memories)
    }

    /// Write all category files, stage, and commit. Skips the commit when
    /// nothing changed. Refreshes the HEAD snapshot on success.
    pub async fn save_and_commit(
        &mut self,
        memories: &CategoryEntries,
        message: &str,
    ) -> Result<(), MemoryError> {
        self.ensure_repo().await?;

        for category in MemoryCategory::ALL {
            let entries = memories.get(&category).cloned().unwrap_or_default();
            let yaml = serde_yaml::to_string(&entries)
                .map_err(|e| MemoryError::Persistence(e.to_string()))?;
            let path = self.dir.join(category.file_name());
            tokio::fs::write(&path, yaml)
                .await
                .map_err(|e| MemoryError::Persistence(e.to_string()))?;
        }

        let add = self.run_git(&["add", "-A"]).await?;
        if !add.status.success() {
            return Err(MemoryError::Persistence(format!(
                "git add failed: {}",
                String::from_utf8_lossy(&add.stderr)
            )));
        }

        // Exit 0 means nothing is staged.
        let diff = self.run_git(&["diff", "--cached", "--quiet"]).await?;
        if diff.status.success() {
            debug!("no long-term memory changes to commit");
            return Ok(());
        }

        // Inline identity so commits never depend on a global git config.
        let commit = self
            .run_git(&[
                "-c",
                "user.name=aloop",
                "-c",
                "user.email=aloop@localhost",
                "commit",
                "-m",
                message,
            ])
            .await?;
        if !commit.status.success() {
            return Err(MemoryError::Persistence(format!(
                "git commit failed: {}",
                String::from_utf8_lossy(&commit.stderr)
            )));
        }

        self.loaded_head = self.current_head().await?;
        debug!(message, "committed long-term memory");
        Ok(())
    }

    async fn run_git(&self, args: &[&str]) -> Result<std::process::Output, MemoryError> {
        Command::new("git")
            .arg("-C")
            .arg(&self.dir)
            .args(args)
            .output()
            .await
            .map_err(|e| MemoryError::Persistence(format!("failed to run git: {e}")))
    }
}

/// Read one category file: a plain YAML list of strings. Missing or
/// malformed files read as empty — surfaced as a warning, never an error.
async fn read_category_file(path: &Path) -> Vec<String> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "failed to read memory file");
            }
            return Vec::new();
        }
    };

    let value: serde_yaml::Value = match serde_yaml::from_str(&raw) {
        Ok(value) => value,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "malformed memory file, treating as empty");
            return Vec::new();
        }
    };

    match value {
        serde_yaml::Value::Null => Vec::new(),
        serde_yaml::Value::Sequence(items) => items
            .into_iter()
            .filter_map(|item| match item {
                serde_yaml::Value::String(s) if !s.is_empty() => Some(s),
                serde_yaml::Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        _ => {
            warn!(path = %path.display(), "memory file is not a list, treating as empty");
            Vec::new()
        }
    }
}
