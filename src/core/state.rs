//! Persisted step status, one lock file per recipe.
//!
//! Layout: `<state_dir>/<recipe>/state.lock.yaml`, next to the recipe's
//! event log. Every write goes through [`write_atomic`].

use super::error::{RecipeError, Result};
use super::types::StateLock;
use std::io::Write;
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "state.lock.yaml";

/// Replace `path` with `content` in one rename.
///
/// The temp file is unique per call, so concurrent writers to the same
/// target never share a staging file. Parents are created as needed.
pub fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;
    let mut staged = tempfile::NamedTempFile::new_in(parent)?;
    staged.write_all(content)?;
    staged.as_file().sync_all()?;
    staged.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Lock files of every recipe under one state directory.
#[derive(Debug, Clone)]
pub struct LockStore {
    root: PathBuf,
}

impl LockStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, recipe: &str) -> PathBuf {
        self.root.join(recipe).join(LOCK_FILE)
    }

    /// `None` when the recipe has never been persisted.
    pub fn load(&self, recipe: &str) -> Result<Option<StateLock>> {
        let path = self.path(recipe);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(RecipeError::state(format!(
                    "cannot read {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        serde_yaml_ng::from_str(&content)
            .map(Some)
            .map_err(|e| RecipeError::state(format!("invalid lock file {}: {}", path.display(), e)))
    }

    pub fn save(&self, lock: &StateLock) -> Result<()> {
        let path = self.path(&lock.recipe);
        let yaml = serde_yaml_ng::to_string(lock)?;
        write_atomic(&path, yaml.as_bytes())
            .map_err(|e| RecipeError::state(format!("cannot write {}: {}", path.display(), e)))
    }

    /// Ids of recipes with a lock file, sorted. A missing root is empty.
    pub fn recipes(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(RecipeError::state(format!(
                    "cannot read {}: {}",
                    self.root.display(),
                    e
                )))
            }
        };
        let mut ids: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().join(LOCK_FILE).is_file())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .collect();
        ids.sort();
        Ok(ids)
    }
}
