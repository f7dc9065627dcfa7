//! Recipe loading and the in-memory recipe.
//!
//! A recipe is identity plus an ordered, fixed list of steps. It carries no
//! orchestration of its own; ordering, concurrency and failure policy live in
//! the execution service.

use super::error::{RecipeError, Result};
use super::resolver;
use super::step::RecipeStep;
use super::types::{RecipeDto, RecipeFile, RecipeMetadata, RecipeStatus, StateLock};
use crate::provenance::eventlog::now_iso8601;
use crate::steps::StepContext;
use std::path::{Path, PathBuf};

/// Load a recipe file from disk (parse only, no validation).
pub fn load_recipe_file(path: &Path) -> Result<RecipeFile> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        RecipeError::validation(format!("cannot read recipe {}: {}", path.display(), e))
    })?;
    parse_recipe(&content)
        .map_err(|e| RecipeError::validation(format!("{}: {}", path.display(), e)))
}

/// Parse a recipe from a YAML string.
pub fn parse_recipe(yaml: &str) -> Result<RecipeFile> {
    serde_yaml_ng::from_str(yaml)
        .map_err(|e| RecipeError::validation(format!("recipe parse error: {}", e)))
}

/// A loaded recipe.
#[derive(Debug)]
pub struct Recipe {
    metadata: RecipeMetadata,
    steps: Vec<RecipeStep>,
    source: Option<PathBuf>,
}

impl Recipe {
    /// Build from a parsed file, resolving `{{params.*}}` in every step.
    pub fn from_file(file: RecipeFile) -> Result<Self> {
        let steps = file
            .steps
            .iter()
            .enumerate()
            .map(|(i, def)| {
                resolver::resolve_step_templates(def, &file.params)
                    .map(|resolved| RecipeStep::new(i, resolved))
                    .map_err(|e| {
                        RecipeError::validation(format!(
                            "recipe '{}' step {}: {}",
                            file.recipe.id, i, e
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            metadata: file.recipe,
            steps,
            source: None,
        })
    }

    pub fn with_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.source = Some(path.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// File this recipe was loaded from, if any.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn steps(&self) -> &[RecipeStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Bounds-checked step access.
    pub fn step(&self, index: usize) -> Result<&RecipeStep> {
        self.steps
            .get(index)
            .ok_or_else(|| RecipeError::StepIndexOutOfRange {
                recipe: self.metadata.id.clone(),
                index,
                len: self.steps.len(),
            })
    }

    pub fn status(&self) -> RecipeStatus {
        let statuses: Vec<_> = self.steps.iter().map(|s| s.status()).collect();
        RecipeStatus::derive(&statuses)
    }

    /// Transfer representation without execution info.
    pub fn to_dto(&self, ctx: &StepContext) -> RecipeDto {
        RecipeDto {
            id: self.metadata.id.clone(),
            name: self.metadata.name.clone(),
            description: self.metadata.description.clone(),
            version: self.metadata.version.clone(),
            status: self.status(),
            steps: self.steps.iter().map(|s| s.to_dto(ctx)).collect(),
            execution: None,
        }
    }

    /// Snapshot step status into a lock.
    pub fn to_lock(&self) -> StateLock {
        StateLock {
            schema: "1.0".to_string(),
            recipe: self.metadata.id.clone(),
            generated_at: now_iso8601(),
            generator: format!("recipectl {}", env!("CARGO_PKG_VERSION")),
            steps: self
                .steps
                .iter()
                .map(|step| (step.index(), step.to_lock()))
                .collect(),
        }
    }

    /// Adopt persisted step status. Returns how many steps were restored.
    pub fn restore(&self, lock: &StateLock) -> usize {
        self.steps
            .iter()
            .filter(|step| {
                lock.steps
                    .get(&step.index())
                    .is_some_and(|entry| step.restore(entry))
            })
            .count()
    }

    /// Share live step state with the instance this one replaces.
    ///
    /// Steps are paired by position and shared only when their type is
    /// unchanged. A run still driving `previous` keeps updating the shared
    /// state, so its transitions show up here too. Returns how many were shared.
    pub fn inherit(&mut self, previous: &Recipe) -> usize {
        self.steps
            .iter_mut()
            .zip(&previous.steps)
            .map(|(step, old)| step.share_state(old))
            .filter(|shared| *shared)
            .count()
    }
}
