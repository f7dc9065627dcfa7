//! Recipe file discovery and validation.
//!
//! Validates structural constraints of a recipe file:
//! - Recipe id matches `^[a-z0-9][a-z0-9._-]*$`
//! - Name is non-empty and there is at least one step
//! - Templates resolve against `params`
//! - Required fields per step type, relative paths only

use super::error::{RecipeError, Result};
use super::recipe::{load_recipe_file, Recipe};
use super::resolver;
use super::types::*;
use crate::steps::check_relative;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static RECIPE_ID: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9._-]*$").ok());

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

fn push(errors: &mut Vec<ValidationError>, message: String) {
    errors.push(ValidationError { message });
}

/// True if `id` is a legal recipe identifier.
pub fn is_valid_recipe_id(id: &str) -> bool {
    RECIPE_ID.as_ref().is_some_and(|re| re.is_match(id))
}

/// Validate a parsed recipe file. Returns a list of errors (empty = valid).
pub fn validate_recipe(file: &RecipeFile) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let id = &file.recipe.id;

    if !is_valid_recipe_id(id) {
        push(
            &mut errors,
            format!("recipe id '{}' must match ^[a-z0-9][a-z0-9._-]*$", id),
        );
    }
    if file.recipe.name.trim().is_empty() {
        push(&mut errors, format!("recipe '{}' has an empty name", id));
    }
    if file.steps.is_empty() {
        push(&mut errors, format!("recipe '{}' has no steps", id));
    }

    for (i, def) in file.steps.iter().enumerate() {
        let step = match resolver::resolve_step_templates(def, &file.params) {
            Ok(step) => step,
            Err(e) => {
                push(&mut errors, format!("recipe '{}' step {}: {}", id, i, e));
                continue;
            }
        };
        validate_step(id, i, &step.spec, &mut errors);
    }

    errors
}

fn validate_step(id: &str, i: usize, spec: &StepSpec, errors: &mut Vec<ValidationError>) {
    let kind = spec.kind();
    match spec {
        StepSpec::InstallPlugin(s) => {
            if s.plugin_id.is_empty() {
                push(errors, format!("recipe '{}' step {} ({}) has no plugin_id", id, i, kind));
            } else if s.plugin_id.contains('/') || check_relative(&s.plugin_id).is_err() {
                push(
                    errors,
                    format!(
                        "recipe '{}' step {} ({}) plugin_id '{}' must be a single path segment",
                        id, i, kind, s.plugin_id
                    ),
                );
            }
            if let Some(ref v) = s.version {
                if v.is_empty() || v.contains('/') || check_relative(v).is_err() {
                    push(
                        errors,
                        format!("recipe '{}' step {} ({}) has invalid version '{}'", id, i, kind, v),
                    );
                }
            }
        }
        StepSpec::WriteConfig(s) => {
            if check_relative(&s.path).is_err() {
                push(
                    errors,
                    format!(
                        "recipe '{}' step {} ({}) path '{}' must be relative without '..'",
                        id, i, kind, s.path
                    ),
                );
            }
        }
        StepSpec::FeatureFlag(s) => {
            if s.flag.is_empty() || s.flag.chars().any(char::is_whitespace) {
                push(
                    errors,
                    format!("recipe '{}' step {} ({}) has invalid flag '{}'", id, i, kind, s.flag),
                );
            }
        }
        StepSpec::Shell(s) => {
            if s.apply.trim().is_empty() {
                push(errors, format!("recipe '{}' step {} ({}) has no apply command", id, i, kind));
            }
            if s.revert.trim().is_empty() {
                push(errors, format!("recipe '{}' step {} ({}) has no revert command", id, i, kind));
            }
        }
    }
}

/// Recipe files in `dir` (`*.yaml`, `*.yml`), sorted by path.
pub fn discover_recipe_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(RecipeError::config(format!(
            "recipes directory {} does not exist",
            dir.display()
        )));
    }
    let mut files = Vec::new();
    for ext in ["yaml", "yml"] {
        let pattern = dir.join(format!("*.{}", ext));
        let pattern = pattern.to_string_lossy();
        let paths = glob::glob(&pattern)
            .map_err(|e| RecipeError::config(format!("bad recipes pattern {}: {}", pattern, e)))?;
        for entry in paths {
            let path = entry.map_err(|e| RecipeError::Io(e.into_error()))?;
            if path.is_file() {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Parse, validate and build one recipe file.
pub fn load_recipe(path: &Path) -> Result<Recipe> {
    let file = load_recipe_file(path)?;
    let errors = validate_recipe(&file);
    if !errors.is_empty() {
        let joined = errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(RecipeError::validation(format!("{}: {}", path.display(), joined)));
    }
    Ok(Recipe::from_file(file)?.with_source(path))
}
