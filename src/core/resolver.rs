//! Template resolution for recipe parameters.
//!
//! Resolves `{{params.key}}` in every string field of a step. Resolution
//! happens once, when a recipe is built from its file.

use super::error::{RecipeError, Result};
use super::types::*;
use indexmap::IndexMap;

/// Recipe parameter table.
pub type Params = IndexMap<String, serde_yaml_ng::Value>;

/// Resolve all template variables in a string.
pub fn resolve_template(template: &str, params: &Params) -> Result<String> {
    let mut result = template.to_string();
    let mut start = 0;

    while let Some(open) = result[start..].find("{{") {
        let open = start + open;
        let close = result[open..].find("}}").ok_or_else(|| {
            RecipeError::validation(format!("unclosed template at position {}", open))
        })?;
        let close = open + close + 2;
        let key = result[open + 2..close - 2].trim();

        let value = match key.strip_prefix("params.") {
            Some(param_key) => params
                .get(param_key)
                .map(yaml_value_to_string)
                .ok_or_else(|| RecipeError::validation(format!("unknown param: {}", param_key)))?,
            None => {
                return Err(RecipeError::validation(format!(
                    "unknown template variable: {}",
                    key
                )))
            }
        };

        result.replace_range(open..close, &value);
        start = open + value.len();
    }

    Ok(result)
}

fn resolve_opt(value: &Option<String>, params: &Params) -> Result<Option<String>> {
    value.as_deref().map(|v| resolve_template(v, params)).transpose()
}

/// Resolve all templates in a step definition's string fields.
pub fn resolve_step_templates(step: &StepDefinition, params: &Params) -> Result<StepDefinition> {
    let spec = match &step.spec {
        StepSpec::InstallPlugin(s) => StepSpec::InstallPlugin(InstallPluginSpec {
            plugin_id: resolve_template(&s.plugin_id, params)?,
            version: resolve_opt(&s.version, params)?,
        }),
        StepSpec::WriteConfig(s) => StepSpec::WriteConfig(WriteConfigSpec {
            path: resolve_template(&s.path, params)?,
            content: resolve_template(&s.content, params)?,
        }),
        StepSpec::FeatureFlag(s) => StepSpec::FeatureFlag(FeatureFlagSpec {
            flag: resolve_template(&s.flag, params)?,
            enabled: s.enabled,
        }),
        StepSpec::Shell(s) => StepSpec::Shell(ShellSpec {
            apply: resolve_template(&s.apply, params)?,
            revert: resolve_template(&s.revert, params)?,
        }),
    };

    Ok(StepDefinition {
        name: resolve_opt(&step.name, params)?,
        description: resolve_opt(&step.description, params)?,
        spec,
    })
}
