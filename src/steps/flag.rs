//! `feature_flag`: set or clear an entry in `feature_flags.yaml`.
//!
//! Every recipe shares the one flags file. Updates hold the context's flags
//! lock from load to save, so concurrent recipes never drop each other's
//! entries.

use super::{blocking, write_atomic, StepContext, StepHandler};
use crate::core::error::StepError;
use crate::core::types::FeatureFlagSpec;
use async_trait::async_trait;
use indexmap::IndexMap;
use std::path::Path;

/// Flag name → enabled, in file order.
pub type FlagSet = IndexMap<String, bool>;

/// Load the flags file. A missing or empty file is an empty set.
pub fn load_flags(path: &Path) -> Result<FlagSet, StepError> {
    if !path.exists() {
        return Ok(FlagSet::new());
    }
    let content = std::fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(FlagSet::new());
    }
    Ok(serde_yaml_ng::from_str(&content)?)
}

/// Save the flags file atomically.
pub fn save_flags(path: &Path, flags: &FlagSet) -> Result<(), StepError> {
    let yaml = serde_yaml_ng::to_string(flags)?;
    write_atomic(path, yaml.as_bytes())?;
    Ok(())
}

/// Load, edit and save the flags file under the shared lock.
///
/// `edit` returns whether anything changed; an unchanged set is not rewritten.
/// The guard moves into the blocking task, so the file stays locked until the
/// save finishes even if the calling future is dropped.
async fn update_flags<F>(ctx: &StepContext, edit: F) -> Result<(), StepError>
where
    F: FnOnce(&mut FlagSet) -> bool + Send + 'static,
{
    let path = ctx.flags_file();
    let guard = ctx.flags_lock().lock_owned().await;
    blocking(move || {
        let _guard = guard;
        let mut flags = load_flags(&path)?;
        if edit(&mut flags) {
            save_flags(&path, &flags)?;
        }
        Ok(())
    })
    .await
}

#[async_trait]
impl StepHandler for FeatureFlagSpec {
    async fn apply(&self, ctx: &StepContext) -> Result<(), StepError> {
        let (flag, enabled) = (self.flag.clone(), self.enabled);
        update_flags(ctx, move |flags| {
            flags.insert(flag, enabled);
            true
        })
        .await
    }

    /// Drops the entry so the flag falls back to its default.
    async fn revert(&self, ctx: &StepContext) -> Result<(), StepError> {
        let flag = self.flag.clone();
        update_flags(ctx, move |flags| flags.shift_remove(&flag).is_some()).await
    }

    fn settings(&self, ctx: &StepContext) -> serde_json::Value {
        let current = load_flags(&ctx.flags_file())
            .ok()
            .and_then(|f| f.get(&self.flag).copied());
        serde_json::json!({
            "flag": self.flag,
            "enabled": self.enabled,
            "current": current,
        })
    }

    fn default_name(&self) -> String {
        if self.enabled {
            format!("Enable feature flag {}", self.flag)
        } else {
            format!("Disable feature flag {}", self.flag)
        }
    }
}
