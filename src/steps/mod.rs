//! Step handlers: the apply/revert behavior behind each step type.
//!
//! Each handler provides:
//! 1. `apply`: perform the forward action
//! 2. `revert`: undo it
//! 3. `settings`: a side-effect-free JSON view for the step DTO

pub mod config;
pub mod flag;
pub mod plugin;
pub mod shell;

use crate::core::error::StepError;
use crate::core::types::StepSpec;
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub(crate) use crate::core::state::write_atomic;

/// Where steps act. Shared by every step of every recipe.
#[derive(Debug, Clone)]
pub struct StepContext {
    /// Root for config files, the flags file, plugins, and shell cwd
    pub data_dir: PathBuf,

    /// Local plugin repository (`<repo>/<plugin_id>[/<version>]`)
    pub plugin_repo: PathBuf,

    /// Upper bound for a single shell command
    pub command_timeout: Duration,

    /// Serializes read-modify-write of the flags file across recipes
    flags_lock: Arc<Mutex<()>>,
}

impl StepContext {
    pub fn new(data_dir: impl Into<PathBuf>, plugin_repo: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            plugin_repo: plugin_repo.into(),
            command_timeout: Duration::from_secs(120),
            flags_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Installed plugins live here.
    pub fn plugins_dir(&self) -> PathBuf {
        self.data_dir.join("plugins")
    }

    /// Feature flag store.
    pub fn flags_file(&self) -> PathBuf {
        self.data_dir.join("feature_flags.yaml")
    }

    /// Shared by every clone of this context.
    pub(crate) fn flags_lock(&self) -> Arc<Mutex<()>> {
        Arc::clone(&self.flags_lock)
    }

    /// Resolve a recipe-supplied relative path under the data directory.
    pub fn resolve(&self, rel: &str) -> Result<PathBuf, StepError> {
        check_relative(rel)?;
        Ok(self.data_dir.join(rel))
    }
}

/// Reject absolute paths and any `..` component.
pub fn check_relative(rel: &str) -> Result<(), StepError> {
    let path = Path::new(rel);
    if rel.is_empty() || path.is_absolute() {
        return Err(StepError::InvalidPath(rel.to_string()));
    }
    if path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(StepError::InvalidPath(rel.to_string()));
    }
    Ok(())
}

/// Behavior shared by every step type.
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// Perform the forward action.
    async fn apply(&self, ctx: &StepContext) -> Result<(), StepError>;

    /// Undo the forward action.
    async fn revert(&self, ctx: &StepContext) -> Result<(), StepError>;

    /// Side-effect-free view of parameters and live state.
    fn settings(&self, ctx: &StepContext) -> serde_json::Value;

    /// Name used when the recipe does not give one.
    fn default_name(&self) -> String;
}

/// Dispatch a step spec to its handler.
pub fn handler(spec: &StepSpec) -> &dyn StepHandler {
    match spec {
        StepSpec::InstallPlugin(s) => s,
        StepSpec::WriteConfig(s) => s,
        StepSpec::FeatureFlag(s) => s,
        StepSpec::Shell(s) => s,
    }
}

/// Run filesystem work on the blocking pool.
pub(crate) async fn blocking<T, F>(work: F) -> Result<T, StepError>
where
    F: FnOnce() -> Result<T, StepError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| StepError::Io(std::io::Error::other(e.to_string())))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{FeatureFlagSpec, ShellSpec};

    #[test]
    fn test_check_relative() {
        assert!(check_relative("provisioning/foo.yaml").is_ok());
        assert!(check_relative("./foo.yaml").is_ok());
        assert!(check_relative("").is_err());
        assert!(check_relative("/etc/passwd").is_err());
        assert!(check_relative("../outside.yaml").is_err());
        assert!(check_relative("a/../../b").is_err());
    }

    #[test]
    fn test_context_paths() {
        let ctx = StepContext::new("/srv/data", "/srv/repo");
        assert_eq!(ctx.plugins_dir(), PathBuf::from("/srv/data/plugins"));
        assert_eq!(ctx.flags_file(), PathBuf::from("/srv/data/feature_flags.yaml"));
        assert_eq!(
            ctx.resolve("provisioning/a.yaml").unwrap(),
            PathBuf::from("/srv/data/provisioning/a.yaml")
        );
        assert!(ctx.resolve("/abs").is_err());
    }

    #[test]
    fn test_handler_dispatch_default_names() {
        let flag = StepSpec::FeatureFlag(FeatureFlagSpec {
            flag: "foo-ui".to_string(),
            enabled: true,
        });
        assert_eq!(handler(&flag).default_name(), "Enable feature flag foo-ui");

        let shell = StepSpec::Shell(ShellSpec {
            apply: "true".to_string(),
            revert: "true".to_string(),
        });
        assert_eq!(handler(&shell).default_name(), "Run shell action");
    }

    #[test]
    fn test_clones_share_flags_lock() {
        let ctx = StepContext::new("/srv/data", "/srv/repo");
        let copy = ctx.clone().with_command_timeout(Duration::from_secs(1));
        assert!(Arc::ptr_eq(&ctx.flags_lock(), &copy.flags_lock()));
        let other = StepContext::new("/srv/data", "/srv/repo");
        assert!(!Arc::ptr_eq(&ctx.flags_lock(), &other.flags_lock()));
    }

    #[tokio::test]
    async fn test_blocking_propagates_step_error() {
        let err = blocking(|| -> Result<(), StepError> {
            Err(StepError::InvalidPath("x".to_string()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, StepError::InvalidPath(_)));
        assert_eq!(blocking(|| Ok(7)).await.unwrap(), 7);
    }
}
