//! A step bound to its recipe position, with mutable status.
//!
//! The definition is fixed at load time. Status, last error and last
//! transition time change only through `apply`/`revert` (or `restore` from a
//! persisted lock). A reloaded step can share its state with the step it
//! replaces.

use super::error::{RecipeError, Result};
use super::types::{StepAction, StepDefinition, StepDto, StepKind, StepLock, StepStatus};
use crate::provenance::eventlog::now_iso8601;
use crate::steps::{self, StepContext};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
struct StepState {
    status: StepStatus,
    error: Option<String>,
    updated_at: Option<String>,
}

/// One step of a loaded recipe.
#[derive(Debug)]
pub struct RecipeStep {
    index: usize,
    definition: StepDefinition,
    state: Arc<Mutex<StepState>>,
}

impl RecipeStep {
    pub fn new(index: usize, definition: StepDefinition) -> Self {
        Self {
            index,
            definition,
            state: Arc::new(Mutex::new(StepState::default())),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn kind(&self) -> StepKind {
        self.definition.spec.kind()
    }

    /// Display name: the recipe's name for it, or one derived from the action.
    pub fn name(&self) -> String {
        self.definition
            .name
            .clone()
            .unwrap_or_else(|| steps::handler(&self.definition.spec).default_name())
    }

    pub fn status(&self) -> StepStatus {
        self.state().status
    }

    pub fn error(&self) -> Option<String> {
        self.state().error.clone()
    }

    // A poisoned lock only means a panic elsewhere; the state itself is plain data.
    fn state(&self) -> MutexGuard<'_, StepState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, status: StepStatus, error: Option<String>) {
        let mut state = self.state();
        state.status = status;
        state.error = error;
        state.updated_at = Some(now_iso8601());
    }

    /// Mark failed without running (e.g. interrupted by an execution timeout).
    pub(crate) fn fail(&self, message: impl Into<String>) {
        self.record(StepStatus::Failed, Some(message.into()));
    }

    /// Apply the step, bounded by `timeout`. Status becomes `applied` or `failed`.
    pub async fn apply(&self, recipe: &str, ctx: &StepContext, timeout: Duration) -> Result<()> {
        self.run(recipe, StepAction::Apply, ctx, timeout).await
    }

    /// Revert the step, bounded by `timeout`. Status becomes `reverted` or `failed`.
    pub async fn revert(&self, recipe: &str, ctx: &StepContext, timeout: Duration) -> Result<()> {
        self.run(recipe, StepAction::Revert, ctx, timeout).await
    }

    async fn run(
        &self,
        recipe: &str,
        action: StepAction,
        ctx: &StepContext,
        timeout: Duration,
    ) -> Result<()> {
        let handler = steps::handler(&self.definition.spec);
        let fut = async {
            match action {
                StepAction::Apply => handler.apply(ctx).await,
                StepAction::Revert => handler.revert(ctx).await,
            }
        };

        let outcome = match tokio::time::timeout(timeout, fut).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(self.step_error(recipe, action, e.to_string())),
            Err(_) => Err(RecipeError::Timeout {
                recipe: recipe.to_string(),
                seconds: timeout.as_secs(),
            }),
        };

        match outcome {
            Ok(()) => {
                let status = match action {
                    StepAction::Apply => StepStatus::Applied,
                    StepAction::Revert => StepStatus::Reverted,
                };
                self.record(status, None);
                Ok(())
            }
            Err(e) => {
                self.record(StepStatus::Failed, Some(e.to_string()));
                Err(e)
            }
        }
    }

    fn step_error(&self, recipe: &str, action: StepAction, message: String) -> RecipeError {
        match action {
            StepAction::Apply => RecipeError::StepApplication {
                recipe: recipe.to_string(),
                index: self.index,
                message,
            },
            StepAction::Revert => RecipeError::StepRevert {
                recipe: recipe.to_string(),
                index: self.index,
                message,
            },
        }
    }

    /// Transfer representation. Reads live state but never mutates it.
    pub fn to_dto(&self, ctx: &StepContext) -> StepDto {
        let state = self.state().clone();
        StepDto {
            index: self.index,
            kind: self.kind(),
            name: self.name(),
            description: self.definition.description.clone(),
            status: state.status,
            settings: steps::handler(&self.definition.spec).settings(ctx),
            error: state.error,
            updated_at: state.updated_at,
        }
    }

    pub fn to_lock(&self) -> StepLock {
        let state = self.state().clone();
        StepLock {
            kind: self.kind(),
            status: state.status,
            updated_at: state.updated_at,
            error: state.error,
        }
    }

    /// Adopt a persisted status. Ignored when the step type changed since it was written.
    pub fn restore(&self, lock: &StepLock) -> bool {
        if lock.kind != self.kind() {
            return false;
        }
        let mut state = self.state();
        state.status = lock.status;
        state.error = lock.error.clone();
        state.updated_at = lock.updated_at.clone();
        true
    }

    /// Point this step at `previous`'s state. Refused when the step type changed.
    pub(crate) fn share_state(&mut self, previous: &RecipeStep) -> bool {
        if previous.kind() != self.kind() {
            return false;
        }
        self.state = Arc::clone(&previous.state);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{FeatureFlagSpec, ShellSpec, StepSpec};

    fn flag_step() -> RecipeStep {
        RecipeStep::new(
            1,
            StepDefinition {
                name: None,
                description: Some("UI toggle".to_string()),
                spec: StepSpec::FeatureFlag(FeatureFlagSpec {
                    flag: "foo-ui".to_string(),
                    enabled: true,
                }),
            },
        )
    }

    fn shell_step(apply: &str) -> RecipeStep {
        RecipeStep::new(
            0,
            StepDefinition {
                name: Some("scripted".to_string()),
                description: None,
                spec: StepSpec::Shell(ShellSpec {
                    apply: apply.to_string(),
                    revert: "true".to_string(),
                }),
            },
        )
    }

    #[tokio::test]
    async fn test_apply_then_revert_transitions() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = StepContext::new(dir.path(), dir.path());
        let step = flag_step();
        assert_eq!(step.status(), StepStatus::NotApplied);

        step.apply("r", &ctx, Duration::from_secs(5)).await.unwrap();
        assert_eq!(step.status(), StepStatus::Applied);
        assert!(step.to_dto(&ctx).updated_at.is_some());

        step.revert("r", &ctx, Duration::from_secs(5)).await.unwrap();
        assert_eq!(step.status(), StepStatus::Reverted);
    }

    #[tokio::test]
    async fn test_failure_records_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = StepContext::new(dir.path(), dir.path());
        let step = shell_step("echo boom >&2; exit 3");

        let err = step.apply("r", &ctx, Duration::from_secs(5)).await.unwrap_err();
        match err {
            RecipeError::StepApplication { ref recipe, index, ref message } => {
                assert_eq!(recipe, "r");
                assert_eq!(index, 0);
                assert!(message.contains("boom"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(step.status(), StepStatus::Failed);
        assert!(step.error().unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn test_timeout_marks_failed() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = StepContext::new(dir.path(), dir.path());
        let step = shell_step("sleep 5");

        let err = step
            .apply("r", &ctx, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, RecipeError::Timeout { .. }));
        assert_eq!(step.status(), StepStatus::Failed);
    }

    #[test]
    fn test_dto_uses_default_name() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = StepContext::new(dir.path(), dir.path());
        let dto = flag_step().to_dto(&ctx);
        assert_eq!(dto.index, 1);
        assert_eq!(dto.kind, StepKind::FeatureFlag);
        assert_eq!(dto.name, "Enable feature flag foo-ui");
        assert_eq!(dto.description.as_deref(), Some("UI toggle"));
        assert_eq!(dto.settings["flag"], "foo-ui");
        assert_eq!(shell_step("true").name(), "scripted");
    }

    #[test]
    fn test_restore_from_lock() {
        let step = flag_step();
        let lock = StepLock {
            kind: StepKind::FeatureFlag,
            status: StepStatus::Applied,
            updated_at: Some("2026-02-16T14:00:00Z".to_string()),
            error: None,
        };
        assert!(step.restore(&lock));
        assert_eq!(step.status(), StepStatus::Applied);
        assert_eq!(step.to_lock(), lock);

        let mismatched = StepLock {
            kind: StepKind::Shell,
            ..lock
        };
        assert!(!step.restore(&mismatched));
    }

    #[tokio::test]
    async fn test_shared_state_follows_previous_instance() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = StepContext::new(dir.path(), dir.path());
        let old = flag_step();
        let mut replacement = flag_step();
        assert!(replacement.share_state(&old));

        old.apply("r", &ctx, Duration::from_secs(5)).await.unwrap();
        assert_eq!(replacement.status(), StepStatus::Applied);

        let mut other_kind = shell_step("true");
        assert!(!other_kind.share_state(&old));
        assert_eq!(other_kind.status(), StepStatus::NotApplied);
    }
}
