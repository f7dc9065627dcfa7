//! `shell`: run bash snippets in the data directory.

use super::{StepContext, StepHandler};
use crate::core::error::StepError;
use crate::core::types::ShellSpec;
use crate::transport;
use async_trait::async_trait;

async fn run(script: &str, ctx: &StepContext) -> Result<(), StepError> {
    tokio::fs::create_dir_all(&ctx.data_dir).await?;
    let script = format!("set -euo pipefail\n{}", script);
    transport::run_checked(&script, &ctx.data_dir, ctx.command_timeout).await?;
    Ok(())
}

#[async_trait]
impl StepHandler for ShellSpec {
    async fn apply(&self, ctx: &StepContext) -> Result<(), StepError> {
        run(&self.apply, ctx).await
    }

    async fn revert(&self, ctx: &StepContext) -> Result<(), StepError> {
        run(&self.revert, ctx).await
    }

    fn settings(&self, _ctx: &StepContext) -> serde_json::Value {
        serde_json::json!({
            "apply": self.apply,
            "revert": self.revert,
        })
    }

    fn default_name(&self) -> String {
        "Run shell action".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn spec(apply: &str, revert: &str) -> ShellSpec {
        ShellSpec {
            apply: apply.to_string(),
            revert: revert.to_string(),
        }
    }

    #[tokio::test]
    async fn test_apply_revert_marker() {
        let data = tempfile::tempdir().unwrap();
        let ctx = StepContext::new(data.path().join("nested"), data.path());
        let s = spec("echo on > marker", "rm -f marker");

        s.apply(&ctx).await.unwrap();
        assert!(data.path().join("nested").join("marker").exists());
        s.revert(&ctx).await.unwrap();
        assert!(!data.path().join("nested").join("marker").exists());
    }

    #[tokio::test]
    async fn test_pipefail_surfaces_failure() {
        let data = tempfile::tempdir().unwrap();
        let ctx = StepContext::new(data.path(), data.path());
        let err = spec("false | true", "true").apply(&ctx).await.unwrap_err();
        assert!(matches!(err, StepError::Command { .. }));
    }

    #[tokio::test]
    async fn test_command_timeout() {
        let data = tempfile::tempdir().unwrap();
        let ctx = StepContext::new(data.path(), data.path())
            .with_command_timeout(Duration::from_millis(100));
        let err = spec("sleep 5", "true").apply(&ctx).await.unwrap_err();
        assert!(matches!(err, StepError::Timeout(_)));
    }
}
