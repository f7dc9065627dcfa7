//! `write_config`: write a provisioning file under the data directory.
//!
//! An existing file is copied to `<path>.recipectl.bak` before the first
//! write; revert restores that backup, or removes the file when there was
//! nothing to back up.

use super::{blocking, write_atomic, StepContext, StepHandler};
use crate::core::error::StepError;
use crate::core::types::WriteConfigSpec;
use crate::provenance::hasher;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Backup path for a config target.
pub fn backup_path(target: &Path) -> PathBuf {
    let mut p = target.as_os_str().to_owned();
    p.push(".recipectl.bak");
    PathBuf::from(p)
}

#[async_trait]
impl StepHandler for WriteConfigSpec {
    async fn apply(&self, ctx: &StepContext) -> Result<(), StepError> {
        let target = ctx.resolve(&self.path)?;
        let content = self.content.clone();
        blocking(move || {
            let backup = backup_path(&target);
            // Keep the oldest backup so repeated applies still restore the original
            if target.is_file() && !backup.exists() {
                std::fs::copy(&target, &backup)?;
            }
            write_atomic(&target, content.as_bytes())?;
            Ok(())
        })
        .await
    }

    async fn revert(&self, ctx: &StepContext) -> Result<(), StepError> {
        let target = ctx.resolve(&self.path)?;
        blocking(move || {
            let backup = backup_path(&target);
            if backup.exists() {
                std::fs::rename(&backup, &target)?;
            } else if target.exists() {
                std::fs::remove_file(&target)?;
            }
            Ok(())
        })
        .await
    }

    fn settings(&self, ctx: &StepContext) -> serde_json::Value {
        let desired = hasher::hash_string(&self.content);
        let live = ctx
            .resolve(&self.path)
            .ok()
            .and_then(|p| hasher::hash_file(&p).ok());
        serde_json::json!({
            "path": self.path,
            "content_hash": desired,
            "present": live.is_some(),
            "in_sync": live.as_deref() == Some(desired.as_str()),
        })
    }

    fn default_name(&self) -> String {
        format!("Write {}", self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(content: &str) -> WriteConfigSpec {
        WriteConfigSpec {
            path: "provisioning/plugins/foo.yaml".to_string(),
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn test_apply_creates_parents_and_revert_removes() {
        let data = tempfile::tempdir().unwrap();
        let ctx = StepContext::new(data.path(), data.path());
        let s = spec("apiVersion: 1\n");

        s.apply(&ctx).await.unwrap();
        let target = data.path().join("provisioning/plugins/foo.yaml");
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "apiVersion: 1\n");

        s.revert(&ctx).await.unwrap();
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn test_revert_restores_original() {
        let data = tempfile::tempdir().unwrap();
        let ctx = StepContext::new(data.path(), data.path());
        let target = data.path().join("provisioning/plugins/foo.yaml");
        std::fs::create_dir_all(target.parent().unwrap()).unwrap();
        std::fs::write(&target, "original").unwrap();

        let s = spec("managed");
        s.apply(&ctx).await.unwrap();
        s.apply(&ctx).await.unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "managed");
        assert_eq!(
            std::fs::read_to_string(backup_path(&target)).unwrap(),
            "original"
        );

        s.revert(&ctx).await.unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "original");
        assert!(!backup_path(&target).exists());
    }

    #[tokio::test]
    async fn test_rejects_escaping_path() {
        let data = tempfile::tempdir().unwrap();
        let ctx = StepContext::new(data.path(), data.path());
        let s = WriteConfigSpec {
            path: "../../etc/evil".to_string(),
            content: "x".to_string(),
        };
        assert!(matches!(
            s.apply(&ctx).await.unwrap_err(),
            StepError::InvalidPath(_)
        ));
    }

    #[tokio::test]
    async fn test_settings_track_sync() {
        let data = tempfile::tempdir().unwrap();
        let ctx = StepContext::new(data.path(), data.path());
        let s = spec("a: 1");

        let before = s.settings(&ctx);
        assert_eq!(before["present"], false);
        assert_eq!(before["in_sync"], false);

        s.apply(&ctx).await.unwrap();
        let after = s.settings(&ctx);
        assert_eq!(after["present"], true);
        assert_eq!(after["in_sync"], true);
        assert_eq!(after["content_hash"], hasher::hash_string("a: 1"));
    }
}
