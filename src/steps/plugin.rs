//! `install_plugin`: copy a plugin from the local repository into the
//! plugins directory.
//!
//! Source lookup: `<repo>/<plugin_id>/<version>` when a version is given and
//! that directory exists, otherwise `<repo>/<plugin_id>`. The copy is staged
//! in a hidden sibling directory and renamed into place, then an install
//! marker (`.recipectl.json`) records version and checksum.

use super::{blocking, check_relative, StepContext, StepHandler};
use crate::core::error::StepError;
use crate::core::types::InstallPluginSpec;
use crate::provenance::{eventlog, hasher};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Install marker file name inside an installed plugin directory.
pub const MARKER: &str = ".recipectl.json";

/// Contents of the install marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallMarker {
    pub plugin_id: String,
    #[serde(default)]
    pub version: Option<String>,
    pub installed_at: String,
    pub checksum: String,
}

impl InstallPluginSpec {
    fn install_dir(&self, ctx: &StepContext) -> PathBuf {
        ctx.plugins_dir().join(&self.plugin_id)
    }

    fn source_dir(&self, ctx: &StepContext) -> Result<PathBuf, StepError> {
        let base = ctx.plugin_repo.join(&self.plugin_id);
        if let Some(ref version) = self.version {
            check_relative(version)?;
            let versioned = base.join(version);
            if versioned.is_dir() {
                return Ok(versioned);
            }
        }
        if base.is_dir() {
            Ok(base)
        } else {
            Err(StepError::MissingSource(format!(
                "plugin '{}' not found in {}",
                self.plugin_id,
                ctx.plugin_repo.display()
            )))
        }
    }
}

/// Read the install marker of an installed plugin, if any.
pub fn read_marker(install_dir: &Path) -> Option<InstallMarker> {
    let content = std::fs::read_to_string(install_dir.join(MARKER)).ok()?;
    serde_json::from_str(&content).ok()
}

fn install(source: &Path, dest: &Path, spec: &InstallPluginSpec) -> Result<(), StepError> {
    let parent = dest
        .parent()
        .ok_or_else(|| StepError::InvalidPath(dest.display().to_string()))?;
    std::fs::create_dir_all(parent)?;

    let staging = parent.join(format!(".{}.staging", spec.plugin_id));
    if staging.exists() {
        std::fs::remove_dir_all(&staging)?;
    }
    copy_tree(source, &staging)?;

    let marker = InstallMarker {
        plugin_id: spec.plugin_id.clone(),
        version: spec.version.clone(),
        installed_at: eventlog::now_iso8601(),
        checksum: hasher::hash_tree(&staging)?,
    };
    std::fs::write(staging.join(MARKER), serde_json::to_vec_pretty(&marker)?)?;

    if dest.exists() {
        std::fs::remove_dir_all(dest)?;
    }
    std::fs::rename(&staging, dest)?;
    Ok(())
}

fn copy_tree(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let ft = entry.file_type()?;
        let target = to.join(entry.file_name());
        if ft.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else if ft.is_file() {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[async_trait]
impl StepHandler for InstallPluginSpec {
    async fn apply(&self, ctx: &StepContext) -> Result<(), StepError> {
        check_relative(&self.plugin_id)?;
        let source = self.source_dir(ctx)?;
        let dest = self.install_dir(ctx);
        let spec = self.clone();
        blocking(move || install(&source, &dest, &spec)).await
    }

    /// Removing an absent plugin is a no-op.
    async fn revert(&self, ctx: &StepContext) -> Result<(), StepError> {
        check_relative(&self.plugin_id)?;
        let dest = self.install_dir(ctx);
        if dest.exists() {
            blocking(move || Ok(std::fs::remove_dir_all(dest)?)).await?;
        }
        Ok(())
    }

    fn settings(&self, ctx: &StepContext) -> serde_json::Value {
        let marker = read_marker(&self.install_dir(ctx));
        serde_json::json!({
            "plugin_id": self.plugin_id,
            "version": self.version,
            "installed": marker.is_some(),
            "installed_version": marker.as_ref().and_then(|m| m.version.clone()),
            "checksum": marker.map(|m| m.checksum),
        })
    }

    fn default_name(&self) -> String {
        match self.version {
            Some(ref v) => format!("Install plugin {}@{}", self.plugin_id, v),
            None => format!("Install plugin {}", self.plugin_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed_repo(repo: &Path) {
        let base = repo.join("foo");
        std::fs::create_dir_all(base.join("img")).unwrap();
        std::fs::write(base.join("plugin.json"), r#"{"id":"foo"}"#).unwrap();
        std::fs::write(base.join("img").join("logo.svg"), "<svg/>").unwrap();
        let v2 = base.join("2.0.0");
        std::fs::create_dir_all(&v2).unwrap();
        std::fs::write(v2.join("plugin.json"), r#"{"id":"foo","v":2}"#).unwrap();
    }

    fn spec(version: Option<&str>) -> InstallPluginSpec {
        InstallPluginSpec {
            plugin_id: "foo".to_string(),
            version: version.map(|v| v.to_string()),
        }
    }

    #[tokio::test]
    async fn test_apply_copies_tree_and_writes_marker() {
        let data = tempfile::tempdir().unwrap();
        let repo = tempfile::tempdir().unwrap();
        seed_repo(repo.path());
        let ctx = StepContext::new(data.path(), repo.path());

        spec(None).apply(&ctx).await.unwrap();

        let dest = data.path().join("plugins").join("foo");
        assert!(dest.join("plugin.json").exists());
        assert!(dest.join("img").join("logo.svg").exists());
        let marker = read_marker(&dest).unwrap();
        assert_eq!(marker.plugin_id, "foo");
        assert!(marker.checksum.starts_with("blake3:"));
        assert!(!data.path().join("plugins").join(".foo.staging").exists());
    }

    #[tokio::test]
    async fn test_apply_prefers_versioned_source() {
        let data = tempfile::tempdir().unwrap();
        let repo = tempfile::tempdir().unwrap();
        seed_repo(repo.path());
        let ctx = StepContext::new(data.path(), repo.path());

        spec(Some("2.0.0")).apply(&ctx).await.unwrap();
        let json =
            std::fs::read_to_string(data.path().join("plugins/foo/plugin.json")).unwrap();
        assert!(json.contains("\"v\":2"));
    }

    #[tokio::test]
    async fn test_apply_missing_source() {
        let data = tempfile::tempdir().unwrap();
        let repo = tempfile::tempdir().unwrap();
        let ctx = StepContext::new(data.path(), repo.path());
        let err = spec(None).apply(&ctx).await.unwrap_err();
        assert!(matches!(err, StepError::MissingSource(_)));
    }

    #[tokio::test]
    async fn test_apply_rejects_escaping_id() {
        let data = tempfile::tempdir().unwrap();
        let repo = tempfile::tempdir().unwrap();
        let ctx = StepContext::new(data.path(), repo.path());
        let bad = InstallPluginSpec {
            plugin_id: "../etc".to_string(),
            version: None,
        };
        assert!(matches!(
            bad.apply(&ctx).await.unwrap_err(),
            StepError::InvalidPath(_)
        ));
    }

    #[tokio::test]
    async fn test_revert_removes_and_is_noop_when_absent() {
        let data = tempfile::tempdir().unwrap();
        let repo = tempfile::tempdir().unwrap();
        seed_repo(repo.path());
        let ctx = StepContext::new(data.path(), repo.path());

        spec(None).apply(&ctx).await.unwrap();
        spec(None).revert(&ctx).await.unwrap();
        assert!(!data.path().join("plugins").join("foo").exists());
        spec(None).revert(&ctx).await.unwrap();
    }

    #[tokio::test]
    async fn test_settings_reflect_install() {
        let data = tempfile::tempdir().unwrap();
        let repo = tempfile::tempdir().unwrap();
        seed_repo(repo.path());
        let ctx = StepContext::new(data.path(), repo.path());

        let s = spec(Some("2.0.0"));
        assert_eq!(s.settings(&ctx)["installed"], false);
        s.apply(&ctx).await.unwrap();
        let settings = s.settings(&ctx);
        assert_eq!(settings["installed"], true);
        assert_eq!(settings["installed_version"], "2.0.0");
        assert_eq!(s.default_name(), "Install plugin foo@2.0.0");
    }
}
