//! Server configuration (`recipectl.yaml`).
//!
//! Every field has a default, so an absent file means a default config.
//! CLI flags override file values.

use crate::core::error::{RecipeError, Result};
use crate::core::types::Policy;
use crate::steps::StepContext;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// File looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "recipectl.yaml";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Directory of recipe files
    #[serde(default = "default_recipes_dir")]
    pub recipes_dir: PathBuf,

    /// Root for everything steps write
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Local plugin repository
    #[serde(default = "default_plugin_repo")]
    pub plugin_repo: PathBuf,

    /// Lock files and event logs
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    #[serde(default)]
    pub policy: Policy,
}

fn default_bind() -> String {
    "127.0.0.1:3100".to_string()
}

fn default_recipes_dir() -> PathBuf {
    PathBuf::from("recipes")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_plugin_repo() -> PathBuf {
    PathBuf::from("plugin-repo")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            recipes_dir: default_recipes_dir(),
            data_dir: default_data_dir(),
            plugin_repo: default_plugin_repo(),
            state_dir: default_state_dir(),
            policy: Policy::default(),
        }
    }
}

/// Command-line overrides. `None` keeps the file value.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub bind: Option<String>,
    pub recipes_dir: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub plugin_repo: Option<PathBuf>,
    pub state_dir: Option<PathBuf>,
}

impl ServerConfig {
    /// Parse from YAML and validate.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml_ng::from_str(yaml)
                .map_err(|e| RecipeError::config(format!("invalid config: {}", e)))?
        };
        config.validate()?;
        Ok(config)
    }

    /// Load from a file. The file must exist.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RecipeError::config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_yaml(&content)
            .map_err(|e| RecipeError::config(format!("{}: {}", path.display(), e)))
    }

    /// Load `explicit` if given, else `recipectl.yaml` if present, else defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::load(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.bind.trim().is_empty() {
            return Err(RecipeError::config("bind address must not be empty"));
        }
        if self.policy.execution_timeout_secs == 0 {
            return Err(RecipeError::config("policy.execution_timeout_secs must be > 0"));
        }
        if self.policy.step_timeout_secs == 0 {
            return Err(RecipeError::config("policy.step_timeout_secs must be > 0"));
        }
        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: Overrides) {
        if let Some(bind) = overrides.bind {
            self.bind = bind;
        }
        if let Some(dir) = overrides.recipes_dir {
            self.recipes_dir = dir;
        }
        if let Some(dir) = overrides.data_dir {
            self.data_dir = dir;
        }
        if let Some(dir) = overrides.plugin_repo {
            self.plugin_repo = dir;
        }
        if let Some(dir) = overrides.state_dir {
            self.state_dir = dir;
        }
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.bind
            .parse()
            .map_err(|e| RecipeError::config(format!("invalid bind address '{}': {}", self.bind, e)))
    }

    pub fn step_context(&self) -> StepContext {
        StepContext::new(&self.data_dir, &self.plugin_repo)
    }
}
