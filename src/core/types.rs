//! Recipe schema, step state, lock file, event, and transfer (DTO) types.
//!
//! Everything that crosses a boundary (YAML on disk, JSON over HTTP, JSONL in
//! the event log) is defined here and derives Serialize/Deserialize.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Recipe files
// ============================================================================

/// A recipe file as written on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeFile {
    /// Identity and human-readable metadata
    pub recipe: RecipeMetadata,

    /// Template parameters (`{{params.key}}`)
    #[serde(default)]
    pub params: IndexMap<String, serde_yaml_ng::Value>,

    /// Ordered steps: apply runs head-to-tail, revert tail-to-head
    pub steps: Vec<StepDefinition>,
}

/// Recipe identity and metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeMetadata {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

/// One step entry in a recipe file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Display name (defaults to a name derived from the step kind)
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// The action, tagged by `type`
    #[serde(flatten)]
    pub spec: StepSpec,
}

/// Closed set of step actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepSpec {
    InstallPlugin(InstallPluginSpec),
    WriteConfig(WriteConfigSpec),
    FeatureFlag(FeatureFlagSpec),
    Shell(ShellSpec),
}

impl StepSpec {
    /// The `type` tag of this step.
    pub fn kind(&self) -> StepKind {
        match self {
            Self::InstallPlugin(_) => StepKind::InstallPlugin,
            Self::WriteConfig(_) => StepKind::WriteConfig,
            Self::FeatureFlag(_) => StepKind::FeatureFlag,
            Self::Shell(_) => StepKind::Shell,
        }
    }
}

/// Install a plugin from the local plugin repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallPluginSpec {
    pub plugin_id: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// Write a provisioning/config file under the data directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteConfigSpec {
    /// Path relative to the data directory
    pub path: String,
    pub content: String,
}

/// Toggle a feature flag in the flags file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureFlagSpec {
    pub flag: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Run a bash snippet to apply and another to revert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShellSpec {
    pub apply: String,
    pub revert: String,
}

fn default_true() -> bool {
    true
}

/// Step kind enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    InstallPlugin,
    WriteConfig,
    FeatureFlag,
    Shell,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InstallPlugin => write!(f, "install_plugin"),
            Self::WriteConfig => write!(f, "write_config"),
            Self::FeatureFlag => write!(f, "feature_flag"),
            Self::Shell => write!(f, "shell"),
        }
    }
}

// ============================================================================
// Status
// ============================================================================

/// Per-step status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    NotApplied,
    Applied,
    Reverted,
    Failed,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotApplied => write!(f, "NOT-APPLIED"),
            Self::Applied => write!(f, "APPLIED"),
            Self::Reverted => write!(f, "REVERTED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Recipe status derived from its steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipeStatus {
    NotInstalled,
    Partial,
    Installed,
    Failed,
}

impl RecipeStatus {
    /// Derive the recipe status from its step statuses.
    pub fn derive(statuses: &[StepStatus]) -> Self {
        if statuses.contains(&StepStatus::Failed) {
            return Self::Failed;
        }
        let applied = statuses
            .iter()
            .filter(|s| **s == StepStatus::Applied)
            .count();
        match applied {
            0 => Self::NotInstalled,
            n if n == statuses.len() => Self::Installed,
            _ => Self::Partial,
        }
    }
}

impl fmt::Display for RecipeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInstalled => write!(f, "NOT-INSTALLED"),
            Self::Partial => write!(f, "PARTIAL"),
            Self::Installed => write!(f, "INSTALLED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

// ============================================================================
// Execution
// ============================================================================

/// Whole-recipe operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Install,
    Uninstall,
}

impl Operation {
    /// What the operation does to each step.
    pub fn step_action(self) -> StepAction {
        match self {
            Self::Install => StepAction::Apply,
            Self::Uninstall => StepAction::Revert,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Install => write!(f, "install"),
            Self::Uninstall => write!(f, "uninstall"),
        }
    }
}

/// Single-step action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    Apply,
    Revert,
}

impl fmt::Display for StepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Apply => write!(f, "apply"),
            Self::Revert => write!(f, "revert"),
        }
    }
}

/// Lifecycle of a tracked whole-recipe execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    TimedOut,
}

impl ExecutionState {
    /// True once the execution can no longer change.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Succeeded => write!(f, "SUCCEEDED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Cancelled => write!(f, "CANCELLED"),
            Self::TimedOut => write!(f, "TIMED-OUT"),
        }
    }
}

// ============================================================================
// Policy
// ============================================================================

/// Execution policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    /// Failure handling for whole-recipe runs
    #[serde(default)]
    pub failure: FailurePolicy,

    /// Upper bound for one install/uninstall run
    #[serde(default = "default_execution_timeout")]
    pub execution_timeout_secs: u64,

    /// Upper bound for one step
    #[serde(default = "default_step_timeout")]
    pub step_timeout_secs: u64,

    /// Append to the per-recipe event log
    #[serde(default = "default_true")]
    pub events: bool,

    /// Persist step status after every transition
    #[serde(default = "default_true")]
    pub lock_file: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            failure: FailurePolicy::default(),
            execution_timeout_secs: default_execution_timeout(),
            step_timeout_secs: default_step_timeout(),
            events: true,
            lock_file: true,
        }
    }
}

fn default_execution_timeout() -> u64 {
    600
}

fn default_step_timeout() -> u64 {
    120
}

/// Failure handling strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    #[default]
    StopOnFirst,
    Continue,
}

// ============================================================================
// State / Lock file
// ============================================================================

/// Per-recipe state lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateLock {
    /// Schema version
    pub schema: String,

    /// Recipe id
    pub recipe: String,

    /// When the lock was generated
    pub generated_at: String,

    /// Generator version
    pub generator: String,

    /// Per-step state keyed by index
    pub steps: IndexMap<usize, StepLock>,
}

/// Per-step lock entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepLock {
    #[serde(rename = "type")]
    pub kind: StepKind,

    pub status: StepStatus,

    #[serde(default)]
    pub updated_at: Option<String>,

    #[serde(default)]
    pub error: Option<String>,
}

// ============================================================================
// Events
// ============================================================================

/// Event for the per-recipe JSONL log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RecipeEvent {
    ExecutionStarted {
        recipe: String,
        run_id: String,
        operation: Operation,
        recipectl_version: String,
    },
    StepStarted {
        recipe: String,
        step: usize,
        action: StepAction,
    },
    StepCompleted {
        recipe: String,
        step: usize,
        action: StepAction,
        duration_seconds: f64,
    },
    StepFailed {
        recipe: String,
        step: usize,
        action: StepAction,
        error: String,
    },
    ExecutionCompleted {
        recipe: String,
        run_id: String,
        state: ExecutionState,
        steps_completed: u32,
        steps_failed: u32,
        total_seconds: f64,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: RecipeEvent,
}

// ============================================================================
// Transfer representations
// ============================================================================

/// Step as returned across the HTTP boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDto {
    pub index: usize,
    #[serde(rename = "type")]
    pub kind: StepKind,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: StepStatus,
    /// Variant-specific view of the step's parameters and live state
    pub settings: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// Recipe as returned across the HTTP boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeDto {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub status: RecipeStatus,
    pub steps: Vec<StepDto>,
    /// Latest whole-recipe execution, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionDto>,
}

/// Snapshot of a tracked whole-recipe execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionDto {
    pub run_id: String,
    pub recipe: String,
    pub operation: Operation,
    pub state: ExecutionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<usize>,
    pub started_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
    pub outcomes: Vec<StepOutcome>,
}

/// Result of one step within an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub index: usize,
    pub status: StepStatus,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Template helper
// ============================================================================

/// Convert a serde_yaml_ng::Value to a string for template resolution.
pub fn yaml_value_to_string(val: &serde_yaml_ng::Value) -> String {
    match val {
        serde_yaml_ng::Value::String(s) => s.clone(),
        serde_yaml_ng::Value::Number(n) => n.to_string(),
        serde_yaml_ng::Value::Bool(b) => b.to_string(),
        serde_yaml_ng::Value::Null => String::new(),
        other => format!("{:?}", other),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recipe_file_parse() {
        let yaml = r#"
recipe:
  id: enable-foo
  name: Enable Foo
  version: "1.0"
params:
  plugin_version: "2.1.0"
steps:
  - type: install_plugin
    name: Install foo
    plugin_id: foo
    version: "{{params.plugin_version}}"
  - type: feature_flag
    flag: foo-ui
"#;
        let file: RecipeFile = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(file.recipe.id, "enable-foo");
        assert_eq!(file.steps.len(), 2);
        assert_eq!(file.steps[0].spec.kind(), StepKind::InstallPlugin);
        assert_eq!(file.steps[0].name.as_deref(), Some("Install foo"));
        match &file.steps[1].spec {
            StepSpec::FeatureFlag(f) => {
                assert_eq!(f.flag, "foo-ui");
                assert!(f.enabled, "enabled defaults to true");
            }
            other => panic!("unexpected step {:?}", other),
        }
    }

    #[test]
    fn test_unknown_step_type_rejected() {
        let yaml = r#"
recipe:
  id: x
  name: X
steps:
  - type: reboot_machine
"#;
        let result: Result<RecipeFile, _> = serde_yaml_ng::from_str(yaml);
        assert!(result.is_err());
    }

    #[test]
    fn test_recipe_status_derive() {
        use StepStatus::*;
        assert_eq!(RecipeStatus::derive(&[]), RecipeStatus::NotInstalled);
        assert_eq!(
            RecipeStatus::derive(&[NotApplied, Reverted]),
            RecipeStatus::NotInstalled
        );
        assert_eq!(
            RecipeStatus::derive(&[Applied, NotApplied]),
            RecipeStatus::Partial
        );
        assert_eq!(
            RecipeStatus::derive(&[Applied, Applied]),
            RecipeStatus::Installed
        );
        assert_eq!(
            RecipeStatus::derive(&[Applied, Failed]),
            RecipeStatus::Failed
        );
    }

    #[test]
    fn test_execution_state_terminal() {
        assert!(!ExecutionState::Pending.is_terminal());
        assert!(!ExecutionState::Running.is_terminal());
        assert!(ExecutionState::Succeeded.is_terminal());
        assert!(ExecutionState::Cancelled.is_terminal());
        assert!(ExecutionState::TimedOut.is_terminal());
    }

    #[test]
    fn test_policy_defaults() {
        let p = Policy::default();
        assert_eq!(p.failure, FailurePolicy::StopOnFirst);
        assert_eq!(p.execution_timeout_secs, 600);
        assert_eq!(p.step_timeout_secs, 120);
        assert!(p.events);
        assert!(p.lock_file);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(StepStatus::NotApplied.to_string(), "NOT-APPLIED");
        assert_eq!(RecipeStatus::Installed.to_string(), "INSTALLED");
        assert_eq!(ExecutionState::TimedOut.to_string(), "TIMED-OUT");
        assert_eq!(StepKind::WriteConfig.to_string(), "write_config");
    }

    #[test]
    fn test_operation_step_action() {
        assert_eq!(Operation::Install.step_action(), StepAction::Apply);
        assert_eq!(Operation::Uninstall.step_action(), StepAction::Revert);
    }

    #[test]
    fn test_step_dto_json_shape() {
        let dto = StepDto {
            index: 0,
            kind: StepKind::FeatureFlag,
            name: "Enable foo UI".to_string(),
            description: None,
            status: StepStatus::Applied,
            settings: serde_json::json!({"flag": "foo-ui"}),
            error: None,
            updated_at: None,
        };
        let json = serde_json::to_string(&dto).unwrap();
        assert!(json.contains("\"type\":\"feature_flag\""));
        assert!(json.contains("\"status\":\"applied\""));
        assert!(!json.contains("error"));
    }

    #[test]
    fn test_recipe_event_serde() {
        let event = RecipeEvent::ExecutionStarted {
            recipe: "enable-foo".to_string(),
            run_id: "r-abc".to_string(),
            operation: Operation::Uninstall,
            recipectl_version: "0.1.0".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"execution_started\""));
        assert!(json.contains("\"operation\":\"uninstall\""));
    }

    #[test]
    fn test_state_lock_roundtrip() {
        let lock = StateLock {
            schema: "1.0".to_string(),
            recipe: "enable-foo".to_string(),
            generated_at: "2026-02-16T14:00:00Z".to_string(),
            generator: "recipectl 0.1.0".to_string(),
            steps: IndexMap::from([(
                1,
                StepLock {
                    kind: StepKind::FeatureFlag,
                    status: StepStatus::Applied,
                    updated_at: Some("2026-02-16T14:00:01Z".to_string()),
                    error: None,
                },
            )]),
        };
        let yaml = serde_yaml_ng::to_string(&lock).unwrap();
        let lock2: StateLock = serde_yaml_ng::from_str(&yaml).unwrap();
        assert_eq!(lock2.recipe, "enable-foo");
        assert_eq!(lock2.steps[&1].status, StepStatus::Applied);
    }

    #[test]
    fn test_yaml_value_to_string() {
        assert_eq!(
            yaml_value_to_string(&serde_yaml_ng::Value::String("hello".into())),
            "hello"
        );
        assert_eq!(yaml_value_to_string(&serde_yaml_ng::Value::Bool(true)), "true");
        assert_eq!(yaml_value_to_string(&serde_yaml_ng::Value::Null), "");
    }
}
