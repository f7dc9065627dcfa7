//! Error taxonomy for recipe lookup, step execution, and configuration.

use thiserror::Error;

/// Main error type for recipectl.
#[derive(Error, Debug)]
pub enum RecipeError {
    /// No recipe registered under this id
    #[error("plugin recipe not found: {0}")]
    RecipeNotFound(String),

    /// Step index outside `[0, len)`
    #[error("recipe '{recipe}' has {len} step(s), step {index} does not exist")]
    StepIndexOutOfRange {
        recipe: String,
        index: usize,
        len: usize,
    },

    /// Malformed request parameter
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A whole-recipe execution already holds the recipe
    #[error("an execution is already in progress for recipe '{0}'")]
    ExecutionInProgress(String),

    /// Status requested before any execution ran
    #[error("no execution recorded for recipe '{0}'")]
    NoExecution(String),

    /// Cancel requested with nothing running
    #[error("no running execution for recipe '{0}'")]
    NotRunning(String),

    #[error("step {index} of '{recipe}' failed to apply: {message}")]
    StepApplication {
        recipe: String,
        index: usize,
        message: String,
    },

    #[error("step {index} of '{recipe}' failed to revert: {message}")]
    StepRevert {
        recipe: String,
        index: usize,
        message: String,
    },

    /// Step or execution exceeded its time budget
    #[error("recipe '{recipe}' timed out after {seconds}s")]
    Timeout { recipe: String, seconds: u64 },

    /// Recipe file validation errors
    #[error("validation error: {0}")]
    Validation(String),

    /// Server configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Lock file / event log errors
    #[error("state error: {0}")]
    State(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for recipectl operations.
pub type Result<T> = std::result::Result<T, RecipeError>;

impl RecipeError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }
}

/// Failure of a single step action. Variants enumerate what a step can hit.
#[derive(Error, Debug)]
pub enum StepError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Command ran and exited non-zero (or was killed)
    #[error("exit code {exit_code}: {stderr}")]
    Command { exit_code: i32, stderr: String },

    /// Plugin source missing from the repository
    #[error("missing source: {0}")]
    MissingSource(String),

    /// Path escapes the data directory or is absolute
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Flags file could not be parsed or written
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("step timed out after {0}s")]
    Timeout(u64),
}
