//! Command transport for shell steps.

pub mod local;

use crate::core::error::StepError;
use std::path::Path;
use std::time::Duration;

/// Output from executing a script.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turn a non-zero exit into a `StepError::Command`.
    pub fn into_result(self) -> Result<ExecOutput, StepError> {
        if self.success() {
            Ok(self)
        } else {
            Err(StepError::Command {
                exit_code: self.exit_code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Run a script and fail on a non-zero exit.
pub async fn run_checked(script: &str, cwd: &Path, timeout: Duration) -> Result<ExecOutput, StepError> {
    local::exec_local(script, cwd, timeout).await?.into_result()
}
