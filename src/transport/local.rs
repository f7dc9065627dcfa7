//! Local execution transport.

use super::ExecOutput;
use crate::core::error::StepError;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Execute a shell script locally via `bash`, in `cwd`, bounded by `timeout`.
/// The script is piped to stdin. The child is killed if the timeout fires.
pub async fn exec_local(script: &str, cwd: &Path, timeout: Duration) -> Result<ExecOutput, StepError> {
    let mut child = Command::new("bash")
        .current_dir(cwd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(script.as_bytes()).await?;
        // Dropping stdin closes the pipe so bash sees EOF
    }

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result?,
        Err(_) => return Err(StepError::Timeout(timeout.as_secs())),
    };

    Ok(ExecOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}
