//! Helpers for the external command-line tools the pipeline drives.

use std::process::{Output, Stdio};

use tokio::process::Command;

/// Creates a command with stdin closed and the child killed if the future is dropped.
pub fn command(program: &str) -> Command {
    let mut cmd = Command::new(program);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

/// Runs `cmd` to completion, capturing stdout and stderr.
pub async fn run(cmd: &mut Command, program: &str) -> Result<Output, String> {
    cmd.output()
        .await
        .map_err(|e| format!("failed to run {}: {}", program, e))
}

/// Runs `cmd` and turns a non-zero exit into an error carrying its output.
pub async fn run_checked(cmd: &mut Command, program: &str) -> Result<Output, String> {
    let output = run(cmd, program).await?;
    if output.status.success() {
        Ok(output)
    } else {
        Err(format!("{} failed: {}", program, format_output_error(&output)))
    }
}

/// Formats a failed command with both stdout and stderr for better debugging.
pub fn format_output_error(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();

    match (stderr.is_empty(), stdout.is_empty()) {
        (true, true) => format!(
            "Command failed with exit code {}",
            output.status.code().unwrap_or(-1)
        ),
        (true, false) => stdout,
        (false, true) => stderr,
        (false, false) => format!("{}\n{}", stderr, stdout),
    }
}
