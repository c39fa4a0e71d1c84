//! Shell command construction shared by provisioning and supervised targets.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::error::{AppError, Result};

/// Build a command that runs `command_line` through the platform shell in `dir`.
pub(crate) fn shell_command(command_line: &str, dir: &Path) -> Command {
    #[cfg(target_os = "windows")]
    let mut cmd = {
        use windows::Win32::System::Threading::CREATE_NO_WINDOW;

        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command_line);
        cmd.creation_flags(CREATE_NO_WINDOW.0);
        cmd
    };

    #[cfg(not(target_os = "windows"))]
    let mut cmd = {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command_line);
        cmd
    };

    cmd.current_dir(dir).env("BOT_LAUNCHER", "1");
    cmd
}

/// Run a one-shot command to completion within `timeout`, failing on non-zero exit.
pub(crate) async fn run_to_completion(
    command_line: &str,
    dir: &Path,
    timeout: Duration,
) -> Result<()> {
    let mut cmd = shell_command(command_line, dir);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(result) => result
            .map_err(|e| AppError::external(format!("Failed to run `{}`: {}", command_line, e)))?,
        Err(_) => {
            return Err(AppError::external(format!(
                "`{}` did not finish within {}s",
                command_line,
                timeout.as_secs()
            )))
        }
    };

    if !output.status.success() {
        return Err(AppError::external(format!(
            "`{}` exited with {}: {}",
            command_line,
            output
                .status
                .code()
                .map_or_else(|| "a signal".to_string(), |c| format!("code {}", c)),
            output_tail(&output.stderr, &output.stdout)
        )));
    }
    Ok(())
}

/// Last few lines of stderr, falling back to stdout, for error messages.
pub(crate) fn output_tail(stderr: &[u8], stdout: &[u8]) -> String {
    let stderr = String::from_utf8_lossy(stderr);
    let stdout = String::from_utf8_lossy(stdout);
    let text = if stderr.trim().is_empty() {
        stdout.trim()
    } else {
        stderr.trim()
    };
    if text.is_empty() {
        return "(no output)".to_string();
    }
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(5)..].join("\n")
}
