//! Platform-specific signalling of supervised processes.

use crate::error::{AppError, Result};

/// Check if a process is alive by PID.
#[cfg(target_os = "windows")]
pub fn is_process_alive(pid: u32) -> bool {
    super::win_api::is_process_alive(pid)
}

/// Check if a process is alive by PID.
#[cfg(not(target_os = "windows"))]
pub fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Ask a process tree to exit.
#[cfg(target_os = "windows")]
pub(super) fn graceful_signal(pid: u32) -> Result<()> {
    taskkill(pid, false)
}

/// Send SIGTERM to the process group led by `pid`, or to `pid` alone if it has no group.
#[cfg(not(target_os = "windows"))]
pub(super) fn graceful_signal(pid: u32) -> Result<()> {
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::{getpgid, Pid};

    let target = Pid::from_raw(pid as i32);
    match getpgid(Some(target)) {
        Ok(pgid) if pgid == target => killpg(pgid, Signal::SIGTERM).map_err(|e| {
            AppError::external(format!("Failed to send SIGTERM to group {}: {}", pid, e))
        }),
        _ => kill(target, Signal::SIGTERM)
            .map_err(|e| AppError::external(format!("Failed to send SIGTERM to PID {}: {}", pid, e))),
    }
}

#[cfg(target_os = "windows")]
pub fn force_kill(pid: u32) -> Result<()> {
    taskkill(pid, true)
}

#[cfg(target_os = "windows")]
fn taskkill(pid: u32, force: bool) -> Result<()> {
    use std::os::windows::process::CommandExt as _;
    use windows::Win32::System::Threading::CREATE_NO_WINDOW;

    let pid_arg = pid.to_string();
    let mut args = vec!["/PID", pid_arg.as_str(), "/T"];
    if force {
        args.push("/F");
    }
    let output = std::process::Command::new("taskkill")
        .args(&args)
        .creation_flags(CREATE_NO_WINDOW.0)
        .output()
        .map_err(|e| AppError::external(format!("Failed to run taskkill: {e}")))?;

    if output.status.success() {
        Ok(())
    } else {
        Err(AppError::external(format!(
            "taskkill failed for pid {}: {}",
            pid,
            super::command::output_tail(&output.stderr, &output.stdout)
        )))
    }
}

#[cfg(not(target_os = "windows"))]
pub fn force_kill(pid: u32) -> Result<()> {
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::{getpgid, Pid};

    let target = Pid::from_raw(pid as i32);
    match getpgid(Some(target)) {
        Ok(pgid) => killpg(pgid, Signal::SIGKILL).map_err(|e| {
            AppError::external(format!(
                "Failed to kill process group {} (from pid {}): {}",
                pgid.as_raw(),
                pid,
                e
            ))
        }),
        Err(e) => kill(target, Signal::SIGKILL).map_err(|kill_err| {
            AppError::external(format!(
                "Failed to kill process {} (getpgid failed: {}): {}",
                pid, e, kill_err
            ))
        }),
    }
}

/// Fail with `Conflict` if something already listens on `port` locally.
pub fn check_port_available(port: u16) -> Result<()> {
    std::net::TcpListener::bind(("127.0.0.1", port)).map_err(|_| AppError::port_occupied(port))?;
    Ok(())
}
