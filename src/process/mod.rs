//! Process supervision: spawning, signalling and reaping bot processes.

mod command;
mod control;
mod lines;
mod supervisor;

#[cfg(target_os = "windows")]
pub(crate) mod win_api;

/// Role name of an instance's main bot process.
pub const MAIN_ROLE: &str = "main";

pub(crate) use command::{output_tail, run_to_completion};
pub use control::{check_port_available, force_kill, is_process_alive};
pub use supervisor::{
    InstanceStats, StopOutcome, Supervisor, TargetKey, TargetState, TargetStatus,
};
