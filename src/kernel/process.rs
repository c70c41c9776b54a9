//! Per-process attributes: name, parent-death signal, forced termination.
use crate::config::types::{ClonerError, Result};
use nix::sys::prctl;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::ffi::CString;

/// Longest name the kernel keeps for a task (TASK_COMM_LEN - 1).
pub const MAX_PROCESS_NAME_LEN: usize = 15;

/// Deliver SIGKILL to this process when its parent dies.
pub fn setup_parent_death_signal() -> Result<()> {
    prctl::set_pdeathsig(Signal::SIGKILL).map_err(|e| {
        ClonerError::Process(format!("Failed to set parent death signal: {}", e))
    })?;

    log::debug!("Parent death signal (SIGKILL) configured");
    Ok(())
}

/// Name shown by `ps` and in /proc/<pid>/comm, truncated to what the kernel
/// stores. Interior NUL bytes end the name early.
pub fn process_name_for(name: &str) -> CString {
    let mut bytes: Vec<u8> = name.bytes().take_while(|b| *b != 0).collect();
    if bytes.len() > MAX_PROCESS_NAME_LEN {
        let mut end = MAX_PROCESS_NAME_LEN;
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        bytes.truncate(end);
    }
    // No NUL bytes remain after take_while.
    CString::new(bytes).unwrap_or_default()
}

pub fn set_process_name(name: &str) -> Result<()> {
    let name = process_name_for(name);
    prctl::set_name(&name)
        .map_err(|e| ClonerError::Process(format!("Failed to set process name: {}", e)))
}

/// SIGKILL a child we cannot finish setting up. ESRCH (already gone) is fine.
pub fn kill_child(pid: Pid) {
    match kill(pid, Signal::SIGKILL) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => log::warn!("Failed to kill child {}: {}", pid, e),
    }
}
