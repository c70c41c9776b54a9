use crate::config::types::{ClonerError, Result, SandboxConfig};
use crate::core::protocol::Message;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use std::fs::File;

/// Function a child runs once it is sandboxed. Its return value is the
/// child's exit status.
pub type EntryPoint = fn(&[serde_json::Value]) -> i32;

/// Parent -> launcher: clone a new child.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpawnRequest {
    /// Shown as `cloner:<name>` in process listings
    pub process_name: String,
    /// Passed to the entry point unchanged
    pub args: Vec<serde_json::Value>,
    pub sandbox_config: SandboxConfig,
}

impl Message for SpawnRequest {
    const KIND: &'static str = "spawn_request";
}

/// How a child finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChildExit {
    Exited(i32),
    Signaled(Signal),
}

impl ChildExit {
    pub fn code(&self) -> Option<i32> {
        match self {
            ChildExit::Exited(code) => Some(*code),
            ChildExit::Signaled(_) => None,
        }
    }

    pub fn success(&self) -> bool {
        *self == ChildExit::Exited(0)
    }
}

/// A running sandboxed child, as seen by the process that asked for it.
///
/// The child is a direct child of the caller, which must eventually call
/// [`ChildHandle::wait`] to reap it.
#[derive(Debug)]
pub struct ChildHandle {
    pub pid: Pid,
    /// Write end of the child's stdin
    pub stdin: Option<File>,
    /// Read end of the child's stdout
    pub stdout: Option<File>,
    /// Read end of the child's stderr
    pub stderr: Option<File>,
}

impl ChildHandle {
    /// SIGKILL the child. It still has to be waited for.
    pub fn kill(&self) -> Result<()> {
        match kill(self.pid, Signal::SIGKILL) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(e) => Err(ClonerError::Process(format!(
                "Failed to kill child {}: {}",
                self.pid, e
            ))),
        }
    }

    /// Close stdin, then block until the child exits and reap it.
    pub fn wait(&mut self) -> Result<ChildExit> {
        drop(self.stdin.take());

        loop {
            match waitpid(self.pid, None) {
                Ok(WaitStatus::Exited(_, code)) => return Ok(ChildExit::Exited(code)),
                Ok(WaitStatus::Signaled(_, sig, _)) => return Ok(ChildExit::Signaled(sig)),
                Ok(_) => continue,
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => {
                    return Err(ClonerError::Process(format!(
                        "waitpid({}) failed: {}",
                        self.pid, e
                    )))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_request_round_trips_through_json() {
        let request = SpawnRequest {
            process_name: "child-1".to_string(),
            args: vec![serde_json::json!("a"), serde_json::json!({"b": [1, 2]})],
            sandbox_config: SandboxConfig::default().with_chroot("/srv/chroot"),
        };
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(serde_json::from_str::<SpawnRequest>(&json).unwrap(), request);
    }

    #[test]
    fn exit_codes() {
        assert!(ChildExit::Exited(0).success());
        assert!(!ChildExit::Exited(126).success());
        assert_eq!(ChildExit::Exited(3).code(), Some(3));
        assert_eq!(ChildExit::Signaled(Signal::SIGKILL).code(), None);
    }
}
