//! The parent's handle to its launcher.

use crate::config::types::{ClonerError, ProtocolError, Result, SandboxConfig};
use crate::config::validator::validate_sandbox_config;
use crate::core::protocol::{recv_spawned_child, send_message};
use crate::core::types::{ChildHandle, SpawnRequest};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;
use std::fs::File;
use std::io::ErrorKind;
use std::net::Shutdown;
use std::os::unix::net::UnixStream;

/// Connection to a running launcher, returned by
/// [`Launcher::start`](crate::core::launcher::Launcher::start).
///
/// Requests are strictly one at a time, hence `&mut self`. Share a client
/// between threads by wrapping it in a `Mutex`.
#[derive(Debug)]
pub struct Client {
    socket: UnixStream,
    launcher_pid: Pid,
    closed: bool,
}

/// A dead launcher shows up as EOF or a broken pipe on the channel.
fn launcher_gone(err: ClonerError) -> ClonerError {
    match err {
        ClonerError::Protocol(ProtocolError::Closed) => ClonerError::LauncherExited,
        ClonerError::Io(e)
            if matches!(e.kind(), ErrorKind::BrokenPipe | ErrorKind::ConnectionReset) =>
        {
            ClonerError::LauncherExited
        }
        other => other,
    }
}

impl Client {
    pub(crate) fn new(socket: UnixStream, launcher_pid: Pid) -> Self {
        Self {
            socket,
            launcher_pid,
            closed: false,
        }
    }

    pub fn launcher_pid(&self) -> Pid {
        self.launcher_pid
    }

    /// Ask the launcher for a new sandboxed child running the entry point
    /// with `args`. The child is our direct child: the caller must
    /// [`wait`](ChildHandle::wait) for it.
    pub fn spawn_child(
        &mut self,
        process_name: &str,
        args: Vec<serde_json::Value>,
        sandbox_config: SandboxConfig,
    ) -> Result<ChildHandle> {
        if self.closed {
            return Err(ClonerError::LauncherExited);
        }
        validate_sandbox_config(&sandbox_config)?;

        let request = SpawnRequest {
            process_name: process_name.to_string(),
            args,
            sandbox_config,
        };
        send_message(&mut self.socket, &request).map_err(launcher_gone)?;
        let spawned = recv_spawned_child(&self.socket).map_err(launcher_gone)?;

        log::debug!("Launcher spawned {} as pid {}", process_name, spawned.pid);
        Ok(ChildHandle {
            pid: spawned.pid,
            stdin: Some(File::from(spawned.stdin)),
            stdout: Some(File::from(spawned.stdout)),
            stderr: Some(File::from(spawned.stderr)),
        })
    }

    /// Close the channel, which tells the launcher to exit, and reap it.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        match self.socket.shutdown(Shutdown::Both) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotConnected => {}
            Err(e) => return Err(e.into()),
        }

        loop {
            match waitpid(self.launcher_pid, None) {
                Ok(WaitStatus::Exited(_, 0)) => {
                    log::debug!("Launcher {} exited cleanly", self.launcher_pid);
                    return Ok(());
                }
                Ok(WaitStatus::Exited(_, code)) => {
                    log::warn!("Launcher {} exited with status {}", self.launcher_pid, code);
                    return Ok(());
                }
                Ok(WaitStatus::Signaled(_, sig, _)) => {
                    log::warn!("Launcher {} killed by {:?}", self.launcher_pid, sig);
                    return Ok(());
                }
                Ok(_) => continue,
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => {
                    return Err(ClonerError::Process(format!(
                        "waitpid(launcher {}) failed: {}",
                        self.launcher_pid, e
                    )))
                }
            }
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::warn!("Failed to shut down launcher: {}", e);
        }
    }
}
