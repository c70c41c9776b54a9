//! Descriptor hand-off between the launcher and a freshly cloned child.
//!
//! A spawn uses four pipes: the child's stdin, stdout and stderr, plus a
//! "ready" pipe the launcher closes once the child's namespaces are set up.
//! All eight ends exist in both processes right after `clone(2)`, and every
//! end must be closed exactly once in each process.
//!
//! The states below encode that ownership. Each transition consumes the
//! previous state, and each end is an [`OwnedFd`], so the closes a state
//! performs are exactly the drops of the ends it gives up:
//!
//! ```text
//! CloneFds ─ become_child() ─> ChildFds ─ wait_for_ready() ─> ChildStdFds ─ replace_standard_fds()
//!     └──── become_cloner() ─> ClonerFds ─ signal_ready() ─> ParentFds ─ (sent to parent) ─ close()
//! ```
//!
//! A consumed state cannot be used again:
//!
//! ```compile_fail
//! use rustbox_cloner::exec::clonefds::CloneFds;
//!
//! let fds = CloneFds::create().unwrap();
//! let _child = fds.become_child();
//! let _cloner = fds.become_cloner();
//! ```
//!
//! and the child cannot touch its standard descriptors before the launcher
//! says it is ready:
//!
//! ```compile_fail
//! use rustbox_cloner::exec::clonefds::CloneFds;
//!
//! let fds = CloneFds::create().unwrap();
//! fds.become_child().replace_standard_fds();
//! ```

use crate::config::types::{ClonerError, Result};
use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};
use nix::unistd::{dup2, pipe2};
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::os::fd::{AsRawFd, IntoRawFd, OwnedFd, RawFd};

/// Raw numbers of all eight ends, for logging and for tests that check
/// which ends a process still holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CloneFdNumbers {
    pub stdin_r: RawFd,
    pub stdin_w: RawFd,
    pub stdout_r: RawFd,
    pub stdout_w: RawFd,
    pub stderr_r: RawFd,
    pub stderr_w: RawFd,
    pub ready_r: RawFd,
    pub ready_w: RawFd,
}

impl CloneFdNumbers {
    /// Ends the child keeps after `become_child`.
    pub fn child_ends(&self) -> [RawFd; 4] {
        [self.stdin_r, self.stdout_w, self.stderr_w, self.ready_r]
    }

    /// Ends the launcher keeps after `become_cloner`.
    pub fn cloner_ends(&self) -> [RawFd; 4] {
        [self.stdin_w, self.stdout_r, self.stderr_r, self.ready_w]
    }
}

/// All eight ends, as they exist right before `clone(2)`.
#[derive(Debug)]
pub struct CloneFds {
    stdin_r: OwnedFd,
    stdin_w: OwnedFd,
    stdout_r: OwnedFd,
    stdout_w: OwnedFd,
    stderr_r: OwnedFd,
    stderr_w: OwnedFd,
    ready_r: OwnedFd,
    ready_w: OwnedFd,
}

fn pipe_pair(what: &str) -> Result<(OwnedFd, OwnedFd)> {
    pipe2(OFlag::O_CLOEXEC)
        .map_err(|e| ClonerError::Process(format!("Failed to create {} pipe: {}", what, e)))
}

impl CloneFds {
    /// Create the four pipes, close-on-exec, in stdin/stdout/stderr/ready
    /// order.
    ///
    /// Fails unless `stdin_r < stdout_w < stderr_w`: the child's remapping
    /// onto 0/1/2 relies on that order to never clobber an end it still
    /// needs.
    pub fn create() -> Result<Self> {
        let (stdin_r, stdin_w) = pipe_pair("stdin")?;
        let (stdout_r, stdout_w) = pipe_pair("stdout")?;
        let (stderr_r, stderr_w) = pipe_pair("stderr")?;
        let (ready_r, ready_w) = pipe_pair("ready")?;

        let fds = Self {
            stdin_r,
            stdin_w,
            stdout_r,
            stdout_w,
            stderr_r,
            stderr_w,
            ready_r,
            ready_w,
        };
        fds.check_remap_order()?;
        Ok(fds)
    }

    fn check_remap_order(&self) -> Result<()> {
        let (stdin_r, stdout_w, stderr_w) = (
            self.stdin_r.as_raw_fd(),
            self.stdout_w.as_raw_fd(),
            self.stderr_w.as_raw_fd(),
        );
        if stdin_r < stdout_w && stdout_w < stderr_w {
            Ok(())
        } else {
            Err(ClonerError::Process(format!(
                "Pipe descriptors out of order: stdin_r={} stdout_w={} stderr_w={}",
                stdin_r, stdout_w, stderr_w
            )))
        }
    }

    pub fn numbers(&self) -> CloneFdNumbers {
        CloneFdNumbers {
            stdin_r: self.stdin_r.as_raw_fd(),
            stdin_w: self.stdin_w.as_raw_fd(),
            stdout_r: self.stdout_r.as_raw_fd(),
            stdout_w: self.stdout_w.as_raw_fd(),
            stderr_r: self.stderr_r.as_raw_fd(),
            stderr_w: self.stderr_w.as_raw_fd(),
            ready_r: self.ready_r.as_raw_fd(),
            ready_w: self.ready_w.as_raw_fd(),
        }
    }

    /// Child side: close the four ends the launcher keeps.
    pub fn become_child(self) -> ChildFds {
        let CloneFds {
            stdin_r,
            stdin_w,
            stdout_r,
            stdout_w,
            stderr_r,
            stderr_w,
            ready_r,
            ready_w,
        } = self;
        drop((stdin_w, stdout_r, stderr_r, ready_w));

        ChildFds {
            stdin_r,
            stdout_w,
            stderr_w,
            ready_r,
        }
    }

    /// Launcher side: close the four ends the child keeps.
    pub fn become_cloner(self) -> ClonerFds {
        let CloneFds {
            stdin_r,
            stdin_w,
            stdout_r,
            stdout_w,
            stderr_r,
            stderr_w,
            ready_r,
            ready_w,
        } = self;
        drop((stdin_r, stdout_w, stderr_w, ready_r));

        ClonerFds {
            stdin_w,
            stdout_r,
            stderr_r,
            ready_w,
        }
    }
}

/// Child side, before the launcher has released it.
#[derive(Debug)]
pub struct ChildFds {
    stdin_r: OwnedFd,
    stdout_w: OwnedFd,
    stderr_w: OwnedFd,
    ready_r: OwnedFd,
}

impl ChildFds {
    /// Block until the launcher closes its end of the ready pipe.
    ///
    /// EOF is the signal; a stray byte counts too. Interrupted reads are
    /// retried.
    pub fn wait_for_ready(self) -> Result<ChildStdFds> {
        let ChildFds {
            stdin_r,
            stdout_w,
            stderr_w,
            ready_r,
        } = self;

        let mut ready = File::from(ready_r);
        let mut buf = [0u8; 1];
        loop {
            match ready.read(&mut buf) {
                Ok(_) => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(ClonerError::Process(format!(
                        "Failed waiting for launcher to release child: {}",
                        e
                    )))
                }
            }
        }
        drop(ready);

        Ok(ChildStdFds {
            stdin_r,
            stdout_w,
            stderr_w,
        })
    }
}

/// Child side, released, still holding its three standard ends.
#[derive(Debug)]
pub struct ChildStdFds {
    stdin_r: OwnedFd,
    stdout_w: OwnedFd,
    stderr_w: OwnedFd,
}

impl ChildStdFds {
    /// dup2 each end onto 0, 1 and 2 and close the original.
    ///
    /// The ascending order established by [`CloneFds::create`] guarantees no
    /// dup2 overwrites an end that is still to be moved.
    pub fn replace_standard_fds(self) -> Result<()> {
        let ChildStdFds {
            stdin_r,
            stdout_w,
            stderr_w,
        } = self;

        move_onto(stdin_r, libc::STDIN_FILENO)?;
        move_onto(stdout_w, libc::STDOUT_FILENO)?;
        move_onto(stderr_w, libc::STDERR_FILENO)
    }
}

fn move_onto(fd: OwnedFd, target: RawFd) -> Result<()> {
    if fd.as_raw_fd() == target {
        // Already in place: keep it open, but as a standard stream it must
        // survive exec like one.
        let fd = fd.into_raw_fd();
        fcntl(fd, FcntlArg::F_SETFD(FdFlag::empty())).map_err(|e| {
            ClonerError::Process(format!("Failed to clear FD_CLOEXEC on {}: {}", fd, e))
        })?;
        return Ok(());
    }

    dup2(fd.as_raw_fd(), target).map_err(|e| {
        ClonerError::Process(format!(
            "Failed to dup2({}, {}): {}",
            fd.as_raw_fd(),
            target,
            e
        ))
    })?;
    drop(fd);
    Ok(())
}

/// Launcher side, while it prepares the child's namespaces.
#[derive(Debug)]
pub struct ClonerFds {
    stdin_w: OwnedFd,
    stdout_r: OwnedFd,
    stderr_r: OwnedFd,
    ready_w: OwnedFd,
}

impl ClonerFds {
    /// Release the child by closing the ready pipe's write end.
    pub fn signal_ready(self) -> ParentFds {
        let ClonerFds {
            stdin_w,
            stdout_r,
            stderr_r,
            ready_w,
        } = self;
        drop(ready_w);

        ParentFds {
            stdin_w,
            stdout_r,
            stderr_r,
        }
    }
}

/// Launcher side, child released: the three ends destined for the parent.
#[derive(Debug)]
pub struct ParentFds {
    stdin_w: OwnedFd,
    stdout_r: OwnedFd,
    stderr_r: OwnedFd,
}

impl ParentFds {
    /// stdin-write, stdout-read, stderr-read, in the order they go on the wire.
    pub fn raw_fds(&self) -> [RawFd; 3] {
        [
            self.stdin_w.as_raw_fd(),
            self.stdout_r.as_raw_fd(),
            self.stderr_r.as_raw_fd(),
        ]
    }

    /// Close the launcher's copies once they have been sent to the parent.
    pub fn close(self) {
        drop(self);
    }
}
