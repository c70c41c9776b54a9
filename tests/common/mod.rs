//! Helpers shared by the integration tests.
#![allow(dead_code)]

use nix::sched::{unshare, CloneFlags};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult};
use std::os::fd::RawFd;

const CAP_NET_ADMIN: u32 = 12;

pub fn is_root() -> bool {
    nix::unistd::geteuid().is_root()
}

/// Run `f` in a forked child and return its exit status. Only the child's
/// exit code crosses back, so `f` reports failures as distinct codes.
pub fn run_in_child<F: FnOnce() -> i32>(f: F) -> i32 {
    match unsafe { fork() }.expect("fork") {
        ForkResult::Child => {
            let code = f();
            unsafe { libc::_exit(code) }
        }
        ForkResult::Parent { child } => match waitpid(child, None).expect("waitpid") {
            WaitStatus::Exited(_, code) => code,
            other => panic!("child did not exit normally: {:?}", other),
        },
    }
}

/// Whether this environment lets us create the namespaces children need.
pub fn can_create_namespaces() -> bool {
    run_in_child(|| {
        let flags = CloneFlags::CLONE_NEWUSER
            | CloneFlags::CLONE_NEWNS
            | CloneFlags::CLONE_NEWNET
            | CloneFlags::CLONE_NEWPID
            | CloneFlags::CLONE_NEWIPC
            | CloneFlags::CLONE_NEWUTS
            | CloneFlags::CLONE_NEWCGROUP;
        match unshare(flags) {
            Ok(()) => 0,
            Err(_) => 1,
        }
    }) == 0
}

/// Whether CAP_NET_ADMIN is in this process's effective set.
pub fn has_net_admin() -> bool {
    let Ok(status) = std::fs::read_to_string("/proc/self/status") else {
        return false;
    };
    status
        .lines()
        .find_map(|line| line.strip_prefix("CapEff:"))
        .and_then(|hex| u64::from_str_radix(hex.trim(), 16).ok())
        .map(|caps| caps & (1 << CAP_NET_ADMIN) != 0)
        .unwrap_or(false)
}

pub fn is_open(fd: RawFd) -> bool {
    (unsafe { libc::fcntl(fd, libc::F_GETFD) }) != -1
}

pub fn is_closed(fd: RawFd) -> bool {
    (unsafe { libc::fcntl(fd, libc::F_GETFD) }) == -1
        && std::io::Error::last_os_error().raw_os_error() == Some(libc::EBADF)
}

pub fn write_all(fd: RawFd, mut buf: &[u8]) -> bool {
    while !buf.is_empty() {
        let n = unsafe { libc::write(fd, buf.as_ptr().cast(), buf.len()) };
        if n <= 0 {
            return false;
        }
        buf = &buf[n as usize..];
    }
    true
}

/// Read exactly `len` bytes, or fewer at EOF.
pub fn read_exact(fd: RawFd, len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        let n = unsafe { libc::read(fd, out[filled..].as_mut_ptr().cast(), len - filled) };
        if n <= 0 {
            break;
        }
        filled += n as usize;
    }
    out.truncate(filled);
    out
}
