/// Namespace creation for sandboxed children
/// Clones into fresh namespaces and writes the id maps from the outside
use crate::config::types::{ClonerError, Result};

use nix::sched::CloneFlags;
use nix::unistd::Pid;
use std::fs;
use std::path::PathBuf;

/// Stack handed to `clone(2)` for the child. The child runs on it until the
/// entry point returns, so it must hold a full Rust call chain.
pub const CHILD_STACK_SIZE: usize = 2 * 1024 * 1024;

/// First host uid/gid backing the child's user namespace.
pub const ID_MAP_OUTSIDE_BASE: u32 = 100_000;
/// Number of ids mapped, starting at 0 inside the namespace.
pub const ID_MAP_RANGE: u32 = 65_536;

/// Namespaces every child gets, plus `CLONE_PARENT` so the child is a
/// sibling of the launcher and the launcher's caller reaps it.
pub fn child_clone_flags() -> CloneFlags {
    CloneFlags::CLONE_PARENT
        | CloneFlags::CLONE_NEWNS
        | CloneFlags::CLONE_NEWCGROUP
        | CloneFlags::CLONE_NEWUTS
        | CloneFlags::CLONE_NEWIPC
        | CloneFlags::CLONE_NEWUSER
        | CloneFlags::CLONE_NEWPID
        | CloneFlags::CLONE_NEWNET
}

/// Check if namespace isolation is supported on this system
pub fn is_supported() -> bool {
    std::fs::read_dir("/proc/self/ns").is_ok()
}

/// Whether this kernel lets us create user namespaces at all.
pub fn user_namespaces_enabled() -> bool {
    match fs::read_to_string("/proc/sys/user/max_user_namespaces") {
        Ok(value) => value.trim().parse::<u64>().map(|n| n > 0).unwrap_or(false),
        Err(_) => fs::metadata("/proc/self/ns/user").is_ok(),
    }
}

/// Clone the current process into new namespaces.
///
/// `entry` runs in the child on a freshly allocated stack and its return
/// value becomes the child's exit status. The parent gets the child's pid.
pub fn clone_into_namespaces(entry: Box<dyn FnMut() -> isize + '_>) -> Result<Pid> {
    let mut stack = vec![0u8; CHILD_STACK_SIZE];

    // SAFETY: the child gets its own copy of the address space (no CLONE_VM),
    // so the stack buffer and anything `entry` borrows stay valid in it. The
    // launcher is single-threaded, so no lock can be held mid-clone.
    let pid = unsafe {
        nix::sched::clone(
            entry,
            &mut stack,
            child_clone_flags(),
            Some(libc::SIGCHLD),
        )
    }
    .map_err(|e| ClonerError::Namespace(format!("clone() failed: {}", e)))?;

    log::debug!("Cloned child {} into new namespaces", pid);
    Ok(pid)
}

/// Map root inside the child's user namespace onto the unprivileged host
/// range, and deny setgroups(2) so the gid map may be written.
///
/// Must run from the parent user namespace before the child continues.
pub fn write_id_maps(pid: Pid) -> Result<()> {
    let map = format!("0 {} {}\n", ID_MAP_OUTSIDE_BASE, ID_MAP_RANGE);

    write_proc_file(pid, "uid_map", &map)?;
    write_proc_file(pid, "setgroups", "deny")?;
    write_proc_file(pid, "gid_map", &map)?;

    log::debug!("Wrote uid/gid maps for child {}", pid);
    Ok(())
}

fn write_proc_file(pid: Pid, name: &str, contents: &str) -> Result<()> {
    let path = PathBuf::from(format!("/proc/{}/{}", pid, name));
    fs::write(&path, contents).map_err(|e| {
        ClonerError::Namespace(format!("Failed to write {}: {}", path.display(), e))
    })
}
