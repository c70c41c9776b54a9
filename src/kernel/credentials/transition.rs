//! UID/GID transition to the child's unprivileged identity.
//!
//! setresgid MUST be called BEFORE setresuid: once the uid changes, the
//! process no longer holds CAP_SETGID.

use super::validation::validate_ids;
use crate::config::types::{ClonerError, Result};
use nix::unistd::{getegid, geteuid, getgid, getuid, setgroups, setresgid, setresuid, Gid, Uid};

/// validate -> clear groups -> setresgid -> setresuid -> verify.
pub fn transition_to_unprivileged(uid: u32, gid: u32) -> Result<()> {
    validate_ids(uid, gid)?;
    clear_supplementary_groups()?;
    set_gid(gid)?;
    set_uid(uid)?;
    verify_transition(uid, gid)?;

    log::debug!("Transitioned to UID={}, GID={}", uid, gid);
    Ok(())
}

fn clear_supplementary_groups() -> Result<()> {
    match setgroups(&[]) {
        Ok(()) => Ok(()),
        // Inside a user namespace with setgroups=deny the call is refused,
        // and the group list is already fixed to the mapped primary group.
        Err(nix::errno::Errno::EPERM) => {
            log::debug!("setgroups denied; supplementary groups are locked by the namespace");
            Ok(())
        }
        Err(e) => Err(ClonerError::Privilege(format!(
            "Failed to clear supplementary groups: {}",
            e
        ))),
    }
}

fn set_gid(gid: u32) -> Result<()> {
    let gid = Gid::from_raw(gid);
    setresgid(gid, gid, gid)
        .map_err(|e| ClonerError::Privilege(format!("Failed to setresgid({}): {}", gid, e)))
}

fn set_uid(uid: u32) -> Result<()> {
    let uid = Uid::from_raw(uid);
    setresuid(uid, uid, uid)
        .map_err(|e| ClonerError::Privilege(format!("Failed to setresuid({}): {}", uid, e)))
}

fn verify_transition(expected_uid: u32, expected_gid: u32) -> Result<()> {
    let real_uid = getuid().as_raw();
    let effective_uid = geteuid().as_raw();
    let real_gid = getgid().as_raw();
    let effective_gid = getegid().as_raw();

    if real_uid != expected_uid || effective_uid != expected_uid {
        return Err(ClonerError::Privilege(format!(
            "UID verification failed: expected {}, got real={}, effective={}",
            expected_uid, real_uid, effective_uid
        )));
    }

    if real_gid != expected_gid || effective_gid != expected_gid {
        return Err(ClonerError::Privilege(format!(
            "GID verification failed: expected {}, got real={}, effective={}",
            expected_gid, real_gid, effective_gid
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_rejects_root_uid() {
        assert!(transition_to_unprivileged(0, 1000).is_err());
    }

    #[test]
    fn transition_rejects_root_gid() {
        assert!(transition_to_unprivileged(1000, 0).is_err());
    }
}
