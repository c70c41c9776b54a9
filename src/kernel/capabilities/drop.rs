//! Capability drops. Bounding-set and securebits changes need CAP_SETPCAP,
//! which is already gone once the child has changed uid; the zeroed
//! effective/permitted/inheritable sets are the invariant that must hold.
use super::query::process_capabilities;
use super::{
    CapUserData, CapUserHeader, LAST_CAP, PR_CAPBSET_DROP, PR_CAP_AMBIENT,
    PR_CAP_AMBIENT_CLEAR_ALL, PR_SET_NO_NEW_PRIVS, PR_SET_SECUREBITS, SECBIT_KEEP_CAPS_LOCKED,
    SECBIT_NOROOT, SECBIT_NOROOT_LOCKED, SECBIT_NO_SETUID_FIXUP, SECBIT_NO_SETUID_FIXUP_LOCKED,
};
use crate::config::types::{ClonerError, Result};

/// Lock securebits, drop the bounding and ambient sets, and zero the
/// effective/permitted/inheritable sets. Fails if any of the latter three is
/// still non-zero afterwards.
pub fn drop_all_capabilities() -> Result<()> {
    lock_securebits()?;
    drop_bounding_capabilities();
    drop_ambient_capabilities();
    drop_process_capabilities()?;
    verify_capabilities_zeroed()
}

/// Lock this process and its descendants out of regaining capabilities by
/// becoming root (see capabilities(7)).
fn lock_securebits() -> Result<()> {
    let bits = SECBIT_KEEP_CAPS_LOCKED
        | SECBIT_NO_SETUID_FIXUP
        | SECBIT_NO_SETUID_FIXUP_LOCKED
        | SECBIT_NOROOT
        | SECBIT_NOROOT_LOCKED;

    // SAFETY: prctl(PR_SET_SECUREBITS) takes an integer bitmask; no pointers.
    let rc = unsafe { libc::prctl(PR_SET_SECUREBITS, bits, 0, 0, 0) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EPERM) {
            log::debug!("PR_SET_SECUREBITS returned EPERM (expected after setuid): {}", err);
            return Ok(());
        }
        return Err(ClonerError::Privilege(format!(
            "Failed to lock securebits: {}",
            err
        )));
    }
    log::debug!("Locked securebits");
    Ok(())
}

fn drop_bounding_capabilities() {
    let mut denied = 0;
    for cap in 0..=LAST_CAP {
        // SAFETY: prctl(PR_CAPBSET_DROP) with any cap number is safe; invalid caps are ignored.
        let rc = unsafe { libc::prctl(PR_CAPBSET_DROP, cap as libc::c_ulong, 0, 0, 0) };
        if rc != 0 && std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM) {
            denied += 1;
        }
    }
    if denied > 0 {
        log::debug!("Bounding set drop denied for {} capabilities (no CAP_SETPCAP)", denied);
    }
}

fn drop_ambient_capabilities() {
    // SAFETY: prctl(PR_CAP_AMBIENT, PR_CAP_AMBIENT_CLEAR_ALL) is safe. Returns error
    // on older kernels without ambient capability support (non-fatal).
    let result = unsafe { libc::prctl(PR_CAP_AMBIENT, PR_CAP_AMBIENT_CLEAR_ALL, 0, 0, 0) };
    if result != 0 {
        log::warn!("Failed to clear ambient capabilities (may not be supported)");
    }
}

/// Zero all capability sets via raw capset(2) syscall.
fn drop_process_capabilities() -> Result<()> {
    let header = CapUserHeader::current();
    let data = [CapUserData::default(); 2];

    // SAFETY: capset(2) with valid header (version 3, pid 0 = current) and
    // two zeroed data entries. Lowering every set never needs a capability.
    let rc = unsafe {
        libc::syscall(
            libc::SYS_capset,
            &header as *const CapUserHeader,
            data.as_ptr(),
        )
    };

    if rc != 0 {
        return Err(ClonerError::Privilege(format!(
            "capset failed: {}",
            std::io::Error::last_os_error()
        )));
    }

    log::debug!("Zeroed all capability sets via capset(2)");
    Ok(())
}

/// Read the sets back with capget(2); there may be no /proc inside a chroot.
fn verify_capabilities_zeroed() -> Result<()> {
    let sets = process_capabilities()?;
    if !sets.is_empty() {
        return Err(ClonerError::Privilege(format!(
            "Capabilities not zeroed after drop: eff={:016x} prm={:016x} inh={:016x}",
            sets.effective, sets.permitted, sets.inheritable
        )));
    }
    Ok(())
}

/// Prevent privilege escalation via execve (setuid, file capabilities).
/// Idempotent and irreversible once set.
pub fn set_no_new_privs() -> Result<()> {
    // SAFETY: prctl(PR_SET_NO_NEW_PRIVS, 1) is safe and idempotent.
    let result = unsafe { libc::prctl(PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) };
    if result != 0 {
        return Err(ClonerError::Privilege(format!(
            "Failed to set PR_SET_NO_NEW_PRIVS: {}",
            std::io::Error::last_os_error()
        )));
    }
    log::debug!("Set PR_SET_NO_NEW_PRIVS");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_no_new_privs_is_idempotent() {
        let first = set_no_new_privs();
        let second = set_no_new_privs();
        assert_eq!(first.is_ok(), second.is_ok());
    }
}
