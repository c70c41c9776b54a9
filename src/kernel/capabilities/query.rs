//! Read-only capability queries. Syscalls only: the child asks these after
//! chroot, where there is usually no /proc.
use super::{CapUserData, CapUserHeader, PR_GET_NO_NEW_PRIVS};
use crate::config::types::{ClonerError, Result};

/// Check if no_new_privs is set
pub fn check_no_new_privs() -> Result<bool> {
    // SAFETY: prctl(PR_GET_NO_NEW_PRIVS) only reads process state.
    let result = unsafe { libc::prctl(PR_GET_NO_NEW_PRIVS, 0, 0, 0, 0) };

    if result < 0 {
        return Err(ClonerError::Privilege(
            "Failed to check PR_GET_NO_NEW_PRIVS".to_string(),
        ));
    }

    Ok(result == 1)
}

/// The calling thread's effective, permitted and inheritable sets, as
/// 64-bit masks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CapabilitySets {
    pub effective: u64,
    pub permitted: u64,
    pub inheritable: u64,
}

impl CapabilitySets {
    pub fn is_empty(&self) -> bool {
        self.effective == 0 && self.permitted == 0 && self.inheritable == 0
    }
}

/// Read the capability sets with capget(2).
pub fn process_capabilities() -> Result<CapabilitySets> {
    let mut header = CapUserHeader::current();
    let mut data = [CapUserData::default(); 2];

    // SAFETY: version 3 header for the current thread and room for the two
    // data entries the kernel writes.
    let rc = unsafe {
        libc::syscall(
            libc::SYS_capget,
            &mut header as *mut CapUserHeader,
            data.as_mut_ptr(),
        )
    };
    if rc != 0 {
        return Err(ClonerError::Privilege(format!(
            "capget failed: {}",
            std::io::Error::last_os_error()
        )));
    }

    let join = |lo: u32, hi: u32| u64::from(lo) | (u64::from(hi) << 32);
    Ok(CapabilitySets {
        effective: join(data[0].effective, data[1].effective),
        permitted: join(data[0].permitted, data[1].permitted),
        inheritable: join(data[0].inheritable, data[1].inheritable),
    })
}
