//! Linux capability management for the child's final, powerless state.

mod drop;
mod query;

pub use drop::{drop_all_capabilities, set_no_new_privs};
pub use query::{check_no_new_privs, process_capabilities, CapabilitySets};

/// Highest capability number we try to drop from the bounding set.
/// Numbers the kernel does not know are ignored by PR_CAPBSET_DROP.
pub(crate) const LAST_CAP: u32 = 40;

pub(crate) const PR_CAPBSET_DROP: libc::c_int = 24;
pub(crate) const PR_SET_SECUREBITS: libc::c_int = 28;
pub(crate) const PR_SET_NO_NEW_PRIVS: libc::c_int = 38;
pub(crate) const PR_GET_NO_NEW_PRIVS: libc::c_int = 39;
pub(crate) const PR_CAP_AMBIENT: libc::c_int = 47;
pub(crate) const PR_CAP_AMBIENT_CLEAR_ALL: libc::c_int = 4;
pub(crate) const LINUX_CAPABILITY_VERSION_3: u32 = 0x20080522;

// <linux/securebits.h>
pub(crate) const SECBIT_NOROOT: libc::c_ulong = 1 << 0;
pub(crate) const SECBIT_NOROOT_LOCKED: libc::c_ulong = 1 << 1;
pub(crate) const SECBIT_NO_SETUID_FIXUP: libc::c_ulong = 1 << 2;
pub(crate) const SECBIT_NO_SETUID_FIXUP_LOCKED: libc::c_ulong = 1 << 3;
pub(crate) const SECBIT_KEEP_CAPS_LOCKED: libc::c_ulong = 1 << 5;

/// `struct __user_cap_header_struct`
#[repr(C)]
pub(crate) struct CapUserHeader {
    pub version: u32,
    pub pid: i32,
}

impl CapUserHeader {
    /// Version 3 header addressing the calling thread.
    pub fn current() -> Self {
        Self {
            version: LINUX_CAPABILITY_VERSION_3,
            pid: 0,
        }
    }
}

/// `struct __user_cap_data_struct`. Version 3 takes two of them: caps 0-31
/// and caps 32-63.
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub(crate) struct CapUserData {
    pub effective: u32,
    pub permitted: u32,
    pub inheritable: u32,
}
