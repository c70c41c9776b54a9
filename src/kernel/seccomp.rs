// Syscall filtering for sandboxed children.
//
// The launcher prepares one program when it starts, either by reading a
// precompiled `.bpf` file or by compiling the built-in allow-list, and every
// child installs that same program as its last hardening layer.

use crate::config::types::{ClonerError, Result};
use seccompiler::{apply_filter, sock_filter, BpfProgram, SeccompAction, SeccompFilter, TargetArch};
use std::collections::BTreeMap;
use std::convert::TryInto;
use std::path::Path;

/// Size of one `struct sock_filter` record.
pub const BPF_RECORD_LEN: usize = 8;

/// Kernel limit on classic BPF program length (BPF_MAXINSNS).
pub const BPF_MAX_RECORDS: usize = 4096;

/// Syscalls the built-in filter permits. Anything else fails with EPERM
/// rather than killing the child, so plugins get a catchable error.
fn allowed_syscalls() -> Vec<i64> {
    let mut syscalls = vec![
        // I/O on descriptors the child already holds
        libc::SYS_read,
        libc::SYS_write,
        libc::SYS_readv,
        libc::SYS_writev,
        libc::SYS_pread64,
        libc::SYS_pwrite64,
        libc::SYS_lseek,
        libc::SYS_close,
        libc::SYS_dup,
        libc::SYS_dup3,
        libc::SYS_fcntl,
        libc::SYS_ioctl,
        libc::SYS_pipe2,
        libc::SYS_ppoll,
        libc::SYS_pselect6,
        libc::SYS_epoll_create1,
        libc::SYS_epoll_ctl,
        libc::SYS_epoll_pwait,
        libc::SYS_eventfd2,
        // Filesystem inside the chroot
        libc::SYS_openat,
        libc::SYS_newfstatat,
        libc::SYS_fstat,
        libc::SYS_statx,
        libc::SYS_faccessat,
        libc::SYS_faccessat2,
        libc::SYS_getdents64,
        libc::SYS_readlinkat,
        libc::SYS_getcwd,
        libc::SYS_chdir,
        libc::SYS_fchdir,
        libc::SYS_mkdirat,
        libc::SYS_unlinkat,
        libc::SYS_renameat2,
        libc::SYS_ftruncate,
        libc::SYS_fsync,
        libc::SYS_fdatasync,
        libc::SYS_statfs,
        libc::SYS_fstatfs,
        libc::SYS_umask,
        // Memory
        libc::SYS_brk,
        libc::SYS_mmap,
        libc::SYS_munmap,
        libc::SYS_mremap,
        libc::SYS_mprotect,
        libc::SYS_madvise,
        // Threads, signals, time
        libc::SYS_clone,
        libc::SYS_clone3,
        libc::SYS_futex,
        libc::SYS_set_robust_list,
        libc::SYS_get_robust_list,
        libc::SYS_set_tid_address,
        libc::SYS_rseq,
        libc::SYS_sched_yield,
        libc::SYS_sched_getaffinity,
        libc::SYS_rt_sigaction,
        libc::SYS_rt_sigprocmask,
        libc::SYS_rt_sigreturn,
        libc::SYS_sigaltstack,
        libc::SYS_tgkill,
        libc::SYS_gettid,
        libc::SYS_getpid,
        libc::SYS_getppid,
        libc::SYS_getuid,
        libc::SYS_geteuid,
        libc::SYS_getgid,
        libc::SYS_getegid,
        libc::SYS_getrandom,
        libc::SYS_clock_gettime,
        libc::SYS_clock_getres,
        libc::SYS_clock_nanosleep,
        libc::SYS_nanosleep,
        libc::SYS_gettimeofday,
        libc::SYS_getrusage,
        libc::SYS_prlimit64,
        libc::SYS_uname,
        libc::SYS_wait4,
        libc::SYS_exit,
        libc::SYS_exit_group,
        // Outbound networking over the child's veth
        libc::SYS_socket,
        libc::SYS_connect,
        libc::SYS_getsockname,
        libc::SYS_getpeername,
        libc::SYS_getsockopt,
        libc::SYS_setsockopt,
        libc::SYS_sendto,
        libc::SYS_recvfrom,
        libc::SYS_sendmsg,
        libc::SYS_recvmsg,
        libc::SYS_shutdown,
    ];

    #[cfg(target_arch = "x86_64")]
    syscalls.extend_from_slice(&[
        libc::SYS_open,
        libc::SYS_stat,
        libc::SYS_lstat,
        libc::SYS_access,
        libc::SYS_readlink,
        libc::SYS_pipe,
        libc::SYS_dup2,
        libc::SYS_poll,
        libc::SYS_select,
        libc::SYS_arch_prctl,
        libc::SYS_getdents,
        libc::SYS_time,
    ]);

    syscalls
}

fn target_arch() -> Result<TargetArch> {
    std::env::consts::ARCH.try_into().map_err(|e| {
        ClonerError::Seccomp(format!(
            "Unsupported architecture {} for seccomp: {:?}",
            std::env::consts::ARCH,
            e
        ))
    })
}

/// A classic BPF program ready to be installed with `seccomp(2)`.
#[derive(Clone, Debug)]
pub struct SeccompProgram {
    filter: BpfProgram,
}

impl SeccompProgram {
    /// Compile the built-in allow-list for the running architecture.
    pub fn builtin() -> Result<Self> {
        let rules: BTreeMap<i64, Vec<seccompiler::SeccompRule>> = allowed_syscalls()
            .into_iter()
            .map(|nr| (nr, Vec::new()))
            .collect();

        let filter = SeccompFilter::new(
            rules,
            SeccompAction::Errno(libc::EPERM as u32),
            SeccompAction::Allow,
            target_arch()?,
        )
        .map_err(|e| ClonerError::Seccomp(format!("Failed to create filter: {}", e)))?;

        let filter: BpfProgram = filter
            .try_into()
            .map_err(|e| ClonerError::Seccomp(format!("Failed to compile filter: {}", e)))?;

        log::debug!("Compiled built-in seccomp filter: {} instructions", filter.len());
        Ok(Self { filter })
    }

    /// Parse raw `sock_filter` records in native byte order.
    pub fn from_bpf_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(ClonerError::Seccomp("Seccomp program is empty".to_string()));
        }
        if bytes.len() % BPF_RECORD_LEN != 0 {
            return Err(ClonerError::Seccomp(format!(
                "Seccomp program length {} is not a multiple of {}",
                bytes.len(),
                BPF_RECORD_LEN
            )));
        }
        let records = bytes.len() / BPF_RECORD_LEN;
        if records > BPF_MAX_RECORDS {
            return Err(ClonerError::Seccomp(format!(
                "Seccomp program has {} instructions; the kernel accepts at most {}",
                records, BPF_MAX_RECORDS
            )));
        }

        let filter = bytes
            .chunks_exact(BPF_RECORD_LEN)
            .map(|rec| sock_filter {
                code: u16::from_ne_bytes([rec[0], rec[1]]),
                jt: rec[2],
                jf: rec[3],
                k: u32::from_ne_bytes([rec[4], rec[5], rec[6], rec[7]]),
            })
            .collect();

        Ok(Self { filter })
    }

    /// Read a precompiled program from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            ClonerError::Seccomp(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let program = Self::from_bpf_bytes(&bytes)?;
        log::info!(
            "Loaded seccomp program from {}: {} instructions",
            path.display(),
            program.len()
        );
        Ok(program)
    }

    /// The program as raw records, the format `load` reads back.
    pub fn to_bpf_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.filter.len() * BPF_RECORD_LEN);
        for insn in &self.filter {
            bytes.extend_from_slice(&insn.code.to_ne_bytes());
            bytes.push(insn.jt);
            bytes.push(insn.jf);
            bytes.extend_from_slice(&insn.k.to_ne_bytes());
        }
        bytes
    }

    pub fn len(&self) -> usize {
        self.filter.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filter.is_empty()
    }

    /// Install the filter on the calling thread. Requires no_new_privs or
    /// CAP_SYS_ADMIN; irreversible.
    pub fn install(&self) -> Result<()> {
        apply_filter(&self.filter)
            .map_err(|e| ClonerError::Seccomp(format!("Failed to apply seccomp filter: {}", e)))
    }
}

/// Check if syscall filtering is supported on this system
pub fn is_seccomp_supported() -> bool {
    std::path::Path::new("/proc/sys/kernel/seccomp").exists()
}

/// Get seccomp support status for capability reporting
pub fn get_seccomp_status() -> String {
    if is_seccomp_supported() {
        "available".to_string()
    } else {
        "unavailable".to_string()
    }
}
