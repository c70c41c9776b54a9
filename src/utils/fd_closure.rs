/// Closing of inherited file descriptors
/// Prefer close_range(2); fall back to iterating /proc/self/fd.
///
/// Nothing here logs: in a child it runs after stderr has been handed over.
use crate::config::types::{ClonerError, Result};
use nix::unistd::close;
use std::fs;
use std::os::fd::RawFd;

const FD_DIR: &str = "/proc/self/fd";
const FIRST_INHERITED_FD: RawFd = 3;

/// Close every descriptor above 2.
pub fn close_inherited_fds() -> Result<()> {
    close_inherited_fds_except(&[])
}

/// Close every descriptor above 2 except those in `keep`.
pub fn close_inherited_fds_except(keep: &[RawFd]) -> Result<()> {
    let mut keep: Vec<RawFd> = keep
        .iter()
        .copied()
        .filter(|fd| *fd >= FIRST_INHERITED_FD)
        .collect();
    keep.sort_unstable();
    keep.dedup();

    if try_close_ranges(&keep) {
        return Ok(());
    }
    close_fds_via_proc(&keep)
}

/// The gaps between the kept descriptors, as inclusive ranges, ending with
/// an open-ended one.
fn ranges_around(keep: &[RawFd]) -> Vec<(libc::c_uint, libc::c_uint)> {
    let mut ranges = Vec::with_capacity(keep.len() + 1);
    let mut low = FIRST_INHERITED_FD;
    for fd in keep {
        if *fd > low {
            ranges.push((low as libc::c_uint, (*fd - 1) as libc::c_uint));
        }
        low = *fd + 1;
    }
    ranges.push((low as libc::c_uint, libc::c_uint::MAX));
    ranges
}

/// close_range(2) over each gap; Linux 5.9+. A failure part way is fine:
/// the fallback skips what is already closed.
fn try_close_ranges(keep: &[RawFd]) -> bool {
    ranges_around(keep).into_iter().all(|(first, last)| {
        // SAFETY: close_range only closes descriptors; the ones it closes are
        // not referenced by any live owner in this process.
        let result = unsafe {
            libc::syscall(libc::SYS_close_range, first, last, 0 as libc::c_uint)
        };
        result == 0
    })
}

fn close_fds_via_proc(keep: &[RawFd]) -> Result<()> {
    // Collect first: the directory handle is itself an open descriptor.
    let fds: Vec<RawFd> = get_open_fds()?
        .into_iter()
        .filter(|fd| *fd >= FIRST_INHERITED_FD && !keep.contains(fd))
        .collect();

    let mut failed = Vec::new();
    for fd in fds {
        match close(fd) {
            Ok(()) | Err(nix::errno::Errno::EBADF) => {}
            Err(e) => failed.push(format!("fd {}: {}", fd, e)),
        }
    }

    if !failed.is_empty() {
        return Err(ClonerError::Filesystem(format!(
            "Failed to close {} FD(s): {}",
            failed.len(),
            failed.join(", ")
        )));
    }
    Ok(())
}

/// Get list of open file descriptors
pub fn get_open_fds() -> Result<Vec<RawFd>> {
    let entries = fs::read_dir(FD_DIR)
        .map_err(|e| ClonerError::Filesystem(format!("Failed to read {}: {}", FD_DIR, e)))?;

    let mut fds: Vec<RawFd> = entries
        .flatten()
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter_map(|name| name.parse::<RawFd>().ok())
        .collect();

    fds.sort();
    Ok(fds)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: libc::c_uint = libc::c_uint::MAX;

    #[test]
    fn open_fds_include_standard_output_streams() {
        let fds = get_open_fds().unwrap();
        assert!(fds.contains(&1));
        assert!(fds.contains(&2));
    }

    #[test]
    fn open_fds_are_sorted() {
        let fds = get_open_fds().unwrap();
        let mut sorted = fds.clone();
        sorted.sort();
        assert_eq!(fds, sorted);
    }

    #[test]
    fn nothing_kept_is_one_range() {
        assert_eq!(ranges_around(&[]), vec![(3, MAX)]);
    }

    #[test]
    fn ranges_skip_kept_descriptors() {
        assert_eq!(ranges_around(&[7]), vec![(3, 6), (8, MAX)]);
        assert_eq!(ranges_around(&[3]), vec![(4, MAX)]);
        assert_eq!(ranges_around(&[5, 6, 9]), vec![(3, 4), (7, 8), (10, MAX)]);
    }
}
