/// Environment hygiene for the launcher process
/// The launcher's environment is replaced wholesale at start; every child
/// it clones inherits that environment unchanged.
use crate::config::types::{ClonerError, Result};
use std::ffi::CString;

/// Loader variables that let whoever sets them run code in every child.
const DANGEROUS_LD_VARS: &[&str] = &[
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
    "LD_AUDIT",
    "LD_DEBUG",
    "LD_PROFILE",
];

fn to_cstrings(vars: &[(String, String)]) -> Result<Vec<(CString, CString)>> {
    vars.iter()
        .map(|(key, value)| {
            if key.is_empty() || key.contains('=') {
                return Err(ClonerError::Config(format!(
                    "Invalid environment variable name: {:?}",
                    key
                )));
            }
            let key_c = CString::new(key.as_str()).map_err(|_| {
                ClonerError::Config(format!("Environment key contains NUL byte: {:?}", key))
            })?;
            let value_c = CString::new(value.as_str()).map_err(|_| {
                ClonerError::Config(format!("Environment value for {} contains NUL byte", key))
            })?;
            Ok((key_c, value_c))
        })
        .collect()
}

/// Check that every entry can be passed to setenv(3): a non-empty name
/// without `=`, and no NUL bytes anywhere.
pub fn validate_environment(vars: &[(String, String)]) -> Result<()> {
    to_cstrings(vars).map(|_| ())
}

/// Replace the process environment with exactly `vars`.
///
/// Every entry is validated before anything is cleared, so a bad entry
/// leaves the environment untouched. Only call while single-threaded.
pub fn apply_environment(vars: &[(String, String)]) -> Result<()> {
    let entries = to_cstrings(vars)?;

    // SAFETY: the launcher is single-threaded when this runs, so nothing can
    // be reading the environment concurrently.
    let clear_rc = unsafe { libc::clearenv() };
    if clear_rc != 0 {
        return Err(ClonerError::Process(format!(
            "clearenv failed: {}",
            std::io::Error::last_os_error()
        )));
    }

    for (key, value) in &entries {
        // SAFETY: both pointers are valid NUL-terminated strings; single-threaded.
        let rc = unsafe { libc::setenv(key.as_ptr(), value.as_ptr(), 1) };
        if rc != 0 {
            return Err(ClonerError::Process(format!(
                "setenv({:?}) failed: {}",
                key,
                std::io::Error::last_os_error()
            )));
        }
    }

    log::debug!("Applied launcher environment with {} variables", entries.len());
    Ok(())
}

/// Warnings for loader variables present in a configured environment.
pub fn validate_environment_safety(vars: &[(String, String)]) -> Vec<String> {
    vars.iter()
        .filter(|(key, _)| DANGEROUS_LD_VARS.contains(&key.as_str()))
        .map(|(key, _)| format!("Dangerous environment variable present: {}", key))
        .collect()
}
