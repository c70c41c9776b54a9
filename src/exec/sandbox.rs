//! Hardening applied by a child to itself, after the launcher has released
//! it and before its entry point runs.
//!
//! The layers always run in the order of [`SecurityLayer::ALL`]:
//! network, no_new_privs, chroot, setuid, drop_capabilities, seccomp.
//! Seccomp goes last because it may forbid the syscalls the other layers
//! need.
//!
//! The chroot layer is a plain `chroot(2)` with no `pivot_root(2)`: a
//! process holding CAP_SYS_CHROOT can leave it. It holds only because the
//! setuid and drop_capabilities layers take that capability away.

use crate::config::types::{ClonerError, SandboxConfig, SecurityLayer, Result};
use crate::kernel::capabilities::{check_no_new_privs, drop_all_capabilities, set_no_new_privs};
use crate::kernel::credentials::{transition_to_unprivileged, SANDBOX_GID, SANDBOX_UID};
use crate::kernel::network;
use crate::kernel::seccomp::SeccompProgram;
use std::path::Path;

/// Exit status of a child whose sandbox could not be applied.
pub const SANDBOX_FAILURE_EXIT_CODE: i32 = 126;

/// The layers a child will apply, in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SandboxPlan {
    layers: Vec<SecurityLayer>,
}

impl SandboxPlan {
    /// Every layer runs when `skip_sandbox_except` is empty; otherwise only
    /// the named ones. `network` and `chroot` also need their configuration.
    pub fn for_config(config: &SandboxConfig) -> Self {
        let layers = SecurityLayer::ALL
            .iter()
            .copied()
            .filter(|layer| {
                config.skip_sandbox_except.is_empty()
                    || config.skip_sandbox_except.contains(layer)
            })
            .filter(|layer| match layer {
                SecurityLayer::Network => config.network.is_some(),
                SecurityLayer::Chroot => config.chroot_dir.is_some(),
                _ => true,
            })
            .collect();
        Self { layers }
    }

    pub fn layers(&self) -> &[SecurityLayer] {
        &self.layers
    }

    pub fn contains(&self, layer: SecurityLayer) -> bool {
        self.layers.contains(&layer)
    }
}

/// Apply every planned layer to the calling process.
///
/// The first failure aborts the sequence; the caller must not run untrusted
/// code after an error.
pub fn sandbox_self(config: &SandboxConfig, seccomp: &SeccompProgram) -> Result<()> {
    let plan = SandboxPlan::for_config(config);

    for layer in plan.layers() {
        apply_layer(*layer, config, seccomp).map_err(|e| ClonerError::Layer {
            layer: *layer,
            source: Box::new(e),
        })?;
    }
    Ok(())
}

fn apply_layer(layer: SecurityLayer, config: &SandboxConfig, seccomp: &SeccompProgram) -> Result<()> {
    match layer {
        SecurityLayer::Network => match &config.network {
            Some(net) => network::configure_child_side(net),
            None => Ok(()),
        },
        SecurityLayer::NoNewPrivs => {
            set_no_new_privs()?;
            if !check_no_new_privs()? {
                return Err(ClonerError::Privilege(
                    "no_new_privs not set after PR_SET_NO_NEW_PRIVS".to_string(),
                ));
            }
            Ok(())
        }
        SecurityLayer::Chroot => match &config.chroot_dir {
            Some(root) => enter_chroot(root),
            None => Ok(()),
        },
        SecurityLayer::Setuid => transition_to_unprivileged(SANDBOX_UID, SANDBOX_GID),
        SecurityLayer::DropCapabilities => drop_all_capabilities(),
        SecurityLayer::Seccomp => seccomp.install(),
    }
}

fn enter_chroot(root: &Path) -> Result<()> {
    nix::unistd::chroot(root).map_err(|e| {
        ClonerError::Filesystem(format!("chroot({}) failed: {}", root.display(), e))
    })?;
    nix::unistd::chdir("/")
        .map_err(|e| ClonerError::Filesystem(format!("chdir(/) after chroot failed: {}", e)))
}
