//! Setup the launcher performs on a child it just cloned, from outside the
//! child's namespaces, before releasing it.

use crate::config::types::{Result, SandboxConfig};
use crate::exec::clonefds::{ClonerFds, ParentFds};
use crate::kernel::{namespace, network, process};
use nix::unistd::Pid;

/// Write the child's id maps, wire up its network if requested, then
/// release it.
///
/// On failure the child is SIGKILLed while it is still blocked on the ready
/// pipe, and only then is the pipe closed.
pub fn prepare_child(pid: Pid, config: &SandboxConfig, fds: ClonerFds) -> Result<ParentFds> {
    match configure(pid, config) {
        Ok(()) => {
            log::debug!("Child {} prepared; releasing it", pid);
            Ok(fds.signal_ready())
        }
        Err(e) => {
            log::error!("Failed to prepare child {}: {}", pid, e);
            process::kill_child(pid);
            drop(fds);
            Err(e)
        }
    }
}

fn configure(pid: Pid, config: &SandboxConfig) -> Result<()> {
    namespace::write_id_maps(pid)?;

    if let Some(net) = &config.network {
        network::setup_host_side(net, pid)?;
    }
    Ok(())
}
