//! The launcher: a long-lived helper forked from the parent that clones
//! sandboxed children on request.
//!
//! It is single-threaded and handles one spawn at a time. Every child is
//! cloned with `CLONE_PARENT`, so children belong to the parent, which reaps
//! them; the launcher only ever waits on the ready pipe and its socket.

use crate::config::types::{ClonerError, LauncherConfig, Result};
use crate::core::client::Client;
use crate::core::protocol::{recv_message, send_spawned_child};
use crate::core::types::{EntryPoint, SpawnRequest};
use crate::exec::clonefds::CloneFds;
use crate::exec::prepare::prepare_child;
use crate::exec::sandbox::{sandbox_self, SANDBOX_FAILURE_EXIT_CODE};
use crate::kernel::seccomp::SeccompProgram;
use crate::kernel::{namespace, process};
use crate::utils::env_hygiene::{
    apply_environment, validate_environment, validate_environment_safety,
};
use crate::utils::fd_closure::{close_inherited_fds, close_inherited_fds_except};
use nix::unistd::{fork, getppid, ForkResult, Pid};
use std::cell::Cell;
use std::io::Write;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::panic::{self, AssertUnwindSafe};

/// Exit status of a launcher that hit a fatal error.
const LAUNCHER_FAILURE_EXIT_CODE: i32 = 1;

pub struct Launcher;

impl Launcher {
    /// Fork the launcher and return the parent's handle to it.
    ///
    /// The environment is checked and the seccomp program prepared here,
    /// before forking, so bad configuration fails this call instead of
    /// surfacing later as a dead launcher. `entry` is what each child runs
    /// once sandboxed.
    ///
    /// The launcher keeps only stdout, stderr and its end of the channel;
    /// every other descriptor of the caller is closed in it.
    ///
    /// Must be called while the caller has no other threads that could hold
    /// locks across `fork(2)`.
    pub fn start(config: LauncherConfig, entry: EntryPoint) -> Result<Client> {
        validate_environment(&config.environment)?;
        for warning in validate_environment_safety(&config.environment) {
            log::warn!("{}", warning);
        }

        let seccomp = match &config.seccomp_bpf_path {
            Some(path) => SeccompProgram::load(path)?,
            None => SeccompProgram::builtin()?,
        };

        let (parent_socket, launcher_socket) = UnixStream::pair()?;
        let parent_pid = nix::unistd::getpid();

        // SAFETY: the child only runs launcher code on memory it owns and
        // leaves through _exit, never returning into the caller's stack.
        match unsafe { fork() } {
            Ok(ForkResult::Parent { child }) => {
                drop(launcher_socket);
                log::info!("Started launcher {}", child);
                Ok(Client::new(parent_socket, child))
            }
            Ok(ForkResult::Child) => {
                drop(parent_socket);
                let code = run_launcher(launcher_socket, parent_pid, &config, &seccomp, entry);
                // SAFETY: _exit skips the parent's atexit handlers and destructors.
                unsafe { libc::_exit(code) }
            }
            Err(e) => Err(ClonerError::Process(format!("fork(launcher) failed: {}", e))),
        }
    }
}

fn run_launcher(
    socket: UnixStream,
    parent_pid: Pid,
    config: &LauncherConfig,
    seccomp: &SeccompProgram,
    entry: EntryPoint,
) -> i32 {
    if let Err(e) = init_launcher(parent_pid, config, socket.as_raw_fd()) {
        log::error!("Launcher initialisation failed: {}", e);
        return LAUNCHER_FAILURE_EXIT_CODE;
    }

    match serve(&socket, seccomp, entry) {
        Ok(()) => {
            log::debug!("Launcher channel closed; exiting");
            0
        }
        Err(e) => {
            log::error!("Launcher exiting after fatal error: {}", e);
            LAUNCHER_FAILURE_EXIT_CODE
        }
    }
}

/// Everything but stdout, stderr and the channel is the parent's business.
fn init_launcher(parent_pid: Pid, config: &LauncherConfig, channel: RawFd) -> Result<()> {
    // Children get their own stdin; the launcher never reads one.
    let _ = nix::unistd::close(libc::STDIN_FILENO);
    close_inherited_fds_except(&[channel])?;

    process::setup_parent_death_signal()?;
    if getppid() != parent_pid {
        return Err(ClonerError::Process(
            "Parent exited before the launcher started".to_string(),
        ));
    }

    process::set_process_name("cloner")?;
    apply_environment(&config.environment)
}

/// Handle requests until the parent closes the channel.
fn serve(socket: &UnixStream, seccomp: &SeccompProgram, entry: EntryPoint) -> Result<()> {
    let mut reader = socket;
    loop {
        let request: SpawnRequest = match recv_message(&mut reader) {
            Ok(request) => request,
            Err(e) if e.is_channel_closed() => return Ok(()),
            Err(e) => return Err(e),
        };
        spawn(socket, &request, seccomp, entry)?;
    }
}

fn spawn(
    socket: &UnixStream,
    request: &SpawnRequest,
    seccomp: &SeccompProgram,
    entry: EntryPoint,
) -> Result<()> {
    if !request.sandbox_config.is_fully_sandboxed() {
        log::warn!(
            "Child {} runs with only {:?} sandbox layers. DO NOT USE IN PRODUCTION",
            request.process_name,
            request.sandbox_config.skip_sandbox_except
        );
    }

    let fds = CloneFds::create()?;
    log::debug!("Spawn descriptors for {}: {:?}", request.process_name, fds.numbers());

    // The child takes the descriptors from its copy of the cell; the
    // launcher's copy is untouched by that and taken below.
    let slot = Cell::new(Some(fds));
    let pid = namespace::clone_into_namespaces(Box::new(|| {
        let code = match slot.take() {
            Some(fds) => run_child(fds, request, seccomp, entry),
            None => SANDBOX_FAILURE_EXIT_CODE,
        };
        code as isize
    }))?;

    let fds = slot.take().ok_or_else(|| {
        process::kill_child(pid);
        ClonerError::Process("Spawn descriptors missing after clone".to_string())
    })?;

    let parent_fds = prepare_child(pid, &request.sandbox_config, fds.become_cloner())?;

    if let Err(e) = send_spawned_child(socket, pid, &parent_fds) {
        process::kill_child(pid);
        return Err(e);
    }
    parent_fds.close();

    log::info!("Spawned child {} ({})", pid, request.process_name);
    Ok(())
}

/// Everything the child does, from clone to exit. Returns its exit status.
///
/// Nothing here may log: once stdio is remapped, stderr belongs to the
/// untrusted code's caller.
fn run_child(
    fds: CloneFds,
    request: &SpawnRequest,
    seccomp: &SeccompProgram,
    entry: EntryPoint,
) -> i32 {
    // The launcher's logger writes to what is about to become the
    // child's stderr.
    log::set_max_level(log::LevelFilter::Off);

    let fds = fds.become_child();
    let _ = process::set_process_name(&format!("cloner:{}", request.process_name));

    let std_fds = match fds.wait_for_ready() {
        Ok(std_fds) => std_fds,
        Err(_) => return SANDBOX_FAILURE_EXIT_CODE,
    };
    if std_fds.replace_standard_fds().is_err() {
        return SANDBOX_FAILURE_EXIT_CODE;
    }

    let sandboxed =
        close_inherited_fds().and_then(|()| sandbox_self(&request.sandbox_config, seccomp));
    if let Err(e) = sandboxed {
        let _ = writeln!(std::io::stderr(), "cloner: sandbox setup failed: {}", e);
        return SANDBOX_FAILURE_EXIT_CODE;
    }

    // The default panic hook has already reported a panic on stderr.
    let code = panic::catch_unwind(AssertUnwindSafe(|| entry(&request.args))).unwrap_or(1);
    let _ = std::io::stdout().flush();
    code
}
