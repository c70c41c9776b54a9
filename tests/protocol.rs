//! Launcher protocol over a real socket pair.

use rustbox_cloner::core::protocol::{
    recv_message, recv_spawned_child, send_message, send_spawned_child, Message,
};
use rustbox_cloner::core::types::SpawnRequest;
use rustbox_cloner::exec::clonefds::CloneFds;
use rustbox_cloner::{ClonerError, ProtocolError, SandboxConfig, SecurityLayer};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;

#[derive(Debug, Serialize, Deserialize)]
struct Shutdown {
    reason: String,
}

impl Message for Shutdown {
    const KIND: &'static str = "shutdown";
}

fn request() -> SpawnRequest {
    SpawnRequest {
        process_name: "child-1".to_string(),
        args: vec![serde_json::json!("a"), serde_json::json!("b")],
        sandbox_config: SandboxConfig::default().only_layers([SecurityLayer::Seccomp]),
    }
}

fn inode(fd: RawFd) -> (u64, u64) {
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    assert_eq!(unsafe { libc::fstat(fd, &mut st) }, 0);
    (st.st_dev as u64, st.st_ino as u64)
}

#[test]
fn spawn_request_crosses_the_socket() {
    let (mut parent, launcher) = UnixStream::pair().unwrap();
    send_message(&mut parent, &request()).unwrap();

    let mut reader = &launcher;
    let received: SpawnRequest = recv_message(&mut reader).unwrap();
    assert_eq!(received, request());
}

#[test]
fn unexpected_kind_is_a_type_mismatch() {
    let (mut parent, launcher) = UnixStream::pair().unwrap();
    send_message(&mut parent, &Shutdown { reason: "done".to_string() }).unwrap();

    let mut reader = &launcher;
    match recv_message::<SpawnRequest, _>(&mut reader) {
        Err(ClonerError::Protocol(ProtocolError::TypeMismatch { expected, received })) => {
            assert_eq!(expected, "spawn_request");
            assert_eq!(received, "shutdown");
        }
        other => panic!("expected a type mismatch, got {:?}", other),
    }
}

#[test]
fn closed_channel_is_a_clean_shutdown() {
    let (parent, launcher) = UnixStream::pair().unwrap();
    drop(parent);

    let mut reader = &launcher;
    let err = recv_message::<SpawnRequest, _>(&mut reader).unwrap_err();
    assert!(err.is_channel_closed());
}

#[test]
fn half_written_frame_is_truncated() {
    let (mut parent, launcher) = UnixStream::pair().unwrap();
    parent.write_all(&100u32.to_ne_bytes()).unwrap();
    parent.write_all(b"{\"kind\"").unwrap();
    drop(parent);

    let mut reader = &launcher;
    let err = recv_message::<SpawnRequest, _>(&mut reader).unwrap_err();
    assert!(matches!(
        err,
        ClonerError::Protocol(ProtocolError::Truncated { expected: 100, got: 7, .. })
    ));
}

#[test]
fn spawned_child_carries_pid_and_three_descriptors() {
    let (launcher, parent) = UnixStream::pair().unwrap();
    let fds = CloneFds::create().unwrap().become_cloner().signal_ready();
    let sent = fds.raw_fds();

    send_spawned_child(&launcher, Pid::from_raw(4242), &fds).unwrap();
    let child = recv_spawned_child(&parent).unwrap();

    assert_eq!(child.pid, Pid::from_raw(4242));
    let received = [
        child.stdin.as_raw_fd(),
        child.stdout.as_raw_fd(),
        child.stderr.as_raw_fd(),
    ];
    for (sent, received) in sent.iter().zip(received) {
        assert_ne!(*sent, received, "descriptors arrive under fresh numbers");
        assert_eq!(inode(*sent), inode(received));
        let flags = unsafe { libc::fcntl(received, libc::F_GETFD) };
        assert!(flags & libc::FD_CLOEXEC != 0);
    }
    fds.close();
}

#[test]
fn response_without_descriptors_is_rejected() {
    let (mut launcher, parent) = UnixStream::pair().unwrap();
    launcher.write_all(&4242i32.to_ne_bytes()).unwrap();

    match recv_spawned_child(&parent) {
        Err(ClonerError::Protocol(ProtocolError::Descriptors { expected, received })) => {
            assert_eq!(expected, 3);
            assert_eq!(received, 0);
        }
        other => panic!("expected a descriptor error, got {:?}", other),
    }
}

#[test]
fn response_from_closed_launcher_is_closed() {
    let (launcher, parent) = UnixStream::pair().unwrap();
    drop(launcher);

    let err = recv_spawned_child(&parent).unwrap_err();
    assert!(err.is_channel_closed());
}
