//! Wire format of the private channel between a parent and its launcher.
//!
//! Requests travel as frames: a 4-byte native-endian length, then that many
//! bytes of a JSON envelope `{"kind": ..., "payload": ...}`. Both ends are
//! the same binary on the same host, so native byte order is fine.
//!
//! The launcher answers a spawn with a single `sendmsg(2)`: the child's pid
//! as 4 bytes of data and its stdin/stdout/stderr ends as `SCM_RIGHTS`.
//!
//! The decoder trusts its input. It only ever reads bytes written by the
//! parent or the launcher, never anything a child produced.

use crate::config::types::{ClonerError, ProtocolError, Result};
use crate::exec::clonefds::ParentFds;
use nix::sys::socket::{recvmsg, sendmsg, ControlMessage, ControlMessageOwned, MsgFlags};
use nix::unistd::Pid;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, IoSlice, IoSliceMut, Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;

/// Frames larger than this are treated as corruption.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Descriptors attached to a spawn response: stdin-w, stdout-r, stderr-r.
pub const SPAWNED_CHILD_FDS: usize = 3;

const LEN_PREFIX: usize = 4;
const PID_LEN: usize = 4;

/// A message type that can cross the channel. `KIND` is written into every
/// envelope and checked on receipt.
pub trait Message: Serialize + DeserializeOwned {
    const KIND: &'static str;
}

#[derive(Serialize)]
struct OutgoingEnvelope<'a, M> {
    kind: &'a str,
    payload: &'a M,
}

#[derive(Deserialize)]
struct IncomingEnvelope {
    kind: String,
    payload: serde_json::Value,
}

/// Encode `message` as one frame.
pub fn encode_frame<M: Message>(message: &M) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(&OutgoingEnvelope {
        kind: M::KIND,
        payload: message,
    })
    .map_err(|e| ProtocolError::Encode(e.to_string()))?;

    if body.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::Oversized(body.len()).into());
    }

    let mut frame = Vec::with_capacity(LEN_PREFIX + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_ne_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decode a frame body, checking its kind.
pub fn decode_body<M: Message>(body: &[u8]) -> Result<M> {
    let envelope: IncomingEnvelope =
        serde_json::from_slice(body).map_err(|e| ProtocolError::Decode(e.to_string()))?;

    if envelope.kind != M::KIND {
        return Err(ProtocolError::TypeMismatch {
            expected: M::KIND,
            received: envelope.kind,
        }
        .into());
    }

    serde_json::from_value(envelope.payload)
        .map_err(|e| ProtocolError::Decode(e.to_string()).into())
}

pub fn send_message<M: Message, W: Write>(writer: &mut W, message: &M) -> Result<()> {
    let frame = encode_frame(message)?;
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

/// Read one frame. EOF before the first byte is [`ProtocolError::Closed`],
/// the peer's way of saying it is done.
pub fn recv_message<M: Message, R: Read>(reader: &mut R) -> Result<M> {
    let mut len_buf = [0u8; LEN_PREFIX];
    let got = read_until_eof(reader, &mut len_buf)?;
    if got == 0 {
        return Err(ProtocolError::Closed.into());
    }
    if got < LEN_PREFIX {
        return Err(ProtocolError::Truncated {
            what: "length prefix",
            expected: LEN_PREFIX,
            got,
        }
        .into());
    }

    let len = u32::from_ne_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::Oversized(len).into());
    }

    let mut body = vec![0u8; len];
    let got = read_until_eof(reader, &mut body)?;
    if got < len {
        return Err(ProtocolError::Truncated {
            what: "message body",
            expected: len,
            got,
        }
        .into());
    }

    decode_body(&body)
}

/// Fill `buf` or stop at EOF; returns how many bytes arrived.
fn read_until_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

/// Launcher -> parent: a newly cloned child.
#[derive(Debug)]
pub struct SpawnedChild {
    pub pid: Pid,
    pub stdin: OwnedFd,
    pub stdout: OwnedFd,
    pub stderr: OwnedFd,
}

/// Send `pid` and the parent's three ends in one message. The launcher
/// still owns its copies afterwards and must close them.
pub fn send_spawned_child(socket: &UnixStream, pid: Pid, fds: &ParentFds) -> Result<()> {
    let pid_bytes = pid.as_raw().to_ne_bytes();
    let iov = [IoSlice::new(&pid_bytes)];
    let raw = fds.raw_fds();
    let cmsgs = [ControlMessage::ScmRights(&raw)];

    let sent = sendmsg::<()>(
        socket.as_raw_fd(),
        &iov,
        &cmsgs,
        MsgFlags::MSG_NOSIGNAL,
        None,
    )
    .map_err(|e| ClonerError::Process(format!("sendmsg(spawned child) failed: {}", e)))?;

    if sent != PID_LEN {
        return Err(ProtocolError::Truncated {
            what: "spawned child pid",
            expected: PID_LEN,
            got: sent,
        }
        .into());
    }
    Ok(())
}

/// Receive a spawn response. Any descriptors that arrive are owned before
/// the message is validated, so a malformed response leaks nothing.
pub fn recv_spawned_child(socket: &UnixStream) -> Result<SpawnedChild> {
    let mut pid_bytes = [0u8; PID_LEN];
    let mut cmsg_buf = nix::cmsg_space!([RawFd; SPAWNED_CHILD_FDS]);

    let (bytes, control_truncated, mut fds) = {
        let mut iov = [IoSliceMut::new(&mut pid_bytes)];
        let msg = recvmsg::<()>(
            socket.as_raw_fd(),
            &mut iov,
            Some(&mut cmsg_buf),
            MsgFlags::MSG_CMSG_CLOEXEC,
        )
        .map_err(|e| ClonerError::Process(format!("recvmsg(spawned child) failed: {}", e)))?;

        let mut fds: Vec<OwnedFd> = Vec::new();
        for cmsg in msg
            .cmsgs()
            .map_err(|e| ProtocolError::Decode(format!("bad control message: {}", e)))?
        {
            if let ControlMessageOwned::ScmRights(received) = cmsg {
                // SAFETY: SCM_RIGHTS hands us fresh descriptors nobody else owns.
                fds.extend(received.into_iter().map(|fd| unsafe { OwnedFd::from_raw_fd(fd) }));
            }
        }
        (
            msg.bytes,
            msg.flags.contains(MsgFlags::MSG_CTRUNC),
            fds,
        )
    };

    if bytes == 0 && fds.is_empty() {
        return Err(ProtocolError::Closed.into());
    }
    if bytes < PID_LEN {
        return Err(ProtocolError::Truncated {
            what: "spawned child pid",
            expected: PID_LEN,
            got: bytes,
        }
        .into());
    }
    if control_truncated || fds.len() != SPAWNED_CHILD_FDS {
        return Err(ProtocolError::Descriptors {
            expected: SPAWNED_CHILD_FDS,
            received: fds.len(),
        }
        .into());
    }

    let stderr = fds.pop();
    let stdout = fds.pop();
    let stdin = fds.pop();
    match (stdin, stdout, stderr) {
        (Some(stdin), Some(stdout), Some(stderr)) => Ok(SpawnedChild {
            pid: Pid::from_raw(i32::from_ne_bytes(pid_bytes)),
            stdin,
            stdout,
            stderr,
        }),
        _ => Err(ProtocolError::Descriptors {
            expected: SPAWNED_CHILD_FDS,
            received: 0,
        }
        .into()),
    }
}
