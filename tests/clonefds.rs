//! Descriptor hand-off across a real fork.
//!
//! Kept to a single test: it asserts on raw descriptor numbers, which a
//! concurrently running test could reuse.

mod common;

use common::{is_closed, is_open, read_exact, write_all};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult};
use rustbox_cloner::exec::clonefds::{CloneFdNumbers, CloneFds};
use std::thread;
use std::time::Duration;

const READY_DELAY: Duration = Duration::from_millis(200);

/// Child half. Each failed check exits with its own code.
fn child_side(fds: CloneFds, n: CloneFdNumbers) -> i32 {
    let child = fds.become_child();
    if !n.cloner_ends().iter().all(|fd| is_closed(*fd)) {
        return 10;
    }
    if !n.child_ends().iter().all(|fd| is_open(*fd)) {
        return 11;
    }

    let std_fds = match child.wait_for_ready() {
        Ok(std_fds) => std_fds,
        Err(_) => return 12,
    };
    if !is_closed(n.ready_r) {
        return 13;
    }
    // First sign of life; the parent checks this never shows up early.
    if !write_all(n.stdout_w, b"up") {
        return 14;
    }

    if std_fds.replace_standard_fds().is_err() {
        return 15;
    }
    if ![n.stdin_r, n.stdout_w, n.stderr_w].iter().all(|fd| is_closed(*fd)) {
        return 16;
    }

    if read_exact(0, 4) != b"ping" {
        return 17;
    }
    if !write_all(1, b"pong") || !write_all(2, b"err") {
        return 18;
    }
    0
}

fn set_nonblocking(fd: i32, on: bool) {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        let flags = if on {
            flags | libc::O_NONBLOCK
        } else {
            flags & !libc::O_NONBLOCK
        };
        assert_eq!(libc::fcntl(fd, libc::F_SETFL, flags), 0);
    }
}

#[test]
fn each_side_closes_exactly_the_ends_it_gives_up() {
    let fds = CloneFds::create().unwrap();
    let n = fds.numbers();
    assert!(n.stdin_r < n.stdout_w && n.stdout_w < n.stderr_w);

    match unsafe { fork() }.unwrap() {
        ForkResult::Child => {
            let code = child_side(fds, n);
            unsafe { libc::_exit(code) }
        }
        ForkResult::Parent { child } => {
            let cloner = fds.become_cloner();
            for fd in n.child_ends() {
                assert!(is_closed(fd), "child end {} still open in launcher", fd);
            }
            for fd in n.cloner_ends() {
                assert!(is_open(fd), "launcher end {} closed early", fd);
            }

            // The child must still be parked on the ready pipe.
            thread::sleep(READY_DELAY);
            set_nonblocking(n.stdout_r, true);
            let mut probe = [0u8; 1];
            let early = unsafe { libc::read(n.stdout_r, probe.as_mut_ptr().cast(), 1) };
            assert_eq!(early, -1, "child ran before it was released");
            assert_eq!(
                std::io::Error::last_os_error().raw_os_error(),
                Some(libc::EAGAIN)
            );
            set_nonblocking(n.stdout_r, false);

            let parent = cloner.signal_ready();
            assert!(is_closed(n.ready_w));
            assert_eq!(parent.raw_fds(), [n.stdin_w, n.stdout_r, n.stderr_r]);

            assert_eq!(read_exact(n.stdout_r, 2), b"up");
            assert!(write_all(n.stdin_w, b"ping"));
            assert_eq!(read_exact(n.stdout_r, 4), b"pong");
            assert_eq!(read_exact(n.stderr_r, 3), b"err");

            match waitpid(child, None).unwrap() {
                WaitStatus::Exited(_, code) => assert_eq!(code, 0, "child check {} failed", code),
                other => panic!("child did not exit normally: {:?}", other),
            }

            parent.close();
            for fd in n.cloner_ends() {
                assert!(is_closed(fd), "launcher end {} leaked", fd);
            }
        }
    }
}
