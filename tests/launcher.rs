//! End-to-end spawns through a real launcher.
//!
//! These need root and a kernel that lets us create every namespace a
//! child gets; elsewhere they are skipped.

mod common;

use common::{can_create_namespaces, has_net_admin, is_root};
use rustbox_cloner::kernel::network::delete_veth_pair;
use rustbox_cloner::{
    ChildExit, ClonerError, Launcher, LauncherConfig, NetworkConfig, SandboxConfig,
};
use std::io::{Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::sync::Mutex;

// Launchers are forked from the harness; one at a time keeps that simple.
static SERIAL: Mutex<()> = Mutex::new(());

fn supported() -> bool {
    if !is_root() || !can_create_namespaces() {
        eprintln!("skipping: needs root and namespace support");
        return false;
    }
    true
}

/// Print the arguments as JSON, then echo stdin.
fn echo(args: &[serde_json::Value]) -> i32 {
    let mut input = Vec::new();
    if std::io::stdin().read_to_end(&mut input).is_err() {
        return 2;
    }
    let mut stdout = std::io::stdout();
    let line = serde_json::to_string(args).unwrap_or_default();
    if writeln!(stdout, "{}", line).is_err() || stdout.write_all(&input).is_err() {
        return 3;
    }
    0
}

fn noop(_args: &[serde_json::Value]) -> i32 {
    0
}

/// Print `<iface> <gateway>` for each default route, as /proc/net/route
/// shows them.
fn default_routes(_args: &[serde_json::Value]) -> i32 {
    let table = match std::fs::read_to_string("/proc/net/route") {
        Ok(table) => table,
        Err(e) => {
            eprintln!("cannot read route table: {}", e);
            return 2;
        }
    };
    for line in table.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() > 2 && fields[1] == "00000000" {
            println!("{} {}", fields[0], fields[2]);
        }
    }
    0
}

/// Report whether /marker is visible.
fn look_for_marker(_args: &[serde_json::Value]) -> i32 {
    let found = std::path::Path::new("/marker").exists();
    print!("{}", found);
    0
}

fn read_all(file: Option<std::fs::File>) -> Vec<u8> {
    let mut out = Vec::new();
    if let Some(mut file) = file {
        file.read_to_end(&mut out).unwrap();
    }
    out
}

#[test]
fn child_runs_entry_point_with_its_own_stdio() {
    if !supported() {
        return;
    }
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());

    let mut client = Launcher::start(LauncherConfig::default(), echo).unwrap();
    let mut child = client
        .spawn_child(
            "child-1",
            vec![serde_json::json!("a"), serde_json::json!("b")],
            SandboxConfig::default(),
        )
        .unwrap();
    assert!(child.pid.as_raw() > 0);

    {
        let mut stdin = child.stdin.take().unwrap();
        stdin.write_all(b"ping").unwrap();
    }
    let stdout = read_all(child.stdout.take());
    let stderr = read_all(child.stderr.take());

    assert_eq!(
        String::from_utf8_lossy(&stdout),
        "[\"a\",\"b\"]\nping",
        "stderr: {}",
        String::from_utf8_lossy(&stderr)
    );
    assert_eq!(child.wait().unwrap(), ChildExit::Exited(0));
    client.close().unwrap();
}

#[test]
fn one_launcher_serves_consecutive_spawns() {
    if !supported() {
        return;
    }
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());

    let mut client = Launcher::start(LauncherConfig::default(), echo).unwrap();
    for i in 0..3 {
        let mut child = client
            .spawn_child(&format!("child-{}", i), vec![serde_json::json!(i)], SandboxConfig::default())
            .unwrap();
        drop(child.stdin.take());
        let stdout = read_all(child.stdout.take());
        assert_eq!(String::from_utf8_lossy(&stdout), format!("[{}]\n", i));
        assert!(child.wait().unwrap().success());
    }
    client.close().unwrap();
}

#[test]
fn chroot_hides_the_host_filesystem() {
    if !supported() {
        return;
    }
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());

    // The sandbox identity must be able to search the new root.
    let root = tempfile::tempdir_in("/tmp").unwrap();
    std::fs::set_permissions(root.path(), std::fs::Permissions::from_mode(0o755)).unwrap();
    std::fs::write(root.path().join("marker"), b"").unwrap();

    let mut client = Launcher::start(LauncherConfig::default(), look_for_marker).unwrap();

    let mut inside = client
        .spawn_child("chrooted", vec![], SandboxConfig::default().with_chroot(root.path()))
        .unwrap();
    let stdout = read_all(inside.stdout.take());
    assert_eq!(String::from_utf8_lossy(&stdout), "true");
    assert!(inside.wait().unwrap().success());

    let mut outside = client
        .spawn_child("unchrooted", vec![], SandboxConfig::default())
        .unwrap();
    let stdout = read_all(outside.stdout.take());
    assert_eq!(String::from_utf8_lossy(&stdout), "false");
    assert!(outside.wait().unwrap().success());

    client.close().unwrap();
}

#[test]
fn invalid_config_is_rejected_before_sending() {
    if !supported() {
        return;
    }
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());

    let mut client = Launcher::start(LauncherConfig::default(), echo).unwrap();
    let err = client
        .spawn_child("bad", vec![], SandboxConfig::default().with_chroot("relative/root"))
        .unwrap_err();
    assert!(matches!(err, ClonerError::Config(_)));

    // The channel is still usable afterwards.
    let mut child = client.spawn_child("good", vec![], SandboxConfig::default()).unwrap();
    drop(child.stdin.take());
    read_all(child.stdout.take());
    assert!(child.wait().unwrap().success());
    client.close().unwrap();
}

#[test]
fn killed_child_reports_the_signal() {
    if !supported() {
        return;
    }
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());

    let mut client = Launcher::start(LauncherConfig::default(), echo).unwrap();
    assert!(client.launcher_pid().as_raw() > 0);

    // echo blocks on stdin, which we keep open until after the kill.
    let mut child = client.spawn_child("blocked", vec![], SandboxConfig::default()).unwrap();
    child.kill().unwrap();
    assert_eq!(
        child.wait().unwrap(),
        ChildExit::Signaled(nix::sys::signal::Signal::SIGKILL)
    );
    client.close().unwrap();
}

#[test]
fn bad_environment_fails_before_forking() {
    let config = LauncherConfig {
        environment: vec![("NOT=VALID".to_string(), "1".to_string())],
        ..LauncherConfig::default()
    };
    match Launcher::start(config, noop) {
        Err(ClonerError::Config(message)) => assert!(message.contains("NOT=VALID")),
        Err(other) => panic!("expected a config error, got {:?}", other),
        Ok(_) => panic!("launcher started with an invalid environment"),
    }
}

#[test]
fn launcher_keeps_only_its_channel() {
    if !supported() {
        return;
    }
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());

    // Held by the caller across the start; the launcher must not inherit it.
    let (_held_r, _held_w) = nix::unistd::pipe().unwrap();

    let mut client = Launcher::start(LauncherConfig::default(), noop).unwrap();
    // A completed spawn means the launcher finished initialising.
    let mut child = client.spawn_child("fd-check", vec![], SandboxConfig::default()).unwrap();
    assert!(child.wait().unwrap().success());

    let fd_dir = format!("/proc/{}/fd", client.launcher_pid());
    let extra: Vec<String> = std::fs::read_dir(&fd_dir)
        .unwrap()
        .flatten()
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<i32>().ok())
                .map_or(false, |fd| fd > 2)
        })
        .map(|entry| {
            std::fs::read_link(entry.path())
                .map(|target| target.display().to_string())
                .unwrap_or_default()
        })
        .collect();

    assert_eq!(extra.len(), 1, "launcher holds {:?}", extra);
    assert!(extra[0].starts_with("socket:"), "launcher holds {:?}", extra);
    client.close().unwrap();
}

#[test]
fn child_stderr_stays_free_of_launcher_logs() {
    if !supported() {
        return;
    }
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());

    // Straight to fd 2, so a forked launcher writes where its children's
    // stderr will be.
    let _ = env_logger::Builder::new()
        .filter_level(log::LevelFilter::Debug)
        .target(env_logger::Target::Stderr)
        .try_init();
    log::set_max_level(log::LevelFilter::Debug);

    let mut client = Launcher::start(LauncherConfig::default(), noop).unwrap();
    let mut child = client.spawn_child("quiet", vec![], SandboxConfig::default()).unwrap();
    drop(child.stdin.take());
    let stdout = read_all(child.stdout.take());
    let stderr = read_all(child.stderr.take());

    assert_eq!(child.wait().unwrap(), ChildExit::Exited(0));
    assert!(stdout.is_empty());
    assert_eq!(String::from_utf8_lossy(&stderr), "");
    client.close().unwrap();
}

#[test]
fn networked_children_route_through_the_host_end() {
    if !supported() || !has_net_admin() {
        return;
    }
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());

    let network = NetworkConfig::default();
    // /proc/net/route prints the gateway as its raw in-memory word.
    let expected = format!(
        "{} {:08X}\n",
        network.child_veth_name,
        u32::from_ne_bytes(network.host_ipv4_address.octets())
    );

    let mut client = Launcher::start(LauncherConfig::default(), default_routes).unwrap();
    // The second spawn finds the first one's names already taken.
    for round in 0..2 {
        let mut child = client
            .spawn_child(
                &format!("net-{}", round),
                vec![],
                SandboxConfig::default().with_network(network.clone()),
            )
            .unwrap();
        drop(child.stdin.take());
        let stdout = read_all(child.stdout.take());
        let stderr = read_all(child.stderr.take());

        assert_eq!(
            String::from_utf8_lossy(&stdout),
            expected,
            "round {}, stderr: {}",
            round,
            String::from_utf8_lossy(&stderr)
        );
        assert!(child.wait().unwrap().success());
    }
    client.close().unwrap();
    delete_veth_pair(&network).unwrap();
}
