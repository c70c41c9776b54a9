/// Core types shared by the launcher, its client and the sandboxed child
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use thiserror::Error;

/// Maximum interface name length accepted by the kernel (IFNAMSIZ - 1).
pub const MAX_INTERFACE_NAME_LEN: usize = 15;

/// Security layers applied inside a child, in the order they run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLayer {
    /// Bring up the child's network interfaces
    Network,
    /// prctl(PR_SET_NO_NEW_PRIVS)
    NoNewPrivs,
    /// chroot into the configured root
    Chroot,
    /// Drop to the fixed unprivileged uid/gid
    Setuid,
    /// Lock and clear every capability set
    DropCapabilities,
    /// Install the seccomp allow-list
    Seccomp,
}

impl SecurityLayer {
    /// Every layer, in application order.
    pub const ALL: [SecurityLayer; 6] = [
        SecurityLayer::Network,
        SecurityLayer::NoNewPrivs,
        SecurityLayer::Chroot,
        SecurityLayer::Setuid,
        SecurityLayer::DropCapabilities,
        SecurityLayer::Seccomp,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SecurityLayer::Network => "network",
            SecurityLayer::NoNewPrivs => "no_new_privs",
            SecurityLayer::Chroot => "chroot",
            SecurityLayer::Setuid => "setuid",
            SecurityLayer::DropCapabilities => "drop_capabilities",
            SecurityLayer::Seccomp => "seccomp",
        }
    }
}

impl fmt::Display for SecurityLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SecurityLayer {
    type Err = ClonerError;

    fn from_str(s: &str) -> Result<Self> {
        SecurityLayer::ALL
            .iter()
            .copied()
            .find(|layer| layer.as_str() == s)
            .ok_or_else(|| ClonerError::Config(format!("Unknown security layer: {}", s)))
    }
}

/// Network configuration that lets a child reach the Internet.
///
/// The launcher creates a veth pair, keeps `host_veth_name` in its own
/// namespace with `host_ipv4_address`, and moves `child_veth_name` into the
/// child's network namespace. The child uses the host address as its default
/// gateway. NAT and the rules that deny private address ranges live on the
/// host side and are provisioned outside this crate.
///
/// Only one networking-enabled child runs at a time, so every spawn reuses
/// the same names and addresses.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Host-side end of the veth pair (at most 15 bytes)
    pub host_veth_name: String,
    /// Child-side end of the veth pair (at most 15 bytes)
    pub child_veth_name: String,
    /// Address of the host end; the child's default gateway
    pub host_ipv4_address: Ipv4Addr,
    /// Address of the child end; must share a /24 with the host address
    pub child_ipv4_address: Ipv4Addr,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host_veth_name: "rbx-veth-host".to_string(),
            child_veth_name: "rbx-veth-child".to_string(),
            host_ipv4_address: Ipv4Addr::new(192, 168, 123, 1),
            child_ipv4_address: Ipv4Addr::new(192, 168, 123, 2),
        }
    }
}

impl NetworkConfig {
    /// Prefix length of the point-to-point block shared by both ends.
    pub const PREFIX_LEN: u8 = 24;
}

/// Per-spawn sandbox settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Root directory for the chroot layer
    pub chroot_dir: Option<PathBuf>,
    /// If set, the child gets a veth interface; otherwise no network at all
    pub network: Option<NetworkConfig>,
    /// Layers to keep when not all are wanted. DO NOT USE IN PRODUCTION.
    ///
    /// Empty (the default) enables every layer. Layers overlap: a non-root
    /// child cannot escape its chroot anyway, so testing that the capability
    /// drop alone holds the chroot means disabling `setuid`.
    pub skip_sandbox_except: BTreeSet<SecurityLayer>,
}

impl SandboxConfig {
    pub fn with_chroot(mut self, root: impl Into<PathBuf>) -> Self {
        self.chroot_dir = Some(root.into());
        self
    }

    pub fn with_network(mut self, network: NetworkConfig) -> Self {
        self.network = Some(network);
        self
    }

    pub fn only_layers<I: IntoIterator<Item = SecurityLayer>>(mut self, layers: I) -> Self {
        self.skip_sandbox_except = layers.into_iter().collect();
        self
    }

    /// True when the production default (every layer) is in effect.
    pub fn is_fully_sandboxed(&self) -> bool {
        self.skip_sandbox_except.is_empty()
    }
}

/// Launcher process configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    /// Environment the launcher (and so every child) runs with. Replaces the
    /// inherited environment entirely.
    pub environment: Vec<(String, String)>,
    /// Precompiled seccomp program (raw `sock_filter` records). When unset
    /// the built-in allow-list is compiled at launcher start.
    pub seccomp_bpf_path: Option<PathBuf>,
}

impl LauncherConfig {
    /// Load configuration from a JSON file.
    pub fn from_json_file(path: &std::path::Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ClonerError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            ClonerError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })
    }
}

/// Failures on the launcher's private channel
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("channel closed")]
    Closed,

    #[error("truncated {what}: expected {expected} bytes, got {got}")]
    Truncated {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("frame of {0} bytes exceeds the maximum frame size")]
    Oversized(usize),

    #[error("received message of kind {received:?}; expected {expected:?}")]
    TypeMismatch {
        expected: &'static str,
        received: String,
    },

    #[error("malformed message: {0}")]
    Decode(String),

    #[error("cannot encode message: {0}")]
    Encode(String),

    #[error("expected {expected} descriptors, received {received}")]
    Descriptors { expected: usize, received: usize },
}

/// Errors that can occur in the cloner
#[derive(Error, Debug)]
pub enum ClonerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Namespace error: {0}")]
    Namespace(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Privilege error: {0}")]
    Privilege(String),

    #[error("Seccomp error: {0}")]
    Seccomp(String),

    #[error("Filesystem error: {0}")]
    Filesystem(String),

    #[error("{layer} layer failed: {source}")]
    Layer {
        layer: SecurityLayer,
        #[source]
        source: Box<ClonerError>,
    },

    #[error("Launcher exited before answering")]
    LauncherExited,
}

impl ClonerError {
    /// Closed channel: the expected way for a launcher to learn it should exit.
    pub fn is_channel_closed(&self) -> bool {
        matches!(self, ClonerError::Protocol(ProtocolError::Closed))
    }
}

pub type Result<T> = std::result::Result<T, ClonerError>;
