//! rustbox-cloner: a trusted launcher that clones sandboxed children
//!
//! A privileged parent starts a long-lived launcher and asks it, over a
//! private socket, to run untrusted plugin code in fresh child processes.
//! Each child gets new namespaces, its own stdio pipes, and a fixed chain of
//! hardening layers before its entry point runs.
//!
//! # Architecture
//!
//! ## Kernel Primitives ([`kernel`])
//! - [`kernel::namespace`]: clone into new namespaces, uid/gid maps
//! - [`kernel::network`]: veth pair, addresses and routes over rtnetlink
//! - [`kernel::capabilities`]: securebits, capability sets, no_new_privs
//! - [`kernel::credentials`]: gid/uid transition to the sandbox identity
//! - [`kernel::seccomp`]: syscall allow-list, built-in or precompiled
//! - [`kernel::process`]: process name, parent-death signal
//!
//! ## Execution Control ([`exec`])
//! - [`exec::clonefds`]: type-state ownership of the per-spawn pipes
//! - [`exec::prepare`]: the launcher's setup of a child it just cloned
//! - [`exec::sandbox`]: ordered hardening layers a child applies to itself
//!
//! ## Launcher ([`core`](crate::core))
//! - [`core::protocol`](crate::core::protocol): length-prefixed frames and descriptor passing
//! - [`core::launcher`](crate::core::launcher): the helper process and its request loop
//! - [`core::client`](crate::core::client): the parent's handle; [`core::types::ChildHandle`](crate::core::types::ChildHandle)
//!
//! ## Configuration ([`config`])
//! - [`config::types`]: sandbox/network/launcher settings and error types
//! - [`config::validator`]: request validation
//!
//! ## Utilities ([`utils`])
//! - [`utils::fd_closure`]: closing inherited descriptors in a child
//! - [`utils::env_hygiene`]: the launcher's environment

// Kernel Primitives
pub mod kernel;

// Execution Control
pub mod exec;

// Launcher, client and protocol
pub mod core;

// Configuration
pub mod config;

// Utilities
pub mod utils;

// CLI entrypoint wiring for the cloner binary.
pub mod cli;

// Re-export commonly used types for convenience
pub use config::types::*;
pub use crate::core::client::Client;
pub use crate::core::launcher::Launcher;
pub use crate::core::types::{ChildExit, ChildHandle, EntryPoint, SpawnRequest};
