//! Thin wrappers around Linux kernel primitives.
//!
//! Most `unsafe` code lives here with explicit SAFETY comments. Nothing in
//! this module knows about the launcher or its protocol.

pub mod capabilities;
pub mod credentials;
pub mod namespace;
pub mod network;
pub mod process;
pub mod seccomp;
