//! Execution control
//!
//! Per-spawn descriptor ownership, the launcher's privileged preparation of
//! a new child, and the hardening the child applies to itself.

pub mod clonefds;
pub mod prepare;
pub mod sandbox;
