//! Utilities
//!
//! Cross-cutting helpers for descriptor closure and environment hygiene.

pub mod env_hygiene;
pub mod fd_closure;
