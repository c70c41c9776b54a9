//! Configuration
//!
//! Sandbox/network/launcher settings, errors, and request validation.

pub mod types;
pub mod validator;
