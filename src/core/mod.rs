//! Launcher, client and the protocol between them.
//!
//! The parent starts a [`launcher::Launcher`], gets back a
//! [`client::Client`], and asks it for children; each comes back as a
//! [`types::ChildHandle`].

pub mod client;
pub mod launcher;
pub mod protocol;
pub mod types;
