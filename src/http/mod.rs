//! Listener construction and lifecycle.
//!
//! `server` binds plaintext and TLS listeners around the application's
//! router; `shutdown` drains them on SIGTERM/SIGINT.

mod server;
mod shutdown;

pub(crate) use server::{bind_plain, bind_tls, BoundListener};
pub(crate) use shutdown::setup_shutdown_handler;
