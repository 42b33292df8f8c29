//! Doorstep: a TLS-aware listener bootstrap for embedded web applications.
//!
//! Doorstep launches an application's request handler behind a plaintext
//! listener, a TLS-terminated listener, or both, selected by configuration.
//! Configuration is merged from built-in defaults, a user-supplied config
//! (TOML) and environment-variable overrides, in that order of precedence,
//! then frozen into an immutable snapshot before anything binds.
//!
//! The application itself is opaque: it provides an [`axum::Router`] and a
//! development-mode flag through the [`Framework`] trait, and an optional
//! asset builder through [`DevBuilder`]. See [`bootstrap::run`] for the
//! full sequence.

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod framework;
pub mod http;

pub use bootstrap::{run, Bootstrapped, ListenPorts};
pub use config::{CertMode, EnvOverrides, RawConfig, ResolvedConfig};
pub use error::BootstrapError;
pub use framework::{DevBuilder, Framework};
