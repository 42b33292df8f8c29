//! Bootstrap failure surface.
//!
//! Every variant is fatal to the bootstrap attempt; nothing here is retried.
//! The library always propagates these to the caller, which decides shutdown
//! policy (the CLI binary logs the diagnostic and exits with status 1).

use std::path::PathBuf;

use crate::config::ConfigError;

/// A fatal bootstrap failure.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    /// The configured mode is not one of "http", "https" or "http_https".
    #[error("unrecognized cert mode {0:?}: expected \"http\", \"https\" or \"http_https\"")]
    InvalidMode(String),

    /// Dual mode was requested with the same port for both listeners.
    #[error("HTTP and HTTPS ports must be different (both are {0})")]
    PortConflict(u16),

    /// The mode includes https but no key or cert path was supplied.
    #[error("TLS key and cert file paths must both be set when the mode includes https")]
    MissingTlsMaterial,

    /// A key, cert or CA file could not be read from disk.
    #[error("failed to read TLS material from {}: {source}", path.display())]
    TlsMaterialUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The development asset build did not complete successfully.
    #[error("development build failed: {0}")]
    BuildFailed(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Config file or environment value could not be loaded or coerced.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A listener socket could not be bound.
    #[error("failed to bind listener on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// TLS material was readable but unusable (malformed PEM, bad key/cert
    /// pair, unbuildable client verifier).
    #[error("invalid TLS configuration: {0}")]
    Tls(String),
}
