//! Configuration loading and resolution.
//!
//! Listener configuration is merged from three layers, lowest to highest
//! precedence: built-in defaults, a user-supplied [`RawConfig`] (usually
//! deserialized from a TOML file), and [`EnvOverrides`]. The result is an
//! immutable [`ResolvedConfig`] snapshot; nothing re-reads the environment
//! after resolution.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::BootstrapError;

// =============================================================================
// Defaults
// =============================================================================

/// Default configuration file path for the CLI binary
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Default log filter when RUST_LOG is not set
pub const DEFAULT_LOG_FILTER: &str = "doorstep=debug,tower_http=debug";

/// Default log format (text or json)
pub const DEFAULT_LOG_FORMAT: &str = "text";

/// Default plaintext listener port
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Default TLS listener port
pub const DEFAULT_HTTPS_PORT: u16 = 8443;

/// Default per-connection TLS handshake timeout in milliseconds
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 120;

// =============================================================================
// Environment override keys
// =============================================================================

pub const ENV_CERT_MODE: &str = "CERT_MODE";
pub const ENV_HTTP_PORT: &str = "HTTP_PORT";
pub const ENV_HTTPS_PORT: &str = "HTTPS_PORT";
pub const ENV_PATH_KEY: &str = "PATH_KEY";
pub const ENV_PATH_CERT: &str = "PATH_CERT";
pub const ENV_PATH_CA: &str = "PATH_CA";
pub const ENV_HANDSHAKE_TIMEOUT: &str = "HANDSHAKE_TIMEOUT";
pub const ENV_REQUEST_CERT: &str = "REQUEST_CERT";
pub const ENV_REJECT_UNAUTHORIZED: &str = "REJECT_UNAUTHORIZED";

/// All environment keys the resolver recognizes
pub const ENV_KEYS: [&str; 9] = [
    ENV_CERT_MODE,
    ENV_HTTP_PORT,
    ENV_HTTPS_PORT,
    ENV_PATH_KEY,
    ENV_PATH_CERT,
    ENV_PATH_CA,
    ENV_HANDSHAKE_TIMEOUT,
    ENV_REQUEST_CERT,
    ENV_REJECT_UNAUTHORIZED,
];

// =============================================================================
// Listener mode
// =============================================================================

/// Which listeners the bootstrap binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertMode {
    /// Plaintext listener only
    Http,
    /// TLS listener only
    Https,
    /// Both listeners, on distinct ports
    HttpHttps,
}

impl CertMode {
    /// Parse a mode string, case-insensitively. Returns `None` for
    /// anything outside the three recognized values.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Some(CertMode::Http),
            "https" => Some(CertMode::Https),
            "http_https" => Some(CertMode::HttpHttps),
            _ => None,
        }
    }

    pub fn wants_http(self) -> bool {
        matches!(self, CertMode::Http | CertMode::HttpHttps)
    }

    pub fn wants_https(self) -> bool {
        matches!(self, CertMode::Https | CertMode::HttpHttps)
    }
}

impl fmt::Display for CertMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CertMode::Http => "http",
            CertMode::Https => "https",
            CertMode::HttpHttps => "http_https",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Raw (user-supplied) configuration
// =============================================================================

/// User-supplied configuration with all fields optional.
///
/// Anything left unset falls through to the built-in defaults; anything set
/// here can still be overridden by the environment.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfig {
    /// Listener mode: "http", "https" or "http_https"
    pub mode: Option<String>,
    #[serde(default)]
    pub http: HttpSection,
    #[serde(default)]
    pub https: HttpsSection,
    /// Logging configuration (used by the CLI binary)
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HttpSection {
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HttpsSection {
    pub port: Option<u16>,
    #[serde(default)]
    pub path: TlsPaths,
    /// Per-connection TLS handshake timeout in milliseconds
    pub handshake_timeout_ms: Option<u64>,
    /// Ask connecting clients for a certificate
    pub request_cert: Option<bool>,
    /// Refuse clients that present no (or an unverifiable) certificate
    pub reject_unauthorized: Option<bool>,
}

/// Filesystem locations of the TLS material. Files are read at bind time,
/// not at resolution time.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TlsPaths {
    pub key: Option<PathBuf>,
    pub cert: Option<PathBuf>,
    #[serde(default)]
    pub ca: Vec<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "text" (human-readable, default) or "json" (structured)
    #[serde(default = "LoggingConfig::default_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: DEFAULT_LOG_FORMAT.to_string(),
        }
    }
}

impl LoggingConfig {
    fn default_format() -> String {
        DEFAULT_LOG_FORMAT.to_string()
    }
}

impl RawConfig {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config = toml::from_str(&contents)?;
        Ok(config)
    }
}

// =============================================================================
// Environment overrides
// =============================================================================

/// Environment-variable overrides, captured as an explicit value.
///
/// The resolver never touches the process environment itself; callers hand
/// it a snapshot via [`EnvOverrides::from_process_env`], and tests build one
/// from literal pairs. Only the keys in [`ENV_KEYS`] are consulted.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    vars: HashMap<String, String>,
}

impl EnvOverrides {
    /// An empty override set (nothing in the environment wins).
    pub fn none() -> Self {
        Self::default()
    }

    /// Snapshot the recognized keys from the process environment.
    pub fn from_process_env() -> Self {
        let vars = ENV_KEYS
            .iter()
            .filter_map(|key| std::env::var(key).ok().map(|v| (key.to_string(), v)))
            .collect();
        Self { vars }
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for EnvOverrides {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let vars = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self { vars }
    }
}

// =============================================================================
// Resolved configuration
// =============================================================================

/// The effective listener configuration, resolved once per bootstrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub mode: CertMode,
    pub http_port: u16,
    pub https_port: u16,
    pub tls_key_path: Option<PathBuf>,
    pub tls_cert_path: Option<PathBuf>,
    pub tls_ca_paths: Vec<PathBuf>,
    pub handshake_timeout_ms: u64,
    pub request_client_cert: bool,
    pub reject_unauthorized_clients: bool,
}

impl ResolvedConfig {
    /// Merge defaults, user config and environment overrides into a snapshot.
    ///
    /// An unrecognized mode string fails with
    /// [`BootstrapError::InvalidMode`] here, before anything else runs; a
    /// value that cannot be coerced to its field type fails with a
    /// [`ConfigError`] naming the variable.
    pub fn resolve(raw: &RawConfig, env: &EnvOverrides) -> Result<Self, BootstrapError> {
        let mode_str = env
            .get(ENV_CERT_MODE)
            .or(raw.mode.as_deref())
            .unwrap_or("http");
        let mode = CertMode::parse(mode_str)
            .ok_or_else(|| BootstrapError::InvalidMode(mode_str.to_string()))?;

        let http_port = match env.get(ENV_HTTP_PORT) {
            Some(v) => coerce_int::<u16>(ENV_HTTP_PORT, v)?,
            None => raw.http.port.unwrap_or(DEFAULT_HTTP_PORT),
        };

        let https_port = match env.get(ENV_HTTPS_PORT) {
            Some(v) => coerce_int::<u16>(ENV_HTTPS_PORT, v)?,
            None => raw.https.port.unwrap_or(DEFAULT_HTTPS_PORT),
        };

        let tls_key_path = env
            .get(ENV_PATH_KEY)
            .map(PathBuf::from)
            .or_else(|| raw.https.path.key.clone());

        let tls_cert_path = env
            .get(ENV_PATH_CERT)
            .map(PathBuf::from)
            .or_else(|| raw.https.path.cert.clone());

        // PATH_CA is a `:`-separated list, like $PATH. It only wins when the
        // variable is actually set; an unset variable leaves the configured
        // CA list in effect.
        let tls_ca_paths = match env.get(ENV_PATH_CA) {
            Some(v) => v
                .split(':')
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .collect(),
            None => raw.https.path.ca.clone(),
        };

        let handshake_timeout_ms = match env.get(ENV_HANDSHAKE_TIMEOUT) {
            Some(v) => coerce_int::<u64>(ENV_HANDSHAKE_TIMEOUT, v)?,
            None => raw
                .https
                .handshake_timeout_ms
                .unwrap_or(DEFAULT_HANDSHAKE_TIMEOUT_MS),
        };

        let request_client_cert = match env.get(ENV_REQUEST_CERT) {
            Some(v) => coerce_bool(ENV_REQUEST_CERT, v)?,
            None => raw.https.request_cert.unwrap_or(false),
        };

        let reject_unauthorized_clients = match env.get(ENV_REJECT_UNAUTHORIZED) {
            Some(v) => coerce_bool(ENV_REJECT_UNAUTHORIZED, v)?,
            None => raw.https.reject_unauthorized.unwrap_or(true),
        };

        Ok(Self {
            mode,
            http_port,
            https_port,
            tls_key_path,
            tls_cert_path,
            tls_ca_paths,
            handshake_timeout_ms,
            request_client_cert,
            reject_unauthorized_clients,
        })
    }

    /// Check the cross-field invariants. Runs before the framework is
    /// instantiated and before any filesystem access.
    pub fn validate(&self) -> Result<(), BootstrapError> {
        if self.mode == CertMode::HttpHttps && self.http_port == self.https_port {
            // Port 0 asks the kernel for an ephemeral port, so two zeros
            // never collide.
            if self.http_port != 0 {
                return Err(BootstrapError::PortConflict(self.http_port));
            }
        }

        if self.mode.wants_https() && (self.tls_key_path.is_none() || self.tls_cert_path.is_none())
        {
            return Err(BootstrapError::MissingTlsMaterial);
        }

        Ok(())
    }
}

fn coerce_int<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, BootstrapError>
where
    T::Err: fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| {
        ConfigError::InvalidEnv {
            var,
            value: value.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

fn coerce_bool(var: &'static str, value: &str) -> Result<bool, BootstrapError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            var,
            value: value.to_string(),
            reason: "expected \"true\" or \"false\"".to_string(),
        }
        .into()),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value {value:?} for {var}: {reason}")]
    InvalidEnv {
        var: &'static str,
        value: String,
        reason: String,
    },
}
