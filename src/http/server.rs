//! Listener construction for plaintext and TLS endpoints.
//!
//! Each listener is bound through a std socket first so bind failures are
//! reported synchronously and a port of 0 yields the kernel-assigned port,
//! then handed to axum-server to serve the application's router for the
//! rest of the process lifetime.

use std::io::BufReader;
use std::net::{Ipv4Addr, SocketAddr, TcpListener};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum_server::tls_rustls::{RustlsAcceptor, RustlsConfig};
use axum_server::Handle;
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use rustls_pki_types::{CertificateDer, PrivateKeyDer};

use crate::config::ResolvedConfig;
use crate::error::BootstrapError;

/// A listener that is bound and serving.
pub struct BoundListener {
    /// The actual bound port (relevant when the configured port was 0).
    pub port: u16,
    /// The serving task; completes once the listener stops.
    pub task: tokio::task::JoinHandle<()>,
}

/// Bind a plaintext listener and start serving `app` on it.
///
/// The serving task runs until the handle is shut down or the process
/// exits.
pub fn bind_plain(app: Router, port: u16, handle: Handle) -> Result<BoundListener, BootstrapError> {
    let listener = bind_socket(port)?;
    let actual_port = local_port(&listener, port)?;

    tracing::info!(port = actual_port, "HTTP listener bound");

    let server = axum_server::from_tcp(listener).handle(handle);
    let task = tokio::spawn(async move {
        if let Err(e) = server.serve(app.into_make_service()).await {
            tracing::error!(error = %e, port = actual_port, "HTTP listener terminated");
        }
    });

    Ok(BoundListener {
        port: actual_port,
        task,
    })
}

/// Bind a TLS listener and start serving `app` on it.
///
/// Reads the key, cert and CA files named by `config`, builds the rustls
/// server configuration (including client-certificate verification when
/// requested) and applies the per-connection handshake timeout.
pub fn bind_tls(
    app: Router,
    config: &ResolvedConfig,
    handle: Handle,
) -> Result<BoundListener, BootstrapError> {
    let rustls_config = load_rustls_config(config)?;
    let acceptor = RustlsAcceptor::new(rustls_config)
        .handshake_timeout(Duration::from_millis(config.handshake_timeout_ms));

    let listener = bind_socket(config.https_port)?;
    let actual_port = local_port(&listener, config.https_port)?;

    tracing::info!(
        port = actual_port,
        request_client_cert = config.request_client_cert,
        handshake_timeout_ms = config.handshake_timeout_ms,
        "HTTPS listener bound"
    );

    let server = axum_server::from_tcp(listener)
        .acceptor(acceptor)
        .handle(handle);
    let task = tokio::spawn(async move {
        if let Err(e) = server.serve(app.into_make_service()).await {
            tracing::error!(error = %e, port = actual_port, "HTTPS listener terminated");
        }
    });

    Ok(BoundListener {
        port: actual_port,
        task,
    })
}

/// Build the rustls server configuration from the resolved TLS material.
pub(crate) fn load_rustls_config(config: &ResolvedConfig) -> Result<RustlsConfig, BootstrapError> {
    install_crypto_provider();

    let key_path = config
        .tls_key_path
        .as_deref()
        .ok_or(BootstrapError::MissingTlsMaterial)?;
    let cert_path = config
        .tls_cert_path
        .as_deref()
        .ok_or(BootstrapError::MissingTlsMaterial)?;

    let certs = read_cert_chain(cert_path)?;
    let key = read_private_key(key_path)?;

    // Every configured CA file is read at bind time, whether or not client
    // auth is enabled, so a bad path fails the bootstrap instead of lying
    // dormant until request_cert is turned on.
    let mut roots = RootCertStore::empty();
    for ca_path in &config.tls_ca_paths {
        for cert in read_cert_chain(ca_path)? {
            roots.add(cert).map_err(|e| {
                BootstrapError::Tls(format!(
                    "unusable CA certificate in {}: {e}",
                    ca_path.display()
                ))
            })?;
        }
    }

    let builder = if config.request_client_cert {
        let verifier = client_verifier(roots, config.reject_unauthorized_clients)?;
        ServerConfig::builder().with_client_cert_verifier(verifier)
    } else {
        ServerConfig::builder().with_no_client_auth()
    };

    let server_config = builder
        .with_single_cert(certs, key)
        .map_err(|e| BootstrapError::Tls(format!("invalid key/cert pair: {e}")))?;

    Ok(RustlsConfig::from_config(Arc::new(server_config)))
}

/// Build a client-certificate verifier over the CA roots.
fn client_verifier(
    roots: RootCertStore,
    reject_unauthorized: bool,
) -> Result<Arc<dyn rustls::server::danger::ClientCertVerifier>, BootstrapError> {
    let builder = WebPkiClientVerifier::builder(Arc::new(roots));
    let builder = if reject_unauthorized {
        builder
    } else {
        builder.allow_unauthenticated()
    };

    builder
        .build()
        .map_err(|e| BootstrapError::Tls(format!("cannot build client verifier: {e}")))
}

fn read_cert_chain(path: &Path) -> Result<Vec<CertificateDer<'static>>, BootstrapError> {
    let bytes = read_material(path)?;
    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(bytes.as_slice()))
        .collect::<Result<_, _>>()
        .map_err(|e| BootstrapError::Tls(format!("malformed PEM in {}: {e}", path.display())))?;

    if certs.is_empty() {
        return Err(BootstrapError::Tls(format!(
            "no certificates found in {}",
            path.display()
        )));
    }

    Ok(certs)
}

fn read_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, BootstrapError> {
    let bytes = read_material(path)?;
    rustls_pemfile::private_key(&mut BufReader::new(bytes.as_slice()))
        .map_err(|e| BootstrapError::Tls(format!("malformed PEM in {}: {e}", path.display())))?
        .ok_or_else(|| {
            BootstrapError::Tls(format!("no private key found in {}", path.display()))
        })
}

fn read_material(path: &Path) -> Result<Vec<u8>, BootstrapError> {
    std::fs::read(path).map_err(|source| BootstrapError::TlsMaterialUnreadable {
        path: path.to_path_buf(),
        source,
    })
}

fn bind_socket(port: u16) -> Result<TcpListener, BootstrapError> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let listener =
        TcpListener::bind(addr).map_err(|source| BootstrapError::Bind { port, source })?;
    // axum-server converts this to a tokio listener, which requires
    // non-blocking mode.
    listener
        .set_nonblocking(true)
        .map_err(|source| BootstrapError::Bind { port, source })?;
    Ok(listener)
}

fn local_port(listener: &TcpListener, requested: u16) -> Result<u16, BootstrapError> {
    let addr = listener.local_addr().map_err(|source| BootstrapError::Bind {
        port: requested,
        source,
    })?;
    Ok(addr.port())
}

/// Install the process-level crypto provider. Later calls are no-ops.
fn install_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::config::{CertMode, DEFAULT_HANDSHAKE_TIMEOUT_MS};

    fn fixture(name: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests/fixtures")
            .join(name)
    }

    fn tls_config(key: PathBuf, cert: PathBuf) -> ResolvedConfig {
        ResolvedConfig {
            mode: CertMode::Https,
            http_port: 0,
            https_port: 0,
            tls_key_path: Some(key),
            tls_cert_path: Some(cert),
            tls_ca_paths: Vec::new(),
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            request_client_cert: false,
            reject_unauthorized_clients: true,
        }
    }

    #[test]
    fn loads_valid_key_and_cert() {
        let config = tls_config(fixture("key.pem"), fixture("cert.pem"));
        assert!(load_rustls_config(&config).is_ok());
    }

    #[test]
    fn missing_file_is_unreadable_material() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.pem");
        let config = tls_config(missing.clone(), fixture("cert.pem"));

        let err = load_rustls_config(&config).unwrap_err();
        assert!(matches!(
            err,
            BootstrapError::TlsMaterialUnreadable { path, .. } if path == missing
        ));
    }

    #[test]
    fn garbage_pem_is_a_tls_error() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("bogus.pem");
        std::fs::write(&bogus, "this is not pem material").unwrap();

        let config = tls_config(fixture("key.pem"), bogus);
        assert!(matches!(
            load_rustls_config(&config).unwrap_err(),
            BootstrapError::Tls(_)
        ));
    }

    #[test]
    fn client_auth_requires_ca_roots() {
        let mut config = tls_config(fixture("key.pem"), fixture("cert.pem"));
        config.request_client_cert = true;

        // No CA roots configured: the verifier cannot be built.
        assert!(matches!(
            load_rustls_config(&config).unwrap_err(),
            BootstrapError::Tls(_)
        ));
    }

    #[test]
    fn client_auth_builds_with_ca_roots() {
        let mut config = tls_config(fixture("key.pem"), fixture("cert.pem"));
        config.request_client_cert = true;
        config.tls_ca_paths = vec![fixture("cert.pem")];

        assert!(load_rustls_config(&config).is_ok());
    }

    #[test]
    fn optional_client_auth_builds_with_ca_roots() {
        let mut config = tls_config(fixture("key.pem"), fixture("cert.pem"));
        config.request_client_cert = true;
        config.reject_unauthorized_clients = false;
        config.tls_ca_paths = vec![fixture("cert.pem")];

        assert!(load_rustls_config(&config).is_ok());
    }

    #[test]
    fn ca_files_are_read_even_without_client_auth() {
        let mut config = tls_config(fixture("key.pem"), fixture("cert.pem"));
        config.request_client_cert = false;
        config.tls_ca_paths = vec![PathBuf::from("/nonexistent/ca.pem")];

        let err = load_rustls_config(&config).unwrap_err();
        assert!(matches!(
            err,
            BootstrapError::TlsMaterialUnreadable { path, .. }
                if path == PathBuf::from("/nonexistent/ca.pem")
        ));
    }

    #[test]
    fn unreadable_ca_path_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing_ca = dir.path().join("ca.pem");

        let mut config = tls_config(fixture("key.pem"), fixture("cert.pem"));
        config.request_client_cert = true;
        config.tls_ca_paths = vec![missing_ca.clone()];

        let err = load_rustls_config(&config).unwrap_err();
        assert!(matches!(
            err,
            BootstrapError::TlsMaterialUnreadable { path, .. } if path == missing_ca
        ));
    }
}
