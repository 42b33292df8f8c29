//! The bootstrap sequence.
//!
//! One linear pass per process: resolve the effective configuration,
//! validate it, instantiate the application, run the development build if
//! the application asks for one, then bind the requested listeners. Every
//! failure is terminal; nothing is retried and nothing reconfigures after
//! the listeners are up.

use std::time::Duration;

use axum_server::Handle;

use crate::config::{EnvOverrides, RawConfig, ResolvedConfig};
use crate::error::BootstrapError;
use crate::framework::{DevBuilder, Framework};
use crate::http::{bind_plain, bind_tls, setup_shutdown_handler, BoundListener};

/// The ports that are bound and serving after a successful bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenPorts {
    pub http: Option<u16>,
    pub https: Option<u16>,
}

impl ListenPorts {
    /// The bound ports in order, http before https.
    pub fn as_vec(&self) -> Vec<u16> {
        self.http.into_iter().chain(self.https).collect()
    }
}

/// A successful bootstrap: every requested listener is bound and serving.
///
/// Listeners live for the rest of the process by default; embedding code
/// that wants to stop early can use [`Bootstrapped::graceful_shutdown`].
#[derive(Debug)]
pub struct Bootstrapped {
    ports: ListenPorts,
    handles: Vec<Handle>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl Bootstrapped {
    pub fn ports(&self) -> ListenPorts {
        self.ports
    }

    /// Stop accepting new connections and drain in-flight ones, waiting at
    /// most `grace` (forever if `None`).
    pub fn graceful_shutdown(&self, grace: Option<Duration>) {
        for handle in &self.handles {
            handle.graceful_shutdown(grace);
        }
    }

    /// Wait until every listener has stopped serving.
    pub async fn wait(self) {
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

/// Resolve, validate, build and bind.
///
/// `make_framework` constructs the application from the resolved
/// configuration; `make_builder` constructs its asset builder, consulted
/// only when the application reports development mode. The build, when it
/// runs, completes before any listener binds.
pub async fn run<F, B, MkF, MkB>(
    make_framework: MkF,
    make_builder: MkB,
    raw: &RawConfig,
    env: &EnvOverrides,
) -> Result<Bootstrapped, BootstrapError>
where
    F: Framework,
    B: DevBuilder,
    MkF: FnOnce(&ResolvedConfig) -> F,
    MkB: FnOnce(&F) -> B,
{
    let config = ResolvedConfig::resolve(raw, env)?;
    config.validate()?;

    tracing::info!(
        mode = %config.mode,
        http_port = config.http_port,
        https_port = config.https_port,
        "Configuration resolved"
    );

    let framework = make_framework(&config);

    if framework.is_dev() {
        tracing::info!("Development mode, rebuilding assets before binding listeners");
        let builder = make_builder(&framework);
        builder.build().await.map_err(BootstrapError::BuildFailed)?;
        tracing::info!("Development build complete");
    }

    let app = framework.render();

    let mut ports = ListenPorts {
        http: None,
        https: None,
    };
    let mut handles = Vec::new();
    let mut tasks = Vec::new();

    if config.mode.wants_http() {
        let handle = Handle::new();
        let BoundListener { port, task } = bind_plain(app.clone(), config.http_port, handle.clone())?;
        tracing::info!("Listening on http://0.0.0.0:{port}");
        ports.http = Some(port);
        handles.push(handle);
        tasks.push(task);
    }

    if config.mode.wants_https() {
        let handle = Handle::new();
        let bound = match bind_tls(app.clone(), &config, handle.clone()) {
            Ok(bound) => bound,
            Err(e) => {
                // A failed bootstrap must leave nothing listening; tear
                // down whatever bound before this point.
                stop_listeners(handles, tasks).await;
                return Err(e);
            }
        };
        tracing::info!("Listening on https://0.0.0.0:{}", bound.port);
        ports.https = Some(bound.port);
        handles.push(handle);
        tasks.push(bound.task);
    }

    setup_shutdown_handler(handles.clone());

    Ok(Bootstrapped {
        ports,
        handles,
        tasks,
    })
}

/// Close partially-bound listeners and wait until their sockets are gone.
async fn stop_listeners(handles: Vec<Handle>, tasks: Vec<tokio::task::JoinHandle<()>>) {
    for handle in &handles {
        handle.shutdown();
    }
    for task in tasks {
        task.abort();
        let _ = task.await;
    }
}
