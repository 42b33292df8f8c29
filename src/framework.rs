//! Collaborator interfaces for the embedded web application.
//!
//! The bootstrap layer treats the application as opaque: it asks for the
//! request handler once, hands it to each listener, and never inspects a
//! request itself. The dev builder is only consulted when the application
//! reports development mode.

use async_trait::async_trait;
use axum::Router;

/// The embedded web application.
pub trait Framework: Send + Sync {
    /// The request handler every listener delegates to.
    fn render(&self) -> Router;

    /// Whether the application runs in development mode and needs its
    /// assets rebuilt before serving.
    fn is_dev(&self) -> bool;
}

/// Rebuilds development assets.
///
/// `build` is awaited to completion before any listener binds; a failure
/// aborts the bootstrap.
#[async_trait]
pub trait DevBuilder: Send + Sync {
    async fn build(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}
