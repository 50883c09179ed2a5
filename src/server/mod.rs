//! HTTP front end
//!
//! One [`ShareServer`] owns one [`ShareState`]; nothing is process-global,
//! so independent servers can run side by side.

mod page;
mod routes;
mod state;

pub use page::render_page;
pub use state::{PageOptions, ShareState};

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::catalog::{scan_directory, CatalogError};
use crate::core::ShareConfig;
use routes::{
    archive, auth_middleware, file, health, index, method_not_allowed, not_found, service_worker,
    thumbnail, upload_chunk, upload_finish, upload_init,
};

/// Server lifecycle error type
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Invalid listen address '{addr}': {reason}")]
    InvalidAddress { addr: String, reason: String },

    #[error("Server bind failed on {addr}: {reason}")]
    BindFailed { addr: SocketAddr, reason: String },

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Internal server error: {reason}")]
    Internal { reason: String },
}

/// Media sharing server
pub struct ShareServer {
    state: ShareState,
    addr: SocketAddr,
    catalog_root: Option<PathBuf>,
    max_depth: usize,
    sweep_interval: std::time::Duration,
}

impl ShareServer {
    /// Build a server from configuration. The catalog is filled from
    /// `catalog.root` when one is configured.
    pub fn new(config: &ShareConfig) -> Result<Self, ServerError> {
        let raw = format!("{}:{}", config.server.bind, config.server.port);
        let addr: SocketAddr = raw.parse().map_err(|e: std::net::AddrParseError| {
            ServerError::InvalidAddress {
                addr: raw.clone(),
                reason: e.to_string(),
            }
        })?;

        let server = Self {
            state: ShareState::from_config(config),
            addr,
            catalog_root: config.catalog.root.clone(),
            max_depth: config.catalog.max_depth,
            sweep_interval: config.upload.sweep_interval(),
        };
        if server.catalog_root.is_some() {
            server.rescan()?;
        }
        Ok(server)
    }

    /// Wrap pre-built state
    pub fn with_state(state: ShareState, addr: SocketAddr) -> Self {
        Self {
            state,
            addr,
            catalog_root: None,
            max_depth: 0,
            sweep_interval: std::time::Duration::from_secs(60),
        }
    }

    pub fn state(&self) -> &ShareState {
        &self.state
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Re-walk the catalog root and replace the catalog.
    /// Returns the new catalog version, or the current one if no root is set.
    pub fn rescan(&self) -> Result<u64, ServerError> {
        let Some(root) = &self.catalog_root else {
            return Ok(self.state.catalog.version());
        };
        let entries = scan_directory(root, self.max_depth)?;
        Ok(self.state.catalog.replace(entries))
    }

    /// Build the router with all routes and middleware
    pub fn build_router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Bind the configured address and serve until the process ends
    pub async fn start(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|e| ServerError::BindFailed {
                addr: self.addr,
                reason: e.to_string(),
            })?;
        self.run(listener).await
    }

    /// Serve on an already bound listener
    pub async fn run(&self, listener: TcpListener) -> Result<(), ServerError> {
        let local = listener.local_addr().map_err(|e| ServerError::Internal {
            reason: e.to_string(),
        })?;
        tracing::info!(
            addr = %local,
            entries = self.state.catalog.snapshot().len(),
            pin = self.state.gate.is_enabled(),
            "LanShare server listening"
        );

        let sweeper = self.state.uploads.spawn_sweeper(self.sweep_interval);
        let result = axum::serve(listener, self.build_router())
            .await
            .map_err(|e| ServerError::Internal {
                reason: e.to_string(),
            });
        sweeper.abort();
        result
    }

    /// Start the server in a background task
    pub fn start_background(self) -> tokio::task::JoinHandle<Result<(), ServerError>> {
        tokio::spawn(async move { self.start().await })
    }
}

/// Router over `state`
pub fn build_router(state: ShareState) -> Router {
    Router::new()
        .route("/", get(index).fallback(method_not_allowed))
        .route("/sw.js", get(service_worker).fallback(method_not_allowed))
        .route("/thumb", get(thumbnail).fallback(method_not_allowed))
        .route("/file", get(file).fallback(method_not_allowed))
        .route("/zip", get(archive).fallback(method_not_allowed))
        .route(
            "/upload_init",
            post(upload_init).fallback(method_not_allowed),
        )
        .route(
            "/upload_chunk",
            post(upload_chunk).fallback(method_not_allowed),
        )
        .route(
            "/upload_finish",
            post(upload_finish).fallback(method_not_allowed),
        )
        .route("/health", get(health))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
