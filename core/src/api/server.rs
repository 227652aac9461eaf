// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! HTTP server assembly.

use anyhow::{Context, Result};
use axum::Router;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::middleware::CorsConfig;
use super::rest::{self, AppState};
use crate::config::ServerSettings;

/// The intake API server.
pub struct ApiServer {
    settings: ServerSettings,
    state: Arc<AppState>,
}

impl ApiServer {
    /// Create a server over shared state.
    pub fn new(settings: ServerSettings, state: Arc<AppState>) -> Self {
        Self { settings, state }
    }

    /// The assembled router, also used directly by tests.
    pub fn router(&self) -> Router {
        let cors = CorsConfig::from_origins(&self.settings.cors_allowed_origins);
        rest::router(Arc::clone(&self.state))
            .layer(cors.to_layer())
            .layer(TraceLayer::new_for_http())
    }

    /// Serve until the shutdown signal flips.
    pub async fn serve(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr = self.settings.bind_addr();
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        info!(addr = %addr, "API server listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await
            .context("API server terminated")?;

        info!("API server stopped");
        Ok(())
    }
}
