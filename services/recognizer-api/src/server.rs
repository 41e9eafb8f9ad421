//!
//! src/server.rs
//!
//! Binds the listener and serves the router until Ctrl-C or the shutdown
//! token fires
//!

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::api::{self, AppState};
use crate::config::ServerConfig;
use crate::errors::AppError;

pub struct Server {
    cfg: ServerConfig,
    state: AppState,
    shutdown: CancellationToken
}

impl Server {
    pub fn new(cfg: &ServerConfig, state: AppState) -> Self {
        Self { cfg: cfg.clone(), state, shutdown: CancellationToken::new() }
    }

    #[cfg(test)]
    pub fn shutdown(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn run(self) -> Result<(), AppError> {
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!(reason = "ctrl_c", "server.stopping");
                shutdown.cancel();
            }
        });

        let app = api::router(self.state, self.cfg.max_upload_bytes);
        let listener = tokio::net::TcpListener::bind(self.cfg.bind_addr).await?;
        info!(addr = %self.cfg.bind_addr, env = ?self.cfg.app_env, "server.listening");

        let token = self.shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await?;

        info!("server.stopped");
        Ok(())
    }
}
