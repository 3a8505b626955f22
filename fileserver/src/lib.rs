use axum::Router;
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

pub mod config;
pub mod dispatch;
pub mod error;
pub mod listing;
pub mod resolve;
pub mod tools;
pub mod types;

use crate::dispatch::{dispatch, ServeContext, SharedContext};
use crate::tools::Toolbox;

/// Read-only HTTP browser over a directory tree.
#[derive(Debug, Clone)]
pub struct FileServer {
    root: PathBuf,
    tools: Toolbox,
}

impl FileServer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileServer {
            root: root.into(),
            tools: Toolbox::default(),
        }
    }

    pub fn with_tools(mut self, tools: Toolbox) -> Self {
        self.tools = tools;
        self
    }

    /// Every path, any method, goes through the dispatcher.
    pub fn router(&self) -> Router {
        let ctx: SharedContext = Arc::new(ServeContext {
            root: self.root.clone(),
            tools: self.tools.clone(),
        });

        Router::new()
            .fallback(dispatch)
            .layer(TraceLayer::new_for_http())
            .with_state(ctx)
    }

    /// Serves until Ctrl-C. An empty host binds every interface.
    pub async fn listen(&self, host: &str, port: u16) -> anyhow::Result<()> {
        let host = if host.is_empty() { "0.0.0.0" } else { host };
        let addr: SocketAddr = tokio::net::lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| anyhow::anyhow!("no address for {}:{}", host, port))?;

        let listener = TcpListener::bind(addr).await?;
        info!(
            "fileserver listening on {} serving {}",
            listener.local_addr()?,
            self.root.display()
        );

        axum::serve(listener, self.router().into_make_service())
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("fileserver stopped");
        Ok(())
    }

    pub async fn listen_to_port(&self, port: u16) -> anyhow::Result<()> {
        self.listen("", port).await
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal handler available; run until the process is killed.
        std::future::pending::<()>().await;
    }
}
