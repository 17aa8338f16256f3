//! Server lifecycle: bind, serve until shutdown, report the bound address.

use std::future::Future;
use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::rest::{build_router, ApiState};

/// A bound listener and the router it will serve
pub struct RelayServer {
    listener: TcpListener,
    state: ApiState,
}

impl RelayServer {
    /// Bind `host:port`; port 0 picks a free port
    pub async fn bind(state: ApiState, host: &str, port: u16) -> Result<Self> {
        let listener = TcpListener::bind((host, port))
            .await
            .with_context(|| format!("Failed to bind {host}:{port}"))?;
        Ok(Self { listener, state })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `shutdown` resolves, then drain in-flight requests
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.local_addr()?;
        let app = build_router(self.state);
        info!("git relay listening on http://{}", addr);

        axum::serve(
            self.listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")?;

        info!("git relay stopped");
        Ok(())
    }

    /// Serve on a background task
    pub fn spawn(self) -> Result<RunningServer> {
        let addr = self.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let shutdown = async {
                let _ = shutdown_rx.await;
            };
            if let Err(e) = self.run(shutdown).await {
                error!("git relay failed: {:#}", e);
            }
        });
        Ok(RunningServer {
            addr,
            shutdown_tx: Some(shutdown_tx),
            handle,
        })
    }
}

/// Handle to a server started with [`RelayServer::spawn`]
pub struct RunningServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl RunningServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Signal shutdown and wait for the server task to finish
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = self.handle.await {
            error!("git relay task failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Secret};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_spawn_and_stop() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.auth.secret = Some(Secret::new("s"));
        config.workspace.root = dir.path().to_string_lossy().to_string();
        let state = ApiState::new(config).unwrap();

        let server = RelayServer::bind(state, "127.0.0.1", 0).await.unwrap();
        let running = server.spawn().unwrap();
        assert_ne!(running.addr().port(), 0);
        assert!(running.url().starts_with("http://127.0.0.1:"));

        let stream = tokio::net::TcpStream::connect(running.addr()).await;
        assert!(stream.is_ok());
        drop(stream);
        running.stop().await;
    }
}
