pub(crate) mod auth;
mod handlers;
mod router;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::sync::{broadcast, oneshot};
use tokio_stream::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::info;

use crate::core::executor::Executor;
use crate::core::jobs::JobStore;
use crate::core::lifecycle::LifecycleComponent;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) executor: Executor,
    pub(crate) jobs: JobStore,
    pub(crate) log_tx: broadcast::Sender<String>,
    pub(crate) token: Option<String>,
}

pub struct ExecutionServerConfig {
    pub host: String,
    pub port: u16,
    pub executor: Executor,
    pub jobs: JobStore,
    pub log_tx: broadcast::Sender<String>,
    pub token: Option<String>,
}

/// HTTP front door for the executor and job store.
pub struct ExecutionServer {
    config: ExecutionServerConfig,
    local_addr: Option<SocketAddr>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl ExecutionServer {
    pub fn new(config: ExecutionServerConfig) -> Self {
        Self {
            config,
            local_addr: None,
            shutdown_tx: None,
        }
    }

    /// Bound address, available once started (useful with port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

// --- SSE Logs (used by router) ---

async fn sse_logs_endpoint(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.log_tx.subscribe();
    let stream = BroadcastStream::new(receiver).map(|msg| match msg {
        Ok(log) => Ok(Event::default().data(log)),
        Err(_) => Ok(Event::default().data("Log stream lagged")),
    });

    Sse::new(stream)
}

#[async_trait]
impl LifecycleComponent for ExecutionServer {
    async fn on_init(&mut self) -> Result<()> {
        info!("Execution server initializing...");
        if self.config.token.is_none() {
            tracing::warn!("EXEC_SERVER_TOKEN is not set; the API accepts unauthenticated requests");
        }
        Ok(())
    }

    async fn on_start(&mut self) -> Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))?;
        self.local_addr = listener.local_addr().ok();

        let state = AppState {
            executor: self.config.executor.clone(),
            jobs: self.config.jobs.clone(),
            log_tx: self.config.log_tx.clone(),
            token: self.config.token.clone(),
        };
        let app = router::build_router(state);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        self.shutdown_tx = Some(shutdown_tx);

        info!("Execution server running at http://{addr}");
        tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = serve.await {
                tracing::error!("Execution server crashed: {}", e);
            }
        });
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        info!("Execution server shutting down...");
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::executor::ExecutorConfig;

    #[tokio::test]
    async fn server_binds_and_answers_health() {
        let (log_tx, _) = broadcast::channel(16);
        let mut server = ExecutionServer::new(ExecutionServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            executor: Executor::new(ExecutorConfig::default()),
            jobs: JobStore::new(),
            log_tx,
            token: None,
        });
        server.on_init().await.unwrap();
        server.on_start().await.unwrap();
        let addr = server.local_addr().unwrap();

        let body: serde_json::Value = reqwest::get(format!("http://{}/health", addr))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "healthy");

        server.on_shutdown().await.unwrap();
    }
}
