use anyhow::Result;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};

use crate::core::config::ServerSettings;
use crate::core::executor::Executor;
use crate::core::jobs::{JobStore, schedule_sweep};
use crate::core::lifecycle::LifecycleManager;
use crate::core::terminal::GuideSection;
use crate::interfaces::web::{ExecutionServer, ExecutionServerConfig};

pub async fn run(settings: ServerSettings, log_tx: broadcast::Sender<String>) -> Result<()> {
    let executor = Executor::new(settings.executor.clone());
    let jobs = JobStore::new();

    let mut lifecycle = LifecycleManager::new().await?;
    schedule_sweep(&lifecycle, &jobs, settings.sweep_interval, settings.job_retention).await?;

    let server = Arc::new(Mutex::new(ExecutionServer::new(ExecutionServerConfig {
        host: settings.host.clone(),
        port: settings.port,
        executor,
        jobs,
        log_tx,
        token: settings.token.clone(),
    })));
    lifecycle.attach(server.clone());
    lifecycle.start().await?;

    let addr = server
        .lock()
        .await
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|| format!("{}:{}", settings.host, settings.port));
    let command_line = std::iter::once(settings.executor.program.as_str())
        .chain(settings.executor.args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ");

    let mut summary = GuideSection::new("Execution Server")
        .status("Listening", &addr)
        .status("Command", &command_line)
        .status(
            "Run as",
            settings.executor.run_as.as_deref().unwrap_or("(current user)"),
        )
        .status("Timeout", &format!("{}s", settings.executor.timeout.as_secs()));
    summary = match &settings.token {
        Some(_) => summary.info("Bearer token required for everything except /health"),
        None => summary.warn("No EXEC_SERVER_TOKEN set; endpoints are unauthenticated"),
    };
    summary.blank().text("Press Ctrl+C to stop.").print();

    tokio::signal::ctrl_c().await?;
    lifecycle.shutdown().await
}
