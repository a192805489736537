use anyhow::{Result, anyhow, bail};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Init,
    Starting,
    Ready,
    Shutdown,
}

#[async_trait::async_trait]
pub trait LifecycleComponent {
    async fn on_init(&mut self) -> Result<()> {
        Ok(())
    }
    async fn on_start(&mut self) -> Result<()> {
        Ok(())
    }
    async fn on_shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

pub struct LifecycleManager {
    state: LifecycleState,
    components: Vec<Arc<Mutex<dyn LifecycleComponent + Send + Sync>>>,
    pub scheduler: JobScheduler,
}

impl LifecycleManager {
    pub async fn new() -> Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            state: LifecycleState::Init,
            components: Vec::new(),
            scheduler,
        })
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn attach(&mut self, component: Arc<Mutex<dyn LifecycleComponent + Send + Sync>>) {
        self.components.push(component);
    }

    /// Registers `task` to run every `interval` once the scheduler starts.
    pub async fn every<F, Fut>(&self, name: &str, interval: Duration, task: F) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        if interval.is_zero() {
            bail!("Scheduled job '{}' needs a non-zero interval", name);
        }
        let task = Arc::new(task);
        let job = Job::new_repeated_async(interval, move |_uuid, mut _l| {
            let task = task.clone();
            Box::pin(async move {
                task().await;
            })
        })
        .map_err(|e| anyhow!("Failed to create scheduled job '{}': {}", name, e))?;
        self.scheduler.add(job).await?;
        info!("Scheduled '{}' every {:?}", name, interval);
        Ok(())
    }

    pub async fn start(&mut self) -> Result<()> {
        info!("Lifecycle Phase: Init");
        self.state = LifecycleState::Init;
        for comp in &self.components {
            comp.lock().await.on_init().await?;
        }

        info!("Lifecycle Phase: Starting");
        self.state = LifecycleState::Starting;
        for comp in &self.components {
            comp.lock().await.on_start().await?;
        }

        info!("Lifecycle Phase: Ready (Starting Scheduler)");
        self.scheduler.start().await?;
        self.state = LifecycleState::Ready;

        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        info!("Lifecycle Phase: Shutdown");
        self.state = LifecycleState::Shutdown;

        for comp in &self.components {
            if let Err(e) = comp.lock().await.on_shutdown().await {
                warn!("Component shutdown error: {}", e);
            }
        }
        if let Err(e) = self.scheduler.shutdown().await {
            warn!("Scheduler shutdown error: {}", e);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Probe {
        calls: Vec<&'static str>,
    }

    #[async_trait::async_trait]
    impl LifecycleComponent for Probe {
        async fn on_init(&mut self) -> Result<()> {
            self.calls.push("init");
            Ok(())
        }
        async fn on_start(&mut self) -> Result<()> {
            self.calls.push("start");
            Ok(())
        }
        async fn on_shutdown(&mut self) -> Result<()> {
            self.calls.push("shutdown");
            Ok(())
        }
    }

    #[tokio::test]
    async fn components_see_every_phase_in_order() {
        let probe = Arc::new(Mutex::new(Probe::default()));
        let mut lifecycle = LifecycleManager::new().await.unwrap();
        lifecycle.attach(probe.clone());

        lifecycle.start().await.unwrap();
        assert_eq!(lifecycle.state(), LifecycleState::Ready);
        lifecycle.shutdown().await.unwrap();
        assert_eq!(lifecycle.state(), LifecycleState::Shutdown);

        assert_eq!(probe.lock().await.calls, ["init", "start", "shutdown"]);
    }

    #[tokio::test]
    async fn zero_interval_job_is_rejected() {
        let lifecycle = LifecycleManager::new().await.unwrap();
        let err = lifecycle
            .every("broken", Duration::ZERO, || async {})
            .await
            .unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[tokio::test]
    async fn repeated_job_fires_after_start() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut lifecycle = LifecycleManager::new().await.unwrap();
        let counter = hits.clone();
        lifecycle
            .every("probe", Duration::from_secs(1), move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await
            .unwrap();

        lifecycle.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        lifecycle.shutdown().await.unwrap();
        assert!(hits.load(Ordering::SeqCst) >= 1);
    }
}
