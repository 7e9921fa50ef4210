pub mod tasks;

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::info;

/// Cron jobs that run alongside the relay
pub struct Scheduler {
    inner: JobScheduler,
}

impl Scheduler {
    pub async fn new() -> Result<Self> {
        let inner = JobScheduler::new()
            .await
            .context("Failed to create job scheduler")?;
        Ok(Self { inner })
    }

    pub async fn add(&self, name: &str, job: Job) -> Result<()> {
        self.inner
            .add(job)
            .await
            .with_context(|| format!("Failed to add job: {}", name))?;
        Ok(())
    }

    pub async fn start(&self) -> Result<()> {
        self.inner.start().await.context("Failed to start scheduler")
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner
            .shutdown()
            .await
            .context("Failed to shutdown scheduler")?;
        info!("Scheduler stopped");
        Ok(())
    }
}
