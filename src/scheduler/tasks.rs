use std::sync::Arc;

use anyhow::Context;
use tokio_cron_scheduler::Job;
use tracing::info;

use crate::scheduler::Scheduler;
use crate::stats::RelayStats;

/// Log relay counters on `cron_expr` (six fields, seconds first).
pub async fn register_heartbeat(
    scheduler: &Scheduler,
    cron_expr: &str,
    stats: Arc<RelayStats>,
) -> anyhow::Result<()> {
    let job = Job::new_async(cron_expr, move |_uuid, _lock| {
        let stats = Arc::clone(&stats);
        Box::pin(async move {
            info!("Heartbeat: relay is alive ({})", stats.snapshot());
        })
    })
    .with_context(|| format!("Invalid heartbeat cron expression: {}", cron_expr))?;

    scheduler.add("heartbeat", job).await?;
    info!("Heartbeat scheduled with cron: {}", cron_expr);
    Ok(())
}
