//! corral demo
//!
//! Drives a simulated workload through the scheduler: registers the
//! configured resources, submits the configured task batches (half
//! before start, half after), then stops and reports what ran.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

use corral_core::{
    BatchSettings, Container, ContainerType, CorralError, TaskFn, TaskRef, WorkloadConfig,
};
use corral_scheduler::Scheduler;

/// corral demo - run a simulated workload against capacity-limited resources
#[derive(Parser, Debug)]
#[command(name = "corral-demo")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to a TOML workload config (built-in workload when omitted)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")?;

    info!("Starting corral demo v{}", env!("CARGO_PKG_VERSION"));

    let config = match &args.config {
        Some(path) => WorkloadConfig::from_file(path)
            .with_context(|| format!("Failed to load workload config {}", path.display()))?,
        None => WorkloadConfig::default(),
    };

    let types: HashMap<u32, ContainerType> = config
        .container_types
        .iter()
        .map(|t| (t.id, t.to_container_type()))
        .collect();

    let scheduler = Scheduler::new();
    for settings in &config.resources {
        let resource = settings.to_resource();
        info!(resource = %resource.name, cores = resource.cores, "Registering resource");
        scheduler.add_resource(resource).await;
    }

    let executed = Arc::new(AtomicUsize::new(0));
    let mut submitted = 0usize;

    // Submission straddles start(), as the scheduler allows both.
    let (before, after) = config.batches.split_at(config.batches.len() / 2);

    for batch in before {
        submitted += submit_batch(&scheduler, &types, batch, &executed).await?;
    }
    scheduler
        .start()
        .await
        .context("Failed to start scheduler")?;
    for batch in after {
        submitted += submit_batch(&scheduler, &types, batch, &executed).await?;
    }

    info!(
        submitted,
        waiting = scheduler.waiting_tasks().await,
        running = scheduler.running_tasks().await,
        "Workload submitted, draining"
    );
    scheduler.stop().await;

    info!(
        submitted,
        executed = executed.load(Ordering::SeqCst),
        "Workload drained"
    );
    Ok(())
}

/// Submit one batch of identical sleeping tasks.
async fn submit_batch(
    scheduler: &Scheduler,
    types: &HashMap<u32, ContainerType>,
    batch: &BatchSettings,
    executed: &Arc<AtomicUsize>,
) -> anyhow::Result<usize> {
    let Some(ctype) = types.get(&batch.container_type) else {
        bail!("Batch references unknown container type {}", batch.container_type);
    };

    let duration = Duration::from_millis(batch.duration_ms);
    for _ in 0..batch.count {
        let executed = executed.clone();
        let task: TaskRef = TaskFn::arc(ctype.clone(), move |c: Container| {
            let executed = executed.clone();
            async move {
                debug!(container = %c, "Task running");
                tokio::time::sleep(duration).await;
                executed.fetch_add(1, Ordering::SeqCst);
                Ok::<(), CorralError>(())
            }
        });
        scheduler.add_task(task).await;
    }

    info!(
        container_type = %ctype.name,
        count = batch.count,
        duration_ms = batch.duration_ms,
        "Batch submitted"
    );
    Ok(batch.count as usize)
}
