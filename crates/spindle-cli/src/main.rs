//! spindle: demo driver for spindle-core.
//!
//! Registers the demo handlers, submits a mixed batch of tasks, polls each
//! one to a terminal state and prints the snapshots and scheduler metrics as
//! JSON.

mod handlers;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde_json::json;
use tracing::{info, warn};

use spindle_core::{Params, Priority, Scheduler, SchedulerConfig, TaskId, TaskRoutes};

use crate::handlers::{DefiHandler, PingHandler};

/// Run a batch of demo tasks through the scheduler.
#[derive(Parser, Debug)]
#[command(name = "spindle", version, about)]
struct Cli {
    /// JSON file with a SchedulerConfig. Missing fields take their defaults.
    #[arg(long, env = "SPINDLE_CONFIG")]
    config: Option<PathBuf>,

    /// Worker count (0 = available parallelism). Overrides the config file.
    #[arg(long, env = "SPINDLE_WORKERS")]
    workers: Option<usize>,

    /// Per-task execution limit in milliseconds. Overrides the config file.
    #[arg(long, env = "SPINDLE_TASK_TIMEOUT_MS")]
    task_timeout_ms: Option<u64>,

    /// Priority for the ping tasks.
    #[arg(long, default_value = "medium")]
    priority: Priority,

    /// Number of ping tasks to submit alongside the defi batch.
    #[arg(long, default_value_t = 3)]
    pings: usize,

    /// Status poll interval in milliseconds.
    #[arg(long, default_value_t = 50)]
    poll_interval_ms: u64,
}

impl Cli {
    fn scheduler_config(&self) -> anyhow::Result<SchedulerConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("invalid scheduler config in {}", path.display()))?
            }
            None => SchedulerConfig::default(),
        };
        if let Some(workers) = self.workers {
            config.max_concurrent = workers;
        }
        if self.task_timeout_ms.is_some() {
            config.task_timeout_ms = self.task_timeout_ms;
        }
        Ok(config)
    }
}

fn protocol(name: &str) -> Params {
    let mut params = Params::new();
    params.insert("protocol".into(), json!(name));
    params
}

/// Submit the demo batch. Returns ids in submission order.
fn submit_batch(scheduler: &Scheduler, cli: &Cli) -> anyhow::Result<Vec<TaskId>> {
    let mut ids = vec![
        scheduler.submit("defi.protocol_metrics", protocol("uniswap_v3"), Priority::High)?,
        scheduler.submit("defi.protocol_metrics", protocol("aave_v3"), Priority::Low)?,
        scheduler.submit("defi.yield_opportunities", Params::new(), Priority::Critical)?,
        scheduler.submit("defi.health", Params::new(), Priority::Medium)?,
        scheduler.submit("defi.protocol_metrics", protocol("unlisted"), Priority::Medium)?,
        scheduler.submit("nft.floor_price", Params::new(), Priority::Low)?,
    ];
    for _ in 0..cli.pings {
        ids.push(scheduler.submit("ping", Params::new(), cli.priority)?);
    }
    Ok(ids)
}

async fn wait_all(scheduler: &Scheduler, ids: &[TaskId], poll: Duration) {
    loop {
        let remaining = ids
            .iter()
            .filter(|id| !scheduler.get_status(**id).is_some_and(|t| t.is_terminal()))
            .count();
        if remaining == 0 {
            return;
        }
        tokio::time::sleep(poll).await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.scheduler_config()?;
    info!(?config, "starting spindle demo");

    let scheduler = Scheduler::builder()
        .config(config)
        .handler("ping", TaskRoutes::exact(["ping"]), Arc::new(PingHandler))
        .handler("defi", TaskRoutes::Capabilities, Arc::new(DefiHandler::new()))
        .expect_task_types(&["ping", "defi.protocol_metrics", "defi.yield_opportunities"])
        .build()
        .await
        .context("failed to build scheduler")?;

    let ids = submit_batch(&scheduler, &cli)?;
    println!("{}", serde_json::to_string_pretty(&scheduler.get_metrics())?);

    scheduler.start().await?;

    let poll = Duration::from_millis(cli.poll_interval_ms);
    tokio::select! {
        _ = wait_all(&scheduler, &ids, poll) => {}
        _ = tokio::signal::ctrl_c() => warn!("interrupted; stopping early"),
    }

    let report = scheduler.stop().await;

    for id in &ids {
        if let Some(task) = scheduler.get_status(*id) {
            println!("{}", serde_json::to_string_pretty(&task)?);
        }
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "metrics": scheduler.get_metrics(),
            "handlers": scheduler.handler_stats(),
            "stop": report,
        }))?
    );
    Ok(())
}
