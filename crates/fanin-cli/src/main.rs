use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use rand::Rng;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use fanin_core::app::{RetryPolicy, TrackerBuilder, TrackerConfig};
use fanin_core::domain::{JobId, JobRecord, TaskHandle};
use fanin_core::impls::InMemoryJobStore;
use fanin_core::Tracker;

#[derive(Debug, Parser)]
#[command(name = "fanin", about = "Completion tracking for fan-out task trees")]
struct Cli {
    /// Collection that holds the job records
    #[arg(long, env = "FANIN_NAMESPACE", default_value = "faas_job")]
    namespace: String,

    /// Attempts per store transaction before giving up
    #[arg(long, env = "FANIN_MAX_ATTEMPTS", default_value_t = 50)]
    max_attempts: u32,

    /// First retry delay in milliseconds
    #[arg(long, env = "FANIN_BASE_DELAY_MS", default_value_t = 2)]
    base_delay_ms: u64,

    /// Upper bound of a retry delay in milliseconds
    #[arg(long, env = "FANIN_MAX_DELAY_MS", default_value_t = 200)]
    max_delay_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a random fan-out tree of concurrent tasks and report when it completes
    Simulate {
        /// Maximum depth below the root
        #[arg(long, default_value_t = 3)]
        depth: u32,

        /// Maximum children a single task may start
        #[arg(long, default_value_t = 4)]
        max_fanout: u32,

        /// Maximum simulated work per task in milliseconds
        #[arg(long, default_value_t = 20)]
        max_work_ms: u64,

        /// Give up waiting after this many seconds
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
    },

    /// Print the job record after every step of a one-level fan-out
    Walkthrough,
}

impl Cli {
    fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig::new(self.namespace.clone()).with_retry(RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            ..RetryPolicy::default()
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let store = InMemoryJobStore::new();
    let tracker = TrackerBuilder::new(cli.tracker_config())
        .store(store)
        .build()
        .context("building tracker")?;

    match cli.command {
        Command::Simulate {
            depth,
            max_fanout,
            max_work_ms,
            timeout_secs,
        } => {
            simulate(
                &tracker,
                Shape {
                    depth,
                    max_fanout,
                    max_work: Duration::from_millis(max_work_ms),
                },
                Duration::from_secs(timeout_secs),
            )
            .await
        }
        Command::Walkthrough => walkthrough(&tracker).await,
    }
}

#[derive(Debug, Clone, Copy)]
struct Shape {
    depth: u32,
    max_fanout: u32,
    max_work: Duration,
}

#[derive(Debug, Serialize)]
struct SimulationReport {
    job_id: JobId,
    total_tasks: u64,
    ended_tasks: u64,
    is_complete: bool,
    start_date: i64,
    end_date: Option<i64>,
    elapsed_ms: u128,
}

async fn simulate(tracker: &Tracker, shape: Shape, timeout: Duration) -> anyhow::Result<()> {
    let started = Instant::now();
    let root = tracker.attach_root().await.context("attaching root task")?;
    let job_id = root.job_id();
    tokio::spawn(task(tracker.clone(), root, shape.depth, shape));

    let record = loop {
        let record = tracker.record(job_id).await?;
        if record.is_complete() {
            break record;
        }
        if started.elapsed() > timeout {
            bail!("job {job_id} did not complete within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };

    let report = SimulationReport {
        job_id,
        total_tasks: record.total_tasks,
        ended_tasks: record.ended_tasks,
        is_complete: record.is_complete(),
        start_date: record.start_date,
        end_date: record.end_date,
        elapsed_ms: started.elapsed().as_millis(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// One simulated task: start children, do some work, detach without waiting for the children.
fn task(
    tracker: Tracker,
    mut handle: TaskHandle,
    remaining_depth: u32,
    shape: Shape,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        let (fanout, work) = {
            let mut rng = rand::thread_rng();
            let fanout = if remaining_depth == 0 {
                0
            } else {
                rng.gen_range(0..=shape.max_fanout)
            };
            let work_ms = rng.gen_range(0..=shape.max_work.as_millis() as u64);
            (fanout, Duration::from_millis(work_ms))
        };

        for _ in 0..fanout {
            let job_id = handle.spawn_child();
            let tracker = tracker.clone();
            tokio::spawn(async move {
                match tracker.attach_child(job_id).await {
                    Ok(child) => task(tracker, child, remaining_depth - 1, shape).await,
                    Err(err) => tracing::error!(job_id = %job_id, error = %err, "child failed to attach"),
                }
            });
        }
        tokio::time::sleep(work).await;

        let job_id = handle.job_id();
        if let Err(err) = tracker.detach(handle).await {
            tracing::error!(job_id = %job_id, error = %err, "detach failed; job may be stuck");
        }
    })
}

async fn walkthrough(tracker: &Tracker) -> anyhow::Result<()> {
    fn show(step: &str, record: &JobRecord) -> anyhow::Result<()> {
        println!("{step:<28} {}", serde_json::to_string(record)?);
        Ok(())
    }

    let mut root = tracker.attach_root().await?;
    let job_id = root.job_id();
    show("attach_root", &tracker.record(job_id).await?)?;

    let first = tracker.attach_child(root.spawn_child()).await?;
    show("attach_child", &tracker.record(job_id).await?)?;
    let second = tracker.attach_child(root.spawn_child()).await?;
    show("attach_child", &tracker.record(job_id).await?)?;

    tracker.detach(root).await?;
    show("detach root (2 children)", &tracker.record(job_id).await?)?;
    tracker.detach(first).await?;
    show("detach child", &tracker.record(job_id).await?)?;
    let status = tracker.detach(second).await?;
    show("detach child", &tracker.record(job_id).await?)?;

    if !status.is_complete {
        bail!("job {job_id} should be complete after the last detach");
    }
    Ok(())
}
