use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use tidemill_core::adapter::{GeneratorInputAdapter, LogOutputAdapter};
use tidemill_core::checkpoint::{CheckpointStore, FsCheckpointStore, InMemoryCheckpointStore};
use tidemill_core::cluster::LocalCluster;
use tidemill_core::config::{HeartbeatConfig, MasterConfig, WindowConfig};
use tidemill_core::graph::{InputAdapterDef, OperatorDef, OperatorGraph, OutputAdapterDef};
use tidemill_core::master::{JobState, Master};
use tidemill_core::operator::{CounterOperator, EchoOperator};
use tidemill_core::registry::ComponentRegistry;
use tidemill_core::types::StreamLocality;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tidemill")]
#[command(about = "Tidemill windowed stream processing", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the demo graph (generator -> echo -> counter -> log) in-process.
    Run {
        #[arg(long, default_value_t = 2)]
        containers: usize,
        #[arg(long, default_value_t = 10)]
        windows: u64,
        #[arg(long, default_value_t = 200)]
        window_ms: u64,
        #[arg(long, default_value_t = 100)]
        heartbeat_interval_ms: u64,
        #[arg(long, default_value_t = 5)]
        tuples_per_window: u64,
        /// Request a checkpoint of every container each N windows.
        #[arg(long, default_value_t = 2)]
        checkpoint_every: u64,
        /// Kill the container hosting the counter once it passed this window.
        #[arg(long)]
        fail_after_windows: Option<u64>,
        /// Persist checkpoints here instead of in memory.
        #[arg(long)]
        checkpoint_dir: Option<PathBuf>,
        #[arg(long, default_value_t = 3)]
        retained: usize,
        /// Also accept container heartbeats over TCP on this address.
        #[arg(long)]
        listen: Option<SocketAddr>,
    },
    /// List checkpoints stored in a checkpoint directory.
    Checkpoints {
        #[arg(long)]
        dir: PathBuf,
        #[arg(long)]
        operator: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            containers,
            windows,
            window_ms,
            heartbeat_interval_ms,
            tuples_per_window,
            checkpoint_every,
            fail_after_windows,
            checkpoint_dir,
            retained,
            listen,
        } => {
            let store: Arc<dyn CheckpointStore> = match checkpoint_dir {
                Some(dir) => Arc::new(
                    FsCheckpointStore::new(&dir, retained)
                        .with_context(|| format!("open checkpoint dir {}", dir.display()))?,
                ),
                None => Arc::new(InMemoryCheckpointStore::new(retained)),
            };
            let config = MasterConfig::default()
                .with_num_containers(containers)
                .with_window(WindowConfig::periodic(Duration::from_millis(window_ms)))
                .with_heartbeat(
                    HeartbeatConfig::default()
                        .with_interval(Duration::from_millis(heartbeat_interval_ms)),
                );
            let master = Arc::new(Master::new(config, Arc::clone(&store)));
            let launched = master.launch(demo_graph(tuples_per_window))?;
            println!("launched {} containers", launched.len());

            if let Some(addr) = listen {
                let master = Arc::clone(&master);
                tokio::spawn(async move {
                    if let Err(e) = master.serve(addr).await {
                        tracing::error!("heartbeat listener stopped: {:#}", e);
                    }
                });
            }

            let cluster = Arc::new(LocalCluster::new(
                Arc::clone(&master),
                ComponentRegistry::with_builtins(),
                store,
            ));
            cluster.provision_pending();
            let (shutdown, supervisor) = Arc::clone(&cluster).spawn_supervisor();

            run_demo(&cluster, windows, checkpoint_every, fail_after_windows).await?;

            master.shutdown_graph()?;
            let deadline = Instant::now() + Duration::from_millis(window_ms * 4 + 2000);
            while master.job_state() != JobState::Finished && Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(heartbeat_interval_ms)).await;
            }
            let _ = shutdown.send(true);
            let _ = supervisor.await;
            cluster.stop_all();

            println!("job state: {:?}", master.job_state());
            for summary in master.containers() {
                println!(
                    "container={} epoch={} state={:?} start={} operators={:?}",
                    summary.id,
                    summary.epoch,
                    summary.state,
                    summary.starting_window,
                    summary.operators
                );
            }
        }
        Commands::Checkpoints { dir, operator } => {
            let store = FsCheckpointStore::new(&dir, usize::MAX)
                .with_context(|| format!("open checkpoint dir {}", dir.display()))?;
            let operators = match operator {
                Some(operator) => vec![operator],
                None => store.operators()?,
            };
            for operator in operators {
                let windows = store.windows(&operator)?;
                println!("operator={} windows={:?}", operator, windows);
                if let Some(&latest) = windows.last() {
                    let record = store.get(&operator, latest)?;
                    println!(
                        "  latest window={} epoch={} bytes={} written_ms={}",
                        record.window,
                        record.epoch,
                        record.blob.len(),
                        record.timestamp_ms
                    );
                }
            }
        }
    }
    Ok(())
}

fn demo_graph(tuples_per_window: u64) -> OperatorGraph {
    OperatorGraph::new()
        .operator(OperatorDef::new("echo", EchoOperator::KIND))
        .operator(OperatorDef::new("counter", CounterOperator::KIND))
        .stream("echo-counter", "echo", "counter", StreamLocality::Networked)
        .input(
            InputAdapterDef::new("generator", GeneratorInputAdapter::KIND, "echo")
                .with_property("tuples_per_window", tuples_per_window.to_string()),
        )
        .output(OutputAdapterDef::new("log", LogOutputAdapter::KIND, "counter"))
}

/// Drive checkpoints (and the optional injected failure) until the counter
/// passed `windows`.
async fn run_demo(
    cluster: &LocalCluster,
    windows: u64,
    checkpoint_every: u64,
    fail_after_windows: Option<u64>,
) -> anyhow::Result<()> {
    let master = cluster.master();
    let poll = master.config().heartbeat.interval;
    let mut next_checkpoint = checkpoint_every.max(1);
    let mut failed = false;
    loop {
        tokio::time::sleep(poll).await;
        if master.job_state() == JobState::Failed {
            return Err(anyhow!("job failed"));
        }
        let Some(status) = master.operator_status("counter") else {
            continue;
        };
        if status.current_window >= next_checkpoint {
            for summary in master.containers() {
                if master.request_container_checkpoint(&summary.id).is_ok() {
                    tracing::debug!("checkpoint requested for {}", summary.id);
                }
            }
            next_checkpoint = status.current_window + checkpoint_every.max(1);
        }
        if let Some(limit) = fail_after_windows
            && !failed
            && status.current_window >= limit
            && let Some(container) = master.container_for("counter")
        {
            println!("killing {} after window {}", container, status.current_window);
            cluster.kill_container(&container);
            failed = true;
        }
        if status.current_window >= windows {
            return Ok(());
        }
    }
}
