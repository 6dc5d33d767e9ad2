//! Cluster master CLI.
//!
//! Forks one worker per core running the given command (the bundled
//! `clustervisor-worker` by default) and supervises the pool until SIGINT.
//!
//! ```text
//! clustervisor [OPTIONS] [-- <COMMAND> [ARGS]...]
//! clustervisor --workers 4 --auto-reload --watch ./src -- node app.js
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use clustervisor::{
    BackoffPolicy, ClusterConfig, ClusterMaster, CommandSpawner, LogWriter, Subscribe,
};

#[derive(Parser, Debug)]
#[command(name = "clustervisor", version, about = "Supervise a pool of worker processes")]
struct Args {
    /// Number of workers (default: one per core, 2 under CI).
    #[arg(long, env = "CLUSTER_WORKERS")]
    workers: Option<usize>,

    /// Milliseconds to wait after SIGINT before escalating to SIGTERM.
    #[arg(long, env = "CLUSTER_SIGINT_TIMEOUT_MS", default_value_t = 5000)]
    sigint_timeout_ms: u64,

    /// Milliseconds to wait after SIGTERM before escalating to SIGKILL.
    #[arg(long, env = "CLUSTER_SIGTERM_TIMEOUT_MS", default_value_t = 5000)]
    sigterm_timeout_ms: u64,

    /// Milliseconds to wait after SIGKILL before giving up.
    #[arg(long, env = "CLUSTER_SIGKILL_TIMEOUT_MS", default_value_t = 5000)]
    sigkill_timeout_ms: u64,

    /// First respawn delay after a crash, in milliseconds (0 disables backoff).
    #[arg(long, env = "CLUSTER_RESPAWN_DELAY_MS", default_value_t = 100)]
    respawn_delay_ms: u64,

    /// Reload workers when watched files change.
    #[arg(long, env = "CLUSTER_AUTO_RELOAD")]
    auto_reload: bool,

    /// Paths to watch when auto-reload is on.
    #[arg(long = "watch", value_name = "PATH")]
    watch_paths: Vec<PathBuf>,

    /// Changes to this file shut the whole cluster down for a restart.
    #[arg(long, value_name = "PATH")]
    master_file: Option<PathBuf>,

    /// Worker command and its arguments.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

impl Args {
    fn config(&self) -> ClusterConfig {
        let respawn_backoff = if self.respawn_delay_ms == 0 {
            BackoffPolicy::none()
        } else {
            BackoffPolicy {
                first: Duration::from_millis(self.respawn_delay_ms),
                ..BackoffPolicy::default()
            }
        };
        ClusterConfig {
            workers: self.workers,
            sigint_timeout: Duration::from_millis(self.sigint_timeout_ms),
            sigterm_timeout: Duration::from_millis(self.sigterm_timeout_ms),
            sigkill_timeout: Duration::from_millis(self.sigkill_timeout_ms),
            respawn_backoff,
            auto_reload: self.auto_reload,
            watch_paths: self.watch_paths.clone(),
            master_file: self.master_file.clone(),
            ..ClusterConfig::default()
        }
    }

    fn spawner(&self) -> Result<CommandSpawner> {
        match self.command.split_first() {
            Some((program, args)) => Ok(CommandSpawner::new(program).args(args.iter().cloned())),
            None => {
                let exe = std::env::current_exe().context("locating own executable")?;
                let worker = exe.with_file_name(format!(
                    "clustervisor-worker{}",
                    std::env::consts::EXE_SUFFIX
                ));
                Ok(CommandSpawner::new(worker))
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let cfg = args.config();
    let spawner = Arc::new(args.spawner()?);

    info!(
        workers = cfg.worker_count(),
        auto_reload = cfg.auto_reload,
        "starting cluster master"
    );

    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
    let master = ClusterMaster::builder(cfg, spawner)
        .with_subscribers(subs)
        .build();

    master.run().await.context("cluster master failed")?;
    Ok(())
}
