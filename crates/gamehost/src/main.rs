//! gamehost - container-backed game server host daemon.
//!
//! Reads operator commands line by line from stdin, serializes them through
//! the command queue, and drives the server fleet. Containers are managed
//! through the local Docker or Podman CLI.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default config (~/.config/gamehost/config.toml)
//! gamehost
//!
//! # Run with a custom config file
//! gamehost --config /etc/gamehost/config.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

use gamehost::command::{CommandQueue, CommandRouter};
use gamehost::config::AppConfig;
use gamehost::container::ContainerRuntime;
use gamehost::server::ServerManager;

#[derive(Parser, Debug)]
#[command(name = "gamehost", about = "Container-backed game server host")]
struct Args {
    /// Path to config file.
    /// Defaults to ~/.config/gamehost/config.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let config = AppConfig::load(args.config.as_deref())?;

    let runtime = match config.daemon.runtime {
        Some(runtime_type) => ContainerRuntime::with_type(runtime_type),
        None => ContainerRuntime::new(),
    };
    match runtime.health_check().await {
        Ok(_) => info!("container runtime '{}' is available", runtime.runtime_type()),
        Err(e) => warn!(
            "container runtime '{}' not reachable yet: {}",
            runtime.runtime_type(),
            e
        ),
    }

    let manager = Arc::new(ServerManager::new(
        Arc::new(runtime),
        config.scripts_dir(),
    ));
    manager.attach_configured(&config.servers).await;

    let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
    let router = Arc::new(CommandRouter::new(Arc::clone(&manager), shutdown_tx));

    let queue = CommandQueue::new(move |line| {
        let router = Arc::clone(&router);
        async move {
            let reply = router.dispatch(&line).await;
            if !reply.is_empty() {
                println!("{}", reply);
            }
        }
    });

    info!("gamehost ready; reading commands from stdin");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if queue.push(line).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!("failed to read command input: {}", e);
                    break;
                }
            },
        }
    }

    // Let already-accepted commands finish, then release session state.
    // Containers keep running across a daemon restart.
    queue.shutdown().await;
    manager.shutdown().await;
    info!("gamehost stopped");
    Ok(())
}
