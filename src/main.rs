#![deny(dead_code)]
#![warn(unused_imports)]
#![warn(unused_variables)]

mod cli;

use clap::Parser;
use cli::{Cli, Command};
use gitvista::config::ManagerConfig;
use gitvista::RepoManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .or_else(|| std::env::var("GITVISTA_CONFIG").ok().map(std::path::PathBuf::from));
    let config = ManagerConfig::load(config_path.as_deref())?;

    let manager = RepoManager::new(config).await?;
    let result = run_command(&manager, cli.command).await;
    manager.close().await;
    result
}

async fn run_command(manager: &RepoManager, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Add { url } => {
            let id = manager.add(&url).await?;
            println!("{id}");
        }
        Command::List => {
            for info in manager.list().await {
                println!(
                    "{}\t{}\t{}\t{}",
                    info.id, info.state, info.original_url, info.error_message
                );
            }
        }
        Command::Status { id } => {
            let status = manager.status(&id).await?;
            println!(
                "state={} progress={}% phase={} error={}",
                status.state, status.progress.percent, status.progress.phase, status.error_message
            );
        }
        Command::Remove { id } => {
            manager.remove(&id).await?;
            println!("removed {id}");
        }
        Command::Watch { url } => {
            let id = manager.add(&url).await?;
            println!("watching {id}");
            let (mut rx, _unsubscribe) = manager.subscribe_progress(&id).await;
            loop {
                if rx.changed().await.is_err() {
                    break;
                }
                let update = rx.borrow().clone();
                println!("{}% {}", update.percent, update.phase);
                if update.done {
                    if let Some(error) = update.error {
                        anyhow::bail!("clone failed: {error}");
                    }
                    break;
                }
            }
        }
        Command::Serve => {
            println!("gitvista manager running. Press Ctrl-C to stop.");
            tokio::signal::ctrl_c().await?;
        }
    }
    Ok(())
}
