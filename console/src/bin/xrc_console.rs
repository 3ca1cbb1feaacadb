use anyhow::Context;
use clap::Parser;
use std::sync::{Arc, RwLock};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use xrc_console::{Cli, Console, ENV_LOG, ServiceState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_env(ENV_LOG))
        .with_thread_ids(true)
        .with_target(true)
        .init();

    let cli = Cli::parse();
    let config = xrc_config::Config::load(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;

    let state = Arc::new(RwLock::new(ServiceState::Running));
    {
        let state = state.clone();
        ctrlc::set_handler(move || {
            info!("Stop requested");
            if let Ok(mut inner) = state.write() {
                *inner = ServiceState::RequestToStop;
            }
        })?;
    }

    let console = match Console::start(config) {
        Ok(console) => console,
        Err(e) => {
            error!("Console core failed to start: {e:#}");
            return Err(e);
        }
    };

    while *state.read().unwrap() == ServiceState::Running {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    }

    console.shutdown().await;
    *state.write().unwrap() = ServiceState::Stopped;
    Ok(())
}
