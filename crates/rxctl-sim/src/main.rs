//! Simulated Receiver
//!
//! Serves a simulated multi-channel receiver on a UDP port so controller
//! clients can be developed and tested without hardware.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use rxctl_sim::{spawn_sim, SimConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "rxctl-sim")]
#[command(about = "Simulated multi-channel receiver speaking the rxctl UDP protocol")]
struct Cli {
    /// Address to listen on
    #[arg(short = 'b', long, default_value = "127.0.0.1:8617")]
    bind: SocketAddr,

    /// JSON file with a SimConfig; command-line flags override it
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Number of wideband receivers
    #[arg(long)]
    receivers: Option<u32>,

    /// Number of narrowband DDCs
    #[arg(long)]
    nbddcs: Option<u32>,

    /// Number of software DDCs
    #[arg(long)]
    swddcs: Option<u32>,

    /// Number of outputs
    #[arg(long)]
    outputs: Option<u32>,

    /// Batch filename reported to clients (selects the mapping version)
    #[arg(long)]
    batch: Option<String>,

    /// Start with echo disabled
    #[arg(long)]
    no_echo: bool,
}

fn load_config(cli: &Cli) -> anyhow::Result<SimConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => SimConfig::default(),
    };
    if let Some(n) = cli.receivers {
        config.wide_receivers = n;
    }
    if let Some(n) = cli.nbddcs {
        config.nbddcs = n;
    }
    if let Some(n) = cli.swddcs {
        config.swddcs = n;
    }
    if let Some(n) = cli.outputs {
        config.outputs = n;
    }
    if let Some(batch) = &cli.batch {
        config.batch = batch.clone();
    }
    if cli.no_echo {
        config.echo = false;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "rxctl_sim=info,rxctl_core=info,rxctl_protocol=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    tracing::info!(
        "Starting simulated {} ({} receivers, {} NBDDCs, {} outputs)",
        config.model,
        config.wide_receivers + config.serial_receivers,
        config.nbddcs,
        config.outputs
    );

    let sim = spawn_sim(config, cli.bind)
        .await
        .with_context(|| format!("binding {}", cli.bind))?;
    tracing::info!("Listening on {}", sim.addr());

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    tracing::info!("Shutting down");
    sim.shutdown().await?;
    Ok(())
}
