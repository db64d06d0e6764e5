#![forbid(unsafe_code)]

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use renderhive_node::Coordinator;
use renderhive_types::config::NodeConfig;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "renderhive", about = "Renderhive node coordinator")]
struct NodeOpts {
    /// Path to the renderhive.toml configuration file.
    #[arg(long, env = "RENDERHIVE_CONFIG", default_value = "renderhive.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    renderhive_telemetry::init::init_tracing()?;

    std::panic::set_hook(Box::new(|info| {
        eprintln!("RENDERHIVE_PANIC: {info}");
    }));

    let opts = NodeOpts::parse();
    tracing::info!(target: "node", event = "startup", config = ?opts.config);

    let raw = std::fs::read_to_string(&opts.config)
        .with_context(|| format!("reading {}", opts.config.display()))?;
    let config: NodeConfig =
        toml::from_str(&raw).with_context(|| format!("parsing {}", opts.config.display()))?;
    config.validate().map_err(|e| anyhow!(e))?;

    // Initialization failures exit non-zero; after this point errors are
    // surfaced through RPC responses and the log instead.
    let coordinator = Coordinator::start(config)
        .await
        .map_err(|e| anyhow!("initialization failed: {e}"))?;

    tokio::signal::ctrl_c().await?;
    tracing::info!(target: "node", event = "shutdown", reason = "ctrl-c");
    coordinator.stop().await;
    Ok(())
}
