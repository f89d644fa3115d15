//! relaynet CLI: run an echo host, send chat messages, or ping a peer.

mod cli;
mod cmd;
mod shapes;
mod ui;

use crate::cli::{Cli, Commands};
use crate::cmd::CmdResult;
use clap::Parser;
use relaynet_types::{try_load_config, NetworkConfig};
use relaynet_wire::{Host, TypeRegistry};

fn init_tracing_stderr() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn build_host(config: NetworkConfig) -> Result<Host, Box<dyn std::error::Error>> {
    let registry = TypeRegistry::with_suite(config.suite.into());
    shapes::register_shapes(&registry)?;
    Ok(Host::with_registry(config, registry))
}

fn run(cli: Cli) -> CmdResult {
    let mut config = try_load_config(cli.config.as_deref())?;
    if let Some(name) = cli.name {
        config.name = name;
    }
    config.validate()?;

    let host = build_host(config)?;
    let rt = tokio::runtime::Runtime::new()?;

    rt.block_on(async {
        match cli.command {
            Commands::Listen { bind } => {
                let bind = bind.unwrap_or_else(|| host.config().listen_addr.clone());
                cmd::cmd_listen(&host, &bind).await
            }
            Commands::Send { peer, text, count } => {
                cmd::cmd_send(&host, &peer, &text, count).await
            }
            Commands::Ping { peer, count } => cmd::cmd_ping(&host, &peer, count).await,
        }
    })
}

fn main() {
    let cli = Cli::parse();
    init_tracing_stderr();

    if let Err(e) = run(cli) {
        ui::error(&e.to_string());
        std::process::exit(1);
    }
}
