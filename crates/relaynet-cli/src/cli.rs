//! Clap CLI definitions for relaynet.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
\x1b[1;36mExamples:\x1b[0m
  relaynet listen                           Echo everything sent to the configured address
  relaynet listen --bind 0.0.0.0:7400       Echo on all interfaces
  relaynet send --peer 127.0.0.1:7400 --text hello
  relaynet ping --peer 127.0.0.1:7400 --count 5";

/// relaynet: typed messages between named peers.
#[derive(Parser, Debug)]
#[command(name = "relaynet", version, after_help = AFTER_HELP)]
pub struct Cli {
    /// Path to config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Host name, overriding the config file.
    #[arg(long, global = true)]
    pub name: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Accept connections and echo every message back to its sender.
    Listen {
        /// Address to bind (defaults to `listen_addr` from the config).
        #[arg(long)]
        bind: Option<String>,
    },
    /// Send chat messages to a peer and print the echoes.
    Send {
        /// Peer address, e.g. 127.0.0.1:7400.
        #[arg(long)]
        peer: String,
        /// Message text.
        #[arg(long)]
        text: String,
        /// Number of times to send it.
        #[arg(long, default_value_t = 1)]
        count: u32,
    },
    /// Measure round-trip time to an echoing peer.
    Ping {
        /// Peer address, e.g. 127.0.0.1:7400.
        #[arg(long)]
        peer: String,
        /// Number of pings.
        #[arg(long, default_value_t = 4)]
        count: u32,
    },
}
