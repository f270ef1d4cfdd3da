//! Convoy CLI definitions.

use clap::{Args, Parser, Subcommand};

/// Convoy - peer connection manager
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct ConvoyCli {
    /// Tracing filter, e.g. `info` or `convoy=debug`.
    #[arg(long, global = true, default_value = "info")]
    pub log: String,

    #[command(subcommand)]
    pub command: ConvoyCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConvoyCommand {
    /// Run the connection manager against an in-memory network.
    Run(RunArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Full-relay outbound connection target.
    #[arg(long, default_value_t = 8)]
    pub max_full_relay: usize,

    /// Block-relay-only outbound connection target.
    #[arg(long, default_value_t = 2)]
    pub max_block_relay: usize,

    /// Quorum outbound connection target.
    #[arg(long, default_value_t = 4)]
    pub max_quorum: usize,

    /// Synthetic address book entries to seed.
    #[arg(long, default_value_t = 64)]
    pub peers: usize,

    /// Milliseconds between admission cycles.
    #[arg(long, default_value_t = 500)]
    pub cycle_interval_ms: u64,

    /// Stop after this many seconds instead of waiting for ctrl-c.
    #[arg(long)]
    pub duration_secs: Option<u64>,
}
