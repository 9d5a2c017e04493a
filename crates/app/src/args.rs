pub use clap::Parser;

use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "cairn")]
#[command(about = "Add, fetch and name content-addressed files on a peer-to-peer network")]
#[command(version)]
pub struct Args {
    /// Path to the cairn state directory (defaults to ~/.cairn)
    #[arg(long, global = true)]
    pub config_path: Option<PathBuf>,

    /// Log level, overriding the configured one (RUST_LOG still wins)
    #[arg(long, global = true)]
    pub log_level: Option<tracing::Level>,

    #[command(subcommand)]
    pub command: crate::Command,
}
