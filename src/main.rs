//! recipectl CLI: plugin recipes as ordered, reversible steps.

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "recipectl",
    version,
    about = "Plugin recipes as ordered, reversible steps, served over HTTP"
)]
struct Cli {
    /// Config file (default: ./recipectl.yaml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Default log level when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: recipectl::cli::Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    recipectl::telemetry::init(&cli.log_level);
    if let Err(e) = recipectl::cli::dispatch(cli.command, cli.config).await {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
