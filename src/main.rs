//! Rangerun CLI: run lab verification actions and plans.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "rangerun",
    version,
    about = "Scripted verification actions and plans for virtual network testbeds"
)]
struct Cli {
    /// Debug logging (overridden by RANGERUN_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: rangerun::cli::Commands,
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(rangerun::cli::log_filter(default_level))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = rangerun::cli::dispatch(cli.command) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
