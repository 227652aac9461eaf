// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;

mod commands;

use commands::{serve, worker};

/// Asynchronous image-generation gateway
#[derive(Parser)]
#[command(name = "image-gateway")]
#[command(version)]
#[command(about = "Asynchronous image-generation gateway", long_about = None)]
#[command(propagate_version = true)]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a configuration file (defaults to ./gateway.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API with an embedded worker pool
    #[command(visible_alias = "s")]
    Serve,

    /// Run a worker pool only (horizontal scale-out)
    #[command(visible_alias = "w")]
    Worker,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    let result = match cli.command {
        Commands::Serve => serve::execute(cli.config.as_deref()).await,
        Commands::Worker => worker::execute(cli.config.as_deref()).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        for cause in e.chain().skip(1) {
            eprintln!("  caused by: {cause}");
        }
        process::exit(1);
    }
}
