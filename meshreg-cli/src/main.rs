//! meshreg — keeps a service registry in step with workload instances.
//!
//! # Usage
//!
//! ```text
//! meshreg run [--manifests <dir>] [--listen <addr>] [--dry-run] [--probe-polarity corrected|literal]
//! meshreg describe <manifest> [--probe]
//! meshreg pods [--url <status-api>] [--nodes] [--json]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{describe::DescribeArgs, pods::PodsArgs, run::RunArgs};

#[derive(Parser, Debug)]
#[command(
    name = "meshreg",
    version,
    about = "Register running instances with the service registry and cancel departed ones",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the registration daemon.
    Run(RunArgs),

    /// Print the registry descriptor built from an instance manifest.
    Describe(DescribeArgs),

    /// List instances known to a running daemon.
    Pods(PodsArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => args.run(),
        Commands::Describe(args) => args.run(),
        Commands::Pods(args) => args.run(),
    }
}
