mod commands;
mod util;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::run::RunArgs;
use commands::validate::ValidateArgs;

#[derive(Parser, Debug)]
#[command(name = "pkgmgr", version, about = "Package runtime for cluster nodes")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the package runtime until interrupted
    Run(RunArgs),

    /// Check a package directory and optional settings offline
    Validate(ValidateArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => commands::run::cmd_run(&args).await,
        Command::Validate(args) => commands::validate::cmd_validate(&args).await,
    }
}
