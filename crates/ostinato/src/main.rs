use anyhow::Result;
use clap::{Parser, Subcommand};

mod cli;
mod config;

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Simulate(args) => args.run(),
        Command::CheckConfig(args) => args.run(),
    }
}

#[derive(Parser)]
#[command(name = "ostinato", about = "Step timing tools for the Ostinato motion controller")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Simulate a planned move and report the step pulses it produces.
    Simulate(cli::simulate::SimulateArgs),
    /// Parse and validate a machine configuration file.
    CheckConfig(cli::check_config::CheckConfigArgs),
}
