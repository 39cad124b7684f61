pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "procura",
    about = "Procura operator CLI",
    long_about = "Operate the Procura supplier onboarding store: migrations, demo data, \
                  config inspection, readiness checks and reminder scans.",
    after_help = "Examples:\n  procura migrate\n  procura config\n  procura remind"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and insert missing reminder defaults")]
    Migrate,
    #[command(about = "Load the deterministic demo users and reminder defaults")]
    Seed,
    #[command(about = "Run end-to-end readiness checks with per-check timing details")]
    Smoke,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Run one reminder scan and print its summary")]
    Remind,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Smoke => commands::smoke::run(),
        Command::Config => commands::config::run(),
        Command::Remind => commands::remind::run(),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
