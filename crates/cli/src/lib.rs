pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "signoff",
    about = "Signoff operator CLI",
    long_about = "Operate the approval workflow service: migrations, config inspection, readiness checks and flow import.",
    after_help = "Examples:\n  signoff doctor --json\n  signoff config\n  signoff import-flows flows.json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Validate config and database readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Normalize and store approval flows from a JSON array file")]
    ImportFlows {
        #[arg(help = "Path to a JSON file holding an array of flow definitions")]
        path: PathBuf,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            let (exit_code, output) = commands::doctor::run(json);
            commands::CommandResult { exit_code, output }
        }
        Command::ImportFlows { path } => commands::import_flows::run(&path),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
