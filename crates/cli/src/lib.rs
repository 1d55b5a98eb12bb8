pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "concierge",
    about = "Concierge operator CLI",
    long_about = "Operate the concierge runtime: migrations, config inspection, readiness checks and tenant validation.",
    after_help = "Examples:\n  concierge doctor --json\n  concierge config\n  concierge tenant harbor-spa"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Path to a concierge.toml (defaults to ./concierge.toml or ./config/concierge.toml)")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, tenant directory, and DB connectivity checks")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Load and validate one tenant configuration file")]
    Tenant {
        #[arg(help = "Tenant id, resolved as <tenants.directory>/<id>.toml")]
        id: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = commands::load_options(cli.config);

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(options),
        Command::Config => commands::CommandResult {
            exit_code: 0,
            output: commands::config::run(options),
        },
        Command::Doctor { json } => commands::doctor::run(options, json),
        Command::Tenant { id } => commands::tenant::run(options, &id),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
