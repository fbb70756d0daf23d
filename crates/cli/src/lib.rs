pub mod commands;
pub mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use slideboard_core::config::LoadOptions;

#[derive(Debug, Parser)]
#[command(
    name = "slideboard",
    about = "Slideboard quote engine operator CLI",
    long_about = "Apply migrations, run the expiry sweep, and inspect pricing policy and config.",
    after_help = "Examples:\n  slideboard migrate\n  slideboard expire --tenant tenant-east\n  \
                  slideboard policy --tenant tenant-east\n  slideboard doctor --json"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Config file to load instead of slideboard.toml")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations")]
    Migrate,
    #[command(about = "Stamp lapsed quotes of one tenant as expired and re-roll their bundles")]
    Expire {
        #[arg(long, help = "Tenant whose quotes are swept")]
        tenant: String,
        #[arg(long, default_value = "system:expiry-sweep", help = "Actor recorded on audit events")]
        actor: String,
    },
    #[command(about = "Show the pricing and lifecycle policy a tenant resolves to")]
    Policy {
        #[arg(long, help = "Tenant to resolve")]
        tenant: String,
    },
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Validate config, database connectivity and schema state")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

impl Cli {
    fn load_options(&self) -> LoadOptions {
        LoadOptions {
            require_file: self.config.is_some(),
            config_path: self.config.clone(),
            ..LoadOptions::default()
        }
    }
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = cli.load_options();
    logging::init(&options);

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(&options),
        Command::Expire { tenant, actor } => commands::expire::run(&options, &tenant, &actor),
        Command::Policy { tenant } => commands::policy::run(&options, &tenant),
        Command::Config => commands::config::run(&options),
        Command::Doctor { json } => commands::doctor::run(&options, json),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
