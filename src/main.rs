// src/main.rs

use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

use cli::{Cli, Commands};

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Some(Commands::Init) => commands::cmd_init(&cli.db_path, &config),
        Some(Commands::Status) => commands::cmd_status(&cli.db_path, &config),
        Some(Commands::Migrate { budget, steps }) => {
            commands::cmd_migrate(&cli.db_path, &config, budget, steps)
        }
        Some(Commands::Revert { migration, budget }) => {
            commands::cmd_revert(&cli.db_path, &config, &migration, budget)
        }
        Some(Commands::Schema { sql }) => commands::cmd_schema(&config, sql),
        None => {
            println!("Board Migrator v{}", env!("CARGO_PKG_VERSION"));
            println!("Run 'board-migrator --help' for usage information");
            Ok(())
        }
    }
}
