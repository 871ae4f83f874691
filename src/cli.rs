// src/cli.rs
//! CLI definitions for the board migrator
//!
//! This module contains the command-line interface definitions using clap.
//! The actual command implementations are in the `commands` module.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "board-migrator")]
#[command(author = "Board Migrator Contributors")]
#[command(version)]
#[command(about = "Dependency-ordered, resumable schema and data migrations", long_about = None)]
pub struct Cli {
    /// Path to the database file
    #[arg(short = 'd', long = "db", global = true, default_value = "board.db")]
    pub db_path: String,

    /// Migrator configuration file (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the board tables and the migration state table
    Init,

    /// Show the state of every core migration
    Status,

    /// Apply pending migrations
    Migrate {
        /// Time budget in seconds (defaults to the configured budget)
        #[arg(short, long)]
        budget: Option<f64>,

        /// Stop after this many units of work
        #[arg(short, long)]
        steps: Option<usize>,
    },

    /// Revert a migration and everything depending on it
    Revert {
        /// Migration name, e.g. core::v110::username_clean
        migration: String,

        /// Time budget in seconds (defaults to the configured budget)
        #[arg(short, long)]
        budget: Option<f64>,
    },

    /// Print the schema a fresh install would have
    Schema {
        /// Print CREATE statements instead of JSON
        #[arg(long)]
        sql: bool,
    },
}
