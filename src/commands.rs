// src/commands.rs
//! Command handlers for the board migrator CLI

use anyhow::{Context, Result};
use board_migrator::migration::{LogOutput, MigrationState};
use board_migrator::config::budget_from_secs;
use board_migrator::migrations::core_migrations;
use board_migrator::{MigratorConfig, Migrator, SchemaGenerator, TableNames, ToolRegistry, db};
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Load the configuration file, or the defaults when none is given
pub fn load_config(path: Option<&str>) -> Result<MigratorConfig> {
    match path {
        Some(path) => MigratorConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path)),
        None => Ok(MigratorConfig::default()),
    }
}

fn budget(config: &MigratorConfig, secs: Option<f64>) -> Result<Duration> {
    let budget = match secs {
        Some(secs) => budget_from_secs(secs),
        None => config.step_budget(),
    };
    budget.context("Invalid --budget value")
}

fn open_existing(db_path: &str) -> Result<Connection> {
    if !Path::new(db_path).exists() {
        anyhow::bail!("Database not found at {}; run `board-migrator init` first", db_path);
    }
    Ok(db::open(db_path)?)
}

fn migrator<'a>(conn: &'a Connection, config: &MigratorConfig) -> Result<Migrator<'a>> {
    let tables = config.tables();
    let registry = core_migrations(&tables)?;
    let tools = ToolRegistry::with_defaults(&tables);
    let migrator = Migrator::new(conn, tables, registry, tools)?
        .with_output(LogOutput::new(config.verbosity));
    Ok(migrator)
}

pub fn cmd_init(db_path: &str, config: &MigratorConfig) -> Result<()> {
    info!("Initializing board database at: {}", db_path);
    db::init(db_path, &config.tables())?;
    println!("Database initialized successfully at: {}", db_path);
    Ok(())
}

fn describe(state: Option<&MigrationState>, unfulfillable: Option<String>) -> String {
    match (state, unfulfillable) {
        (Some(state), _) if state.is_complete() => "installed".to_string(),
        (Some(state), _) => match &state.data_state {
            Some(checkpoint) => format!(
                "in progress ({:?} phase, step {})",
                checkpoint.phase, checkpoint.step
            ),
            None if state.schema_done => "in progress (schema done)".to_string(),
            None => "in progress".to_string(),
        },
        (None, Some(missing)) => format!("not fulfillable (needs {})", missing),
        (None, None) => "pending".to_string(),
    }
}

pub fn cmd_status(db_path: &str, config: &MigratorConfig) -> Result<()> {
    let conn = open_existing(db_path)?;
    let migrator = migrator(&conn, config)?;

    for name in migrator.migrations() {
        let status = describe(migrator.migration_state(name), migrator.unfulfillable(name));
        println!("{:<40} {}", name, status);
    }

    let pending = migrator.installable_migrations().len();
    if pending == 0 {
        println!("\nAll migrations are installed");
    } else {
        println!("\n{} migration(s) pending", pending);
    }
    Ok(())
}

pub fn cmd_migrate(
    db_path: &str,
    config: &MigratorConfig,
    budget_secs: Option<f64>,
    steps: Option<usize>,
) -> Result<()> {
    let conn = open_existing(db_path)?;
    let mut migrator = migrator(&conn, config)?;

    let summary = migrator.run(budget(config, budget_secs)?, steps)?;
    println!(
        "Ran {} step(s) in {:.2}s",
        summary.steps,
        summary.elapsed.as_secs_f64()
    );
    if summary.finished {
        println!("All migrations are installed");
    } else {
        println!(
            "{} migration(s) still pending; run `board-migrator migrate` again to continue",
            migrator.installable_migrations().len()
        );
    }
    Ok(())
}

pub fn cmd_revert(
    db_path: &str,
    config: &MigratorConfig,
    migration: &str,
    budget_secs: Option<f64>,
) -> Result<()> {
    let conn = open_existing(db_path)?;
    let mut migrator = migrator(&conn, config)?;

    if migrator.migration_state(migration).is_none() {
        println!("Migration {} is not installed", migration);
        return Ok(());
    }

    let summary = migrator.revert(migration, budget(config, budget_secs)?)?;
    if summary.finished {
        println!("Reverted {} in {} step(s)", migration, summary.steps);
    } else {
        println!(
            "Reverted {} step(s) of {}; run the command again to continue",
            summary.steps, migration
        );
    }
    Ok(())
}

pub fn cmd_schema(config: &MigratorConfig, sql: bool) -> Result<()> {
    let tables: TableNames = config.tables();
    let registry = core_migrations(&tables)?;
    let generator = SchemaGenerator::new(&registry);

    if sql {
        for statement in generator.create_statements()? {
            println!("{};\n", statement);
        }
    } else {
        let schema = generator.get_schema()?;
        println!("{}", serde_json::to_string_pretty(&schema)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_states() {
        assert_eq!(describe(None, None), "pending");
        assert_eq!(
            describe(None, Some("core::ghost".to_string())),
            "not fulfillable (needs core::ghost)"
        );

        let mut state = MigrationState::new("a", Vec::new());
        assert_eq!(describe(Some(&state), None), "in progress");
        state.schema_done = true;
        assert_eq!(describe(Some(&state), None), "in progress (schema done)");
        state.data_done = true;
        assert_eq!(describe(Some(&state), None), "installed");
    }

    #[test]
    fn test_budget_rejects_unrepresentable_values() {
        let config = MigratorConfig::default();
        assert_eq!(budget(&config, None).unwrap(), Duration::from_secs(5));
        assert_eq!(budget(&config, Some(0.25)).unwrap(), Duration::from_millis(250));
        assert!(budget(&config, Some(f64::INFINITY)).is_err());
        assert!(budget(&config, Some(1e30)).is_err());
    }
}
