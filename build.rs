// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: time budget for a run
fn budget_arg() -> Arg {
    Arg::new("budget")
        .short('b')
        .long("budget")
        .value_name("SECS")
        .help("Time budget in seconds (defaults to the configured budget)")
}

fn build_cli() -> Command {
    Command::new("board-migrator")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Board Migrator Contributors")
        .about("Dependency-ordered, resumable schema and data migrations")
        .subcommand_required(false)
        .arg(
            Arg::new("db")
                .short('d')
                .long("db")
                .value_name("PATH")
                .default_value("board.db")
                .global(true)
                .help("Path to the database file"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .global(true)
                .help("Migrator configuration file (TOML)"),
        )
        .subcommand(Command::new("init").about("Create the board tables and the migration state table"))
        .subcommand(Command::new("status").about("Show the state of every core migration"))
        .subcommand(
            Command::new("migrate")
                .about("Apply pending migrations")
                .arg(budget_arg())
                .arg(
                    Arg::new("steps")
                        .short('s')
                        .long("steps")
                        .value_name("N")
                        .help("Stop after this many units of work"),
                ),
        )
        .subcommand(
            Command::new("revert")
                .about("Revert a migration and everything depending on it")
                .arg(Arg::new("migration").required(true).help("Migration name"))
                .arg(budget_arg()),
        )
        .subcommand(
            Command::new("schema")
                .about("Print the schema a fresh install would have")
                .arg(
                    Arg::new("sql")
                        .long("sql")
                        .action(ArgAction::SetTrue)
                        .help("Print CREATE statements instead of JSON"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();

    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("board-migrator.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
