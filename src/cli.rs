use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use flexi_logger::{Duplicate, FileSpec, Logger, LoggerHandle};
use log::info;
use rusqlite::Connection;

use schema_evolve::config::{Config, LoggingConfig, UpgradeConfig, CONFIG};
use schema_evolve::introspect;
use schema_evolve::{run_plan, EvolveError, LoggedStatement, UpgradePlan};

#[derive(Parser)]
#[command(
    name = "schema-evolve",
    version,
    about = "Apply idempotent schema upgrade plans to a SQLite database"
)]
pub struct Cli {
    /// Configuration file (default: config.toml in the user config directory)
    #[arg(long = "config", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Apply upgrade plans in order, each in its own transaction
    Apply {
        /// Database file
        #[arg(long = "db", short = 'd')]
        db: PathBuf,

        /// Plan files (TOML)
        #[arg(required = true)]
        plans: Vec<PathBuf>,

        /// Write the executed statements as JSON to this file
        #[arg(long = "journal", short = 'j')]
        journal: Option<PathBuf>,
    },

    /// Parse and validate plans without opening a database
    Check {
        #[arg(required = true)]
        plans: Vec<PathBuf>,
    },

    /// Show the columns of a table
    Inspect {
        /// Database file
        #[arg(long = "db", short = 'd')]
        db: PathBuf,

        #[arg(long = "table", short = 't')]
        table: String,
    },
}

impl Cli {
    pub fn handle_command_line() -> Result<(), EvolveError> {
        let args = Cli::parse();

        let config = match &args.config {
            Some(path) => Config::load_from(path),
            None => {
                let project_dirs = ProjectDirs::from("", "", "schema-evolve").ok_or_else(|| {
                    EvolveError::Error("Could not determine project directories".to_owned())
                })?;
                Config::load_config(&project_dirs)
            }
        };
        let config = CONFIG.get_or_init(|| config);

        let _logger = Self::start_logging(&config.logging)?;

        match args.command {
            Command::Apply { db, plans, journal } => {
                Self::apply(&db, &plans, journal.as_deref(), &config.upgrade)
            }
            Command::Check { plans } => Self::check(&plans),
            Command::Inspect { db, table } => Self::inspect(&db, &table),
        }
    }

    fn start_logging(logging: &LoggingConfig) -> Result<LoggerHandle, EvolveError> {
        let logger = Logger::try_with_env_or_str(&logging.level)?;

        let logger = match &logging.directory {
            Some(directory) => logger
                .log_to_file(
                    FileSpec::default()
                        .directory(directory)
                        .basename("schema-evolve"),
                )
                .duplicate_to_stderr(Duplicate::Warn)
                .format_for_files(flexi_logger::detailed_format),
            None => logger.log_to_stderr().format(flexi_logger::default_format),
        };

        Ok(logger.start()?)
    }

    /// Open an existing database; never creates one for a mistyped path.
    fn open_database(db: &Path) -> Result<Connection, EvolveError> {
        if !db.is_file() {
            return Err(EvolveError::Error(format!(
                "Database file '{}' does not exist",
                db.display()
            )));
        }
        let conn = Connection::open(db)?;
        info!("Database opened at: {}", db.display());
        Ok(conn)
    }

    fn load_plans(paths: &[PathBuf]) -> Result<Vec<UpgradePlan>, EvolveError> {
        paths
            .iter()
            .map(|path| {
                UpgradePlan::from_file(path).map_err(|e| match e {
                    EvolveError::IoError(io) => {
                        EvolveError::Error(format!("Cannot read plan {}: {}", path.display(), io))
                    }
                    other => other,
                })
            })
            .collect()
    }

    fn apply(
        db: &Path,
        plans: &[PathBuf],
        journal_path: Option<&Path>,
        upgrade: &UpgradeConfig,
    ) -> Result<(), EvolveError> {
        // Parse everything up front so a typo in the last plan fails before the first runs
        let plans = Self::load_plans(plans)?;

        let mut conn = Self::open_database(db)?;

        let mut journal: Vec<LoggedStatement> = Vec::new();
        let mut result = Ok(());
        for plan in &plans {
            let legacy_prefix = upgrade.legacy_prefix_for(plan.version.as_deref());
            match run_plan(&mut conn, plan, &legacy_prefix) {
                Ok(statements) => {
                    println!("{}: {} statements", plan.name, statements.len());
                    journal.extend(statements);
                }
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }

        // Committed plans stay committed; record them even when a later plan failed
        if let Some(path) = journal_path {
            fs::write(path, serde_json::to_string_pretty(&journal)?)?;
        }

        result
    }

    fn check(plans: &[PathBuf]) -> Result<(), EvolveError> {
        for plan in Self::load_plans(plans)? {
            println!(
                "{}{}: {} directives, ok",
                plan.name,
                plan.version
                    .as_deref()
                    .map(|v| format!(" ({})", v))
                    .unwrap_or_default(),
                plan.directives.len()
            );
        }
        Ok(())
    }

    fn inspect(db: &Path, table: &str) -> Result<(), EvolveError> {
        let conn = Self::open_database(db)?;
        if !introspect::table_exists(&conn, table)? {
            return Err(EvolveError::Error(format!("Table '{}' does not exist", table)));
        }

        for column in introspect::columns(&conn, table)? {
            println!(
                "{:<32} {:<16}{}{}",
                column.name,
                column.decl_type,
                if column.not_null { " NOT NULL" } else { "" },
                if column.primary_key { " PRIMARY KEY" } else { "" }
            );
        }
        Ok(())
    }
}
