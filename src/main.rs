//! Catalog Materializer
//!
//! Command-line front end for materializing template catalogs into
//! project-scoped work items.

use anyhow::{Context, Result};
use catalog_materializer::cli::catalog::LoadCatalogArgs;
use catalog_materializer::cli::materialize::MaterializeArgs;
use catalog_materializer::cli::{Cli, Command, CreateProjectArgs, ShowArgs};
use catalog_materializer::config::Config;
use catalog_materializer::db::Database;
use catalog_materializer::format::ProjectReport;
use catalog_materializer::materialize::respond;
use clap::Parser;
use serde_json::Value;
use std::fs::OpenOptions;
use std::io::Read;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on --log option
    match cli.log.as_str() {
        "0" | "off" => {
            // No logging
        }
        "1" | "stdout" => {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(log_filter(cli.verbose))
                .with_writer(std::io::stdout)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        "2" | "stderr" => {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(log_filter(cli.verbose))
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        filename => {
            // Log to file (append mode)
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(filename)
                .with_context(|| format!("Failed to open log file {}", filename))?;
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(log_filter(cli.verbose))
                .with_writer(file)
                .with_ansi(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }

    let mut config = match &cli.config {
        Some(path) => {
            let mut config = Config::load(path)?;
            config.apply_env(|key| std::env::var(key).ok());
            config
        }
        None => Config::load_or_default(),
    };
    if let Some(db_path) = &cli.database {
        config.server.db_path = db_path.into();
    }

    match cli.command {
        Command::CreateProject(args) => run_create_project(&config, args),
        Command::LoadCatalog(args) => run_load_catalog(&config, args),
        Command::Materialize(args) => run_materialize(&config, args),
        Command::Show(args) => run_show(&config, args),
    }
}

/// `RUST_LOG` wins; otherwise `info`, or `debug` under `--verbose`.
fn log_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }))
}

fn open_database(config: &Config) -> Result<Database> {
    config.ensure_db_dir()?;
    let db = Database::open_with_timeout(
        &config.server.db_path,
        Duration::from_millis(config.server.busy_timeout_ms),
    )
    .with_context(|| format!("Failed to open database {}", config.server.db_path.display()))?;
    tracing::debug!(path = %config.server.db_path.display(), "database opened");
    Ok(db)
}

fn run_create_project(config: &Config, args: CreateProjectArgs) -> Result<()> {
    let db = open_database(config)?;
    let project = db.create_project(args.id, &args.name)?;
    println!("{}", serde_json::to_string_pretty(&project)?);
    Ok(())
}

fn run_load_catalog(config: &Config, args: LoadCatalogArgs) -> Result<()> {
    let seed = args.read_seed()?;
    let db = open_database(config)?;
    let stats = db.load_catalog(&seed)?;

    println!("Catalog loaded:");
    println!("  supers: {}", stats.supers);
    println!("  groups: {}", stats.groups);
    println!("  templates: {}", stats.templates);
    Ok(())
}

fn read_payload(args: &MaterializeArgs) -> Result<Value> {
    let content = if args.reads_stdin() {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read payload from stdin")?;
        buf
    } else {
        std::fs::read_to_string(&args.file)
            .with_context(|| format!("Failed to read payload {}", args.file.display()))?
    };
    let payload = serde_json::from_str(&content).context("Payload is not valid JSON")?;
    Ok(payload)
}

fn run_materialize(config: &Config, args: MaterializeArgs) -> Result<()> {
    let mut payload = read_payload(&args)?;
    args.apply_to(&mut payload);

    let db = open_database(config)?;
    tracing::info!(mode = args.mode(), "materializing");

    let result = if args.dry_run {
        db.preview_materialize(&payload, &config.materialize)
    } else {
        db.materialize(&payload, &config.materialize)
    };

    println!("{}", serde_json::to_string_pretty(&respond(&result))?);

    if let Err(err) = result {
        anyhow::bail!("Materialization failed ({}): {}", err.code().as_str(), err);
    }
    Ok(())
}

fn run_show(config: &Config, args: ShowArgs) -> Result<()> {
    let db = open_database(config)?;
    let project = db
        .get_project(&args.project)?
        .with_context(|| format!("Project not found: {}", args.project))?;

    let report = ProjectReport {
        supers: db.list_project_supers(&project.id)?,
        groups: db.list_project_groups(&project.id)?,
        forest: db.get_work_item_forest(&project.id)?,
        project,
    };
    println!("{}", report.render(args.format));
    Ok(())
}
