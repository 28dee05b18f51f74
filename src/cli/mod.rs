//! CLI command definitions for catalog-materializer
//!
//! This module defines the CLI structure using clap's derive macros.
//! The main entry point is the `Cli` struct which contains subcommands.

pub mod catalog;
pub mod materialize;

use crate::format::OutputFormat;
use catalog::LoadCatalogArgs;
use clap::{Args, Parser, Subcommand};
use materialize::MaterializeArgs;

/// Catalog-to-project materialization tools
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Path to database file (overrides config)
    #[arg(short, long, global = true)]
    pub database: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2", global = true)]
    pub log: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a project to materialize into
    CreateProject(CreateProjectArgs),

    /// Load a catalog tree (YAML or JSON) into the database
    LoadCatalog(LoadCatalogArgs),

    /// Materialize a request payload into its project
    Materialize(MaterializeArgs),

    /// Show what has been materialized into a project
    Show(ShowArgs),
}

/// Arguments for the create-project subcommand
#[derive(Args, Debug)]
pub struct CreateProjectArgs {
    /// Project name
    #[arg(value_name = "NAME")]
    pub name: String,

    /// Explicit project id (generated when omitted)
    #[arg(long)]
    pub id: Option<String>,
}

/// Arguments for the show subcommand
#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Project id
    #[arg(value_name = "PROJECT")]
    pub project: String,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Markdown)]
    pub format: OutputFormat,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_materialize_with_global_flags() {
        let cli = Cli::try_parse_from([
            "catalog-materializer",
            "--database",
            "/tmp/test.db",
            "-v",
            "materialize",
            "request.json",
            "--dry-run",
        ])
        .unwrap();

        assert_eq!(cli.database.as_deref(), Some("/tmp/test.db"));
        assert!(cli.verbose);
        assert_eq!(cli.log, "2");
        match cli.command {
            Command::Materialize(args) => {
                assert!(args.dry_run);
                assert!(!args.explicit_only);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_show_format() {
        let cli = Cli::try_parse_from(["catalog-materializer", "show", "P1", "--format", "json"])
            .unwrap();
        match cli.command {
            Command::Show(args) => {
                assert_eq!(args.project, "P1");
                assert_eq!(args.format, OutputFormat::Json);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_create_project() {
        let cli = Cli::try_parse_from(["catalog-materializer", "create-project", "Launch", "--id", "P1"])
            .unwrap();
        match cli.command {
            Command::CreateProject(args) => {
                assert_eq!(args.name, "Launch");
                assert_eq!(args.id.as_deref(), Some("P1"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_subcommand_is_required() {
        assert!(Cli::try_parse_from(["catalog-materializer"]).is_err());
    }
}
