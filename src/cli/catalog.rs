//! Load-catalog subcommand
//!
//! Seeds the template catalog from a YAML or JSON tree of
//! supers → groups → templates → subtasks.

use crate::db::catalog::CatalogSeed;
use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;

/// Arguments for the load-catalog subcommand
#[derive(Args, Debug)]
pub struct LoadCatalogArgs {
    /// Path to the catalog file (.yaml, .yml or .json)
    #[arg(value_name = "FILE")]
    pub file: PathBuf,
}

impl LoadCatalogArgs {
    /// Check if this is a JSON file based on extension
    pub fn is_json(&self) -> bool {
        self.file.extension().is_some_and(|ext| ext == "json")
    }

    /// Read and parse the catalog file.
    pub fn read_seed(&self) -> Result<CatalogSeed> {
        let content = std::fs::read_to_string(&self.file)
            .with_context(|| format!("Failed to read catalog file {}", self.file.display()))?;
        parse_seed(&content, self.is_json())
            .with_context(|| format!("Failed to parse catalog file {}", self.file.display()))
    }
}

pub fn parse_seed(content: &str, json: bool) -> Result<CatalogSeed> {
    if json {
        Ok(serde_json::from_str(content)?)
    } else {
        Ok(serde_yaml::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_is_json() {
        let args = LoadCatalogArgs {
            file: PathBuf::from("catalog.yaml"),
        };
        assert!(!args.is_json());

        let args = LoadCatalogArgs {
            file: PathBuf::from("catalog.json"),
        };
        assert!(args.is_json());
    }

    #[test]
    fn test_parse_yaml_seed() {
        let yaml = r#"
supers:
  - id: S1
    name: Audit Package
    groups:
      - id: G1
        name: Reviews
        templates:
          - id: T1
            name: Review
            estimated_hours: 4
            subtasks:
              - id: T2
                name: Checklist
"#;
        let seed = parse_seed(yaml, false).unwrap();
        assert_eq!(seed.supers.len(), 1);
        let template = &seed.supers[0].groups[0].templates[0];
        assert_eq!(template.estimated_hours, Some(4.0));
        assert_eq!(template.subtasks[0].name, "Checklist");
        assert_eq!(template.subtasks[0].rank, 0);
    }

    #[test]
    fn test_read_seed_from_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"supers": [{{"name": "Onboarding", "groups": []}}]}}"#
        )
        .unwrap();

        let args = LoadCatalogArgs {
            file: file.path().to_path_buf(),
        };
        let seed = args.read_seed().unwrap();
        assert_eq!(seed.supers[0].name, "Onboarding");
        assert!(seed.supers[0].id.is_none());
    }

    #[test]
    fn test_read_seed_reports_path() {
        let args = LoadCatalogArgs {
            file: PathBuf::from("/nonexistent/catalog.yaml"),
        };
        let err = args.read_seed().unwrap_err();
        assert!(err.to_string().contains("/nonexistent/catalog.yaml"));
    }
}
