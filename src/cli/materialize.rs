//! Materialize subcommand
//!
//! Reads a request payload in any supported shape and materializes it
//! into the project it names.

use clap::Args;
use serde_json::Value;
use std::path::PathBuf;

/// Arguments for the materialize subcommand
#[derive(Args, Debug)]
pub struct MaterializeArgs {
    /// Path to the request payload (JSON), or `-` for stdin
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Run the whole pipeline, then roll it back
    ///
    /// Reports what would be created, including name collisions and
    /// skipped subtasks, without writing anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Only create what the request lists
    ///
    /// Disables backfill of unlisted catalog subtasks for this call,
    /// unless the payload sets `explicitSelectionOnly` itself.
    #[arg(long)]
    pub explicit_only: bool,
}

impl MaterializeArgs {
    pub fn reads_stdin(&self) -> bool {
        self.file.as_os_str() == "-"
    }

    /// Describe the run mode for logging
    pub fn mode(&self) -> &'static str {
        match (self.dry_run, self.explicit_only) {
            (true, true) => "dry-run, explicit-only",
            (true, false) => "dry-run",
            (false, true) => "explicit-only",
            (false, false) => "commit",
        }
    }

    /// Apply `--explicit-only` to a payload that does not decide for itself.
    pub fn apply_to(&self, payload: &mut Value) {
        if !self.explicit_only {
            return;
        }
        if let Some(obj) = payload.as_object_mut() {
            obj.entry("explicitSelectionOnly")
                .or_insert(Value::Bool(true));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(dry_run: bool, explicit_only: bool) -> MaterializeArgs {
        MaterializeArgs {
            file: PathBuf::from("request.json"),
            dry_run,
            explicit_only,
        }
    }

    #[test]
    fn test_mode() {
        assert_eq!(args(false, false).mode(), "commit");
        assert_eq!(args(true, false).mode(), "dry-run");
        assert_eq!(args(false, true).mode(), "explicit-only");
        assert_eq!(args(true, true).mode(), "dry-run, explicit-only");
    }

    #[test]
    fn test_reads_stdin() {
        let mut a = args(false, false);
        assert!(!a.reads_stdin());
        a.file = PathBuf::from("-");
        assert!(a.reads_stdin());
    }

    #[test]
    fn test_explicit_only_does_not_override_payload() {
        let mut payload = json!({"projectId": "P1", "explicitSelectionOnly": false});
        args(false, true).apply_to(&mut payload);
        assert_eq!(payload["explicitSelectionOnly"], false);

        let mut payload = json!({"projectId": "P1"});
        args(false, true).apply_to(&mut payload);
        assert_eq!(payload["explicitSelectionOnly"], true);

        let mut payload = json!({"projectId": "P1"});
        args(false, false).apply_to(&mut payload);
        assert!(payload.get("explicitSelectionOnly").is_none());
    }
}
