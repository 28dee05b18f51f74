//! Work item name collision checks.
//!
//! Names are compared case-insensitively against the project's existing work
//! items and against each other. Every collision is reported at once so the
//! caller can fix the whole batch in one round-trip.

use crate::db::work_items::list_work_item_names_internal;
use crate::error::{MaterializeError, MaterializeResult};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashMap;

/// A name that would be created by this call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposedName {
    /// Request node (or catalog template) id the name belongs to.
    pub node_id: String,
    pub name: String,
}

impl ProposedName {
    pub fn new(node_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            name: name.into(),
        }
    }
}

/// One colliding name and the nodes that proposed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NameCollision {
    pub name: String,
    pub node_ids: Vec<String>,
    /// Set when the name clashes with a work item already in the project.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub existing_work_item_id: Option<String>,
}

fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Find every collision among `proposed` and against `existing` (id, name)
/// pairs. Collisions are returned in the order their names first appear.
pub fn find_collisions(existing: &[(String, String)], proposed: &[ProposedName]) -> Vec<NameCollision> {
    let existing_by_key: HashMap<String, &str> = existing
        .iter()
        .map(|(id, name)| (name_key(name), id.as_str()))
        .collect();

    let mut order: Vec<String> = Vec::new();
    let mut by_key: HashMap<String, (String, Vec<String>)> = HashMap::new();
    for p in proposed {
        let key = name_key(&p.name);
        let entry = by_key.entry(key.clone()).or_insert_with(|| {
            order.push(key);
            (p.name.clone(), Vec::new())
        });
        entry.1.push(p.node_id.clone());
    }

    order
        .into_iter()
        .filter_map(|key| {
            let (name, node_ids) = by_key.remove(&key)?;
            let existing_id = existing_by_key.get(&key).map(|id| id.to_string());
            if existing_id.is_some() || node_ids.len() > 1 {
                Some(NameCollision {
                    name,
                    node_ids,
                    existing_work_item_id: existing_id,
                })
            } else {
                None
            }
        })
        .collect()
}

/// Fail with `DuplicateName` if any proposed name collides.
pub fn validate_names(
    conn: &Connection,
    project_id: &str,
    proposed: &[ProposedName],
) -> MaterializeResult<()> {
    let existing = list_work_item_names_internal(conn, project_id)?;
    let collisions = find_collisions(&existing, proposed);

    if collisions.is_empty() {
        tracing::debug!(project_id, names = proposed.len(), "work item names are unique");
        return Ok(());
    }

    tracing::warn!(
        project_id,
        collisions = collisions.len(),
        names = %collisions.iter().map(|c| c.name.as_str()).collect::<Vec<_>>().join(", "),
        "work item name collisions"
    );
    Err(MaterializeError::DuplicateName { collisions })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn existing(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(id, name)| (id.to_string(), name.to_string()))
            .collect()
    }

    #[test]
    fn unique_names_pass() {
        let proposed = vec![ProposedName::new("T1", "Plan"), ProposedName::new("T2", "Build")];
        assert!(find_collisions(&existing(&[("W1", "Ship")]), &proposed).is_empty());
    }

    #[test]
    fn existing_name_collides_case_insensitively() {
        let proposed = vec![ProposedName::new("T1", "review")];
        let collisions = find_collisions(&existing(&[("W1", "Review")]), &proposed);

        assert_eq!(collisions.len(), 1);
        assert_eq!(collisions[0].name, "review");
        assert_eq!(collisions[0].node_ids, vec!["T1"]);
        assert_eq!(collisions[0].existing_work_item_id.as_deref(), Some("W1"));
    }

    #[test]
    fn in_batch_duplicates_collide() {
        let proposed = vec![
            ProposedName::new("T1", "Review"),
            ProposedName::new("T2", "Other"),
            ProposedName::new("T3", " REVIEW "),
        ];
        let collisions = find_collisions(&[], &proposed);

        assert_eq!(collisions.len(), 1);
        assert_eq!(collisions[0].node_ids, vec!["T1", "T3"]);
        assert!(collisions[0].existing_work_item_id.is_none());
    }

    #[test]
    fn all_collisions_are_reported_in_first_seen_order() {
        let proposed = vec![
            ProposedName::new("T1", "Beta"),
            ProposedName::new("T2", "Alpha"),
            ProposedName::new("T3", "Alpha"),
        ];
        let collisions = find_collisions(&existing(&[("W1", "beta")]), &proposed);

        let names: Vec<&str> = collisions.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Beta", "Alpha"]);
    }

    #[test]
    fn non_ascii_names_fold_case() {
        let proposed = vec![ProposedName::new("T1", "ÜBERPRÜFUNG")];
        let collisions = find_collisions(&existing(&[("W1", "überprüfung")]), &proposed);
        assert_eq!(collisions.len(), 1);
    }
}
