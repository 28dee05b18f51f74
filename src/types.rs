//! Core types for the catalog materializer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A named bundle of catalog groups (read-only for the engine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSuper {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub rank: i64,
}

/// A group of templates inside a catalog super.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogGroup {
    pub id: String,
    /// Null for ungrouped legacy data.
    pub super_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub rank: i64,
}

/// A reusable work-item template.
///
/// `parent_template_id` and `sub_template_ids` are stored independently and
/// may disagree; see [`crate::materialize::relations`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: String,
    pub group_id: Option<String>,
    pub parent_template_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub rank: i64,
    pub estimated_hours: Option<f64>,
    #[serde(default)]
    pub sub_template_ids: Vec<String>,
}

impl Template {
    /// A template is a subtask when it points at a parent template.
    pub fn is_subtask(&self) -> bool {
        self.parent_template_id.is_some()
    }

    /// A story has no parent and at least one declared subtask.
    pub fn is_story(&self) -> bool {
        self.parent_template_id.is_none() && !self.sub_template_ids.is_empty()
    }
}

/// A project owned by the surrounding platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    pub created_at: i64,
}

/// Project-scoped copy of a catalog super.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSuper {
    pub id: String,
    pub project_id: String,
    pub original_super_id: String,
    pub name: String,
    pub description: Option<String>,
    pub rank: i64,
    pub created_at: i64,
}

/// Project-scoped copy of a catalog group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectGroup {
    pub id: String,
    pub project_id: String,
    pub super_project_id: String,
    pub original_group_id: String,
    pub name: String,
    pub description: Option<String>,
    pub rank: i64,
    pub created_at: i64,
}

/// Work item kind. Roots become stories, subtasks become tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Story,
    Task,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Story => "story",
            ItemType::Task => "task",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "story" => Some(ItemType::Story),
            "task" => Some(ItemType::Task),
            _ => None,
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Work item lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemStatus {
    #[default]
    Open,
    InProgress,
    Done,
}

impl WorkItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkItemStatus::Open => "open",
            WorkItemStatus::InProgress => "in_progress",
            WorkItemStatus::Done => "done",
        }
    }

    /// Parse a status string, returning `None` for unknown values.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "open" => Some(WorkItemStatus::Open),
            "in_progress" | "in-progress" => Some(WorkItemStatus::InProgress),
            "done" => Some(WorkItemStatus::Done),
            _ => None,
        }
    }
}

impl fmt::Display for WorkItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A live, project-scoped work item materialized from a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    pub id: String,
    pub project_id: String,
    pub group_project_id: String,
    pub parent_work_item_id: Option<String>,
    pub original_template_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub rank: i64,
    pub estimated_hours: Option<f64>,
    pub item_type: ItemType,
    pub status: WorkItemStatus,
    pub created_at: i64,
}

/// A work item with its children, for tree rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItemTree {
    #[serde(flatten)]
    pub item: WorkItem,
    pub children: Vec<WorkItemTree>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parse_accepts_known_values() {
        assert_eq!(WorkItemStatus::parse("open"), Some(WorkItemStatus::Open));
        assert_eq!(
            WorkItemStatus::parse("In-Progress"),
            Some(WorkItemStatus::InProgress)
        );
        assert_eq!(WorkItemStatus::parse("DONE"), Some(WorkItemStatus::Done));
        assert_eq!(WorkItemStatus::parse("blocked"), None);
    }

    #[test]
    fn template_story_and_subtask_classification() {
        let mut template = Template {
            id: "t1".to_string(),
            group_id: Some("g1".to_string()),
            parent_template_id: None,
            name: "Inventory Count".to_string(),
            description: None,
            rank: 0,
            estimated_hours: None,
            sub_template_ids: vec!["t2".to_string()],
        };
        assert!(template.is_story());
        assert!(!template.is_subtask());

        template.sub_template_ids.clear();
        template.parent_template_id = Some("t0".to_string());
        assert!(!template.is_story());
        assert!(template.is_subtask());
    }

    #[test]
    fn item_type_serializes_snake_case() {
        let json = serde_json::to_string(&ItemType::Story).unwrap();
        assert_eq!(json, "\"story\"");
        assert_eq!(ItemType::parse("task"), Some(ItemType::Task));
    }
}
