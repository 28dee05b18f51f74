//! Work item storage and tree reads.

use super::{Database, new_id, now_ms, optional};
use crate::types::{ItemType, WorkItem, WorkItemStatus, WorkItemTree};
use anyhow::Result;
use rusqlite::types::Type;
use rusqlite::{Connection, Row, params};
use std::collections::HashMap;

/// Input for a new work item.
#[derive(Debug, Clone)]
pub struct NewWorkItem {
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
}

fn invalid_column(index: usize, value: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        Type::Text,
        format!("unexpected value '{}'", value).into(),
    )
}

pub fn parse_work_item_row(row: &Row) -> rusqlite::Result<WorkItem> {
    let item_type_idx = row.as_ref().column_index("item_type")?;
    let status_idx = row.as_ref().column_index("status")?;
    let item_type: String = row.get(item_type_idx)?;
    let status: String = row.get(status_idx)?;

    Ok(WorkItem {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        group_project_id: row.get("group_project_id")?,
        parent_work_item_id: row.get("parent_work_item_id")?,
        original_template_id: row.get("original_template_id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        rank: row.get("rank")?,
        estimated_hours: row.get("estimated_hours")?,
        item_type: ItemType::parse(&item_type)
            .ok_or_else(|| invalid_column(item_type_idx, item_type))?,
        status: WorkItemStatus::parse(&status).ok_or_else(|| invalid_column(status_idx, status))?,
        created_at: row.get("created_at")?,
    })
}

pub(crate) fn insert_work_item_internal(
    conn: &Connection,
    input: &NewWorkItem,
) -> rusqlite::Result<WorkItem> {
    let id = new_id();
    let now = now_ms();
    conn.execute(
        "INSERT INTO work_items (
            id, project_id, group_project_id, parent_work_item_id, original_template_id,
            name, description, rank, estimated_hours, item_type, status, created_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            &id,
            &input.project_id,
            &input.group_project_id,
            &input.parent_work_item_id,
            &input.original_template_id,
            &input.name,
            &input.description,
            input.rank,
            input.estimated_hours,
            input.item_type.as_str(),
            input.status.as_str(),
            now,
        ],
    )?;

    Ok(WorkItem {
        id,
        project_id: input.project_id.clone(),
        group_project_id: input.group_project_id.clone(),
        parent_work_item_id: input.parent_work_item_id.clone(),
        original_template_id: input.original_template_id.clone(),
        name: input.name.clone(),
        description: input.description.clone(),
        rank: input.rank,
        estimated_hours: input.estimated_hours,
        item_type: input.item_type,
        status: input.status,
        created_at: now,
    })
}

pub(crate) fn get_work_item_internal(
    conn: &Connection,
    work_item_id: &str,
) -> rusqlite::Result<Option<WorkItem>> {
    optional(conn.query_row(
        "SELECT * FROM work_items WHERE id = ?1",
        params![work_item_id],
        parse_work_item_row,
    ))
}

/// Oldest top-level work item materialized from `template_id` in a project.
pub(crate) fn find_root_work_item_internal(
    conn: &Connection,
    project_id: &str,
    template_id: &str,
) -> rusqlite::Result<Option<WorkItem>> {
    optional(conn.query_row(
        "SELECT * FROM work_items
         WHERE project_id = ?1 AND original_template_id = ?2 AND parent_work_item_id IS NULL
         ORDER BY created_at, id LIMIT 1",
        params![project_id, template_id],
        parse_work_item_row,
    ))
}

/// (id, name) of every work item in a project.
pub(crate) fn list_work_item_names_internal(
    conn: &Connection,
    project_id: &str,
) -> rusqlite::Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare("SELECT id, name FROM work_items WHERE project_id = ?1")?;
    let names = stmt
        .query_map(params![project_id], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names)
}

fn list_work_items_internal(conn: &Connection, project_id: &str) -> rusqlite::Result<Vec<WorkItem>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM work_items WHERE project_id = ?1 ORDER BY rank, created_at, name",
    )?;
    let items = stmt
        .query_map(params![project_id], parse_work_item_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(items)
}

impl Database {
    /// Get a work item by ID.
    pub fn get_work_item(&self, work_item_id: &str) -> Result<Option<WorkItem>> {
        self.with_conn(|conn| Ok(get_work_item_internal(conn, work_item_id)?))
    }

    /// List all work items in a project, ordered by rank.
    pub fn list_work_items(&self, project_id: &str) -> Result<Vec<WorkItem>> {
        self.with_conn(|conn| Ok(list_work_items_internal(conn, project_id)?))
    }

    /// Find a work item by name (case-insensitive) within a project.
    pub fn find_work_item_by_name(&self, project_id: &str, name: &str) -> Result<Option<WorkItem>> {
        self.with_conn(|conn| {
            Ok(optional(conn.query_row(
                "SELECT * FROM work_items WHERE project_id = ?1 AND name = ?2 COLLATE NOCASE",
                params![project_id, name],
                parse_work_item_row,
            ))?)
        })
    }

    /// Direct children of a work item.
    pub fn get_work_item_children(&self, work_item_id: &str) -> Result<Vec<WorkItem>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM work_items WHERE parent_work_item_id = ?1 ORDER BY rank, created_at",
            )?;
            let items = stmt
                .query_map(params![work_item_id], parse_work_item_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(items)
        })
    }

    /// Build the work item forest of a project (roots first, children nested).
    pub fn get_work_item_forest(&self, project_id: &str) -> Result<Vec<WorkItemTree>> {
        let items = self.list_work_items(project_id)?;

        let mut children: HashMap<String, Vec<WorkItem>> = HashMap::new();
        let mut roots = Vec::new();
        for item in items {
            match item.parent_work_item_id.clone() {
                Some(parent_id) => children.entry(parent_id).or_default().push(item),
                None => roots.push(item),
            }
        }

        Ok(roots
            .into_iter()
            .map(|root| build_tree(root, &mut children))
            .collect())
    }
}

fn build_tree(item: WorkItem, children: &mut HashMap<String, Vec<WorkItem>>) -> WorkItemTree {
    let kids = children.remove(&item.id).unwrap_or_default();
    WorkItemTree {
        item,
        children: kids
            .into_iter()
            .map(|child| build_tree(child, children))
            .collect(),
    }
}
