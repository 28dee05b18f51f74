//! Projects and their materialized super/group copies.

use super::{Database, new_id, now_ms, optional};
use crate::types::{Project, ProjectGroup, ProjectSuper};
use anyhow::Result;
use rusqlite::{Connection, Row, params};

fn parse_project_row(row: &Row) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get("id")?,
        name: row.get("name")?,
        created_at: row.get("created_at")?,
    })
}

pub(crate) fn parse_project_super_row(row: &Row) -> rusqlite::Result<ProjectSuper> {
    Ok(ProjectSuper {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        original_super_id: row.get("original_super_id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        rank: row.get("rank")?,
        created_at: row.get("created_at")?,
    })
}

pub(crate) fn parse_project_group_row(row: &Row) -> rusqlite::Result<ProjectGroup> {
    Ok(ProjectGroup {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        super_project_id: row.get("super_project_id")?,
        original_group_id: row.get("original_group_id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        rank: row.get("rank")?,
        created_at: row.get("created_at")?,
    })
}

pub(crate) fn get_project_internal(
    conn: &Connection,
    project_id: &str,
) -> rusqlite::Result<Option<Project>> {
    optional(conn.query_row(
        "SELECT * FROM projects WHERE id = ?1",
        params![project_id],
        parse_project_row,
    ))
}

impl Database {
    /// Create a project. Projects normally come from the surrounding platform.
    pub fn create_project(&self, id: Option<String>, name: &str) -> Result<Project> {
        let project = Project {
            id: id.unwrap_or_else(new_id),
            name: name.to_string(),
            created_at: now_ms(),
        };
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO projects (id, name, created_at) VALUES (?1, ?2, ?3)",
                params![&project.id, &project.name, project.created_at],
            )?;
            Ok(project)
        })
    }

    /// Get a project by ID.
    pub fn get_project(&self, project_id: &str) -> Result<Option<Project>> {
        self.with_conn(|conn| Ok(get_project_internal(conn, project_id)?))
    }

    /// List the project supers materialized into a project.
    pub fn list_project_supers(&self, project_id: &str) -> Result<Vec<ProjectSuper>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM project_supers WHERE project_id = ?1 ORDER BY rank, name",
            )?;
            let supers = stmt
                .query_map(params![project_id], parse_project_super_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(supers)
        })
    }

    /// List the project groups materialized into a project.
    pub fn list_project_groups(&self, project_id: &str) -> Result<Vec<ProjectGroup>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM project_groups WHERE project_id = ?1 ORDER BY rank, name",
            )?;
            let groups = stmt
                .query_map(params![project_id], parse_project_group_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(groups)
        })
    }
}
