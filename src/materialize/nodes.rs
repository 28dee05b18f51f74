//! Find-or-create for project-scoped super and group copies.
//!
//! At most one copy exists per (original id, project id). The pair is backed
//! by a unique constraint, and creation is an `INSERT … ON CONFLICT DO
//! NOTHING` followed by a read, so two callers racing on the same pair
//! converge on the same row instead of inserting twice.

use crate::db::projects::{parse_project_group_row, parse_project_super_row};
use crate::db::{UnitOfWork, new_id, now_ms, optional};
use crate::error::{MaterializeError, MaterializeResult};
use crate::types::{CatalogGroup, CatalogSuper, ProjectGroup, ProjectSuper};
use rusqlite::{Connection, params};

/// A materialized row and whether this call inserted it.
#[derive(Debug, Clone, PartialEq)]
pub struct Materialized<T> {
    pub value: T,
    pub created: bool,
}

/// Append `suffix` verbatim; blank suffixes are ignored.
pub fn apply_suffix(name: &str, suffix: Option<&str>) -> String {
    match suffix {
        Some(s) if !s.trim().is_empty() => format!("{}{}", name, s),
        _ => name.to_string(),
    }
}

fn find_project_super(
    conn: &Connection,
    original_super_id: &str,
    project_id: &str,
) -> rusqlite::Result<Option<ProjectSuper>> {
    optional(conn.query_row(
        "SELECT * FROM project_supers WHERE original_super_id = ?1 AND project_id = ?2",
        params![original_super_id, project_id],
        parse_project_super_row,
    ))
}

fn find_project_group(
    conn: &Connection,
    original_group_id: &str,
    project_id: &str,
) -> rusqlite::Result<Option<ProjectGroup>> {
    optional(conn.query_row(
        "SELECT * FROM project_groups WHERE original_group_id = ?1 AND project_id = ?2",
        params![original_group_id, project_id],
        parse_project_group_row,
    ))
}

/// Return the project's copy of `catalog_super`, creating it on first use.
///
/// An existing copy is returned unchanged; `name_suffix` only applies when a
/// new copy is created.
pub fn materialize_super(
    uow: &UnitOfWork<'_>,
    catalog_super: &CatalogSuper,
    project_id: &str,
    name_suffix: Option<&str>,
) -> MaterializeResult<Materialized<ProjectSuper>> {
    let conn = uow.conn();

    if let Some(existing) = find_project_super(conn, &catalog_super.id, project_id)? {
        return Ok(Materialized {
            value: existing,
            created: false,
        });
    }

    let inserted = conn.execute(
        "INSERT INTO project_supers (
            id, project_id, original_super_id, name, description, rank, created_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT (original_super_id, project_id) DO NOTHING",
        params![
            new_id(),
            project_id,
            &catalog_super.id,
            apply_suffix(&catalog_super.name, name_suffix),
            &catalog_super.description,
            catalog_super.rank,
            now_ms(),
        ],
    )?;

    let value = find_project_super(conn, &catalog_super.id, project_id)?.ok_or_else(|| {
        MaterializeError::storage("Project super disappeared after insert")
    })?;

    Ok(Materialized {
        value,
        created: inserted == 1,
    })
}

/// Return the project's copy of `catalog_group` under `project_super`,
/// creating it on first use.
pub fn materialize_group(
    uow: &UnitOfWork<'_>,
    catalog_group: &CatalogGroup,
    project_super: &ProjectSuper,
    project_id: &str,
    name_suffix: Option<&str>,
) -> MaterializeResult<Materialized<ProjectGroup>> {
    let conn = uow.conn();

    if let Some(existing) = find_project_group(conn, &catalog_group.id, project_id)? {
        if existing.super_project_id != project_super.id {
            tracing::debug!(
                group = %existing.id,
                owner = %existing.super_project_id,
                requested = %project_super.id,
                "group already materialized under another project super"
            );
        }
        return Ok(Materialized {
            value: existing,
            created: false,
        });
    }

    let inserted = conn.execute(
        "INSERT INTO project_groups (
            id, project_id, super_project_id, original_group_id, name, description, rank, created_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT (original_group_id, project_id) DO NOTHING",
        params![
            new_id(),
            project_id,
            &project_super.id,
            &catalog_group.id,
            apply_suffix(&catalog_group.name, name_suffix),
            &catalog_group.description,
            catalog_group.rank,
            now_ms(),
        ],
    )?;

    let value = find_project_group(conn, &catalog_group.id, project_id)?.ok_or_else(|| {
        MaterializeError::storage("Project group disappeared after insert")
    })?;

    Ok(Materialized {
        value,
        created: inserted == 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_is_appended_verbatim() {
        assert_eq!(apply_suffix("Audit", Some(" - P1")), "Audit - P1");
        assert_eq!(apply_suffix("Audit", Some("  ")), "Audit");
        assert_eq!(apply_suffix("Audit", None), "Audit");
    }
}
