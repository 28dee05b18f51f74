//! Catalog reads and additive catalog writes.
//!
//! The engine treats the catalog as read-only, except for the hierarchical
//! request shape which may insert brand-new catalog nodes inline. Nothing here
//! updates or deletes an existing catalog row.

use super::{Database, new_id, now_ms, optional};
use crate::types::{CatalogGroup, CatalogSuper, Template};
use anyhow::{Result, anyhow};
use rusqlite::{Connection, Row, params};
use serde::{Deserialize, Serialize};

/// Input for a new catalog super.
#[derive(Debug, Clone, Default)]
pub struct NewCatalogSuper {
    /// Explicit id; a fresh one is generated when absent.
    pub id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub rank: i64,
}

/// Input for a new catalog group.
#[derive(Debug, Clone, Default)]
pub struct NewCatalogGroup {
    pub id: Option<String>,
    pub super_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub rank: i64,
}

/// Input for a new template.
///
/// `parent_template_id` writes only the forward reference; use
/// [`Database::link_subtask`] for the inverse side.
#[derive(Debug, Clone, Default)]
pub struct NewTemplate {
    pub id: Option<String>,
    pub group_id: Option<String>,
    pub parent_template_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub rank: i64,
    pub estimated_hours: Option<f64>,
}

fn parse_super_row(row: &Row) -> rusqlite::Result<CatalogSuper> {
    Ok(CatalogSuper {
        id: row.get("id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        rank: row.get("rank")?,
    })
}

fn parse_group_row(row: &Row) -> rusqlite::Result<CatalogGroup> {
    Ok(CatalogGroup {
        id: row.get("id")?,
        super_id: row.get("super_id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        rank: row.get("rank")?,
    })
}

fn parse_template_row(row: &Row) -> rusqlite::Result<Template> {
    Ok(Template {
        id: row.get("id")?,
        group_id: row.get("group_id")?,
        parent_template_id: row.get("parent_template_id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        rank: row.get("rank")?,
        estimated_hours: row.get("estimated_hours")?,
        sub_template_ids: Vec::new(),
    })
}

pub(crate) fn get_catalog_super_internal(
    conn: &Connection,
    super_id: &str,
) -> rusqlite::Result<Option<CatalogSuper>> {
    optional(conn.query_row(
        "SELECT * FROM catalog_supers WHERE id = ?1",
        params![super_id],
        parse_super_row,
    ))
}

pub(crate) fn get_catalog_group_internal(
    conn: &Connection,
    group_id: &str,
) -> rusqlite::Result<Option<CatalogGroup>> {
    optional(conn.query_row(
        "SELECT * FROM catalog_groups WHERE id = ?1",
        params![group_id],
        parse_group_row,
    ))
}

/// Load a template together with its stored subtask list.
pub(crate) fn get_template_internal(
    conn: &Connection,
    template_id: &str,
) -> rusqlite::Result<Option<Template>> {
    let template = optional(conn.query_row(
        "SELECT * FROM templates WHERE id = ?1",
        params![template_id],
        parse_template_row,
    ))?;

    match template {
        Some(mut template) => {
            template.sub_template_ids = get_sub_template_ids_internal(conn, template_id)?;
            Ok(Some(template))
        }
        None => Ok(None),
    }
}

/// Subtask ids declared on the inverse side, ordered by rank then name.
pub(crate) fn get_sub_template_ids_internal(
    conn: &Connection,
    template_id: &str,
) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT t.id FROM template_subtasks s
         INNER JOIN templates t ON t.id = s.subtask_id
         WHERE s.template_id = ?1
         ORDER BY t.rank, t.name",
    )?;
    let ids = stmt
        .query_map(params![template_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(ids)
}

pub(crate) fn insert_catalog_super_internal(
    conn: &Connection,
    input: &NewCatalogSuper,
) -> rusqlite::Result<CatalogSuper> {
    let id = input.id.clone().unwrap_or_else(new_id);
    conn.execute(
        "INSERT INTO catalog_supers (id, name, description, rank, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![&id, &input.name, &input.description, input.rank, now_ms()],
    )?;
    Ok(CatalogSuper {
        id,
        name: input.name.clone(),
        description: input.description.clone(),
        rank: input.rank,
    })
}

pub(crate) fn insert_catalog_group_internal(
    conn: &Connection,
    input: &NewCatalogGroup,
) -> rusqlite::Result<CatalogGroup> {
    let id = input.id.clone().unwrap_or_else(new_id);
    conn.execute(
        "INSERT INTO catalog_groups (id, super_id, name, description, rank, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            &id,
            &input.super_id,
            &input.name,
            &input.description,
            input.rank,
            now_ms()
        ],
    )?;
    Ok(CatalogGroup {
        id,
        super_id: input.super_id.clone(),
        name: input.name.clone(),
        description: input.description.clone(),
        rank: input.rank,
    })
}

pub(crate) fn insert_template_internal(
    conn: &Connection,
    input: &NewTemplate,
) -> rusqlite::Result<Template> {
    let id = input.id.clone().unwrap_or_else(new_id);
    conn.execute(
        "INSERT INTO templates (
            id, group_id, parent_template_id, name, description, rank, estimated_hours, created_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            &id,
            &input.group_id,
            &input.parent_template_id,
            &input.name,
            &input.description,
            input.rank,
            input.estimated_hours,
            now_ms()
        ],
    )?;
    Ok(Template {
        id,
        group_id: input.group_id.clone(),
        parent_template_id: input.parent_template_id.clone(),
        name: input.name.clone(),
        description: input.description.clone(),
        rank: input.rank,
        estimated_hours: input.estimated_hours,
        sub_template_ids: Vec::new(),
    })
}

pub(crate) fn link_subtask_internal(
    conn: &Connection,
    template_id: &str,
    subtask_id: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO template_subtasks (template_id, subtask_id) VALUES (?1, ?2)",
        params![template_id, subtask_id],
    )?;
    Ok(())
}

impl Database {
    /// Create a catalog super.
    pub fn create_catalog_super(&self, input: NewCatalogSuper) -> Result<CatalogSuper> {
        self.with_conn(|conn| Ok(insert_catalog_super_internal(conn, &input)?))
    }

    /// Create a catalog group, optionally under a super.
    pub fn create_catalog_group(&self, input: NewCatalogGroup) -> Result<CatalogGroup> {
        self.with_conn(|conn| Ok(insert_catalog_group_internal(conn, &input)?))
    }

    /// Create a template. Only the forward parent reference is written.
    pub fn create_template(&self, input: NewTemplate) -> Result<Template> {
        self.with_conn(|conn| Ok(insert_template_internal(conn, &input)?))
    }

    /// Record `subtask_id` in the subtask list of `template_id`.
    pub fn link_subtask(&self, template_id: &str, subtask_id: &str) -> Result<()> {
        self.with_conn(|conn| Ok(link_subtask_internal(conn, template_id, subtask_id)?))
    }

    /// Get a catalog super by ID.
    pub fn get_catalog_super(&self, super_id: &str) -> Result<Option<CatalogSuper>> {
        self.with_conn(|conn| Ok(get_catalog_super_internal(conn, super_id)?))
    }

    /// Get a catalog group by ID.
    pub fn get_catalog_group(&self, group_id: &str) -> Result<Option<CatalogGroup>> {
        self.with_conn(|conn| Ok(get_catalog_group_internal(conn, group_id)?))
    }

    /// Get a template by ID, including its declared subtask list.
    pub fn get_template(&self, template_id: &str) -> Result<Option<Template>> {
        self.with_conn(|conn| Ok(get_template_internal(conn, template_id)?))
    }

    /// Count rows in the catalog tables: (supers, groups, templates).
    pub fn catalog_counts(&self) -> Result<(usize, usize, usize)> {
        self.with_conn(|conn| {
            let count = |table: &str| -> rusqlite::Result<usize> {
                conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                    row.get::<_, i64>(0)
                })
                .map(|n| n as usize)
            };
            Ok((
                count("catalog_supers")?,
                count("catalog_groups")?,
                count("templates")?,
            ))
        })
    }

    /// Load a catalog tree into the database, keeping both subtask directions
    /// in sync. Existing ids are rejected rather than overwritten.
    pub fn load_catalog(&self, seed: &CatalogSeed) -> Result<CatalogLoadStats> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let mut stats = CatalogLoadStats::default();

            for super_seed in &seed.supers {
                if let Some(ref id) = super_seed.id {
                    if get_catalog_super_internal(&tx, id)?.is_some() {
                        return Err(anyhow!("Catalog super already exists: {}", id));
                    }
                }
                let catalog_super = insert_catalog_super_internal(
                    &tx,
                    &NewCatalogSuper {
                        id: super_seed.id.clone(),
                        name: super_seed.name.clone(),
                        description: super_seed.description.clone(),
                        rank: super_seed.rank,
                    },
                )?;
                stats.supers += 1;

                for group_seed in &super_seed.groups {
                    let group = insert_catalog_group_internal(
                        &tx,
                        &NewCatalogGroup {
                            id: group_seed.id.clone(),
                            super_id: Some(catalog_super.id.clone()),
                            name: group_seed.name.clone(),
                            description: group_seed.description.clone(),
                            rank: group_seed.rank,
                        },
                    )?;
                    stats.groups += 1;

                    for template_seed in &group_seed.templates {
                        insert_template_seed(&tx, template_seed, &group.id, None, &mut stats)?;
                    }
                }
            }

            tx.commit()?;
            tracing::info!(
                supers = stats.supers,
                groups = stats.groups,
                templates = stats.templates,
                "catalog loaded"
            );
            Ok(stats)
        })
    }
}

/// Insert a template seed and, recursively, its subtasks. Every level writes
/// both the child's `parent_template_id` and the parent's junction row.
fn insert_template_seed(
    conn: &Connection,
    seed: &TemplateSeed,
    group_id: &str,
    parent_id: Option<&str>,
    stats: &mut CatalogLoadStats,
) -> rusqlite::Result<()> {
    let template = insert_template_internal(conn, &seed.to_new(Some(group_id), parent_id))?;
    if let Some(parent_id) = parent_id {
        link_subtask_internal(conn, parent_id, &template.id)?;
    }
    stats.templates += 1;

    for subtask_seed in &seed.subtasks {
        insert_template_seed(conn, subtask_seed, group_id, Some(&template.id), stats)?;
    }
    Ok(())
}

/// A catalog tree as read by `load-catalog` (YAML or JSON).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogSeed {
    #[serde(default)]
    pub supers: Vec<SuperSeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuperSeed {
    pub id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub rank: i64,
    #[serde(default)]
    pub groups: Vec<GroupSeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSeed {
    pub id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub rank: i64,
    #[serde(default)]
    pub templates: Vec<TemplateSeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSeed {
    pub id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub rank: i64,
    pub estimated_hours: Option<f64>,
    #[serde(default)]
    pub subtasks: Vec<TemplateSeed>,
}

impl TemplateSeed {
    fn to_new(&self, group_id: Option<&str>, parent_id: Option<&str>) -> NewTemplate {
        NewTemplate {
            id: self.id.clone(),
            group_id: group_id.map(String::from),
            parent_template_id: parent_id.map(String::from),
            name: self.name.clone(),
            description: self.description.clone(),
            rank: self.rank,
            estimated_hours: self.estimated_hours,
        }
    }
}

/// Row counts written by [`Database::load_catalog`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogLoadStats {
    pub supers: usize,
    pub groups: usize,
    pub templates: usize,
}
