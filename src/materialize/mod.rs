//! Template-to-project materialization.
//!
//! A call runs in one unit of work:
//!
//! 1. normalize the request shape ([`adapter`])
//! 2. plan: existence checks, relationship resolution, root/child partition,
//!    on-demand parents and backfill ([`plan`], [`relations`])
//! 3. reject name collisions ([`validate`])
//! 4. insert catalog nodes the request introduces
//! 5. find-or-create project supers and groups ([`nodes`])
//! 6. create work items, parents before children
//!
//! Any error rolls the whole call back.

pub mod adapter;
pub mod events;
pub mod nodes;
pub mod plan;
pub mod relations;
pub mod validate;

use crate::config::MaterializeConfig;
use crate::db::catalog::{
    NewCatalogGroup, NewCatalogSuper, NewTemplate, get_catalog_group_internal,
    get_catalog_super_internal, insert_catalog_group_internal, insert_catalog_super_internal,
    insert_template_internal, link_subtask_internal,
};
use crate::db::work_items::{NewWorkItem, get_work_item_internal, insert_work_item_internal};
use crate::db::{Database, UnitOfWork};
use crate::error::{Entity, MaterializeError, MaterializeResult};
use crate::types::{ItemType, ProjectGroup, ProjectSuper, WorkItem};
use adapter::{NodeKind, NormalizedBatch, PayloadFormat};
use events::{EventLog, MaterializeEvent, WorkItemOrigin};
use plan::Plan;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

/// A work item created by a call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedWorkItem {
    pub work_item: WorkItem,
    pub template_id: String,
    pub origin: WorkItemOrigin,
}

/// Everything a materialization call did.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterializeOutcome {
    pub project_id: String,
    pub format: PayloadFormat,
    /// Project supers in request order, created or reused.
    pub super_project_ids: Vec<String>,
    pub work_items: Vec<CreatedWorkItem>,
    pub warnings: Vec<String>,
    pub events: Vec<MaterializeEvent>,
    /// `false` for previews, which are rolled back.
    pub committed: bool,
}

impl MaterializeOutcome {
    pub fn work_item_ids(&self) -> Vec<String> {
        self.work_items
            .iter()
            .map(|w| w.work_item.id.clone())
            .collect()
    }

    fn count(&self, item_type: ItemType) -> usize {
        self.work_items
            .iter()
            .filter(|w| w.work_item.item_type == item_type)
            .count()
    }

    pub fn summary(&self) -> String {
        let verb = if self.committed {
            "Materialized"
        } else {
            "Would materialize"
        };
        let mut message = format!(
            "{} {} work items ({} stories, {} tasks) into project {}",
            verb,
            self.work_items.len(),
            self.count(ItemType::Story),
            self.count(ItemType::Task),
            self.project_id
        );
        if !self.warnings.is_empty() {
            message.push_str(&format!("; {} subtasks skipped", self.warnings.len()));
        }
        message
    }

    /// Success body in the shape the request arrived in.
    pub fn to_response(&self) -> MaterializeResponse {
        let (super_project_id, super_project_ids) = match self.format {
            PayloadFormat::Hierarchical => (None, Some(self.super_project_ids.clone())),
            PayloadFormat::Legacy | PayloadFormat::Tagged => {
                (self.super_project_ids.first().cloned(), None)
            }
        };
        MaterializeResponse {
            success: true,
            message: self.summary(),
            super_project_id,
            super_project_ids,
            work_item_ids: self.work_item_ids(),
            warnings: self.warnings.clone(),
            dry_run: !self.committed,
        }
    }
}

/// Success body returned to callers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterializeResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub super_project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub super_project_ids: Option<Vec<String>>,
    pub work_item_ids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub dry_run: bool,
}

/// Render a call result as the JSON body a client receives.
pub fn respond(result: &MaterializeResult<MaterializeOutcome>) -> Value {
    let body = match result {
        Ok(outcome) => serde_json::to_value(outcome.to_response()),
        Err(err) => serde_json::to_value(err.to_response()),
    };
    body.unwrap_or_else(|e| {
        serde_json::json!({
            "success": false,
            "reason": "storage_error",
            "message": format!("Failed to serialize response: {}", e),
        })
    })
}

impl Database {
    /// Normalize `payload` and materialize it.
    pub fn materialize(
        &self,
        payload: &Value,
        settings: &MaterializeConfig,
    ) -> MaterializeResult<MaterializeOutcome> {
        let batch = adapter::normalize(payload)?;
        self.materialize_batch(&batch, settings)
    }

    /// Materialize an already-normalized batch.
    pub fn materialize_batch(
        &self,
        batch: &NormalizedBatch,
        settings: &MaterializeConfig,
    ) -> MaterializeResult<MaterializeOutcome> {
        let outcome = self.in_unit_of_work(|uow| run(uow, batch, settings))?;
        tracing::info!(
            project_id = %outcome.project_id,
            work_items = outcome.work_items.len(),
            warnings = outcome.warnings.len(),
            "materialization committed"
        );
        Ok(outcome)
    }

    /// Run the full pipeline and roll it back, reporting what would happen.
    pub fn preview_materialize(
        &self,
        payload: &Value,
        settings: &MaterializeConfig,
    ) -> MaterializeResult<MaterializeOutcome> {
        let batch = adapter::normalize(payload)?;
        let mut outcome = self.in_discarded_unit_of_work(|uow| run(uow, &batch, settings))?;
        outcome.committed = false;
        Ok(outcome)
    }
}

/// Run the pipeline inside a caller-owned unit of work.
///
/// The caller decides whether to commit. The returned outcome reports
/// `committed: true`.
pub fn run(
    uow: &UnitOfWork<'_>,
    batch: &NormalizedBatch,
    settings: &MaterializeConfig,
) -> MaterializeResult<MaterializeOutcome> {
    let plan = plan::build_plan(uow.conn(), batch, settings.backfill_subtasks)?;
    validate::validate_names(uow.conn(), &batch.project_id, &plan.proposed_names())?;
    Executor::new(uow, batch, &plan, settings).execute()
}

/// Applies a validated plan.
struct Executor<'a, 'conn> {
    uow: &'a UnitOfWork<'conn>,
    batch: &'a NormalizedBatch,
    plan: &'a Plan,
    settings: &'a MaterializeConfig,
    log: EventLog,
    /// Client placeholder → catalog id, for nodes inserted by this call.
    catalog_ids: HashMap<String, String>,
    project_supers: HashMap<String, ProjectSuper>,
    project_groups: HashMap<String, ProjectGroup>,
    work_items: HashMap<String, WorkItem>,
}

impl<'a, 'conn> Executor<'a, 'conn> {
    fn new(
        uow: &'a UnitOfWork<'conn>,
        batch: &'a NormalizedBatch,
        plan: &'a Plan,
        settings: &'a MaterializeConfig,
    ) -> Self {
        Self {
            uow,
            batch,
            plan,
            settings,
            log: EventLog::new(),
            catalog_ids: HashMap::new(),
            project_supers: HashMap::new(),
            project_groups: HashMap::new(),
            work_items: HashMap::new(),
        }
    }

    fn catalog_id(&self, key: &str) -> String {
        self.catalog_ids
            .get(key)
            .cloned()
            .unwrap_or_else(|| key.to_string())
    }

    fn execute(mut self) -> MaterializeResult<MaterializeOutcome> {
        let plan = self.plan;
        for node in &plan.new_catalog_nodes {
            self.insert_catalog_node(node)?;
        }

        let mut super_project_ids = Vec::new();
        for key in &plan.super_keys {
            let project_super = self.ensure_super(key)?;
            super_project_ids.push(project_super.id);
        }

        let mut created = Vec::new();
        let mut warnings = Vec::new();
        for item in &plan.work_items {
            match self.create_work_item(item)? {
                Some(work_item) => created.push(CreatedWorkItem {
                    work_item,
                    template_id: self.catalog_id(&item.template_key),
                    origin: item.origin,
                }),
                None => warnings.push(format!(
                    "Subtask '{}' skipped: parent work item was not created",
                    item.name
                )),
            }
        }

        for skipped in &plan.skipped {
            warnings.push(format!("Subtask '{}' skipped: {}", skipped.name, skipped.reason));
            self.log.emit(MaterializeEvent::SubtaskSkipped {
                template_id: skipped.template_id.clone(),
                name: skipped.name.clone(),
                reason: skipped.reason.clone(),
            });
        }

        Ok(MaterializeOutcome {
            project_id: self.batch.project_id.clone(),
            format: self.batch.format,
            super_project_ids,
            work_items: created,
            warnings,
            events: self.log.into_events(),
            committed: true,
        })
    }

    /// Insert a catalog row for a node the request marked as new.
    fn insert_catalog_node(&mut self, node: &adapter::Node) -> MaterializeResult<()> {
        let uow = self.uow;
        let conn = uow.conn();
        let catalog_id = match node.kind {
            NodeKind::Super => {
                insert_catalog_super_internal(
                    conn,
                    &NewCatalogSuper {
                        id: None,
                        name: node.name.clone(),
                        description: node.description.clone(),
                        rank: node.rank.unwrap_or(0),
                    },
                )?
                .id
            }
            NodeKind::Group => {
                insert_catalog_group_internal(
                    conn,
                    &NewCatalogGroup {
                        id: None,
                        super_id: node.super_id.as_deref().map(|s| self.catalog_id(s)),
                        name: node.name.clone(),
                        description: node.description.clone(),
                        rank: node.rank.unwrap_or(0),
                    },
                )?
                .id
            }
            NodeKind::Template | NodeKind::Subtask => {
                let parent_id = match node.kind {
                    NodeKind::Subtask => node.parent_id.as_deref().map(|p| self.catalog_id(p)),
                    _ => None,
                };
                let template = insert_template_internal(
                    conn,
                    &NewTemplate {
                        id: None,
                        group_id: node.group_id.as_deref().map(|g| self.catalog_id(g)),
                        parent_template_id: parent_id.clone(),
                        name: node.name.clone(),
                        description: node.description.clone(),
                        rank: node.rank.unwrap_or(0),
                        estimated_hours: node.estimated_hours,
                    },
                )?;
                if let Some(ref parent_id) = parent_id {
                    link_subtask_internal(conn, parent_id, &template.id)?;
                }
                template.id
            }
        };

        self.log.emit(MaterializeEvent::CatalogNodeCreated {
            kind: node.kind,
            client_id: node.id.clone(),
            catalog_id: catalog_id.clone(),
            name: node.name.clone(),
        });
        self.catalog_ids.insert(node.id.clone(), catalog_id);
        Ok(())
    }

    fn ensure_super(&mut self, key: &str) -> MaterializeResult<ProjectSuper> {
        if let Some(existing) = self.project_supers.get(key) {
            return Ok(existing.clone());
        }

        let catalog_id = self.catalog_id(key);
        let mut catalog_super = get_catalog_super_internal(self.uow.conn(), &catalog_id)?
            .ok_or_else(|| MaterializeError::not_found(Entity::CatalogSuper, catalog_id.clone()))?;
        if let Some(name) = self.plan.name_override(NodeKind::Super, key) {
            catalog_super.name = name.to_string();
        }

        let materialized = nodes::materialize_super(
            self.uow,
            &catalog_super,
            &self.plan.project_id,
            self.plan.suffixes.super_suffix.as_deref(),
        )?;
        self.log.emit(MaterializeEvent::SuperMaterialized {
            project_super_id: materialized.value.id.clone(),
            original_super_id: catalog_id,
            name: materialized.value.name.clone(),
            created: materialized.created,
        });
        self.project_supers
            .insert(key.to_string(), materialized.value.clone());
        Ok(materialized.value)
    }

    fn ensure_group(&mut self, group_key: &str, super_key: &str) -> MaterializeResult<ProjectGroup> {
        let catalog_id = self.catalog_id(group_key);
        if let Some(existing) = self.project_groups.get(&catalog_id) {
            return Ok(existing.clone());
        }

        let project_super = self.ensure_super(super_key)?;
        let mut catalog_group = get_catalog_group_internal(self.uow.conn(), &catalog_id)?
            .ok_or_else(|| MaterializeError::not_found(Entity::CatalogGroup, catalog_id.clone()))?;
        if let Some(name) = self.plan.name_override(NodeKind::Group, group_key) {
            catalog_group.name = name.to_string();
        }

        let materialized = nodes::materialize_group(
            self.uow,
            &catalog_group,
            &project_super,
            &self.plan.project_id,
            self.plan.suffixes.group_suffix.as_deref(),
        )?;
        self.log.emit(MaterializeEvent::GroupMaterialized {
            project_group_id: materialized.value.id.clone(),
            original_group_id: catalog_id.clone(),
            super_project_id: materialized.value.super_project_id.clone(),
            name: materialized.value.name.clone(),
            created: materialized.created,
        });
        self.project_groups
            .insert(catalog_id, materialized.value.clone());
        Ok(materialized.value)
    }

    /// Create one planned work item. `None` when its parent is unavailable.
    fn create_work_item(
        &mut self,
        item: &plan::PlannedWorkItem,
    ) -> MaterializeResult<Option<WorkItem>> {
        let parent = match (&item.parent_work_item_id, &item.parent_template_key) {
            (Some(work_item_id), _) => Some(
                get_work_item_internal(self.uow.conn(), work_item_id)?.ok_or_else(|| {
                    MaterializeError::invalid_reference(format!(
                        "work item {} no longer exists",
                        work_item_id
                    ))
                })?,
            ),
            (None, Some(key)) => match self.work_items.get(key) {
                Some(parent) => Some(parent.clone()),
                None => {
                    let template_id = self.catalog_id(&item.template_key);
                    self.log.emit(MaterializeEvent::SubtaskSkipped {
                        template_id,
                        name: item.name.clone(),
                        reason: format!("parent work item for template {} was not created", key),
                    });
                    return Ok(None);
                }
            },
            (None, None) => None,
        };

        let group_project_id = match (&item.group_key, &parent) {
            (Some(group_key), _) => self.ensure_group(group_key, &item.super_key)?.id,
            (None, Some(parent)) => parent.group_project_id.clone(),
            (None, None) => {
                return Err(MaterializeError::invalid_value(
                    format!("{}.groupId", item.template_key),
                    "template does not belong to a catalog group",
                ));
            }
        };

        let template_id = self.catalog_id(&item.template_key);
        let work_item = insert_work_item_internal(
            self.uow.conn(),
            &NewWorkItem {
                project_id: self.plan.project_id.clone(),
                group_project_id,
                parent_work_item_id: parent.as_ref().map(|p| p.id.clone()),
                original_template_id: Some(template_id.clone()),
                name: item.name.clone(),
                description: item.description.clone(),
                rank: item.rank,
                estimated_hours: item.estimated_hours,
                item_type: item.item_type,
                status: self.settings.initial_status,
            },
        )?;

        self.log.emit(MaterializeEvent::WorkItemCreated {
            work_item_id: work_item.id.clone(),
            template_id,
            name: work_item.name.clone(),
            item_type: work_item.item_type,
            parent_work_item_id: work_item.parent_work_item_id.clone(),
            origin: item.origin,
        });
        self.work_items
            .insert(item.template_key.clone(), work_item.clone());
        Ok(Some(work_item))
    }
}
