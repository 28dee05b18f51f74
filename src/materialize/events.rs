//! Structured materialization events.
//!
//! Each materialized, reused or skipped node produces exactly one event. The
//! event is written to `tracing` at a level matching its kind and kept in an
//! ordered log that is returned to the caller.

use super::adapter::NodeKind;
use crate::types::ItemType;
use serde::Serialize;

/// Why a work item was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemOrigin {
    /// Listed in the request.
    Explicit,
    /// Parent of a listed subtask, pulled in so the subtask has a parent.
    OnDemand,
    /// Catalog subtask of a listed template, not listed itself.
    Backfill,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MaterializeEvent {
    CatalogNodeCreated {
        kind: NodeKind,
        client_id: String,
        catalog_id: String,
        name: String,
    },
    SuperMaterialized {
        project_super_id: String,
        original_super_id: String,
        name: String,
        created: bool,
    },
    GroupMaterialized {
        project_group_id: String,
        original_group_id: String,
        super_project_id: String,
        name: String,
        created: bool,
    },
    WorkItemCreated {
        work_item_id: String,
        template_id: String,
        name: String,
        item_type: ItemType,
        parent_work_item_id: Option<String>,
        origin: WorkItemOrigin,
    },
    SubtaskSkipped {
        template_id: String,
        name: String,
        reason: String,
    },
}

/// Ordered event sink for one materialization call.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<MaterializeEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trace and record an event.
    pub fn emit(&mut self, event: MaterializeEvent) {
        match &event {
            MaterializeEvent::CatalogNodeCreated {
                kind,
                client_id,
                catalog_id,
                name,
            } => {
                tracing::info!(kind = kind.as_str(), %client_id, %catalog_id, %name, "catalog node created");
            }
            MaterializeEvent::SuperMaterialized {
                project_super_id,
                original_super_id,
                name,
                created,
            } => {
                if *created {
                    tracing::info!(%project_super_id, %original_super_id, %name, "project super created");
                } else {
                    tracing::debug!(%project_super_id, %original_super_id, "project super reused");
                }
            }
            MaterializeEvent::GroupMaterialized {
                project_group_id,
                original_group_id,
                name,
                created,
                ..
            } => {
                if *created {
                    tracing::info!(%project_group_id, %original_group_id, %name, "project group created");
                } else {
                    tracing::debug!(%project_group_id, %original_group_id, "project group reused");
                }
            }
            MaterializeEvent::WorkItemCreated {
                work_item_id,
                template_id,
                name,
                item_type,
                origin,
                ..
            } => {
                tracing::info!(
                    %work_item_id,
                    %template_id,
                    %name,
                    item_type = item_type.as_str(),
                    origin = ?origin,
                    "work item created"
                );
            }
            MaterializeEvent::SubtaskSkipped {
                template_id,
                name,
                reason,
            } => {
                tracing::warn!(%template_id, %name, %reason, "subtask skipped");
            }
        }
        self.events.push(event);
    }

    pub fn events(&self) -> &[MaterializeEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<MaterializeEvent> {
        self.events
    }
}
