//! Read-only planning of a materialization call.
//!
//! Everything that decides *what* gets written is settled here, before the
//! first write: existence checks, relationship resolution, root/child
//! partitioning, on-demand parents and backfill. The resulting [`Plan`] lists
//! work items in an order where every parent precedes its children.

use super::adapter::{NameSuffixes, Node, NodeKind, NormalizedBatch};
use super::events::WorkItemOrigin;
use super::nodes::apply_suffix;
use super::relations::{self, RelationshipMap};
use super::validate::ProposedName;
use crate::db::catalog::{get_catalog_group_internal, get_catalog_super_internal, get_template_internal};
use crate::db::projects::get_project_internal;
use crate::db::work_items::find_root_work_item_internal;
use crate::error::{Entity, MaterializeError, MaterializeResult};
use crate::types::{ItemType, Template};
use rusqlite::Connection;
use std::collections::{HashMap, HashSet};

/// One work item the call will create.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedWorkItem {
    /// Catalog template id, or a client placeholder for new templates.
    pub template_key: String,
    /// Final name, suffix applied.
    pub name: String,
    pub description: Option<String>,
    pub estimated_hours: Option<f64>,
    pub rank: i64,
    pub item_type: ItemType,
    pub origin: WorkItemOrigin,
    pub parent_template_key: Option<String>,
    /// Set when the parent was materialized by an earlier call.
    pub parent_work_item_id: Option<String>,
    /// `None` for tasks that inherit their parent's group.
    pub group_key: Option<String>,
    pub super_key: String,
}

/// A subtask that will not be materialized, and why.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedSubtask {
    pub template_id: String,
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct Plan {
    pub project_id: String,
    /// Supers to materialize, by catalog id or placeholder.
    pub super_keys: Vec<String>,
    /// Catalog rows to insert first: supers, then groups, then templates,
    /// then subtask templates.
    pub new_catalog_nodes: Vec<Node>,
    /// Work items in creation order.
    pub work_items: Vec<PlannedWorkItem>,
    pub skipped: Vec<SkippedSubtask>,
    pub suffixes: NameSuffixes,
    pub explicit_selection_only: bool,
    name_overrides: HashMap<(NodeKind, String), String>,
}

impl Plan {
    /// Names to run through the collision check.
    pub fn proposed_names(&self) -> Vec<ProposedName> {
        self.work_items
            .iter()
            .map(|w| ProposedName::new(w.template_key.clone(), w.name.clone()))
            .collect()
    }

    /// Request-supplied name for a super or group, if any.
    pub fn name_override(&self, kind: NodeKind, key: &str) -> Option<&str> {
        self.name_overrides
            .get(&(kind, key.to_string()))
            .map(String::as_str)
    }
}

/// A subtask waiting for its parent to be planned.
struct Candidate<'a> {
    node: &'a Node,
    template: Option<&'a Template>,
    parent_key: Option<String>,
}

struct Planner<'a> {
    conn: &'a Connection,
    batch: &'a NormalizedBatch,
    relations: &'a RelationshipMap,
    default_super: String,
    planned: HashSet<String>,
    /// Parent template → work item already in the project.
    attached: HashMap<String, String>,
    checked_groups: HashSet<String>,
    new_groups: HashSet<String>,
    work_items: Vec<PlannedWorkItem>,
    skipped: Vec<SkippedSubtask>,
}

pub fn build_plan(
    conn: &Connection,
    batch: &NormalizedBatch,
    backfill_default: bool,
) -> MaterializeResult<Plan> {
    if get_project_internal(conn, &batch.project_id)?.is_none() {
        return Err(MaterializeError::not_found(Entity::Project, batch.project_id.clone()));
    }

    let new_supers: HashSet<String> = new_ids(batch, &[NodeKind::Super]);
    let new_groups: HashSet<String> = new_ids(batch, &[NodeKind::Group]);

    // Supers
    let super_keys: Vec<String> = match batch.catalog_super_id {
        Some(ref id) => vec![id.clone()],
        None => {
            let mut keys = Vec::new();
            for node in batch.nodes_of(NodeKind::Super) {
                if !keys.contains(&node.id) {
                    keys.push(node.id.clone());
                }
            }
            keys
        }
    };
    let Some(default_super) = super_keys.first().cloned() else {
        return Err(MaterializeError::missing_field("catalogSuperId"));
    };
    for key in &super_keys {
        if !new_supers.contains(key) && get_catalog_super_internal(conn, key)?.is_none() {
            return Err(MaterializeError::not_found(Entity::CatalogSuper, key.clone()));
        }
    }

    // Explicit group nodes
    for node in batch.nodes_of(NodeKind::Group) {
        if !node.is_new_in_catalog && get_catalog_group_internal(conn, &node.id)?.is_none() {
            return Err(MaterializeError::not_found(Entity::CatalogGroup, node.id.clone()));
        }
    }

    // Templates (resolve fails with not-found for unknown ids)
    let mut existing_template_ids: Vec<String> = Vec::new();
    for node in batch.nodes.iter().filter(|n| n.is_work_item() && !n.is_new_in_catalog) {
        if !existing_template_ids.contains(&node.id) {
            existing_template_ids.push(node.id.clone());
        }
    }
    let relations = relations::resolve(conn, &existing_template_ids)?;

    let explicit_selection_only = batch
        .explicit_selection_only
        .unwrap_or(!backfill_default);

    let mut planner = Planner {
        conn,
        batch,
        relations: &relations,
        default_super,
        planned: HashSet::new(),
        attached: HashMap::new(),
        checked_groups: HashSet::new(),
        new_groups,
        work_items: Vec::new(),
        skipped: Vec::new(),
    };
    planner.plan_roots_and_subtasks()?;
    if !explicit_selection_only {
        planner.plan_backfill()?;
    }

    let mut new_catalog_nodes: Vec<Node> = batch
        .nodes
        .iter()
        .filter(|n| n.is_new_in_catalog)
        .cloned()
        .collect();
    new_catalog_nodes.sort_by_key(|n| match n.kind {
        NodeKind::Super => 0,
        NodeKind::Group => 1,
        NodeKind::Template => 2,
        NodeKind::Subtask => 3,
    });

    let name_overrides = batch
        .nodes
        .iter()
        .filter(|n| matches!(n.kind, NodeKind::Super | NodeKind::Group) && !n.is_new_in_catalog)
        .map(|n| ((n.kind, n.id.clone()), n.name.clone()))
        .collect();

    let Planner {
        work_items,
        skipped,
        ..
    } = planner;

    tracing::debug!(
        project_id = %batch.project_id,
        supers = super_keys.len(),
        work_items = work_items.len(),
        skipped = skipped.len(),
        new_catalog_nodes = new_catalog_nodes.len(),
        explicit_selection_only,
        "materialization planned"
    );

    Ok(Plan {
        project_id: batch.project_id.clone(),
        super_keys,
        new_catalog_nodes,
        work_items,
        skipped,
        suffixes: batch.suffixes.clone(),
        explicit_selection_only,
        name_overrides,
    })
}

fn cycle_reason(node: &Node, parent_key: Option<&str>) -> String {
    match parent_key {
        Some(p) if p == node.id => "subtask lists itself as its parent template".to_string(),
        Some(p) => format!("parent template {} forms a cycle with other listed subtasks", p),
        None => "no parent template is recorded for this subtask".to_string(),
    }
}

fn new_ids(batch: &NormalizedBatch, kinds: &[NodeKind]) -> HashSet<String> {
    batch
        .nodes
        .iter()
        .filter(|n| n.is_new_in_catalog && kinds.contains(&n.kind))
        .map(|n| n.id.clone())
        .collect()
}

impl<'a> Planner<'a> {
    fn template_suffix(&self) -> Option<&'a str> {
        self.batch.suffixes.template_suffix.as_deref()
    }

    fn existing_template(&self, node: &Node) -> Option<&'a Template> {
        if node.is_new_in_catalog {
            None
        } else {
            self.relations.template(&node.id)
        }
    }

    /// Groups referenced by work items must exist unless created inline.
    fn check_group(&mut self, group_key: &str) -> MaterializeResult<()> {
        if self.new_groups.contains(group_key) || self.checked_groups.contains(group_key) {
            return Ok(());
        }
        if get_catalog_group_internal(self.conn, group_key)?.is_none() {
            return Err(MaterializeError::not_found(Entity::CatalogGroup, group_key.to_string()));
        }
        self.checked_groups.insert(group_key.to_string());
        Ok(())
    }

    fn push(&mut self, item: PlannedWorkItem) -> MaterializeResult<()> {
        if let Some(ref group_key) = item.group_key {
            self.check_group(group_key)?;
        }
        self.planned.insert(item.template_key.clone());
        self.work_items.push(item);
        Ok(())
    }

    fn from_node(
        &self,
        node: &Node,
        template: Option<&Template>,
        item_type: ItemType,
        parent_template_key: Option<String>,
    ) -> PlannedWorkItem {
        PlannedWorkItem {
            template_key: node.id.clone(),
            name: apply_suffix(&node.name, self.template_suffix()),
            description: node
                .description
                .clone()
                .or_else(|| template.and_then(|t| t.description.clone())),
            estimated_hours: node
                .estimated_hours
                .or_else(|| template.and_then(|t| t.estimated_hours)),
            rank: node.rank.or_else(|| template.map(|t| t.rank)).unwrap_or(0),
            item_type,
            origin: WorkItemOrigin::Explicit,
            parent_work_item_id: parent_template_key
                .as_ref()
                .and_then(|p| self.attached.get(p).cloned()),
            parent_template_key,
            group_key: node
                .group_id
                .clone()
                .or_else(|| template.and_then(|t| t.group_id.clone())),
            super_key: node
                .super_id
                .clone()
                .unwrap_or_else(|| self.default_super.clone()),
        }
    }

    fn from_template(
        &self,
        template: &Template,
        item_type: ItemType,
        origin: WorkItemOrigin,
        parent_template_key: Option<String>,
        super_key: &str,
    ) -> PlannedWorkItem {
        PlannedWorkItem {
            template_key: template.id.clone(),
            name: apply_suffix(&template.name, self.template_suffix()),
            description: template.description.clone(),
            estimated_hours: template.estimated_hours,
            rank: template.rank,
            item_type,
            origin,
            parent_template_key,
            parent_work_item_id: None,
            group_key: template.group_id.clone(),
            super_key: super_key.to_string(),
        }
    }

    /// Roots first, then listed subtasks; parents missing from the request
    /// are pulled in on demand.
    fn plan_roots_and_subtasks(&mut self) -> MaterializeResult<()> {
        let batch = self.batch;
        let relations = self.relations;
        let mut pending: Vec<Candidate<'a>> = Vec::new();

        for node in batch.nodes_of(NodeKind::Template) {
            let template = self.existing_template(node);

            // Catalog children listed as templates are handled as subtasks
            if template.is_some() && !relations.is_root(&node.id) {
                pending.push(Candidate {
                    node,
                    template,
                    parent_key: relations.parent_of(&node.id).map(String::from),
                });
                continue;
            }

            let item = self.from_node(node, template, ItemType::Story, None);
            if item.group_key.is_none() {
                return Err(MaterializeError::invalid_value(
                    format!("{}.groupId", node.id),
                    "template does not belong to a catalog group",
                ));
            }
            self.push(item)?;
        }

        for node in batch.nodes_of(NodeKind::Subtask) {
            let template = self.existing_template(node);
            let parent_key = node
                .parent_id
                .clone()
                .or_else(|| template.and_then(|t| t.parent_template_id.clone()))
                .or_else(|| relations.parent_of(&node.id).map(String::from));
            pending.push(Candidate {
                node,
                template,
                parent_key,
            });
        }

        while !pending.is_empty() {
            // Everything whose parent is already planned, in request order
            let mut progressed = false;
            let mut waiting = Vec::new();
            for candidate in pending {
                let ready = candidate
                    .parent_key
                    .as_ref()
                    .is_some_and(|p| self.planned.contains(p) || self.attached.contains_key(p));
                if ready {
                    let item = self.from_node(
                        candidate.node,
                        candidate.template,
                        ItemType::Task,
                        candidate.parent_key.clone(),
                    );
                    self.push(item)?;
                    progressed = true;
                } else {
                    waiting.push(candidate);
                }
            }
            pending = waiting;
            if progressed || pending.is_empty() {
                continue;
            }

            // Stuck: settle one candidate whose parent is not itself waiting
            let free = pending.iter().position(|c| {
                c.parent_key
                    .as_ref()
                    .is_none_or(|p| !pending.iter().any(|o| &o.node.id == p))
            });
            match free {
                Some(index) => {
                    let candidate = pending.remove(index);
                    self.plan_parent_on_demand(candidate)?;
                }
                None => {
                    // Every remaining parent is itself waiting: a cycle
                    for candidate in std::mem::take(&mut pending) {
                        let reason = cycle_reason(candidate.node, candidate.parent_key.as_deref());
                        self.skip(candidate.node, reason);
                    }
                }
            }
        }

        Ok(())
    }

    /// Attach to the parent's existing work item, materialize the parent from
    /// the catalog, or skip the subtask.
    fn plan_parent_on_demand(&mut self, candidate: Candidate<'a>) -> MaterializeResult<()> {
        let node = candidate.node;
        let Some(parent_key) = candidate.parent_key.clone() else {
            self.skip(node, "no parent template is recorded for this subtask".to_string());
            return Ok(());
        };
        if parent_key == node.id {
            self.skip(node, cycle_reason(node, Some(&parent_key)));
            return Ok(());
        }

        if let Some(existing) =
            find_root_work_item_internal(self.conn, &self.batch.project_id, &parent_key)?
        {
            tracing::debug!(
                template_id = %parent_key,
                work_item_id = %existing.id,
                "parent already materialized, attaching subtask"
            );
            self.attached.insert(parent_key.clone(), existing.id);
            let item = self.from_node(node, candidate.template, ItemType::Task, Some(parent_key));
            return self.push(item);
        }

        let parent = match self.relations.template(&parent_key) {
            Some(t) => Some(t.clone()),
            None => get_template_internal(self.conn, &parent_key)?,
        };
        let Some(parent) = parent else {
            self.skip(
                node,
                format!("parent template {} could not be resolved", parent_key),
            );
            return Ok(());
        };
        if parent.group_id.is_none() {
            self.skip(
                node,
                format!("parent template {} does not belong to a catalog group", parent_key),
            );
            return Ok(());
        }

        let super_key = node
            .super_id
            .clone()
            .unwrap_or_else(|| self.default_super.clone());
        let parent_item =
            self.from_template(&parent, ItemType::Story, WorkItemOrigin::OnDemand, None, &super_key);
        self.push(parent_item)?;

        let item = self.from_node(node, candidate.template, ItemType::Task, Some(parent_key));
        self.push(item)
    }

    fn skip(&mut self, node: &Node, reason: String) {
        self.skipped.push(SkippedSubtask {
            template_id: node.id.clone(),
            name: node.name.clone(),
            reason,
        });
    }

    /// Catalog subtasks of explicitly listed roots that the request left out.
    fn plan_backfill(&mut self) -> MaterializeResult<()> {
        let relations = self.relations;
        let roots: Vec<PlannedWorkItem> = self
            .work_items
            .iter()
            .filter(|w| w.item_type == ItemType::Story && w.origin == WorkItemOrigin::Explicit)
            .cloned()
            .collect();

        for root in roots {
            for child_id in relations.children_of(&root.template_key) {
                if self.planned.contains(child_id) {
                    continue;
                }
                let Some(child) = relations.template(child_id) else {
                    continue;
                };
                let mut item = self.from_template(
                    child,
                    ItemType::Task,
                    WorkItemOrigin::Backfill,
                    Some(root.template_key.clone()),
                    &root.super_key,
                );
                if item.group_key.is_none() {
                    item.group_key = root.group_key.clone();
                }
                self.push(item)?;
            }
        }
        Ok(())
    }
}
