//! Request shape normalization.
//!
//! Three client payload shapes are accepted. Each is translated into one
//! [`NormalizedBatch`] of typed [`Node`]s so the pipeline is written once.
//! Supporting another shape means adding a [`PayloadAdapter`] to
//! [`ADAPTERS`]; nothing downstream changes.
//!
//! Normalization is purely structural: no storage is touched here. Nodes that
//! the hierarchical shape marks as new carry `is_new_in_catalog` and get their
//! catalog rows inside the pipeline's unit of work.

use crate::error::{MaterializeError, MaterializeResult};
use serde::Serialize;
use serde_json::{Map, Value};

/// Which wire shape a request arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadFormat {
    Legacy,
    Tagged,
    Hierarchical,
}

/// Level of a node in the catalog hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Super,
    Group,
    Template,
    Subtask,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Super => "super",
            NodeKind::Group => "group",
            NodeKind::Template => "template",
            NodeKind::Subtask => "subtask",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "super" => Some(NodeKind::Super),
            "group" => Some(NodeKind::Group),
            "template" => Some(NodeKind::Template),
            "subtask" => Some(NodeKind::Subtask),
            _ => None,
        }
    }
}

/// One typed node of a normalized request.
///
/// `id` is a catalog id, or a client-chosen placeholder when
/// `is_new_in_catalog` is set.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub kind: NodeKind,
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub estimated_hours: Option<f64>,
    pub rank: Option<i64>,
    /// Parent template, for subtasks.
    pub parent_id: Option<String>,
    pub group_id: Option<String>,
    pub super_id: Option<String>,
    pub is_new_in_catalog: bool,
}

impl Node {
    fn new(kind: NodeKind, id: String, name: String) -> Self {
        Self {
            kind,
            id,
            name,
            description: None,
            estimated_hours: None,
            rank: None,
            parent_id: None,
            group_id: None,
            super_id: None,
            is_new_in_catalog: false,
        }
    }

    /// Template and subtask nodes become work items.
    pub fn is_work_item(&self) -> bool {
        matches!(self.kind, NodeKind::Template | NodeKind::Subtask)
    }
}

/// Name suffixes appended to materialized copies (legacy shape only).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NameSuffixes {
    pub super_suffix: Option<String>,
    pub group_suffix: Option<String>,
    pub template_suffix: Option<String>,
}

/// Shape-independent form of a materialization request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedBatch {
    pub format: PayloadFormat,
    pub project_id: String,
    /// Owning catalog super for the flat shapes. The hierarchical shape names
    /// its supers as nodes instead.
    pub catalog_super_id: Option<String>,
    pub nodes: Vec<Node>,
    pub suffixes: NameSuffixes,
    /// `None` defers to configuration.
    pub explicit_selection_only: Option<bool>,
}

impl NormalizedBatch {
    pub fn nodes_of(&self, kind: NodeKind) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(move |n| n.kind == kind)
    }
}

/// One supported request shape.
pub trait PayloadAdapter: Sync {
    fn format(&self) -> PayloadFormat;

    /// Whether the payload looks like this shape.
    fn accepts(&self, payload: &Map<String, Value>) -> bool;

    fn normalize(&self, payload: &Map<String, Value>) -> MaterializeResult<NormalizedBatch>;
}

/// Registered adapters, tried in order.
pub static ADAPTERS: &[&dyn PayloadAdapter] =
    &[&HierarchicalAdapter, &TaggedAdapter, &LegacyAdapter];

/// Normalize any supported payload shape.
pub fn normalize(payload: &Value) -> MaterializeResult<NormalizedBatch> {
    let obj = payload
        .as_object()
        .ok_or_else(|| MaterializeError::invalid_value("payload", "expected a JSON object"))?;

    let adapter = ADAPTERS
        .iter()
        .find(|a| a.accepts(obj))
        .ok_or_else(|| MaterializeError::missing_field("selectedTemplates, items or supers"))?;

    let batch = adapter.normalize(obj)?;
    tracing::debug!(
        format = ?batch.format,
        project_id = %batch.project_id,
        nodes = batch.nodes.len(),
        "payload normalized"
    );
    Ok(batch)
}

// =============================================================================
// Legacy flat shape
// =============================================================================

/// `selectedTemplates` + `selectedSubtasks`.
pub struct LegacyAdapter;

impl PayloadAdapter for LegacyAdapter {
    fn format(&self) -> PayloadFormat {
        PayloadFormat::Legacy
    }

    fn accepts(&self, payload: &Map<String, Value>) -> bool {
        payload.contains_key("selectedTemplates") || payload.contains_key("selectedSubtasks")
    }

    fn normalize(&self, payload: &Map<String, Value>) -> MaterializeResult<NormalizedBatch> {
        let root = Fields::root(payload);
        let project_id = root.required_id("projectId")?;
        let catalog_super_id = root.required_id("catalogSuperId")?;

        let mut nodes = Vec::new();

        for item in root.objects("selectedTemplates")? {
            let mut node = Node::new(
                NodeKind::Template,
                item.required_id("id")?,
                item.required_str("name")?,
            );
            node.group_id = Some(item.required_id("groupId")?);
            node.super_id = Some(catalog_super_id.clone());
            item.fill_details(&mut node)?;
            nodes.push(node);
        }

        for item in root.objects("selectedSubtasks")? {
            let mut node = Node::new(
                NodeKind::Subtask,
                item.required_id("id")?,
                item.required_str("name")?,
            );
            node.parent_id = Some(item.required_id("templateId")?);
            node.group_id = Some(item.required_id("groupId")?);
            node.super_id = Some(catalog_super_id.clone());
            item.fill_details(&mut node)?;
            nodes.push(node);
        }

        let explicit_selection_only = match root.optional_object("metadata")? {
            Some(metadata) => metadata.optional_bool("explicitSelectionOnly")?,
            None => None,
        }
        .or(root.optional_bool("explicitSelectionOnly")?);

        Ok(NormalizedBatch {
            format: self.format(),
            project_id,
            catalog_super_id: Some(catalog_super_id),
            nodes,
            suffixes: NameSuffixes {
                super_suffix: root.optional_str("superNameSuffix")?,
                group_suffix: root.optional_str("groupNameSuffix")?,
                template_suffix: root.optional_str("templateNameSuffix")?,
            },
            explicit_selection_only,
        })
    }
}

// =============================================================================
// Tagged flat shape
// =============================================================================

/// `items` with a `type` discriminator.
pub struct TaggedAdapter;

impl PayloadAdapter for TaggedAdapter {
    fn format(&self) -> PayloadFormat {
        PayloadFormat::Tagged
    }

    fn accepts(&self, payload: &Map<String, Value>) -> bool {
        payload.contains_key("items")
    }

    fn normalize(&self, payload: &Map<String, Value>) -> MaterializeResult<NormalizedBatch> {
        let root = Fields::root(payload);
        let project_id = root.required_id("projectId")?;
        let catalog_super_id = root.required_id("catalogSuperId")?;

        let mut nodes = Vec::new();
        for item in root.objects("items")? {
            let kind_str = item.required_str("type")?;
            let kind = NodeKind::parse(&kind_str).ok_or_else(|| {
                MaterializeError::invalid_value(
                    item.path("type"),
                    format!(
                        "unknown type '{}', expected super, group, template or subtask",
                        kind_str
                    ),
                )
            })?;

            let id = item.required_id("id")?;
            // `name` is the target name; fall back to the catalog name
            let name = match item.optional_str("name")? {
                Some(name) => name,
                None => item.required_str("originalName")?,
            };

            let mut node = Node::new(kind, id, name);
            item.fill_details(&mut node)?;
            let parent_id = item.optional_id("parentId")?;

            match kind {
                NodeKind::Super => {}
                NodeKind::Group => {
                    node.super_id = Some(
                        item.optional_id("superId")?
                            .or(parent_id)
                            .unwrap_or_else(|| catalog_super_id.clone()),
                    );
                }
                NodeKind::Template => {
                    node.group_id = item.optional_id("groupId")?.or(parent_id);
                    node.super_id = Some(catalog_super_id.clone());
                }
                NodeKind::Subtask => {
                    node.parent_id = item.optional_id("templateId")?.or(parent_id);
                    node.group_id = item.optional_id("groupId")?;
                    node.super_id = Some(catalog_super_id.clone());
                }
            }
            nodes.push(node);
        }

        Ok(NormalizedBatch {
            format: self.format(),
            project_id,
            catalog_super_id: Some(catalog_super_id),
            nodes,
            suffixes: NameSuffixes::default(),
            explicit_selection_only: root.optional_bool("explicitSelectionOnly")?,
        })
    }
}

// =============================================================================
// Hierarchical shape
// =============================================================================

/// Nested `supers → groups → templates → subtasks`, any node possibly new.
pub struct HierarchicalAdapter;

impl PayloadAdapter for HierarchicalAdapter {
    fn format(&self) -> PayloadFormat {
        PayloadFormat::Hierarchical
    }

    fn accepts(&self, payload: &Map<String, Value>) -> bool {
        payload.contains_key("supers")
    }

    fn normalize(&self, payload: &Map<String, Value>) -> MaterializeResult<NormalizedBatch> {
        let root = Fields::root(payload);
        let project_id = root.required_id("projectId")?;

        let supers = root.objects("supers")?;
        if supers.is_empty() {
            return Err(MaterializeError::invalid_value(
                "supers",
                "at least one super is required",
            ));
        }

        let mut nodes = Vec::new();
        for super_item in supers {
            let mut super_node = Node::new(
                NodeKind::Super,
                super_item.required_id("id")?,
                super_item.required_str("name")?,
            );
            super_item.fill_details(&mut super_node)?;
            super_node.is_new_in_catalog = super_item.optional_bool("isNew")?.unwrap_or(false);
            let super_id = super_node.id.clone();
            nodes.push(super_node);

            for group_item in super_item.objects("groups")? {
                let mut group_node = Node::new(
                    NodeKind::Group,
                    group_item.required_id("id")?,
                    group_item.required_str("name")?,
                );
                group_item.fill_details(&mut group_node)?;
                group_node.super_id = Some(super_id.clone());
                group_node.is_new_in_catalog =
                    group_item.optional_bool("isNew")?.unwrap_or(false);
                let group_id = group_node.id.clone();
                nodes.push(group_node);

                for template_item in group_item.objects("templates")? {
                    let mut template_node = Node::new(
                        NodeKind::Template,
                        template_item.required_id("id")?,
                        template_item.required_str("name")?,
                    );
                    template_item.fill_details(&mut template_node)?;
                    template_node.group_id = Some(group_id.clone());
                    template_node.super_id = Some(super_id.clone());
                    template_node.is_new_in_catalog =
                        template_item.optional_bool("isNew")?.unwrap_or(false);
                    let template_id = template_node.id.clone();
                    nodes.push(template_node);

                    for subtask_item in template_item.objects("subtasks")? {
                        let mut subtask_node = Node::new(
                            NodeKind::Subtask,
                            subtask_item.required_id("id")?,
                            subtask_item.required_str("name")?,
                        );
                        subtask_item.fill_details(&mut subtask_node)?;
                        subtask_node.parent_id = Some(template_id.clone());
                        subtask_node.group_id = Some(group_id.clone());
                        subtask_node.super_id = Some(super_id.clone());
                        subtask_node.is_new_in_catalog =
                            subtask_item.optional_bool("isNew")?.unwrap_or(false);
                        nodes.push(subtask_node);
                    }
                }
            }
        }

        Ok(NormalizedBatch {
            format: self.format(),
            project_id,
            catalog_super_id: None,
            nodes,
            suffixes: NameSuffixes::default(),
            explicit_selection_only: root.optional_bool("explicitSelectionOnly")?,
        })
    }
}

// =============================================================================
// Field access with path-qualified errors
// =============================================================================

/// A JSON object plus its location in the payload, for error messages.
struct Fields<'a> {
    obj: &'a Map<String, Value>,
    prefix: String,
}

impl<'a> Fields<'a> {
    fn root(obj: &'a Map<String, Value>) -> Self {
        Self {
            obj,
            prefix: String::new(),
        }
    }

    fn path(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", self.prefix, key)
        }
    }

    /// Present and not null.
    fn value(&self, key: &str) -> Option<&'a Value> {
        self.obj.get(key).filter(|v| !v.is_null())
    }

    fn optional_str(&self, key: &str) -> MaterializeResult<Option<String>> {
        match self.value(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(MaterializeError::invalid_value(
                self.path(key),
                "expected a string",
            )),
        }
    }

    /// Non-blank string.
    fn required_str(&self, key: &str) -> MaterializeResult<String> {
        match self.optional_str(key)? {
            Some(s) if !s.trim().is_empty() => Ok(s),
            _ => Err(MaterializeError::missing_field(self.path(key))),
        }
    }

    /// Ids may arrive as strings or integers.
    fn optional_id(&self, key: &str) -> MaterializeResult<Option<String>> {
        match self.value(key) {
            None => Ok(None),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(Some(n.to_string())),
            Some(_) => Err(MaterializeError::invalid_value(
                self.path(key),
                "expected a string or integer id",
            )),
        }
    }

    fn required_id(&self, key: &str) -> MaterializeResult<String> {
        self.optional_id(key)?
            .ok_or_else(|| MaterializeError::missing_field(self.path(key)))
    }

    fn optional_f64(&self, key: &str) -> MaterializeResult<Option<f64>> {
        match self.value(key) {
            None => Ok(None),
            Some(v) => v.as_f64().map(Some).ok_or_else(|| {
                MaterializeError::invalid_value(self.path(key), "expected a number")
            }),
        }
    }

    fn optional_i64(&self, key: &str) -> MaterializeResult<Option<i64>> {
        match self.value(key) {
            None => Ok(None),
            Some(v) => v.as_i64().map(Some).ok_or_else(|| {
                MaterializeError::invalid_value(self.path(key), "expected an integer")
            }),
        }
    }

    fn optional_bool(&self, key: &str) -> MaterializeResult<Option<bool>> {
        match self.value(key) {
            None => Ok(None),
            Some(v) => v.as_bool().map(Some).ok_or_else(|| {
                MaterializeError::invalid_value(self.path(key), "expected a boolean")
            }),
        }
    }

    fn optional_object(&self, key: &str) -> MaterializeResult<Option<Fields<'a>>> {
        match self.value(key) {
            None => Ok(None),
            Some(Value::Object(obj)) => Ok(Some(Fields {
                obj,
                prefix: self.path(key),
            })),
            Some(_) => Err(MaterializeError::invalid_value(
                self.path(key),
                "expected an object",
            )),
        }
    }

    /// Array of objects; a missing array is empty.
    fn objects(&self, key: &str) -> MaterializeResult<Vec<Fields<'a>>> {
        let items = match self.value(key) {
            None => return Ok(Vec::new()),
            Some(Value::Array(items)) => items,
            Some(_) => {
                return Err(MaterializeError::invalid_value(
                    self.path(key),
                    "expected an array",
                ));
            }
        };

        items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let prefix = format!("{}[{}]", self.path(key), i);
                match item {
                    Value::Object(obj) => Ok(Fields { obj, prefix }),
                    _ => Err(MaterializeError::invalid_value(prefix, "expected an object")),
                }
            })
            .collect()
    }

    /// Optional description, hours and rank shared by every node shape.
    fn fill_details(&self, node: &mut Node) -> MaterializeResult<()> {
        node.description = self.optional_str("description")?;
        node.estimated_hours = self.optional_f64("estimatedHours")?;
        node.rank = self.optional_i64("rank")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use serde_json::json;

    #[test]
    fn legacy_payload_normalizes_templates_and_subtasks() {
        let payload = json!({
            "catalogSuperId": "S1",
            "projectId": "P1",
            "superNameSuffix": " (2024)",
            "selectedTemplates": [
                {"id": "T1", "name": "Inventory Count", "groupId": "G1", "groupName": "Fieldwork", "estimatedHours": 4.5}
            ],
            "selectedSubtasks": [
                {"id": "T2", "name": "Count Warehouse A", "templateId": "T1", "templateName": "Inventory Count", "groupId": "G1", "groupName": "Fieldwork", "rank": 2}
            ],
            "metadata": {"explicitSelectionOnly": true}
        });

        let batch = normalize(&payload).unwrap();
        assert_eq!(batch.format, PayloadFormat::Legacy);
        assert_eq!(batch.project_id, "P1");
        assert_eq!(batch.catalog_super_id.as_deref(), Some("S1"));
        assert_eq!(batch.explicit_selection_only, Some(true));
        assert_eq!(batch.suffixes.super_suffix.as_deref(), Some(" (2024)"));
        assert_eq!(batch.nodes.len(), 2);

        let template = &batch.nodes[0];
        assert_eq!(template.kind, NodeKind::Template);
        assert_eq!(template.group_id.as_deref(), Some("G1"));
        assert_eq!(template.estimated_hours, Some(4.5));

        let subtask = &batch.nodes[1];
        assert_eq!(subtask.kind, NodeKind::Subtask);
        assert_eq!(subtask.parent_id.as_deref(), Some("T1"));
        assert_eq!(subtask.rank, Some(2));
    }

    #[test]
    fn legacy_subtask_without_template_id_names_the_field() {
        let payload = json!({
            "catalogSuperId": "S1",
            "projectId": "P1",
            "selectedTemplates": [],
            "selectedSubtasks": [{"id": "T2", "name": "Count", "groupId": "G1"}]
        });

        let err = normalize(&payload).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
        assert_eq!(err.to_string(), "selectedSubtasks[0].templateId is required");
    }

    #[test]
    fn tagged_payload_maps_linkage_by_type() {
        let payload = json!({
            "catalogSuperId": 7,
            "projectId": "P1",
            "items": [
                {"id": 7, "type": "super", "originalName": "Audit Package", "name": "Audit Package"},
                {"id": "G1", "type": "group", "originalName": "Fieldwork", "name": "Fieldwork"},
                {"id": "T1", "type": "template", "originalName": "Inventory Count", "name": "Inventory Count Q1", "groupId": "G1"},
                {"id": "T2", "type": "subtask", "originalName": "Count Warehouse A", "parentId": "T1"}
            ]
        });

        let batch = normalize(&payload).unwrap();
        assert_eq!(batch.format, PayloadFormat::Tagged);
        assert_eq!(batch.catalog_super_id.as_deref(), Some("7"));
        assert_eq!(batch.nodes[0].kind, NodeKind::Super);
        assert_eq!(batch.nodes[1].super_id.as_deref(), Some("7"));
        assert_eq!(batch.nodes[2].name, "Inventory Count Q1");
        // name falls back to originalName
        assert_eq!(batch.nodes[3].name, "Count Warehouse A");
        assert_eq!(batch.nodes[3].parent_id.as_deref(), Some("T1"));
        assert_eq!(batch.explicit_selection_only, None);
    }

    #[test]
    fn tagged_payload_rejects_unknown_type() {
        let payload = json!({
            "catalogSuperId": "S1",
            "projectId": "P1",
            "items": [{"id": "X", "type": "epic", "name": "Epic"}]
        });

        let err = normalize(&payload).unwrap_err();
        match err {
            MaterializeError::InvalidValue { field, reason } => {
                assert_eq!(field, "items[0].type");
                assert!(reason.contains("epic"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn hierarchical_payload_flattens_tree_in_order() {
        let payload = json!({
            "projectId": "P1",
            "supers": [{
                "id": "new-super", "name": "Onboarding", "isNew": true,
                "groups": [{
                    "id": "G1", "name": "Accounts",
                    "templates": [{
                        "id": "new-t", "name": "Provision Laptop", "isNew": true, "estimatedHours": 2,
                        "subtasks": [{"id": "new-s", "name": "Image Disk", "isNew": true}]
                    }]
                }]
            }]
        });

        let batch = normalize(&payload).unwrap();
        assert_eq!(batch.format, PayloadFormat::Hierarchical);
        assert!(batch.catalog_super_id.is_none());
        let kinds: Vec<NodeKind> = batch.nodes.iter().map(|n| n.kind).collect();
        assert_eq!(
            kinds,
            vec![NodeKind::Super, NodeKind::Group, NodeKind::Template, NodeKind::Subtask]
        );

        let subtask = &batch.nodes[3];
        assert!(subtask.is_new_in_catalog);
        assert_eq!(subtask.parent_id.as_deref(), Some("new-t"));
        assert_eq!(subtask.group_id.as_deref(), Some("G1"));
        assert_eq!(subtask.super_id.as_deref(), Some("new-super"));
        assert!(!batch.nodes[1].is_new_in_catalog);
        assert_eq!(batch.nodes[2].estimated_hours, Some(2.0));
    }

    #[test]
    fn hierarchical_payload_requires_a_super() {
        let err = normalize(&json!({"projectId": "P1", "supers": []})).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
    }

    #[test]
    fn unrecognized_shape_is_rejected() {
        let err = normalize(&json!({"projectId": "P1"})).unwrap_err();
        assert!(matches!(err, MaterializeError::MissingField { .. }));

        let err = normalize(&json!(["not", "an", "object"])).unwrap_err();
        assert!(matches!(err, MaterializeError::InvalidValue { .. }));
    }

    #[test]
    fn blank_names_are_missing() {
        let payload = json!({
            "catalogSuperId": "S1",
            "projectId": "P1",
            "selectedTemplates": [{"id": "T1", "name": "   ", "groupId": "G1"}]
        });
        let err = normalize(&payload).unwrap_err();
        assert_eq!(err.to_string(), "selectedTemplates[0].name is required");
    }

    #[test]
    fn wrong_field_types_are_invalid() {
        let payload = json!({
            "catalogSuperId": "S1",
            "projectId": "P1",
            "selectedTemplates": [{"id": "T1", "name": "A", "groupId": "G1", "estimatedHours": "four"}]
        });
        let err = normalize(&payload).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid value for selectedTemplates[0].estimatedHours: expected a number"
        );
    }
}
