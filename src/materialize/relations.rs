//! Parent/child inference over the template catalog.
//!
//! A template's subtask relation is stored twice: as `parent_template_id` on
//! the child and as a row in the parent's subtask list. Catalog entry paths
//! fill one or the other, so neither is authoritative on its own. The
//! resolver folds both directions into a single id-keyed adjacency map.
//!
//! The map never holds references between templates, only ids, so there is
//! no object graph to walk or mutate and self-references cannot loop.

use crate::db::catalog::get_template_internal;
use crate::error::{Entity, MaterializeError, MaterializeResult};
use crate::types::Template;
use rusqlite::Connection;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Parent → ordered children, plus every template loaded along the way.
#[derive(Debug, Clone, Default)]
pub struct RelationshipMap {
    children: BTreeMap<String, Vec<String>>,
    parents: HashMap<String, String>,
    templates: HashMap<String, Template>,
}

impl RelationshipMap {
    /// Build the map from already-loaded templates.
    ///
    /// Children are deduplicated. When both directions disagree about a
    /// child's parent, the first relation seen wins.
    pub fn from_templates<I>(templates: I) -> Self
    where
        I: IntoIterator<Item = Template>,
    {
        let mut map = Self::default();
        for template in templates {
            map.add(template);
        }
        map.sort_children();
        map
    }

    fn add(&mut self, template: Template) {
        for sub_id in &template.sub_template_ids {
            self.link(&template.id, sub_id);
        }
        if let Some(ref parent_id) = template.parent_template_id {
            self.link(parent_id, &template.id);
        }
        self.templates.insert(template.id.clone(), template);
    }

    fn link(&mut self, parent_id: &str, child_id: &str) {
        if parent_id == child_id {
            tracing::warn!(template_id = %child_id, "template lists itself as a subtask, ignoring");
            return;
        }
        let children = self.children.entry(parent_id.to_string()).or_default();
        if !children.iter().any(|c| c == child_id) {
            children.push(child_id.to_string());
        }
        self.parents
            .entry(child_id.to_string())
            .or_insert_with(|| parent_id.to_string());
    }

    /// Order children by rank then name; unknown templates keep their place
    /// at the end.
    fn sort_children(&mut self) {
        let templates = &self.templates;
        for children in self.children.values_mut() {
            children.sort_by(|a, b| {
                let key = |id: &String| {
                    templates
                        .get(id)
                        .map(|t| (0, t.rank, t.name.clone()))
                        .unwrap_or((1, 0, String::new()))
                };
                key(a).cmp(&key(b))
            });
        }
    }

    /// Children of `template_id`, in catalog order.
    pub fn children_of(&self, template_id: &str) -> &[String] {
        self.children
            .get(template_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn parent_of(&self, template_id: &str) -> Option<&str> {
        self.parents.get(template_id).map(String::as_str)
    }

    /// Whether `template_id` has at least one child.
    pub fn is_parent(&self, template_id: &str) -> bool {
        self.children
            .get(template_id)
            .is_some_and(|c| !c.is_empty())
    }

    /// Whether `template_id` appears in some parent's child list.
    pub fn is_child(&self, template_id: &str) -> bool {
        self.parents.contains_key(template_id)
    }

    /// A root has no incoming edge, or is itself a parent.
    pub fn is_root(&self, template_id: &str) -> bool {
        !self.is_child(template_id) || self.is_parent(template_id)
    }

    pub fn template(&self, template_id: &str) -> Option<&Template> {
        self.templates.get(template_id)
    }

    /// The adjacency view as a plain map.
    pub fn adjacency(&self) -> &BTreeMap<String, Vec<String>> {
        &self.children
    }
}

/// Load `template_ids` and resolve their relations.
///
/// Every referenced id must exist. Child templates discovered through either
/// direction are loaded too, so callers can read their names and groups.
pub fn resolve(conn: &Connection, template_ids: &[String]) -> MaterializeResult<RelationshipMap> {
    let mut loaded: Vec<Template> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for id in template_ids {
        if !seen.insert(id.clone()) {
            continue;
        }
        let template = get_template_internal(conn, id)?
            .ok_or_else(|| MaterializeError::not_found(Entity::Template, id.clone()))?;
        loaded.push(template);
    }

    // Pull in children only known through the referenced templates
    let mut discovered: Vec<String> = Vec::new();
    for template in &loaded {
        for sub_id in &template.sub_template_ids {
            if !seen.contains(sub_id) {
                discovered.push(sub_id.clone());
            }
        }
    }
    for id in discovered {
        if !seen.insert(id.clone()) {
            continue;
        }
        // The junction row's foreign key guarantees the child exists
        if let Some(template) = get_template_internal(conn, &id)? {
            loaded.push(template);
        }
    }

    // Children that only declare their parent on the child side
    let mut stmt = conn.prepare(
        "SELECT id FROM templates WHERE parent_template_id = ?1 ORDER BY rank, name",
    )?;
    let mut declared: Vec<String> = Vec::new();
    for id in template_ids {
        let child_ids = stmt
            .query_map([id], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        declared.extend(child_ids);
    }
    for id in declared {
        if !seen.insert(id.clone()) {
            continue;
        }
        if let Some(template) = get_template_internal(conn, &id)? {
            loaded.push(template);
        }
    }

    // Parents only recorded in the junction table
    let mut stmt = conn.prepare(
        "SELECT template_id FROM template_subtasks WHERE subtask_id = ?1 ORDER BY template_id",
    )?;
    let mut listing: Vec<String> = Vec::new();
    for id in template_ids {
        let parent_ids = stmt
            .query_map([id], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        listing.extend(parent_ids);
    }
    for id in listing {
        if !seen.insert(id.clone()) {
            continue;
        }
        if let Some(template) = get_template_internal(conn, &id)? {
            loaded.push(template);
        }
    }

    let map = RelationshipMap::from_templates(loaded);
    tracing::debug!(
        referenced = template_ids.len(),
        parents = map.adjacency().len(),
        "template relationships resolved"
    );
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(id: &str, parent: Option<&str>, subs: &[&str], rank: i64) -> Template {
        Template {
            id: id.to_string(),
            group_id: Some("G1".to_string()),
            parent_template_id: parent.map(String::from),
            name: format!("Template {}", id),
            description: None,
            rank,
            estimated_hours: None,
            sub_template_ids: subs.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn parent_side_declaration_creates_edge() {
        let map = RelationshipMap::from_templates(vec![template("T1", None, &["T2", "T3"], 0)]);

        assert_eq!(map.children_of("T1"), &["T2".to_string(), "T3".to_string()]);
        assert_eq!(map.parent_of("T2"), Some("T1"));
        assert!(map.is_parent("T1"));
        assert!(map.is_root("T1"));
        assert!(!map.is_root("T2"));
    }

    #[test]
    fn child_side_declaration_creates_edge() {
        let map = RelationshipMap::from_templates(vec![
            template("T1", None, &[], 0),
            template("T2", Some("T1"), &[], 0),
        ]);

        assert_eq!(map.children_of("T1"), &["T2".to_string()]);
        assert!(map.is_child("T2"));
    }

    #[test]
    fn both_directions_are_deduplicated() {
        let map = RelationshipMap::from_templates(vec![
            template("T1", None, &["T2"], 0),
            template("T2", Some("T1"), &[], 0),
        ]);

        assert_eq!(map.children_of("T1").len(), 1);
    }

    #[test]
    fn children_are_sorted_by_rank() {
        let map = RelationshipMap::from_templates(vec![
            template("T1", None, &[], 0),
            template("T3", Some("T1"), &[], 2),
            template("T2", Some("T1"), &[], 1),
        ]);

        assert_eq!(map.children_of("T1"), &["T2".to_string(), "T3".to_string()]);
    }

    #[test]
    fn standalone_template_is_a_childless_root() {
        let map = RelationshipMap::from_templates(vec![template("T9", None, &[], 0)]);

        assert!(map.is_root("T9"));
        assert!(map.children_of("T9").is_empty());
        assert!(map.parent_of("T9").is_none());
        assert!(map.template("T9").is_some());
    }

    #[test]
    fn middle_of_three_levels_is_both_parent_and_root() {
        let map = RelationshipMap::from_templates(vec![
            template("T1", None, &["T2"], 0),
            template("T2", None, &["T3"], 0),
        ]);

        assert!(map.is_child("T2"));
        assert!(map.is_root("T2"));
        assert!(!map.is_root("T3"));
    }

    #[test]
    fn self_reference_is_ignored() {
        let map = RelationshipMap::from_templates(vec![template("T1", Some("T1"), &["T1"], 0)]);

        assert!(map.children_of("T1").is_empty());
        assert!(map.is_root("T1"));
    }
}
