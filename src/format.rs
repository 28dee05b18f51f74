//! Output formatting for materialized projects, as markdown or JSON.

use crate::types::{Project, ProjectGroup, ProjectSuper, WorkItem, WorkItemTree};
use serde_json::{Value, json};

/// Output format for CLI reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Markdown,
    Json,
}

impl OutputFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(OutputFormat::Json),
            "markdown" | "md" => Some(OutputFormat::Markdown),
            _ => None,
        }
    }
}

/// A project with everything materialized into it.
#[derive(Debug, Clone)]
pub struct ProjectReport {
    pub project: Project,
    pub supers: Vec<ProjectSuper>,
    pub groups: Vec<ProjectGroup>,
    pub forest: Vec<WorkItemTree>,
}

impl ProjectReport {
    pub fn work_item_count(&self) -> usize {
        fn count(trees: &[WorkItemTree]) -> usize {
            trees.iter().map(|t| 1 + count(&t.children)).sum()
        }
        count(&self.forest)
    }

    pub fn render(&self, format: OutputFormat) -> String {
        match format {
            OutputFormat::Markdown => format_project_markdown(self),
            OutputFormat::Json => {
                serde_json::to_string_pretty(&format_project_json(self)).unwrap_or_default()
            }
        }
    }
}

fn format_work_item_line(item: &WorkItem, depth: usize) -> String {
    let mut line = format!(
        "{}- [{}] {} (`{}`) {}",
        "  ".repeat(depth),
        item.item_type,
        item.name,
        item.id,
        item.status
    );
    if let Some(hours) = item.estimated_hours {
        line.push_str(&format!(", {}h", hours));
    }
    line.push('\n');
    line
}

fn format_tree(tree: &WorkItemTree, depth: usize, md: &mut String) {
    md.push_str(&format_work_item_line(&tree.item, depth));
    for child in &tree.children {
        format_tree(child, depth + 1, md);
    }
}

/// Supers, their groups, and each group's work item forest.
pub fn format_project_markdown(report: &ProjectReport) -> String {
    let mut md = String::new();

    md.push_str(&format!("# Project: {}\n", report.project.name));
    md.push_str(&format!("- **id**: `{}`\n", report.project.id));
    md.push_str(&format!("- **work items**: {}\n", report.work_item_count()));

    for project_super in &report.supers {
        md.push_str(&format!(
            "\n## {} (`{}`)\n",
            project_super.name, project_super.id
        ));
        md.push_str(&format!(
            "- **from catalog super**: `{}`\n",
            project_super.original_super_id
        ));

        for group in report
            .groups
            .iter()
            .filter(|g| g.super_project_id == project_super.id)
        {
            md.push_str(&format!("\n### {} (`{}`)\n", group.name, group.id));
            let roots: Vec<&WorkItemTree> = report
                .forest
                .iter()
                .filter(|t| t.item.group_project_id == group.id)
                .collect();
            if roots.is_empty() {
                md.push_str("_No work items_\n");
            }
            for tree in roots {
                format_tree(tree, 0, &mut md);
            }
        }
    }

    if report.supers.is_empty() {
        md.push_str("\n_Nothing materialized yet_\n");
    }

    md
}

/// Same structure as the markdown report, as JSON.
pub fn format_project_json(report: &ProjectReport) -> Value {
    let supers: Vec<Value> = report
        .supers
        .iter()
        .map(|s| {
            let groups: Vec<Value> = report
                .groups
                .iter()
                .filter(|g| g.super_project_id == s.id)
                .map(|g| {
                    let work_items: Vec<&WorkItemTree> = report
                        .forest
                        .iter()
                        .filter(|t| t.item.group_project_id == g.id)
                        .collect();
                    json!({
                        "group": g,
                        "workItems": work_items,
                    })
                })
                .collect();
            json!({
                "super": s,
                "groups": groups,
            })
        })
        .collect();

    json!({
        "project": report.project,
        "workItemCount": report.work_item_count(),
        "supers": supers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ItemType, WorkItemStatus};

    fn item(id: &str, name: &str, group: &str, item_type: ItemType) -> WorkItem {
        WorkItem {
            id: id.to_string(),
            project_id: "P1".to_string(),
            group_project_id: group.to_string(),
            parent_work_item_id: None,
            original_template_id: None,
            name: name.to_string(),
            description: None,
            rank: 0,
            estimated_hours: None,
            item_type,
            status: WorkItemStatus::Open,
            created_at: 0,
        }
    }

    fn report() -> ProjectReport {
        let mut task = item("W2", "Checklist", "PG1", ItemType::Task);
        task.parent_work_item_id = Some("W1".to_string());
        let mut story = item("W1", "Review", "PG1", ItemType::Story);
        story.estimated_hours = Some(4.0);

        ProjectReport {
            project: Project {
                id: "P1".to_string(),
                name: "Launch".to_string(),
                created_at: 0,
            },
            supers: vec![ProjectSuper {
                id: "PS1".to_string(),
                project_id: "P1".to_string(),
                original_super_id: "S1".to_string(),
                name: "Audit Package".to_string(),
                description: None,
                rank: 0,
                created_at: 0,
            }],
            groups: vec![ProjectGroup {
                id: "PG1".to_string(),
                project_id: "P1".to_string(),
                super_project_id: "PS1".to_string(),
                original_group_id: "G1".to_string(),
                name: "Reviews".to_string(),
                description: None,
                rank: 0,
                created_at: 0,
            }],
            forest: vec![WorkItemTree {
                item: story,
                children: vec![WorkItemTree {
                    item: task,
                    children: vec![],
                }],
            }],
        }
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!(OutputFormat::parse("JSON"), Some(OutputFormat::Json));
        assert_eq!(OutputFormat::parse("md"), Some(OutputFormat::Markdown));
        assert_eq!(OutputFormat::parse("xml"), None);
    }

    #[test]
    fn test_markdown_nests_tasks_under_stories() {
        let md = format_project_markdown(&report());

        assert!(md.contains("# Project: Launch"));
        assert!(md.contains("## Audit Package (`PS1`)"));
        assert!(md.contains("### Reviews (`PG1`)"));
        assert!(md.contains("- [story] Review (`W1`) open, 4h\n"));
        assert!(md.contains("  - [task] Checklist (`W2`) open\n"));
        assert!(md.contains("- **work items**: 2"));
    }

    #[test]
    fn test_json_groups_work_items() {
        let value = format_project_json(&report());

        assert_eq!(value["workItemCount"], 2);
        let group = &value["supers"][0]["groups"][0];
        assert_eq!(group["group"]["id"], "PG1");
        assert_eq!(group["workItems"][0]["name"], "Review");
        assert_eq!(group["workItems"][0]["children"][0]["name"], "Checklist");
    }
}
