//! Output formatters for command results.

use std::collections::{BTreeSet, HashMap};

use clap::ValueEnum;
use comfy_table::{Cell, Table};
use sitestore_core::{
    CascadeResult, DeletePlan, Folder, FolderNode, FolderTree, Row, TableDef, Value,
};

use crate::commands::Output;

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format
    Table,
    /// JSON format
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Trait for formatting output.
pub trait Formatter: Send + Sync {
    /// Render a command result.
    fn format(&self, output: &Output) -> String;
}

/// Create a formatter for the given output format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Table => Box::new(TableFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
    }
}

/// Table formatter using comfy-table.
pub struct TableFormatter;

impl Formatter for TableFormatter {
    fn format(&self, output: &Output) -> String {
        match output {
            Output::Folder(folder) => format_folder(folder),
            Output::Folders(folders) => format_folders(folders),
            Output::Tree(tree) => format_tree(tree),
            Output::Table(table) => format_table_def(table),
            Output::Tables(tables) => format_tables(tables),
            Output::TableDeleted {
                table,
                rows_deleted,
            } => format!("Deleted table {} and {} row(s)", table, rows_deleted),
            Output::Row(row) => format_row(row),
            Output::Rows(rows) => format_rows(rows),
            Output::Deleted(result) => format_cascade(result),
            Output::Plan(plan) => format_plan(plan),
            Output::Message(message) => message.clone(),
        }
    }
}

/// JSON formatter.
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn format(&self, output: &Output) -> String {
        serde_json::to_string_pretty(output).unwrap_or_else(|e| {
            serde_json::json!({
                "error": e.to_string()
            })
            .to_string()
        })
    }
}

fn key_value_table(pairs: Vec<(&str, String)>) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["Field", "Value"]);
    for (key, value) in pairs {
        table.add_row(vec![Cell::new(key), Cell::new(value)]);
    }
    table
}

fn format_folder(folder: &Folder) -> String {
    key_value_table(vec![
        ("id", folder.id.clone()),
        ("name", folder.name.clone()),
        ("description", folder.description.clone()),
        ("parent", folder.parent_id.clone().unwrap_or_default()),
        ("created", format!("{} by {}", folder.created_at, folder.created_by)),
        ("updated", format!("{} by {}", folder.updated_at, folder.updated_by)),
    ])
    .to_string()
}

fn format_folders(folders: &[Folder]) -> String {
    if folders.is_empty() {
        return "No folders".to_string();
    }

    // Listing is depth-first, so a parent always precedes its children.
    let mut depth: HashMap<&str, usize> = HashMap::new();
    let mut table = Table::new();
    table.set_header(vec!["Name", "ID", "Description"]);
    for folder in folders {
        let level = folder
            .parent_id
            .as_deref()
            .and_then(|parent| depth.get(parent))
            .map_or(0, |d| d + 1);
        depth.insert(folder.id.as_str(), level);
        table.add_row(vec![
            Cell::new(format!("{}{}", "  ".repeat(level), folder.name)),
            Cell::new(&folder.id),
            Cell::new(&folder.description),
        ]);
    }

    format!("{}\n{} folder(s)", table, folders.len())
}

fn format_tree(tree: &FolderTree) -> String {
    let mut out = String::new();
    for node in &tree.roots {
        write_node(&mut out, node, 0);
    }
    if !tree.unfiled.is_empty() {
        out.push_str("(unfiled)\n");
        for table in &tree.unfiled {
            out.push_str(&format!("  {} ({})\n", table.name, table.id));
        }
    }
    if out.is_empty() {
        return "Empty".to_string();
    }
    out.trim_end().to_string()
}

fn write_node(out: &mut String, node: &FolderNode, level: usize) {
    let indent = "  ".repeat(level);
    out.push_str(&format!("{}{}/\n", indent, node.folder.name));
    for table in &node.tables {
        out.push_str(&format!("{}  {} ({})\n", indent, table.name, table.id));
    }
    for child in &node.children {
        write_node(out, child, level + 1);
    }
}

fn format_table_def(table: &TableDef) -> String {
    let properties = table
        .schema
        .properties
        .iter()
        .map(|(name, ty)| format!("{}: {}", name, format_value(ty)))
        .collect::<Vec<_>>()
        .join("\n");
    let relationships = table
        .relationships
        .iter()
        .map(|(field, rel)| format!("{} -> {} ({})", field, rel.references, rel.on_delete))
        .collect::<Vec<_>>()
        .join("\n");

    let mut pairs = vec![
        ("id", table.id.clone()),
        ("name", table.name.clone()),
        ("folder", table.folder_id.clone().unwrap_or_default()),
        ("properties", properties),
        ("required", table.schema.required.join(", ")),
        ("relationships", relationships),
        ("created", format!("{} by {}", table.created_at, table.created_by)),
    ];
    if let (Some(at), Some(by)) = (&table.updated_at, &table.updated_by) {
        pairs.push(("updated", format!("{} by {}", at, by)));
    }
    key_value_table(pairs).to_string()
}

fn format_tables(tables: &[TableDef]) -> String {
    if tables.is_empty() {
        return "No tables".to_string();
    }

    let mut table = Table::new();
    table.set_header(vec!["ID", "Name", "Folder", "Properties", "Relationships"]);
    for def in tables {
        table.add_row(vec![
            Cell::new(&def.id),
            Cell::new(&def.name),
            Cell::new(def.folder_id.as_deref().unwrap_or("")),
            Cell::new(def.schema.properties.len()),
            Cell::new(def.relationships.len()),
        ]);
    }
    format!("{}\n{} table(s)", table, tables.len())
}

fn format_row(row: &Row) -> String {
    let mut pairs = vec![("id", row.id.clone())];
    for (name, value) in &row.fields {
        pairs.push((name.as_str(), format_value(value)));
    }
    pairs.push((
        "_meta.created",
        format!("{} by {}", row.meta.created_at, row.meta.created_by),
    ));
    if let (Some(at), Some(by)) = (&row.meta.updated_at, &row.meta.updated_by) {
        pairs.push(("_meta.updated", format!("{} by {}", at, by)));
    }
    if let Some(reason) = &row.meta.cascade_reason {
        pairs.push(("_meta.cascadeReason", reason.clone()));
    }
    key_value_table(pairs).to_string()
}

fn format_rows(rows: &[Row]) -> String {
    if rows.is_empty() {
        return "No rows".to_string();
    }

    let columns: BTreeSet<&str> = rows
        .iter()
        .flat_map(|row| row.fields.keys().map(String::as_str))
        .collect();

    let mut table = Table::new();
    let mut header = vec![Cell::new("id")];
    header.extend(columns.iter().map(|c| Cell::new(c)));
    table.set_header(header);

    for row in rows {
        let mut cells = vec![Cell::new(&row.id)];
        for column in &columns {
            cells.push(Cell::new(
                row.fields.get(*column).map(format_value).unwrap_or_default(),
            ));
        }
        table.add_row(cells);
    }

    format!("{}\n{} row(s)", table, rows.len())
}

fn format_cascade(result: &CascadeResult) -> String {
    let mut out = format!("Deleted {}", result.target);
    if !result.cascaded() {
        return out;
    }

    let mut table = Table::new();
    table.set_header(vec!["Action", "Row", "Field"]);
    for row in &result.deleted_rows {
        table.add_row(vec!["deleted".to_string(), row.to_string(), String::new()]);
    }
    for (row, field) in &result.nullified_fields {
        table.add_row(vec!["set null".to_string(), row.to_string(), field.clone()]);
    }
    out.push_str(&format!(
        "\n{}\n{} dependent(s) affected",
        table,
        result.affected_count()
    ));
    out
}

fn format_plan(plan: &DeletePlan) -> String {
    let verdict = if plan.is_allowed() {
        format!("Delete of {} is allowed", plan.target)
    } else {
        format!("Delete of {} is blocked", plan.target)
    };

    let mut table = Table::new();
    table.set_header(vec!["Action", "Row", "Field"]);
    for blocker in &plan.blockers {
        for id in &blocker.row_ids {
            table.add_row(vec![
                "blocks".to_string(),
                format!("{}/{}", blocker.table, id),
                blocker.field.clone(),
            ]);
        }
    }
    for row in &plan.deletions {
        table.add_row(vec!["delete".to_string(), row.to_string(), String::new()]);
    }
    for n in &plan.nullifications {
        table.add_row(vec!["set null".to_string(), n.row.to_string(), n.fields.join(", ")]);
    }

    if plan.blockers.is_empty() && plan.deletions.is_empty() && plan.nullifications.is_empty() {
        verdict
    } else {
        format!("{}\n{}", verdict, table)
    }
}

/// Format a Value as a display string.
fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
