//! Subcommands and their execution.

use std::io::Read;

use clap::Subcommand;
use serde::Serialize;
use sitestore_core::{
    value::fields_from_json, CascadeResult, Database, DeletePlan, Fields, Folder, FolderTree,
    NewTable, Row, Session, TableDef, TableExtension,
};

use crate::CliError;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage folders
    #[command(subcommand)]
    Folder(FolderCommand),

    /// Manage tables
    #[command(subcommand)]
    Table(TableCommand),

    /// Manage rows
    #[command(subcommand)]
    Row(RowCommand),
}

#[derive(Subcommand, Debug)]
pub enum FolderCommand {
    /// Create a folder
    Create {
        name: String,
        #[arg(short, long)]
        description: Option<String>,
        /// Parent folder id
        #[arg(short, long)]
        parent: Option<String>,
    },
    /// Rename a folder
    Rename {
        id: String,
        name: String,
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Show a folder
    Get { id: String },
    /// List folders depth-first
    List,
    /// Show folders with their tables
    Tree,
    /// Delete an empty folder
    Delete { id: String },
}

#[derive(Subcommand, Debug)]
pub enum TableCommand {
    /// Create a table from a JSON definition (inline, @file or - for stdin)
    Create { definition: String },
    /// Show a table
    Get { id: String },
    /// List tables
    List {
        /// Only tables filed under this folder
        #[arg(long)]
        folder: Option<String>,
    },
    /// Add properties, required fields or relationships (JSON)
    Extend { id: String, extension: String },
    /// File a table under a folder, or unfile it without --folder
    Move {
        id: String,
        #[arg(long)]
        folder: Option<String>,
    },
    /// Delete a table and all of its rows
    Delete { id: String },
}

#[derive(Subcommand, Debug)]
pub enum RowCommand {
    /// Insert a row (JSON object)
    Insert { table: String, data: String },
    /// Merge fields into a row, creating it if absent
    Update {
        table: String,
        id: String,
        data: String,
    },
    /// Show a row
    Get { table: String, id: String },
    /// List rows of a table
    List { table: String },
    /// Delete a row, applying delete policies of dependent tables
    Delete { table: String, id: String },
    /// Show what deleting a row would do
    CanDelete { table: String, id: String },
}

/// Result of a command, rendered by a formatter.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Output {
    Folder(Folder),
    Folders(Vec<Folder>),
    Tree(FolderTree),
    Table(TableDef),
    Tables(Vec<TableDef>),
    #[serde(rename_all = "camelCase")]
    TableDeleted {
        table: String,
        rows_deleted: usize,
    },
    Row(Row),
    Rows(Vec<Row>),
    Deleted(CascadeResult),
    Plan(DeletePlan),
    Message(String),
}

/// Run one command against `db` for `session`.
pub async fn execute(db: &Database, session: &Session, command: Command) -> Result<Output, CliError> {
    match command {
        Command::Folder(cmd) => execute_folder(db, session, cmd).await,
        Command::Table(cmd) => execute_table(db, session, cmd).await,
        Command::Row(cmd) => execute_row(db, session, cmd).await,
    }
}

async fn execute_folder(
    db: &Database,
    session: &Session,
    cmd: FolderCommand,
) -> Result<Output, CliError> {
    Ok(match cmd {
        FolderCommand::Create {
            name,
            description,
            parent,
        } => Output::Folder(
            db.create_folder(session, &name, description.as_deref(), parent.as_deref())
                .await?,
        ),
        FolderCommand::Rename {
            id,
            name,
            description,
        } => Output::Folder(
            db.rename_folder(session, &id, &name, description.as_deref())
                .await?,
        ),
        FolderCommand::Get { id } => Output::Folder(db.get_folder(session, &id).await?),
        FolderCommand::List => Output::Folders(db.list_folders(session).await?),
        FolderCommand::Tree => Output::Tree(db.folder_tree(session).await?),
        FolderCommand::Delete { id } => {
            db.delete_folder(session, &id).await?;
            Output::Message(format!("Deleted folder {}", id))
        }
    })
}

async fn execute_table(
    db: &Database,
    session: &Session,
    cmd: TableCommand,
) -> Result<Output, CliError> {
    Ok(match cmd {
        TableCommand::Create { definition } => {
            let new = NewTable::from_json(read_json(&definition)?)?;
            Output::Table(db.create_table(session, new).await?)
        }
        TableCommand::Get { id } => Output::Table(db.get_table(session, &id).await?),
        TableCommand::List { folder } => {
            Output::Tables(db.list_tables(session, folder.as_deref()).await?)
        }
        TableCommand::Extend { id, extension } => {
            let extension: TableExtension = serde_json::from_value(read_json(&extension)?)?;
            Output::Table(db.extend_table(session, &id, &extension).await?)
        }
        TableCommand::Move { id, folder } => {
            Output::Table(db.move_table(session, &id, folder.as_deref()).await?)
        }
        TableCommand::Delete { id } => {
            let rows_deleted = db.delete_table(session, &id).await?;
            Output::TableDeleted {
                table: id,
                rows_deleted,
            }
        }
    })
}

async fn execute_row(db: &Database, session: &Session, cmd: RowCommand) -> Result<Output, CliError> {
    Ok(match cmd {
        RowCommand::Insert { table, data } => {
            Output::Row(db.insert_row(session, &table, read_fields(&data)?).await?)
        }
        RowCommand::Update { table, id, data } => Output::Row(
            db.update_row(session, &table, &id, read_fields(&data)?)
                .await?,
        ),
        RowCommand::Get { table, id } => Output::Row(db.get_row(session, &table, &id).await?),
        RowCommand::List { table } => Output::Rows(db.list_rows(session, &table).await?),
        RowCommand::Delete { table, id } => {
            Output::Deleted(db.delete_row(session, &table, &id).await?)
        }
        RowCommand::CanDelete { table, id } => {
            Output::Plan(db.can_delete(session, &table, &id).await?)
        }
    })
}

/// Read a JSON argument: inline text, `@path` for a file, or `-` for stdin.
fn read_json(arg: &str) -> Result<serde_json::Value, CliError> {
    let text = if arg == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else if let Some(path) = arg.strip_prefix('@') {
        std::fs::read_to_string(path)?
    } else {
        arg.to_string()
    };
    Ok(serde_json::from_str(&text)?)
}

fn read_fields(arg: &str) -> Result<Fields, CliError> {
    Ok(fields_from_json(read_json(arg)?)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_json_inline_and_file() {
        assert_eq!(read_json(r#"{"a":1}"#).unwrap()["a"], 1);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"name":"Orders","schema":{{"properties":{{}}}}}}"#).unwrap();
        let arg = format!("@{}", file.path().display());
        let new = NewTable::from_json(read_json(&arg).unwrap()).unwrap();
        assert_eq!(new.name, "Orders");
    }

    #[test]
    fn test_read_fields_rejects_arrays() {
        assert!(matches!(read_fields("[1]"), Err(CliError::Store(_))));
        assert!(matches!(read_fields("{"), Err(CliError::Json(_))));
    }

    #[tokio::test]
    async fn test_table_definition_needs_properties() {
        let db = Database::in_memory();
        let session = Session::new("hub", "alice").unwrap();

        let err = execute(
            &db,
            &session,
            Command::Table(TableCommand::Create {
                definition: r#"{"name":"Customers","schema":{}}"#.to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CliError::Store(sitestore_core::Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_execute_round_trip() {
        let db = Database::in_memory();
        let session = Session::new("hub", "alice").unwrap();

        execute(
            &db,
            &session,
            Command::Table(TableCommand::Create {
                definition: r#"{"name":"Customers","schema":{"properties":{"name":"string"}}}"#
                    .to_string(),
            }),
        )
        .await
        .unwrap();
        execute(
            &db,
            &session,
            Command::Row(RowCommand::Insert {
                table: "customers".to_string(),
                data: r#"{"id":"c1","name":"Acme"}"#.to_string(),
            }),
        )
        .await
        .unwrap();

        let output = execute(
            &db,
            &session,
            Command::Row(RowCommand::Delete {
                table: "customers".to_string(),
                id: "c1".to_string(),
            }),
        )
        .await
        .unwrap();
        match output {
            Output::Deleted(result) => assert!(!result.cascaded()),
            other => panic!("unexpected output: {other:?}"),
        }
    }
}
