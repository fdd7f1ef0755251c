//! Sitestore Command-Line Client
//!
//! Manage folders, tables and rows of one tenant from the shell.

mod commands;
mod formatter;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use sitestore_core::{BackendConfig, Database, RetryPolicy, Session, StoreConfig};
use thiserror::Error;
use tracing::debug;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use commands::Command;
use formatter::OutputFormat;

/// Where documents are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// Process memory; gone on exit
    Memory,
    /// Local directory
    Local,
    /// S3 bucket (credentials from the AWS environment)
    S3,
}

/// Sitestore Command-Line Client
#[derive(Parser, Debug)]
#[command(name = "sitestore")]
#[command(version, about = "Tenant-scoped document store with relational integrity")]
pub struct Args {
    /// Storage backend
    #[arg(long, default_value = "local", value_enum)]
    pub backend: BackendKind,

    /// Data directory for the local backend
    #[arg(long, default_value = "./sitestore-data")]
    pub data_path: PathBuf,

    /// Bucket for the s3 backend
    #[arg(long)]
    pub bucket: Option<String>,

    /// Key prefix isolating this deployment inside the backend
    #[arg(long)]
    pub namespace: Option<String>,

    /// Tenant (hub) id every operation is scoped to
    #[arg(short = 't', long)]
    pub tenant: String,

    /// User recorded in provenance stamps
    #[arg(short = 'u', long, default_value = "cli")]
    pub user: String,

    /// Timeout per blob store call in seconds
    #[arg(long, default_value_t = 10)]
    pub timeout: u64,

    /// Retries for failed reads
    #[arg(long, default_value_t = 3)]
    pub retries: u32,

    /// Follow cascades through dependents of deleted rows
    #[arg(long)]
    pub recursive_cascade: bool,

    /// Deepest level followed by a recursive cascade
    #[arg(long, default_value_t = 100)]
    pub max_cascade_depth: usize,

    /// Concurrent dependent-row updates during a delete
    #[arg(long, default_value_t = 8)]
    pub fanout: usize,

    /// Output format
    #[arg(long, default_value = "table", value_enum)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

impl Args {
    /// Convert arguments into backend and store configuration.
    pub fn into_config(&self) -> Result<(BackendConfig, StoreConfig), CliError> {
        let backend = match self.backend {
            BackendKind::Memory => BackendConfig::memory(),
            BackendKind::Local => BackendConfig::local(&self.data_path),
            BackendKind::S3 => {
                let bucket = self.bucket.clone().ok_or_else(|| {
                    CliError::Input("--bucket is required for the s3 backend".to_string())
                })?;
                BackendConfig::s3(bucket)
            }
        };
        let backend = match &self.namespace {
            Some(namespace) => backend.with_namespace(namespace.clone()),
            None => backend,
        };

        let mut config = StoreConfig::new()
            .with_request_timeout(Duration::from_secs(self.timeout))
            .with_retry(RetryPolicy {
                max_retries: self.retries,
                ..RetryPolicy::default()
            })
            .with_fanout_concurrency(self.fanout);
        if self.recursive_cascade {
            config = config.with_recursive_cascade(self.max_cascade_depth);
        }

        Ok((backend, config))
    }
}

/// CLI errors.
#[derive(Debug, Error)]
pub enum CliError {
    /// Store operation failed.
    #[error(transparent)]
    Store(#[from] sitestore_core::Error),

    /// Bad command-line input.
    #[error("{0}")]
    Input(String),

    /// Reading an input file failed.
    #[error("failed to read input: {0}")]
    Io(#[from] std::io::Error),

    /// Input was not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sitestore=info,sitestore_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    if let Err(e) = run(args).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), CliError> {
    let (backend, config) = args.into_config()?;
    let db = Database::open(&backend, config)?;
    let session = Session::new(args.tenant.as_str(), args.user.as_str())?;
    let formatter = formatter::create_formatter(args.format);
    debug!(tenant = %session.tenant(), command = ?args.command, "running command");

    let output = commands::execute(&db, &session, args.command).await?;
    println!("{}", formatter.format(&output));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitestore_core::{Backend, CascadeMode};

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_defaults() {
        let args = parse(&["sitestore", "--tenant", "hub", "folder", "list"]);
        let (backend, config) = args.into_config().unwrap();
        assert_eq!(backend.backend, Backend::Local(PathBuf::from("./sitestore-data")));
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.cascade_mode, CascadeMode::Flat);
        assert_eq!(args.user, "cli");
    }

    #[test]
    fn test_recursive_cascade_flag() {
        let args = parse(&[
            "sitestore",
            "-t",
            "hub",
            "--backend",
            "memory",
            "--recursive-cascade",
            "--max-cascade-depth",
            "4",
            "row",
            "list",
            "orders",
        ]);
        let (backend, config) = args.into_config().unwrap();
        assert_eq!(backend.backend, Backend::Memory);
        assert_eq!(config.cascade_mode, CascadeMode::Recursive { max_depth: 4 });
    }

    #[test]
    fn test_s3_requires_bucket() {
        let args = parse(&["sitestore", "-t", "hub", "--backend", "s3", "table", "list"]);
        assert!(matches!(args.into_config(), Err(CliError::Input(_))));

        let args = parse(&[
            "sitestore",
            "-t",
            "hub",
            "--backend",
            "s3",
            "--bucket",
            "docs",
            "--namespace",
            "prod",
            "table",
            "list",
        ]);
        let (backend, _) = args.into_config().unwrap();
        assert_eq!(
            backend.backend,
            Backend::S3 {
                bucket: "docs".to_string()
            }
        );
        assert_eq!(backend.namespace.as_deref(), Some("prod"));
    }

    #[test]
    fn test_tenant_is_required() {
        assert!(Args::try_parse_from(["sitestore", "folder", "list"]).is_err());
    }
}
