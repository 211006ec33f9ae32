// fledger - fleet order ledger ingestion CLI

mod exit_codes;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use fleetledger_recon::ChangeType;
use fleetledger_session::{
    Coordinator, FileSpec, IngestConfig, LocalDirStore, LogNotifier, SessionError,
};
use fleetledger_store::{ChangeFilter, SessionStatus, StoreError};

use exit_codes::{
    EXIT_CANCELLED, EXIT_ERROR, EXIT_PARTIAL, EXIT_SESSION_CONFLICT, EXIT_SUCCESS, EXIT_USAGE,
};

#[derive(Parser)]
#[command(name = "fledger")]
#[command(about = "Ingest device-fleet export files into the order ledger")]
#[command(version)]
struct Cli {
    /// Path to the ledger database
    #[arg(long, env = "FLEDGER_DB", default_value = "ledger.db")]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload and reconcile one batch of export files
    #[command(after_help = "\
Examples:
  fledger ingest --user 1 exports/january.xlsx
  fledger ingest --user 1 a.csv b.json vendors.zip
  fledger --db /var/lib/fledger/ledger.db ingest --user 2 --config ingest.toml dump.csv")]
    Ingest {
        /// Ledger owner the files belong to
        #[arg(long)]
        user: i64,

        /// Optional ingest configuration (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Export files to process
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Print the final session as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show a session and its files
    Status {
        session: String,

        #[arg(long)]
        json: bool,
    },

    /// Page through the change log
    Changes {
        #[arg(long)]
        user: i64,

        /// Filter by business key
        #[arg(long)]
        key: Option<String>,

        /// Filter by change type (new, updated, filled, changed)
        #[arg(long = "type")]
        change_type: Option<String>,

        /// Filter by session id
        #[arg(long)]
        session: Option<String>,

        #[arg(long, default_value_t = 50)]
        limit: i64,

        #[arg(long, default_value_t = 0)]
        offset: i64,

        #[arg(long)]
        json: bool,
    },

    /// Request cancellation of a running session
    Cancel { session: String },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            exit_code_for(&e)
        }
    };
    ExitCode::from(code)
}

fn exit_code_for(err: &SessionError) -> u8 {
    match err {
        SessionError::Store(StoreError::SessionConflict { .. }) => EXIT_SESSION_CONFLICT,
        SessionError::Config { .. } => EXIT_USAGE,
        SessionError::Cancelled { .. } => EXIT_CANCELLED,
        _ => EXIT_ERROR,
    }
}

fn coordinator(db: &PathBuf, config: IngestConfig) -> Coordinator {
    Coordinator::new(
        config,
        db.clone(),
        Arc::new(LocalDirStore::new(std::env::current_dir().unwrap_or_else(|_| ".".into()))),
        Arc::new(LogNotifier),
    )
}

fn run(cli: Cli) -> Result<u8, SessionError> {
    match cli.command {
        Commands::Ingest { user, config, files, json } => {
            let config = match config {
                Some(path) => IngestConfig::load(&path)?,
                None => IngestConfig::default(),
            };
            let specs: Vec<FileSpec> = files
                .iter()
                .map(|path| FileSpec {
                    name: path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| path.display().to_string()),
                    object_key: path.display().to_string(),
                })
                .collect();

            let session = coordinator(&cli.db, config).ingest(user, &specs)?;
            if json {
                println!("{}", session_json(&session));
            } else {
                println!("session {}: {}{}", session.id, session.status,
                    if session.partial { " (partial)" } else { "" });
                println!(
                    "  files: {} processed, {} failed of {}",
                    session.processed_files, session.failed_files, session.total_files
                );
                println!(
                    "  records: {} processed of {} ({} new orders, {} updated)",
                    session.processed_records,
                    session.total_records,
                    session.new_orders,
                    session.updated_orders
                );
            }
            Ok(match session.status {
                SessionStatus::Completed if session.partial => EXIT_PARTIAL,
                SessionStatus::Completed => EXIT_SUCCESS,
                SessionStatus::Cancelled => EXIT_CANCELLED,
                _ => EXIT_ERROR,
            })
        }

        Commands::Status { session, json } => {
            let (row, files) = coordinator(&cli.db, IngestConfig::default()).status(&session)?;
            if json {
                let files: Vec<serde_json::Value> = files
                    .iter()
                    .map(|f| {
                        serde_json::json!({
                            "id": f.id,
                            "name": f.file_name,
                            "format": f.format,
                            "status": f.status.as_str(),
                            "similarity_percent": f.similarity.map(|s| s * 100.0),
                            "similar_to": f.similar_to,
                            "records_total": f.records_total,
                            "records_new": f.records_new,
                            "records_updated": f.records_updated,
                            "records_failed": f.records_failed,
                            "error": f.error,
                        })
                    })
                    .collect();
                let mut value = session_json(&row);
                value["files"] = serde_json::Value::Array(files);
                println!("{value}");
            } else {
                println!("session {}: {}{}", row.id, row.status,
                    if row.partial { " (partial)" } else { "" });
                for file in files {
                    println!(
                        "  {} [{}] {} new={} updated={} failed={}{}",
                        file.file_name,
                        file.format.as_deref().unwrap_or("?"),
                        file.status.as_str(),
                        file.records_new,
                        file.records_updated,
                        file.records_failed,
                        file.error.map(|e| format!(" error: {e}")).unwrap_or_default()
                    );
                    if let (Some(score), Some(prior)) = (file.similarity, file.similar_to) {
                        println!("    {:.1}% similar to file #{prior}", score * 100.0);
                    }
                }
            }
            Ok(EXIT_SUCCESS)
        }

        Commands::Changes { user, key, change_type, session, limit, offset, json } => {
            let change_type = match change_type.as_deref() {
                None => None,
                Some(name) => match ChangeType::from_name(name) {
                    Some(ct) => Some(ct),
                    None => {
                        eprintln!("error: unknown change type '{name}'");
                        return Ok(EXIT_USAGE);
                    }
                },
            };
            let filter = ChangeFilter {
                business_key: key,
                change_type,
                session_id: session,
                source_file_id: None,
            };
            let changes =
                coordinator(&cli.db, IngestConfig::default()).changes(user, &filter, limit, offset)?;
            if json {
                let out: Vec<serde_json::Value> = changes
                    .iter()
                    .map(|c| {
                        serde_json::json!({
                            "business_key": c.change.business_key,
                            "version": c.change.version,
                            "change_type": c.change.change_type.as_str(),
                            "deltas": c.change.deltas,
                            "source_file_id": c.change.source_file_id,
                            "session_id": c.session_id,
                            "created_at": c.created_at,
                        })
                    })
                    .collect();
                println!("{}", serde_json::Value::Array(out));
            } else {
                for c in changes {
                    println!(
                        "{} v{} {} ({} fields) at {}",
                        c.change.business_key,
                        c.change.version,
                        c.change.change_type,
                        c.change.deltas.len(),
                        c.created_at
                    );
                }
            }
            Ok(EXIT_SUCCESS)
        }

        Commands::Cancel { session } => {
            coordinator(&cli.db, IngestConfig::default()).cancel(&session)?;
            println!("cancellation requested for session {session}");
            Ok(EXIT_SUCCESS)
        }
    }
}

fn session_json(row: &fleetledger_store::SessionRow) -> serde_json::Value {
    serde_json::json!({
        "id": row.id,
        "user_id": row.user_id,
        "status": row.status.as_str(),
        "partial": row.partial,
        "total_files": row.total_files,
        "processed_files": row.processed_files,
        "failed_files": row.failed_files,
        "total_records": row.total_records,
        "processed_records": row.processed_records,
        "new_orders": row.new_orders,
        "updated_orders": row.updated_orders,
        "started_at": row.started_at,
        "finished_at": row.finished_at,
        "error": row.error,
    })
}
