//! Best-effort progress notification. Delivery failures are logged and
//! never affect processing.

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    SessionStarted {
        session_id: String,
        total_files: u64,
    },
    FileParsed {
        session_id: String,
        file_name: String,
        records: u64,
    },
    /// An upload scored above the near-duplicate threshold against an
    /// earlier file. Informational; processing continues.
    NearDuplicate {
        session_id: String,
        file_name: String,
        matched_file: String,
        similarity_percent: f64,
    },
    Progress {
        session_id: String,
        processed_records: u64,
        total_records: u64,
    },
    FileFailed {
        session_id: String,
        file_name: String,
        error: String,
    },
    SessionFinished {
        session_id: String,
        status: String,
        partial: bool,
    },
}

pub trait Notifier: Send + Sync {
    fn notify(&self, event: &ProgressEvent);
}

/// Default notifier: structured events into the log.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: &ProgressEvent) {
        match serde_json::to_string(event) {
            Ok(json) => log::info!("{json}"),
            Err(e) => log::warn!("progress event failed to encode: {e}"),
        }
    }
}
