//! `fleetledger-session` — concurrent processing sessions over the ledger.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod notify;
pub mod storage;

pub use config::IngestConfig;
pub use coordinator::{Coordinator, FileSpec};
pub use error::SessionError;
pub use notify::{LogNotifier, Notifier, ProgressEvent};
pub use storage::{LocalDirStore, ObjectStore};
