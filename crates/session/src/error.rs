use std::fmt;

use fleetledger_adapters::AdapterError;
use fleetledger_store::StoreError;

#[derive(Debug)]
pub enum SessionError {
    Store(StoreError),
    /// One file failed to parse. Coordinator-level handling isolates this
    /// to the file; it only escapes when a caller parses directly.
    Adapter(AdapterError),
    /// The object store could not deliver a file's bytes.
    Storage { key: String, detail: String },
    Config { path: String, detail: String },
    Cancelled { session_id: String },
    /// The session is already in a terminal state.
    AlreadyFinished { session_id: String, status: String },
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(e) => write!(f, "{e}"),
            Self::Adapter(e) => write!(f, "{e}"),
            Self::Storage { key, detail } => write!(f, "object '{key}' unavailable: {detail}"),
            Self::Config { path, detail } => write!(f, "config '{path}': {detail}"),
            Self::Cancelled { session_id } => write!(f, "session {session_id} was cancelled"),
            Self::AlreadyFinished { session_id, status } => {
                write!(f, "session {session_id} already finished ({status})")
            }
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            Self::Adapter(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for SessionError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

impl From<AdapterError> for SessionError {
    fn from(err: AdapterError) -> Self {
        Self::Adapter(err)
    }
}
