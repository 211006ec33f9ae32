use std::fmt;

#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
    /// Stored JSON (deltas, extras, fingerprints) failed to decode.
    Decode { what: &'static str, detail: String },
    /// The user already has a pending or processing session.
    SessionConflict { user_id: i64 },
    NotFound { what: &'static str, id: String },
    /// A batch still failed after the bounded retry schedule.
    WriteExhausted { attempts: u32, last: String },
}

impl StoreError {
    /// Busy/locked errors are worth retrying; everything else is not.
    pub fn is_transient(err: &rusqlite::Error) -> bool {
        matches!(
            err,
            rusqlite::Error::SqliteFailure(code, _)
                if code.code == rusqlite::ErrorCode::DatabaseBusy
                    || code.code == rusqlite::ErrorCode::DatabaseLocked
        )
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite(e) => write!(f, "ledger database: {e}"),
            Self::Decode { what, detail } => write!(f, "stored {what} failed to decode: {detail}"),
            Self::SessionConflict { user_id } => {
                write!(f, "user {user_id} already has an active session")
            }
            Self::NotFound { what, id } => write!(f, "{what} '{id}' not found"),
            Self::WriteExhausted { attempts, last } => {
                write!(f, "batch write failed after {attempts} attempts: {last}")
            }
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Sqlite(e) => Some(e),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Sqlite(err)
    }
}
