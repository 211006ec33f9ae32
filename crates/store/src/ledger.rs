//! SQLite persistence for the order ledger.
//!
//! Orders are append-only: each accepted change inserts a new snapshot row,
//! `UNIQUE(user_id, business_key, version)` guarantees the version chain is
//! never forked. Sessions carry a partial unique index so a user can hold
//! at most one pending or processing session.

use std::path::Path;

use chrono::{SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use uuid::Uuid;

use fleetledger_recon::{
    CanonicalField, ChangeType, Fingerprint, MatchStatus, OrderChange, OrderSnapshot,
};

use crate::error::StoreError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS orders (
    id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL,
    business_key TEXT NOT NULL,
    version INTEGER NOT NULL,
    order_number TEXT,
    machine_code TEXT,
    address TEXT,
    goods_name TEXT,
    taste_name TEXT,
    order_type TEXT,
    order_resource TEXT,
    order_price TEXT,
    creation_time TEXT,
    paying_time TEXT,
    brewing_time TEXT,
    delivery_time TEXT,
    refund_time TEXT,
    payment_status TEXT,
    brew_status TEXT,
    payment_type TEXT,
    reason TEXT,
    extras TEXT NOT NULL DEFAULT '{}',
    match_status TEXT NOT NULL DEFAULT 'unmatched',
    source_file_id INTEGER,
    created_at TEXT NOT NULL,
    UNIQUE(user_id, business_key, version)
);
CREATE INDEX IF NOT EXISTS idx_orders_head ON orders(user_id, business_key, version DESC);

CREATE TABLE IF NOT EXISTS order_changes (
    id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL,
    business_key TEXT NOT NULL,
    version INTEGER NOT NULL,
    change_type TEXT NOT NULL,
    deltas TEXT NOT NULL,
    source_file_id INTEGER NOT NULL,
    row_index INTEGER NOT NULL,
    session_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(user_id, business_key, version)
);
CREATE INDEX IF NOT EXISTS idx_changes_user ON order_changes(user_id, id DESC);
CREATE INDEX IF NOT EXISTS idx_changes_key ON order_changes(user_id, business_key);

CREATE TABLE IF NOT EXISTS source_files (
    id INTEGER PRIMARY KEY,
    session_id TEXT NOT NULL,
    user_id INTEGER NOT NULL,
    file_name TEXT NOT NULL,
    format TEXT,
    content_hash TEXT,
    fingerprint TEXT,
    similarity REAL,
    similar_to INTEGER,
    status TEXT NOT NULL DEFAULT 'pending',
    error TEXT,
    records_total INTEGER NOT NULL DEFAULT 0,
    records_new INTEGER NOT NULL DEFAULT 0,
    records_updated INTEGER NOT NULL DEFAULT 0,
    records_failed INTEGER NOT NULL DEFAULT 0,
    uploaded_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_files_session ON source_files(session_id);
CREATE INDEX IF NOT EXISTS idx_files_hash ON source_files(user_id, content_hash);

CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    user_id INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    partial INTEGER NOT NULL DEFAULT 0,
    total_files INTEGER NOT NULL DEFAULT 0,
    processed_files INTEGER NOT NULL DEFAULT 0,
    failed_files INTEGER NOT NULL DEFAULT 0,
    total_records INTEGER NOT NULL DEFAULT 0,
    processed_records INTEGER NOT NULL DEFAULT 0,
    new_orders INTEGER NOT NULL DEFAULT 0,
    updated_orders INTEGER NOT NULL DEFAULT 0,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    error TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_active
    ON sessions(user_id) WHERE status IN ('pending', 'processing');
"#;

// ── Row types ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Pending,
    Processed,
    Failed,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processed => "processed",
            Self::Failed => "failed",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "pending" => Some(Self::Pending),
            "processed" => Some(Self::Processed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionRow {
    pub id: String,
    pub user_id: i64,
    pub status: SessionStatus,
    pub partial: bool,
    pub total_files: i64,
    pub processed_files: i64,
    pub failed_files: i64,
    pub total_records: i64,
    pub processed_records: i64,
    pub new_orders: i64,
    pub updated_orders: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SourceFileRow {
    pub id: i64,
    pub session_id: String,
    pub user_id: i64,
    pub file_name: String,
    pub format: Option<String>,
    pub content_hash: Option<String>,
    pub similarity: Option<f64>,
    /// The most similar prior upload, when one was found.
    pub similar_to: Option<i64>,
    pub status: FileStatus,
    pub error: Option<String>,
    pub records_total: i64,
    pub records_new: i64,
    pub records_updated: i64,
    pub records_failed: i64,
    pub uploaded_at: String,
}

/// One change-log row with its persistence metadata.
#[derive(Debug, Clone)]
pub struct ChangeRecord {
    pub change: OrderChange,
    pub session_id: String,
    pub created_at: String,
}

/// Optional filters for change-log pages. All present filters AND together.
#[derive(Debug, Clone, Default)]
pub struct ChangeFilter {
    pub business_key: Option<String>,
    pub change_type: Option<ChangeType>,
    pub session_id: Option<String>,
    pub source_file_id: Option<i64>,
}

// ── Ledger ─────────────────────────────────────────────────────────────────

pub struct Ledger {
    conn: Connection,
}

impl Ledger {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    fn now() -> String {
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    // ── Orders ─────────────────────────────────────────────────────────

    /// Latest snapshot for a business key, or `None` for a first sighting.
    pub fn current_order(
        &self,
        user_id: i64,
        business_key: &str,
    ) -> Result<Option<OrderSnapshot>, StoreError> {
        let sql = format!(
            "SELECT business_key, version, extras, match_status, {} \
             FROM orders WHERE user_id = ?1 AND business_key = ?2 \
             ORDER BY version DESC LIMIT 1",
            canonical_columns()
        );
        self.conn
            .query_row(&sql, params![user_id, business_key], row_to_snapshot)
            .optional()?
            .transpose()
    }

    /// Insert one batch of (snapshot, change) pairs in a single transaction.
    /// Either the whole batch lands or none of it does.
    pub fn write_batch(
        &mut self,
        user_id: i64,
        session_id: &str,
        items: &[(OrderSnapshot, OrderChange)],
    ) -> Result<(), StoreError> {
        if items.is_empty() {
            return Ok(());
        }
        let now = Self::now();
        let tx = self.conn.transaction()?;
        {
            let order_sql = format!(
                "INSERT INTO orders (user_id, business_key, version, {}, extras, match_status, \
                 source_file_id, created_at) VALUES (?, ?, ?, {}, ?, ?, ?, ?)",
                canonical_columns(),
                placeholders(CanonicalField::ALL.len())
            );
            let mut order_stmt = tx.prepare(&order_sql)?;
            let mut change_stmt = tx.prepare(
                "INSERT INTO order_changes (user_id, business_key, version, change_type, \
                 deltas, source_file_id, row_index, session_id, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;

            for (snapshot, change) in items {
                let mut values: Vec<rusqlite::types::Value> = Vec::new();
                values.push(user_id.into());
                values.push(snapshot.business_key.clone().into());
                values.push(snapshot.version.into());
                for field in CanonicalField::ALL {
                    values.push(match snapshot.fields.get(&field) {
                        Some(v) => v.clone().into(),
                        None => rusqlite::types::Value::Null,
                    });
                }
                values.push(
                    serde_json::to_string(&snapshot.extras)
                        .map_err(|e| StoreError::Decode { what: "extras", detail: e.to_string() })?
                        .into(),
                );
                values.push(snapshot.match_status.as_str().to_string().into());
                values.push(change.source_file_id.into());
                values.push(now.clone().into());
                order_stmt.execute(params_from_iter(values))?;

                let deltas = serde_json::to_string(&change.deltas)
                    .map_err(|e| StoreError::Decode { what: "deltas", detail: e.to_string() })?;
                change_stmt.execute(params![
                    user_id,
                    change.business_key,
                    change.version,
                    change.change_type.as_str(),
                    deltas,
                    change.source_file_id,
                    change.row_index as i64,
                    session_id,
                    now,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Paginated change log, newest first.
    pub fn changes_page(
        &self,
        user_id: i64,
        filter: &ChangeFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ChangeRecord>, StoreError> {
        let mut sql = String::from(
            "SELECT business_key, version, change_type, deltas, source_file_id, row_index, \
             session_id, created_at FROM order_changes WHERE user_id = ?",
        );
        let mut args: Vec<rusqlite::types::Value> = vec![user_id.into()];
        if let Some(key) = &filter.business_key {
            sql.push_str(" AND business_key = ?");
            args.push(key.clone().into());
        }
        if let Some(ct) = filter.change_type {
            sql.push_str(" AND change_type = ?");
            args.push(ct.as_str().to_string().into());
        }
        if let Some(session) = &filter.session_id {
            sql.push_str(" AND session_id = ?");
            args.push(session.clone().into());
        }
        if let Some(file_id) = filter.source_file_id {
            sql.push_str(" AND source_file_id = ?");
            args.push(file_id.into());
        }
        sql.push_str(" ORDER BY id DESC LIMIT ? OFFSET ?");
        args.push(limit.into());
        args.push(offset.into());

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (key, version, change_type, deltas, file_id, row_index, session_id, created_at) =
                row?;
            let change_type = ChangeType::from_name(&change_type).ok_or(StoreError::Decode {
                what: "change_type",
                detail: change_type.clone(),
            })?;
            let deltas = serde_json::from_str(&deltas)
                .map_err(|e| StoreError::Decode { what: "deltas", detail: e.to_string() })?;
            records.push(ChangeRecord {
                change: OrderChange {
                    business_key: key,
                    version,
                    change_type,
                    deltas,
                    source_file_id: file_id,
                    row_index: row_index as usize,
                },
                session_id,
                created_at,
            });
        }
        Ok(records)
    }

    // ── Sessions ───────────────────────────────────────────────────────

    /// Create a pending session. Fails with [`StoreError::SessionConflict`]
    /// while the user has another session in flight; the partial unique
    /// index makes the check atomic.
    pub fn create_session(&self, user_id: i64, total_files: i64) -> Result<SessionRow, StoreError> {
        let id = Uuid::new_v4().to_string();
        let now = Self::now();
        let result = self.conn.execute(
            "INSERT INTO sessions (id, user_id, status, total_files, started_at) \
             VALUES (?1, ?2, 'pending', ?3, ?4)",
            params![id, user_id, total_files, now],
        );
        match result {
            Ok(_) => self.session(&id),
            Err(rusqlite::Error::SqliteFailure(code, _))
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::SessionConflict { user_id })
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn session(&self, id: &str) -> Result<SessionRow, StoreError> {
        self.conn
            .query_row(
                "SELECT id, user_id, status, partial, total_files, processed_files, \
                 failed_files, total_records, processed_records, new_orders, updated_orders, \
                 started_at, finished_at, error FROM sessions WHERE id = ?1",
                params![id],
                row_to_session,
            )
            .optional()?
            .transpose()?
            .ok_or(StoreError::NotFound { what: "session", id: id.to_string() })
    }

    pub fn set_session_status(&self, id: &str, status: SessionStatus) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE sessions SET status = ?2 WHERE id = ?1",
            params![id, status.as_str()],
        )?;
        Ok(())
    }

    /// Fold one file's outcome into the session counters.
    pub fn record_file_outcome(
        &self,
        id: &str,
        processed: bool,
        records_total: i64,
        records_processed: i64,
        new_orders: i64,
        updated_orders: i64,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE sessions SET \
             processed_files = processed_files + ?2, \
             failed_files = failed_files + ?3, \
             total_records = total_records + ?4, \
             processed_records = processed_records + ?5, \
             new_orders = new_orders + ?6, \
             updated_orders = updated_orders + ?7 \
             WHERE id = ?1",
            params![
                id,
                processed as i64,
                (!processed) as i64,
                records_total,
                records_processed,
                new_orders,
                updated_orders,
            ],
        )?;
        Ok(())
    }

    pub fn finish_session(
        &self,
        id: &str,
        status: SessionStatus,
        partial: bool,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE sessions SET status = ?2, partial = ?3, finished_at = ?4, error = ?5 \
             WHERE id = ?1",
            params![id, status.as_str(), partial as i64, Self::now(), error],
        )?;
        Ok(())
    }

    // ── Source files ───────────────────────────────────────────────────

    pub fn add_source_file(
        &self,
        session_id: &str,
        user_id: i64,
        file_name: &str,
    ) -> Result<i64, StoreError> {
        self.conn.execute(
            "INSERT INTO source_files (session_id, user_id, file_name, uploaded_at) \
             VALUES (?1, ?2, ?3, ?4)",
            params![session_id, user_id, file_name, Self::now()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Record parse results before reconciliation starts.
    pub fn set_file_parsed(
        &self,
        file_id: i64,
        format: &str,
        content_hash: &str,
        records_total: i64,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE source_files SET format = ?2, content_hash = ?3, records_total = ?4 \
             WHERE id = ?1",
            params![file_id, format, content_hash, records_total],
        )?;
        Ok(())
    }

    pub fn set_file_similarity(
        &self,
        file_id: i64,
        fingerprint: &Fingerprint,
        similarity: f64,
        similar_to: Option<i64>,
    ) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(fingerprint)
            .map_err(|e| StoreError::Decode { what: "fingerprint", detail: e.to_string() })?;
        self.conn.execute(
            "UPDATE source_files SET fingerprint = ?2, similarity = ?3, similar_to = ?4 \
             WHERE id = ?1",
            params![file_id, encoded, similarity, similar_to],
        )?;
        Ok(())
    }

    pub fn finish_file(
        &self,
        file_id: i64,
        status: FileStatus,
        error: Option<&str>,
        records_new: i64,
        records_updated: i64,
        records_failed: i64,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE source_files SET status = ?2, error = ?3, records_new = ?4, \
             records_updated = ?5, records_failed = ?6 WHERE id = ?1",
            params![file_id, status.as_str(), error, records_new, records_updated, records_failed],
        )?;
        Ok(())
    }

    pub fn source_file(&self, file_id: i64) -> Result<SourceFileRow, StoreError> {
        self.conn
            .query_row(
                &format!("{SOURCE_FILE_SELECT} WHERE id = ?1"),
                params![file_id],
                row_to_source_file,
            )
            .optional()?
            .transpose()?
            .ok_or(StoreError::NotFound { what: "source file", id: file_id.to_string() })
    }

    pub fn session_files(&self, session_id: &str) -> Result<Vec<SourceFileRow>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SOURCE_FILE_SELECT} WHERE session_id = ?1 ORDER BY id"))?;
        let rows = stmt.query_map(params![session_id], row_to_source_file)?;
        let mut files = Vec::new();
        for row in rows {
            files.push(row??);
        }
        Ok(files)
    }

    /// Most recent prior upload with identical content, if any.
    pub fn find_by_content_hash(
        &self,
        user_id: i64,
        content_hash: &str,
        exclude_file_id: i64,
    ) -> Result<Option<SourceFileRow>, StoreError> {
        self.conn
            .query_row(
                &format!(
                    "{SOURCE_FILE_SELECT} WHERE user_id = ?1 AND content_hash = ?2 \
                     AND id != ?3 ORDER BY id DESC LIMIT 1"
                ),
                params![user_id, content_hash, exclude_file_id],
                row_to_source_file,
            )
            .optional()?
            .transpose()
    }

    /// Fingerprints of the user's most recent parsed uploads, newest first.
    pub fn recent_fingerprints(
        &self,
        user_id: i64,
        exclude_file_id: i64,
        limit: i64,
    ) -> Result<Vec<(i64, String, Fingerprint)>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, file_name, fingerprint FROM source_files \
             WHERE user_id = ?1 AND id != ?2 AND fingerprint IS NOT NULL \
             ORDER BY id DESC LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![user_id, exclude_file_id, limit], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
        })?;
        let mut fingerprints = Vec::new();
        for row in rows {
            let (id, name, encoded) = row?;
            let fingerprint = serde_json::from_str(&encoded)
                .map_err(|e| StoreError::Decode { what: "fingerprint", detail: e.to_string() })?;
            fingerprints.push((id, name, fingerprint));
        }
        Ok(fingerprints)
    }
}

// ── Row mapping ────────────────────────────────────────────────────────────

const SOURCE_FILE_SELECT: &str = "SELECT id, session_id, user_id, file_name, format, \
    content_hash, similarity, similar_to, status, error, records_total, records_new, \
    records_updated, records_failed, uploaded_at FROM source_files";

fn canonical_columns() -> String {
    CanonicalField::ALL
        .iter()
        .map(|f| f.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn row_to_snapshot(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<OrderSnapshot, StoreError>> {
    let business_key: String = row.get(0)?;
    let version: i64 = row.get(1)?;
    let extras_json: String = row.get(2)?;
    let match_status: String = row.get(3)?;

    let mut fields = std::collections::BTreeMap::new();
    for (i, field) in CanonicalField::ALL.iter().enumerate() {
        if let Some(value) = row.get::<_, Option<String>>(4 + i)? {
            fields.insert(*field, value);
        }
    }

    Ok((|| {
        let extras = serde_json::from_str(&extras_json)
            .map_err(|e| StoreError::Decode { what: "extras", detail: e.to_string() })?;
        let match_status = match match_status.as_str() {
            "matched" => MatchStatus::Matched,
            _ => MatchStatus::Unmatched,
        };
        Ok(OrderSnapshot { business_key, version, fields, extras, match_status })
    })())
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<SessionRow, StoreError>> {
    let status: String = row.get(2)?;
    Ok((|| {
        let status = SessionStatus::from_name(&status)
            .ok_or(StoreError::Decode { what: "session status", detail: status.clone() })?;
        Ok(SessionRow {
            id: row.get(0)?,
            user_id: row.get(1)?,
            status,
            partial: row.get::<_, i64>(3)? != 0,
            total_files: row.get(4)?,
            processed_files: row.get(5)?,
            failed_files: row.get(6)?,
            total_records: row.get(7)?,
            processed_records: row.get(8)?,
            new_orders: row.get(9)?,
            updated_orders: row.get(10)?,
            started_at: row.get(11)?,
            finished_at: row.get(12)?,
            error: row.get(13)?,
        })
    })())
}

fn row_to_source_file(
    row: &rusqlite::Row<'_>,
) -> rusqlite::Result<Result<SourceFileRow, StoreError>> {
    let status: String = row.get(8)?;
    Ok((|| {
        let status = FileStatus::from_name(&status)
            .ok_or(StoreError::Decode { what: "file status", detail: status.clone() })?;
        Ok(SourceFileRow {
            id: row.get(0)?,
            session_id: row.get(1)?,
            user_id: row.get(2)?,
            file_name: row.get(3)?,
            format: row.get(4)?,
            content_hash: row.get(5)?,
            similarity: row.get(6)?,
            similar_to: row.get(7)?,
            status,
            error: row.get(9)?,
            records_total: row.get(10)?,
            records_new: row.get(11)?,
            records_updated: row.get(12)?,
            records_failed: row.get(13)?,
            uploaded_at: row.get(14)?,
        })
    })())
}
