//! Ingest configuration, loaded from TOML with full defaults so a missing
//! file or empty table is valid.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::SessionError;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IngestConfig {
    /// Reconcile lanes. 0 means one per available core.
    pub lanes: usize,
    /// Pairs per ledger transaction.
    pub batch_size: usize,
    /// Seconds a partial batch may wait before it is committed anyway.
    pub flush_interval_secs: u64,
    /// Jaccard similarity above which an upload is flagged as a probable
    /// near-duplicate. Flagging never blocks processing.
    pub similarity_threshold: f64,
    /// How many prior uploads to compare fingerprints against.
    pub similarity_lookback: i64,
    /// Emit a progress event at least every this many percent...
    pub progress_percent: u64,
    /// ...or every this many records, whichever comes first.
    pub progress_records: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            lanes: 0,
            batch_size: 1000,
            flush_interval_secs: 2,
            similarity_threshold: 0.95,
            similarity_lookback: 10,
            progress_percent: 5,
            progress_records: 5000,
        }
    }
}

impl IngestConfig {
    pub fn load(path: &Path) -> Result<Self, SessionError> {
        let text = std::fs::read_to_string(path).map_err(|e| SessionError::Config {
            path: path.display().to_string(),
            detail: e.to_string(),
        })?;
        let config: Self = toml::from_str(&text).map_err(|e| SessionError::Config {
            path: path.display().to_string(),
            detail: e.to_string(),
        })?;
        config.validate(path)
    }

    /// Like [`load`](Self::load) but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, SessionError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    fn validate(self, path: &Path) -> Result<Self, SessionError> {
        if self.batch_size == 0 {
            return Err(SessionError::Config {
                path: path.display().to_string(),
                detail: "batch_size must be at least 1".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(SessionError::Config {
                path: path.display().to_string(),
                detail: "similarity_threshold must be within 0.0..=1.0".to_string(),
            });
        }
        Ok(self)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    /// Effective lane count for a run.
    pub fn effective_lanes(&self) -> usize {
        if self.lanes > 0 {
            self.lanes
        } else {
            std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn defaults_apply_for_missing_file() {
        let dir = tempdir().unwrap();
        let config = IngestConfig::load_or_default(&dir.path().join("none.toml")).unwrap();
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.similarity_threshold, 0.95);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ingest.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "batch_size = 50\nsimilarity_threshold = 0.9").unwrap();

        let config = IngestConfig::load(&path).unwrap();
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.similarity_threshold, 0.9);
        assert_eq!(config.similarity_lookback, 10);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ingest.toml");
        std::fs::write(&path, "batch_size = 0").unwrap();
        assert!(IngestConfig::load(&path).is_err());

        std::fs::write(&path, "similarity_threshold = 1.5").unwrap();
        assert!(IngestConfig::load(&path).is_err());

        std::fs::write(&path, "no_such_key = 1").unwrap();
        assert!(IngestConfig::load(&path).is_err());
    }
}
