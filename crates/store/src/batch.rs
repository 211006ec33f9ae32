//! Bounded batch writer over the ledger.
//!
//! Buffers (snapshot, change) pairs and commits them in one transaction
//! when the batch fills or the flush interval elapses. Transient SQLite
//! errors (busy, locked) are retried on a bounded backoff schedule; any
//! other error, or exhausting the schedule, fails the flush and the caller
//! marks the affected rows failed.

use std::time::{Duration, Instant};

use fleetledger_recon::{OrderChange, OrderSnapshot};

use crate::error::StoreError;
use crate::ledger::Ledger;

pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(2);

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(50);

pub struct BatchWriter {
    user_id: i64,
    session_id: String,
    batch_size: usize,
    flush_interval: Duration,
    buffer: Vec<(OrderSnapshot, OrderChange)>,
    last_flush: Instant,
}

impl BatchWriter {
    pub fn new(user_id: i64, session_id: &str) -> Self {
        Self::with_limits(user_id, session_id, DEFAULT_BATCH_SIZE, DEFAULT_FLUSH_INTERVAL)
    }

    pub fn with_limits(
        user_id: i64,
        session_id: &str,
        batch_size: usize,
        flush_interval: Duration,
    ) -> Self {
        Self {
            user_id,
            session_id: session_id.to_string(),
            batch_size: batch_size.max(1),
            flush_interval,
            buffer: Vec::new(),
            last_flush: Instant::now(),
        }
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Queue one pair, flushing if the batch is full or overdue.
    pub fn push(
        &mut self,
        ledger: &mut Ledger,
        snapshot: OrderSnapshot,
        change: OrderChange,
    ) -> Result<usize, StoreError> {
        self.buffer.push((snapshot, change));
        if self.buffer.len() >= self.batch_size || self.last_flush.elapsed() >= self.flush_interval
        {
            self.flush(ledger)
        } else {
            Ok(0)
        }
    }

    /// Commit everything buffered. Returns the number of pairs written.
    /// On failure the buffer is dropped; those rows are lost to the ledger
    /// and must be counted as failed by the caller.
    pub fn flush(&mut self, ledger: &mut Ledger) -> Result<usize, StoreError> {
        if self.buffer.is_empty() {
            self.last_flush = Instant::now();
            return Ok(0);
        }

        let result = self.flush_with_retry(ledger);
        let written = self.buffer.len();
        self.buffer.clear();
        self.last_flush = Instant::now();
        result.map(|_| written)
    }

    fn flush_with_retry(&self, ledger: &mut Ledger) -> Result<(), StoreError> {
        let mut delay = RETRY_BASE_DELAY;
        let mut last = String::new();

        for attempt in 1..=RETRY_ATTEMPTS {
            match ledger.write_batch(self.user_id, &self.session_id, &self.buffer) {
                Ok(()) => return Ok(()),
                Err(StoreError::Sqlite(e)) if StoreError::is_transient(&e) => {
                    log::warn!(
                        "batch write attempt {attempt}/{RETRY_ATTEMPTS} hit transient error: {e}"
                    );
                    last = e.to_string();
                    std::thread::sleep(delay);
                    delay *= 2;
                }
                Err(other) => return Err(other),
            }
        }

        Err(StoreError::WriteExhausted { attempts: RETRY_ATTEMPTS, last })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetledger_recon::{reconcile, BusinessKey, CanonicalField, RawRecord, Resolution};

    fn pair(n: u32) -> (OrderSnapshot, OrderChange) {
        let mut rec = RawRecord::new(1, n as usize);
        rec.set(CanonicalField::OrderNumber, format!("ORD-{n}"));
        rec.set(CanonicalField::OrderPrice, "5.00");
        let key = BusinessKey::derive(&rec, "t.csv").unwrap();
        match reconcile(None, &rec, &key) {
            Resolution::New { snapshot, change } => (snapshot, change),
            _ => unreachable!(),
        }
    }

    #[test]
    fn flushes_when_batch_fills() {
        let mut ledger = Ledger::open_in_memory().unwrap();
        let session = ledger.create_session(1, 1).unwrap();
        let mut writer =
            BatchWriter::with_limits(1, &session.id, 3, Duration::from_secs(3600));

        assert_eq!(writer.push(&mut ledger, pair(0).0, pair(0).1).unwrap(), 0);
        assert_eq!(writer.push(&mut ledger, pair(1).0, pair(1).1).unwrap(), 0);
        // third push reaches the batch size and commits all three
        assert_eq!(writer.push(&mut ledger, pair(2).0, pair(2).1).unwrap(), 3);
        assert_eq!(writer.pending(), 0);

        let stored = ledger.current_order(1, "ORD-1").unwrap();
        assert!(stored.is_some());
    }

    #[test]
    fn explicit_flush_drains_partial_batch() {
        let mut ledger = Ledger::open_in_memory().unwrap();
        let session = ledger.create_session(1, 1).unwrap();
        let mut writer =
            BatchWriter::with_limits(1, &session.id, 1000, Duration::from_secs(3600));

        let (snapshot, change) = pair(0);
        writer.push(&mut ledger, snapshot, change).unwrap();
        assert_eq!(writer.flush(&mut ledger).unwrap(), 1);
        assert!(ledger.current_order(1, "ORD-0").unwrap().is_some());
    }

    #[test]
    fn empty_flush_is_a_noop() {
        let mut ledger = Ledger::open_in_memory().unwrap();
        let mut writer = BatchWriter::new(1, "s");
        assert_eq!(writer.flush(&mut ledger).unwrap(), 0);
    }
}
