//! Session coordinator: drives one upload batch through parse workers,
//! reconcile lanes, and the single writer thread.
//!
//! Threading layout per run:
//!   - parse workers (min of file count and lane count) pull files off a
//!     shared queue and produce canonical records
//!   - reconcile lanes own disjoint business-key partitions; all records
//!     for one key land in one lane, so per-key processing is sequential
//!     even when files are parsed in parallel
//!   - one writer thread owns the ledger connection and commits batches
//!
//! Lanes keep a write-through snapshot cache: reads for a key they have
//! already touched come from the cache, so a lane observes its own writes
//! before the writer commits them.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Instant;

use fleetledger_adapters::{parse_upload, ParsedUpload};
use fleetledger_recon::{
    reconcile, BusinessKey, Fingerprint, OrderChange, OrderSnapshot, RawRecord, Resolution,
};
use fleetledger_store::{
    BatchWriter, ChangeFilter, ChangeRecord, FileStatus, Ledger, SessionRow, SessionStatus,
    SourceFileRow, StoreError,
};

use crate::config::IngestConfig;
use crate::error::SessionError;
use crate::notify::{Notifier, ProgressEvent};
use crate::storage::ObjectStore;

/// Writer channel depth. Full channel blocks the lanes, which is the
/// intended backpressure.
const WRITER_QUEUE_DEPTH: usize = 4096;

/// One file in an upload batch.
#[derive(Debug, Clone)]
pub struct FileSpec {
    pub name: String,
    pub object_key: String,
}

pub struct Coordinator {
    config: IngestConfig,
    ledger_path: PathBuf,
    store: Arc<dyn ObjectStore>,
    notifier: Arc<dyn Notifier>,
}

struct ParseOutcome {
    file_id: i64,
    name: String,
    result: Result<ParsedUpload, SessionError>,
}

/// Records of one parsed file with their derived keys.
struct KeyedFile {
    file_id: i64,
    name: String,
    records: Vec<(BusinessKey, RawRecord)>,
    key_failures: i64,
}

#[derive(Default, Clone, Copy)]
struct LaneTally {
    new: i64,
    updated: i64,
}

struct WriterPair {
    file_id: i64,
    snapshot: OrderSnapshot,
    change: OrderChange,
}

#[derive(Default)]
struct WriterTallies {
    written: HashMap<i64, i64>,
    failed: HashMap<i64, i64>,
}

/// Writer-side accounting: which pairs are buffered but not yet committed,
/// and which business keys lost a version to a dropped batch. A key with a
/// dropped version must stop advancing, otherwise the next commit would
/// leave a gap in its version chain.
#[derive(Default)]
struct WriterLog {
    in_flight: Vec<(i64, String)>,
    poisoned: HashSet<String>,
    tallies: WriterTallies,
}

impl WriterLog {
    /// Admit one pair into the current batch. Pairs for poisoned keys are
    /// refused and counted failed.
    fn admit(&mut self, file_id: i64, key: &str) -> bool {
        if self.poisoned.contains(key) {
            *self.tallies.failed.entry(file_id).or_default() += 1;
            return false;
        }
        self.in_flight.push((file_id, key.to_string()));
        true
    }

    fn settle(&mut self, result: &Result<usize, StoreError>) {
        match result {
            Ok(0) => {} // still buffered
            Ok(_) => {
                for (file_id, _) in self.in_flight.drain(..) {
                    *self.tallies.written.entry(file_id).or_default() += 1;
                }
            }
            Err(e) => {
                log::error!("dropping failed batch: {e}");
                for (file_id, key) in self.in_flight.drain(..) {
                    *self.tallies.failed.entry(file_id).or_default() += 1;
                    self.poisoned.insert(key);
                }
            }
        }
    }

    fn into_tallies(self) -> WriterTallies {
        self.tallies
    }
}

impl Coordinator {
    pub fn new(
        config: IngestConfig,
        ledger_path: impl Into<PathBuf>,
        store: Arc<dyn ObjectStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self { config, ledger_path: ledger_path.into(), store, notifier }
    }

    fn open_ledger(&self) -> Result<Ledger, SessionError> {
        Ok(Ledger::open(&self.ledger_path)?)
    }

    // ── Public surface ─────────────────────────────────────────────────

    /// Run one upload batch to completion and return the final session row.
    ///
    /// Fails fast with [`fleetledger_store::StoreError::SessionConflict`]
    /// while the user has another session in flight. Per-file failures do
    /// not abort the session; they mark the file failed and the session
    /// partial.
    pub fn ingest(&self, user_id: i64, files: &[FileSpec]) -> Result<SessionRow, SessionError> {
        let ledger = self.open_ledger()?;
        let session = ledger.create_session(user_id, files.len() as i64)?;

        let mut jobs = Vec::with_capacity(files.len());
        for spec in files {
            let file_id = ledger.add_source_file(&session.id, user_id, &spec.name)?;
            jobs.push((file_id, spec.clone()));
        }

        self.notifier.notify(&ProgressEvent::SessionStarted {
            session_id: session.id.clone(),
            total_files: files.len() as u64,
        });
        ledger.set_session_status(&session.id, SessionStatus::Processing)?;

        let result = self.run(&ledger, &session, jobs);
        match result {
            Ok(()) => {}
            Err(e) => {
                log::error!("session {} aborted: {e}", session.id);
                ledger.finish_session(&session.id, SessionStatus::Failed, false, Some(&e.to_string()))?;
                return Err(e);
            }
        }
        Ok(ledger.session(&session.id)?)
    }

    pub fn status(&self, session_id: &str) -> Result<(SessionRow, Vec<SourceFileRow>), SessionError> {
        let ledger = self.open_ledger()?;
        let session = ledger.session(session_id)?;
        let files = ledger.session_files(session_id)?;
        Ok((session, files))
    }

    /// Request cancellation. The running coordinator observes the status
    /// flip and stops between records; already committed work stays.
    pub fn cancel(&self, session_id: &str) -> Result<(), SessionError> {
        let ledger = self.open_ledger()?;
        let session = ledger.session(session_id)?;
        if session.status.is_terminal() {
            return Err(SessionError::AlreadyFinished {
                session_id: session_id.to_string(),
                status: session.status.to_string(),
            });
        }
        ledger.set_session_status(session_id, SessionStatus::Cancelled)?;
        Ok(())
    }

    pub fn changes(
        &self,
        user_id: i64,
        filter: &ChangeFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ChangeRecord>, SessionError> {
        let ledger = self.open_ledger()?;
        Ok(ledger.changes_page(user_id, filter, limit, offset)?)
    }

    // ── Pipeline ───────────────────────────────────────────────────────

    fn run(
        &self,
        ledger: &Ledger,
        session: &SessionRow,
        jobs: Vec<(i64, FileSpec)>,
    ) -> Result<(), SessionError> {
        let cancelled = Arc::new(AtomicBool::new(false));

        let outcomes = self.parse_phase(jobs, &cancelled);

        let mut keyed_files = Vec::new();
        let mut parse_failures = 0i64;
        for outcome in outcomes {
            if self.check_cancelled(ledger, &session.id, &cancelled)? {
                break;
            }
            match outcome.result {
                Ok(parsed) => {
                    let keyed = self.register_parsed(ledger, session, outcome.file_id, &outcome.name, parsed)?;
                    keyed_files.push(keyed);
                }
                Err(e) => {
                    parse_failures += 1;
                    log::warn!("file '{}' failed to parse: {e}", outcome.name);
                    self.notifier.notify(&ProgressEvent::FileFailed {
                        session_id: session.id.clone(),
                        file_name: outcome.name.clone(),
                        error: e.to_string(),
                    });
                    ledger.finish_file(outcome.file_id, FileStatus::Failed, Some(&e.to_string()), 0, 0, 0)?;
                    ledger.record_file_outcome(&session.id, false, 0, 0, 0, 0)?;
                }
            }
        }

        let (lane_tallies, writer_tallies) =
            self.reconcile_phase(session, &keyed_files, &cancelled)?;

        // Fold per-file results into rows and session counters.
        let mut processed_files = 0i64;
        let mut failed_files = parse_failures;
        for file in &keyed_files {
            let tally = lane_tallies.get(&file.file_id).copied().unwrap_or_default();
            let write_failed = writer_tallies.failed.get(&file.file_id).copied().unwrap_or(0);
            let failed = file.key_failures + write_failed;
            let total = file.records.len() as i64 + file.key_failures;

            let (status, error) = if write_failed > 0 {
                (FileStatus::Failed, Some(format!("{write_failed} records failed to persist")))
            } else {
                (FileStatus::Processed, None)
            };
            ledger.finish_file(
                file.file_id,
                status,
                error.as_deref(),
                tally.new,
                tally.updated,
                failed,
            )?;
            ledger.record_file_outcome(
                &session.id,
                status == FileStatus::Processed,
                total,
                total - failed,
                tally.new,
                tally.updated,
            )?;
            match status {
                FileStatus::Processed => processed_files += 1,
                _ => failed_files += 1,
            }
        }

        let was_cancelled = self.check_cancelled(ledger, &session.id, &cancelled)?;
        let (status, partial) = if was_cancelled {
            (SessionStatus::Cancelled, processed_files > 0)
        } else if failed_files > 0 && processed_files == 0 {
            (SessionStatus::Failed, false)
        } else if failed_files > 0 {
            (SessionStatus::Completed, true)
        } else {
            (SessionStatus::Completed, false)
        };
        ledger.finish_session(&session.id, status, partial, None)?;
        self.notifier.notify(&ProgressEvent::SessionFinished {
            session_id: session.id.clone(),
            status: status.to_string(),
            partial,
        });
        Ok(())
    }

    /// Fetch and parse all files with a bounded worker pool. Order of the
    /// returned outcomes matches upload order.
    fn parse_phase(
        &self,
        jobs: Vec<(i64, FileSpec)>,
        cancelled: &Arc<AtomicBool>,
    ) -> Vec<ParseOutcome> {
        let workers = self.config.effective_lanes().min(jobs.len()).max(1);
        let queue = Mutex::new(VecDeque::from(jobs));
        let results = Mutex::new(Vec::new());

        thread::scope(|s| {
            for _ in 0..workers {
                s.spawn(|| loop {
                    if cancelled.load(Ordering::Relaxed) {
                        break;
                    }
                    let Some((file_id, spec)) = queue.lock().unwrap().pop_front() else {
                        break;
                    };
                    let result = self
                        .store
                        .get(&spec.object_key)
                        .and_then(|bytes| {
                            parse_upload(&spec.name, &bytes, file_id).map_err(SessionError::from)
                        });
                    results.lock().unwrap().push(ParseOutcome {
                        file_id,
                        name: spec.name,
                        result,
                    });
                });
            }
        });

        let mut outcomes = results.into_inner().unwrap();
        outcomes.sort_by_key(|o| o.file_id);
        outcomes
    }

    /// Record parse results, derive business keys, and run the
    /// near-duplicate check for one parsed file.
    fn register_parsed(
        &self,
        ledger: &Ledger,
        session: &SessionRow,
        file_id: i64,
        name: &str,
        parsed: ParsedUpload,
    ) -> Result<KeyedFile, SessionError> {
        ledger.set_file_parsed(
            file_id,
            parsed.format.as_str(),
            &parsed.content_hash,
            parsed.records.len() as i64,
        )?;
        self.notifier.notify(&ProgressEvent::FileParsed {
            session_id: session.id.clone(),
            file_name: name.to_string(),
            records: parsed.records.len() as u64,
        });

        let mut records = Vec::with_capacity(parsed.records.len());
        let mut key_failures = 0i64;
        let mut fingerprint = Fingerprint::new();
        for record in parsed.records {
            match BusinessKey::derive(&record, name) {
                Ok(key) => {
                    fingerprint.add(&key, &record);
                    records.push((key, record));
                }
                Err(e) => {
                    key_failures += 1;
                    log::warn!("{e}");
                }
            }
        }

        // Exact duplicate content short-circuits the Jaccard scan. Files
        // whose rows yielded no keys have empty fingerprints and nothing
        // to compare; their similarity stays unset.
        if !fingerprint.is_empty() {
            let best = match ledger.find_by_content_hash(session.user_id, &parsed.content_hash, file_id)? {
                Some(prior) => Some((prior.id, prior.file_name, 1.0)),
                None => ledger
                    .recent_fingerprints(session.user_id, file_id, self.config.similarity_lookback)?
                    .into_iter()
                    .map(|(prior_id, prior_name, prior)| {
                        (prior_id, prior_name, fingerprint.jaccard(&prior))
                    })
                    .max_by(|a, b| a.2.total_cmp(&b.2)),
            };
            let (similar_to, matched_name, score) = match best {
                Some((id, file_name, score)) => (Some(id), file_name, score),
                None => (None, String::new(), 0.0),
            };
            ledger.set_file_similarity(file_id, &fingerprint, score, similar_to)?;
            if score >= self.config.similarity_threshold {
                log::warn!(
                    "'{name}' is {:.1}% similar to previously processed '{matched_name}'",
                    score * 100.0,
                );
                self.notifier.notify(&ProgressEvent::NearDuplicate {
                    session_id: session.id.clone(),
                    file_name: name.to_string(),
                    matched_file: matched_name,
                    similarity_percent: score * 100.0,
                });
            }
        }

        Ok(KeyedFile { file_id, name: name.to_string(), records, key_failures })
    }

    /// Lane threads reconcile, the writer thread persists.
    fn reconcile_phase(
        &self,
        session: &SessionRow,
        files: &[KeyedFile],
        cancelled: &Arc<AtomicBool>,
    ) -> Result<(HashMap<i64, LaneTally>, WriterTallies), SessionError> {
        let lanes = self.config.effective_lanes();
        let mut lane_items: Vec<Vec<(i64, &BusinessKey, &RawRecord)>> = vec![Vec::new(); lanes];
        let mut total_records = 0u64;
        for file in files {
            for (key, record) in &file.records {
                lane_items[key.lane(lanes)].push((file.file_id, key, record));
                total_records += 1;
            }
        }

        let (pair_tx, pair_rx) = mpsc::sync_channel::<WriterPair>(WRITER_QUEUE_DEPTH);
        let writer = self.spawn_writer(session, pair_rx, cancelled)?;

        let progress = ProgressMeter::new(
            total_records,
            self.config.progress_percent,
            self.config.progress_records,
        );
        let mut lane_results: Vec<Result<HashMap<i64, LaneTally>, SessionError>> = Vec::new();

        thread::scope(|s| {
            let mut handles = Vec::new();
            for items in lane_items {
                if items.is_empty() {
                    continue;
                }
                let tx = pair_tx.clone();
                let handle = s.spawn(|| self.run_lane(session, items, tx, cancelled, &progress));
                handles.push(handle);
            }
            drop(pair_tx);
            for handle in handles {
                lane_results.push(handle.join().unwrap_or_else(|_| {
                    Err(SessionError::Cancelled { session_id: session.id.clone() })
                }));
            }
        });

        let writer_tallies = writer
            .join()
            .map_err(|_| SessionError::Cancelled { session_id: session.id.clone() })??;

        let mut tallies: HashMap<i64, LaneTally> = HashMap::new();
        for result in lane_results {
            for (file_id, tally) in result? {
                let entry = tallies.entry(file_id).or_default();
                entry.new += tally.new;
                entry.updated += tally.updated;
            }
        }
        Ok((tallies, writer_tallies))
    }

    fn run_lane(
        &self,
        session: &SessionRow,
        items: Vec<(i64, &BusinessKey, &RawRecord)>,
        tx: mpsc::SyncSender<WriterPair>,
        cancelled: &Arc<AtomicBool>,
        progress: &ProgressMeter,
    ) -> Result<HashMap<i64, LaneTally>, SessionError> {
        let ledger = self.open_ledger()?;
        let mut cache: HashMap<String, OrderSnapshot> = HashMap::new();
        let mut tallies: HashMap<i64, LaneTally> = HashMap::new();

        for (file_id, key, record) in items {
            if cancelled.load(Ordering::Relaxed) {
                break;
            }

            let stored = match cache.get(key.as_str()) {
                Some(snapshot) => Some(snapshot.clone()),
                None => ledger.current_order(session.user_id, key.as_str())?,
            };

            match reconcile(stored.as_ref(), record, key) {
                Resolution::Unchanged => {
                    // cache even pure duplicates so they stop hitting the db
                    if let Some(snapshot) = stored {
                        cache.entry(key.as_str().to_string()).or_insert(snapshot);
                    }
                }
                Resolution::New { snapshot, change } => {
                    tallies.entry(file_id).or_default().new += 1;
                    cache.insert(key.as_str().to_string(), snapshot.clone());
                    if tx.send(WriterPair { file_id, snapshot, change }).is_err() {
                        break; // writer is gone; its tallies carry the reason
                    }
                }
                Resolution::Update { snapshot, change } => {
                    tallies.entry(file_id).or_default().updated += 1;
                    cache.insert(key.as_str().to_string(), snapshot.clone());
                    if tx.send(WriterPair { file_id, snapshot, change }).is_err() {
                        break;
                    }
                }
            }

            if let Some(processed) = progress.record() {
                self.notifier.notify(&ProgressEvent::Progress {
                    session_id: session.id.clone(),
                    processed_records: processed,
                    total_records: progress.total,
                });
            }
        }
        Ok(tallies)
    }

    /// The writer thread owns its own ledger connection and the batch
    /// writer. It also polls for cancellation, since it is the only thread
    /// with a natural clock; the poll runs on flush ticks and, rate-bounded
    /// by the same interval, while records keep streaming in.
    fn spawn_writer(
        &self,
        session: &SessionRow,
        rx: mpsc::Receiver<WriterPair>,
        cancelled: &Arc<AtomicBool>,
    ) -> Result<thread::JoinHandle<Result<WriterTallies, SessionError>>, SessionError> {
        let mut ledger = self.open_ledger()?;
        let session_id = session.id.clone();
        let user_id = session.user_id;
        let batch_size = self.config.batch_size;
        let interval = self.config.flush_interval();
        let cancelled = Arc::clone(cancelled);

        Ok(thread::spawn(move || {
            let mut batch = BatchWriter::with_limits(user_id, &session_id, batch_size, interval);
            let mut log = WriterLog::default();
            let mut last_poll = Instant::now();

            loop {
                match rx.recv_timeout(interval) {
                    Ok(pair) => {
                        if log.admit(pair.file_id, &pair.snapshot.business_key) {
                            let result = batch.push(&mut ledger, pair.snapshot, pair.change);
                            log.settle(&result);
                        }
                    }
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        let result = batch.flush(&mut ledger);
                        log.settle(&result);
                    }
                    Err(mpsc::RecvTimeoutError::Disconnected) => {
                        let result = batch.flush(&mut ledger);
                        log.settle(&result);
                        break;
                    }
                }

                if last_poll.elapsed() >= interval {
                    last_poll = Instant::now();
                    if let Ok(row) = ledger.session(&session_id) {
                        if row.status == SessionStatus::Cancelled {
                            cancelled.store(true, Ordering::Relaxed);
                        }
                    }
                }
            }
            Ok(log.into_tallies())
        }))
    }

    fn check_cancelled(
        &self,
        ledger: &Ledger,
        session_id: &str,
        cancelled: &Arc<AtomicBool>,
    ) -> Result<bool, SessionError> {
        if cancelled.load(Ordering::Relaxed) {
            return Ok(true);
        }
        let row = ledger.session(session_id)?;
        if row.status == SessionStatus::Cancelled {
            cancelled.store(true, Ordering::Relaxed);
            return Ok(true);
        }
        Ok(false)
    }
}

/// Rate-bounded progress counter shared by the lanes: emits when either
/// the percent step or the record step has passed since the last emission.
struct ProgressMeter {
    total: u64,
    step: u64,
    processed: AtomicU64,
    last_emitted: AtomicU64,
}

impl ProgressMeter {
    fn new(total: u64, percent_step: u64, record_step: u64) -> Self {
        let by_percent = (total * percent_step.max(1)) / 100;
        let step = by_percent.clamp(1, record_step.max(1));
        Self { total, step, processed: AtomicU64::new(0), last_emitted: AtomicU64::new(0) }
    }

    /// Count one processed record; returns the running total when an
    /// emission is due.
    fn record(&self) -> Option<u64> {
        let processed = self.processed.fetch_add(1, Ordering::Relaxed) + 1;
        let last = self.last_emitted.load(Ordering::Relaxed);
        if processed - last >= self.step
            && self
                .last_emitted
                .compare_exchange(last, processed, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            return Some(processed);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_meter_steps() {
        // 100 records, 5 percent step, large record cap: every 5 records
        let meter = ProgressMeter::new(100, 5, 5000);
        let emissions: Vec<u64> = (0..100).filter_map(|_| meter.record()).collect();
        assert_eq!(emissions, vec![5, 10, 15, 20, 25, 30, 35, 40, 45, 50, 55, 60, 65, 70, 75, 80, 85, 90, 95, 100]);
    }

    #[test]
    fn progress_meter_record_cap_wins_for_huge_batches() {
        // 1M records at 5% would be 50k; the record cap holds it to 5000
        let meter = ProgressMeter::new(1_000_000, 5, 5000);
        assert_eq!(meter.step, 5000);
    }

    #[test]
    fn writer_log_settles_buffered_pairs_on_commit() {
        let mut log = WriterLog::default();
        assert!(log.admit(1, "A-1"));
        log.settle(&Ok(0)); // buffered, nothing committed yet
        assert!(log.admit(1, "A-2"));
        log.settle(&Ok(2));

        let tallies = log.into_tallies();
        assert_eq!(tallies.written.get(&1).copied(), Some(2));
        assert!(tallies.failed.is_empty());
    }

    #[test]
    fn writer_log_poisons_keys_of_a_dropped_batch() {
        let mut log = WriterLog::default();
        assert!(log.admit(1, "A-1"));
        assert!(log.admit(1, "A-2"));
        log.settle(&Err(StoreError::WriteExhausted { attempts: 3, last: "busy".into() }));

        // the next version for a dropped key must not commit; a gap-free
        // chain means nothing lands after a lost version
        assert!(!log.admit(1, "A-1"));
        assert!(log.admit(2, "B-1"));
        log.settle(&Ok(1));

        let tallies = log.into_tallies();
        assert_eq!(tallies.failed.get(&1).copied(), Some(3));
        assert_eq!(tallies.written.get(&1), None);
        assert_eq!(tallies.written.get(&2).copied(), Some(1));
    }
}
