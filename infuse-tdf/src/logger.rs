//! The TDF data logger.
//!
//! Each registered logger instance owns a private block under assembly and
//! one backend sink. `log` fans a record out to every instance selected by
//! the mask; a full block is handed to the shared commit worker, which
//! drains blocks to backends at low priority. A failing backend never costs
//! the other sinks their copy of a record.

use crate::backend::LogBackend;
use crate::block::BlockBuilder;
use crate::codec::{TdfRecord, TdfTime};
use crate::error::{Result, TdfError};
use crossbeam::channel::{unbounded, Receiver, Sender};
use infuse_proto::{EpochTime, TdfId};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Bit-per-instance logger selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoggersMask(pub u8);

impl LoggersMask {
    pub const NONE: LoggersMask = LoggersMask(0);
    pub const ALL: LoggersMask = LoggersMask(0xff);

    pub fn bit(index: u8) -> Self {
        LoggersMask(1 << index)
    }

    pub fn contains(self, index: u8) -> bool {
        self.0 & (1 << index) != 0
    }

    pub fn union(self, other: LoggersMask) -> Self {
        LoggersMask(self.0 | other.0)
    }
}

impl std::ops::BitOr for LoggersMask {
    type Output = LoggersMask;
    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// Fire-and-forget observability for one logger instance.
#[derive(Debug, Default)]
pub struct LoggerCounters {
    pub records_logged: AtomicU32,
    pub records_dropped: AtomicU32,
    pub blocks_committed: AtomicU32,
    pub commit_failures: AtomicU32,
}

struct LoggerState {
    builder: Option<BlockBuilder>,
}

#[derive(Default)]
struct CommitProgress {
    /// Number of sealed blocks fully processed by the worker.
    drained: u64,
    last_error: Option<String>,
}

struct LoggerInner {
    name: &'static str,
    bit: u8,
    block_size: usize,
    sync_required: bool,
    state: Mutex<LoggerState>,
    backend: Mutex<Box<dyn LogBackend>>,
    commit_tx: Sender<WorkerMsg>,
    progress: Mutex<CommitProgress>,
    progress_cv: Condvar,
    counters: LoggerCounters,
    failed: AtomicBool,
}

/// Handle to one registered logger instance.
#[derive(Clone)]
pub struct DataLogger {
    inner: Arc<LoggerInner>,
}

impl DataLogger {
    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    pub fn mask(&self) -> LoggersMask {
        LoggersMask::bit(self.inner.bit)
    }

    pub fn counters(&self) -> &LoggerCounters {
        &self.inner.counters
    }

    /// Index of the block currently under assembly.
    pub fn current_block(&self) -> u64 {
        self.inner
            .state
            .lock()
            .builder
            .as_ref()
            .map(|b| b.index())
            .expect("builder always present")
    }

    /// Sealed blocks the commit worker has finished with.
    pub fn committed_blocks(&self) -> u64 {
        self.inner.progress.lock().drained
    }

    /// A persistent backend failure was observed; `current_block` will
    /// plateau against `committed_blocks` output.
    pub fn has_failed(&self) -> bool {
        self.inner.failed.load(Ordering::Relaxed)
    }

    /// Direct access to the backend for maintenance (read-back, erase).
    pub fn with_backend<R>(&self, f: impl FnOnce(&mut dyn LogBackend) -> R) -> R {
        f(self.inner.backend.lock().as_mut())
    }

    /// Appends one record, sealing and committing the current block first
    /// if the record does not fit. Fire and forget: failures count, never
    /// propagate.
    pub fn log_record(&self, record: &TdfRecord<'_>) {
        let inner = &self.inner;
        if record.encoded_len() > BlockBuilder::capacity(inner.block_size) {
            inner.counters.records_dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                logger = inner.name,
                size = record.encoded_len(),
                "record larger than block capacity dropped"
            );
            return;
        }

        let mut state = inner.state.lock();
        let remaining = state
            .builder
            .as_ref()
            .expect("builder always present")
            .remaining();
        if record.encoded_len() > remaining {
            Self::seal_locked(inner, &mut *state);
        }
        let builder = state.builder.as_mut().expect("builder always present");
        match builder.append(record) {
            Ok(()) => {
                inner.counters.records_logged.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                inner.counters.records_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(logger = inner.name, error = %e, "record rejected");
            }
        }
    }

    fn seal_locked(inner: &Arc<LoggerInner>, state: &mut LoggerState) {
        let builder = state.builder.take().expect("builder always present");
        if builder.is_empty() {
            state.builder = Some(builder);
            return;
        }
        let index = builder.index();
        state.builder = Some(BlockBuilder::new(inner.block_size, index + 1));
        let bytes = builder.seal();
        // Unbounded channel: enqueue never blocks under the state lock.
        let _ = inner.commit_tx.send(WorkerMsg::Commit {
            inner: inner.clone(),
            index,
            bytes,
        });
    }

    /// Seals any partial block and, for `sync_required` backends, waits for
    /// the commit worker to drain it.
    pub fn flush(&self) -> Result<()> {
        let inner = &self.inner;
        let target = {
            let mut state = inner.state.lock();
            let has_records = !state
                .builder
                .as_ref()
                .expect("builder always present")
                .is_empty();
            if has_records {
                Self::seal_locked(inner, &mut *state);
            }
            // Everything sealed so far must drain.
            state
                .builder
                .as_ref()
                .map(|b| b.index())
                .expect("builder always present")
        };

        if inner.sync_required {
            let mut progress = inner.progress.lock();
            while progress.drained < target {
                inner.progress_cv.wait(&mut progress);
            }
            if let Some(err) = progress.last_error.take() {
                return Err(TdfError::PersistFailure(err));
            }
        }
        Ok(())
    }
}

enum WorkerMsg {
    Commit {
        inner: Arc<LoggerInner>,
        index: u64,
        bytes: Vec<u8>,
    },
    Shutdown,
}

fn commit_worker(rx: Receiver<WorkerMsg>) {
    while let Ok(msg) = rx.recv() {
        let WorkerMsg::Commit {
            inner,
            index,
            bytes,
        } = msg
        else {
            break;
        };
        let result = inner.backend.lock().block_write(index, &bytes);
        let mut progress = inner.progress.lock();
        progress.drained = progress.drained.max(index + 1);
        match result {
            Ok(()) => {
                inner.counters.blocks_committed.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(logger = inner.name, index, "block committed");
            }
            Err(e) => {
                inner.counters.commit_failures.fetch_add(1, Ordering::Relaxed);
                inner.failed.store(true, Ordering::Relaxed);
                progress.last_error = Some(e.to_string());
                tracing::warn!(logger = inner.name, index, error = %e, "block commit failed");
            }
        }
        inner.progress_cv.notify_all();
        drop(progress);
    }
}

/// The set of registered logger instances sharing one commit worker.
pub struct TdfLoggerSet {
    loggers: Vec<DataLogger>,
    worker_tx: Sender<WorkerMsg>,
    worker: Option<JoinHandle<()>>,
}

impl Default for TdfLoggerSet {
    fn default() -> Self {
        Self::new()
    }
}

impl TdfLoggerSet {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        let worker = std::thread::Builder::new()
            .name("tdf-commit".into())
            .spawn(move || commit_worker(rx))
            .expect("spawning commit worker");
        TdfLoggerSet {
            loggers: Vec::new(),
            worker_tx: tx,
            worker: Some(worker),
        }
    }

    /// Registers a backend as the next logger instance and returns its mask
    /// bit. At most eight instances fit the mask.
    pub fn register(&mut self, name: &'static str, backend: Box<dyn LogBackend>) -> LoggersMask {
        assert!(self.loggers.len() < 8, "loggers mask is eight bits");
        let bit = self.loggers.len() as u8;
        let block_size = backend.block_size();
        let sync_required = backend.sync_required();
        let inner = Arc::new(LoggerInner {
            name,
            bit,
            block_size,
            sync_required,
            state: Mutex::new(LoggerState {
                builder: Some(BlockBuilder::new(block_size, 0)),
            }),
            backend: Mutex::new(backend),
            commit_tx: self.worker_tx.clone(),
            progress: Mutex::new(CommitProgress::default()),
            progress_cv: Condvar::new(),
            counters: LoggerCounters::default(),
            failed: AtomicBool::new(false),
        });
        tracing::info!(name, bit, block_size, "logger registered");
        self.loggers.push(DataLogger { inner });
        LoggersMask::bit(bit)
    }

    pub fn logger(&self, bit: u8) -> Option<&DataLogger> {
        self.loggers.get(bit as usize)
    }

    pub fn loggers(&self) -> &[DataLogger] {
        &self.loggers
    }

    fn selected(&self, mask: LoggersMask) -> impl Iterator<Item = &DataLogger> {
        self.loggers
            .iter()
            .filter(move |l| mask.contains(l.inner.bit))
    }

    /// Appends one record to every selected logger.
    pub fn log(&self, mask: LoggersMask, id: TdfId, time: EpochTime, payload: &[u8]) {
        let time = if time.is_zero() {
            TdfTime::None
        } else {
            TdfTime::Absolute(time)
        };
        let record = TdfRecord::single(id, time, payload);
        for logger in self.selected(mask) {
            logger.log_record(&record);
        }
    }

    /// Appends `count` uniformly spaced samples as a single record.
    ///
    /// `period` is in 1/65536 s units; `payload` must hold exactly
    /// `count × elem_len` bytes.
    #[allow(clippy::too_many_arguments)]
    pub fn log_array(
        &self,
        mask: LoggersMask,
        id: TdfId,
        elem_len: usize,
        count: u8,
        first: EpochTime,
        period: u32,
        payload: &[u8],
    ) {
        if payload.len() != elem_len * count as usize {
            tracing::debug!(%id, "array payload size mismatch, dropped");
            for logger in self.selected(mask) {
                logger
                    .inner
                    .counters
                    .records_dropped
                    .fetch_add(1, Ordering::Relaxed);
            }
            return;
        }
        let record = TdfRecord {
            id,
            time: TdfTime::Array {
                base: first,
                period,
            },
            sample_count: count,
            payload,
        };
        for logger in self.selected(mask) {
            logger.log_record(&record);
        }
    }

    /// Commits any partial blocks on the selected loggers now. Waits only
    /// for backends that declare `sync_required`; the first failure is
    /// reported after every selected logger has been flushed.
    pub fn flush(&self, mask: LoggersMask) -> Result<()> {
        let mut first_err = None;
        for logger in self.selected(mask) {
            if let Err(e) = logger.flush() {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }
}

impl Drop for TdfLoggerSet {
    fn drop(&mut self) {
        let _ = self.worker_tx.send(WorkerMsg::Shutdown);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}
