//! Concurrent multi-file driver
//!
//! A [`BatchEngine`] takes an ordered list of paths, predicts the number of
//! bytes the whole batch will move, and runs one job per file on a bounded
//! rayon pool. Workers feed byte progress into a shared [`ProgressState`];
//! the calling thread collects each job's [`WorkResult`] as it arrives,
//! updates the counters and reports through an [`EventSink`].
//!
//! One file failing never stops the batch.

use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::config::{BatchConfig, Mode, clamp_threads};
use crate::error::{ErrorCategory, ErrorKind, GfglockError, Result};
use crate::file_ops::{
    DecryptOptions, EncryptOptions, FileOutcome, decrypt_path, encrypt_path, failure_message,
};
use crate::format::Algorithm;
use crate::predict::{estimate_plaintext_size, format_bytes, format_duration, predicted_job_bytes};
use crate::progress::{ProgressSnapshot, ProgressState};

/// What to process and with which password.
pub struct BatchRequest {
    pub paths: Vec<PathBuf>,
    pub password: Zeroizing<Vec<u8>>,
    pub mode: Mode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Pending,
    Running,
    Cancelling,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Succeeded,
    Failed,
    /// Already in the requested state, or not a container when decrypting.
    Skipped,
}

/// Outcome of one job, handed from the worker to the driver.
#[derive(Debug, Clone)]
pub struct WorkResult {
    pub path: PathBuf,
    pub success: bool,
    pub message: String,
    pub classification: Classification,
    reported_bytes: u64,
    predicted_bytes: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchEvent {
    Progress(ProgressSnapshot),
    FilesProgress { done: usize, total: usize },
    /// A worker started on this path.
    FileChanged(PathBuf),
    Status(String),
    Error(String),
    /// Always the last event of a run.
    Finished(BatchSummary),
}

/// Receiver of batch events. Called from worker threads as well as from
/// the thread running [`BatchEngine::run`].
pub trait EventSink: Send + Sync {
    fn emit(&self, event: BatchEvent);
}

impl<F> EventSink for F
where
    F: Fn(BatchEvent) + Send + Sync,
{
    fn emit(&self, event: BatchEvent) {
        self(event)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchSummary {
    pub elapsed: Duration,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: bool,
    /// Every failed path with its message, in completion order.
    pub failures: Vec<(PathBuf, String)>,
    /// Every per-file message, in completion order.
    pub messages: Vec<String>,
}

impl BatchSummary {
    /// One-line human readable summary.
    pub fn describe(&self) -> String {
        format!(
            "{} of {} files done in {}: {} succeeded, {} failed, {} skipped{}",
            self.succeeded + self.failed + self.skipped,
            self.total,
            format_duration(self.elapsed),
            self.succeeded,
            self.failed,
            self.skipped,
            if self.cancelled { " (cancelled)" } else { "" }
        )
    }
}

/// Cooperative cancellation for a running batch.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
    state: Arc<Mutex<BatchState>>,
}

impl CancelHandle {
    /// Stop starting new jobs and stop aggregating results. Jobs already
    /// running finish their file.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        let mut state = self.state.lock();
        if *state == BatchState::Running {
            *state = BatchState::Cancelling;
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

pub struct BatchEngine {
    request: BatchRequest,
    config: BatchConfig,
    state: Arc<Mutex<BatchState>>,
    cancel: CancelHandle,
}

impl BatchEngine {
    pub fn new(request: BatchRequest, config: BatchConfig) -> Self {
        let state = Arc::new(Mutex::new(BatchState::Pending));
        let cancel = CancelHandle {
            flag: Arc::new(AtomicBool::new(false)),
            state: Arc::clone(&state),
        };
        Self {
            request,
            config,
            state,
            cancel,
        }
    }

    pub fn state(&self) -> BatchState {
        *self.state.lock()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Process every path, blocking until all started jobs are done.
    ///
    /// Per-file problems are reported through `sink` and counted in the
    /// returned summary; an `Err` means the batch could not run at all.
    pub fn run(&self, sink: &dyn EventSink) -> Result<BatchSummary> {
        self.config
            .validate()
            .map_err(|e| e.with_context("invalid batch configuration"))?;
        let threads = clamp_threads(self.config.threads);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("gfglock-worker-{}", i))
            .build()
            .map_err(|e| {
                GfglockError::with_kind_and_source(
                    ErrorCategory::Internal,
                    ErrorKind::InternalInvariant,
                    "failed to start worker pool",
                    e,
                )
            })?;

        {
            let mut state = self.state.lock();
            if *state != BatchState::Pending {
                return Err(GfglockError::with_kind(
                    ErrorCategory::User,
                    ErrorKind::InvalidArgument,
                    "a batch can only be run once",
                ));
            }
            *state = BatchState::Running;
        }

        let started = Instant::now();
        let mode = self.request.mode;
        let paths = &self.request.paths;
        let predictions: Vec<u64> = paths
            .iter()
            .map(|p| predicted_job_bytes(p, mode, self.config.algorithm))
            .collect();
        let total_bytes: u64 = predictions.iter().sum();
        let total_files = paths.len();

        info!(%mode, files = total_files, total_bytes, threads, "starting batch");
        let mut size = format_bytes(total_bytes);
        if mode == Mode::Decrypt {
            let plaintext: u64 = paths
                .iter()
                .zip(&predictions)
                .filter_map(|(p, &len)| {
                    Algorithm::from_path(p).map(|alg| estimate_plaintext_size(len, alg))
                })
                .sum();
            size.push_str(&format!(", about {} of plaintext", format_bytes(plaintext)));
        }
        sink.emit(BatchEvent::Status(format!(
            "Starting to {} {} files ({}) with {} threads",
            mode, total_files, size, threads
        )));

        let progress = Mutex::new(ProgressState::new(
            total_bytes,
            total_files,
            self.config.eta.clone(),
            started,
        ));
        {
            let state = progress.lock();
            let snapshot = state.snapshot();
            sink.emit(BatchEvent::FilesProgress {
                done: 0,
                total: total_files,
            });
            sink.emit(BatchEvent::Progress(snapshot));
        }

        let mut summary = BatchSummary {
            total: total_files,
            ..BatchSummary::default()
        };
        let (tx, rx) = mpsc::channel::<WorkResult>();

        pool.in_place_scope(|scope| {
            for (path, &predicted) in paths.iter().zip(&predictions) {
                if self.cancel.is_cancelled() {
                    debug!("cancelled; not submitting remaining jobs");
                    break;
                }
                let tx = tx.clone();
                let progress = &progress;
                scope.spawn(move |_| {
                    if self.cancel.is_cancelled() {
                        return;
                    }
                    let result = self.process(path, predicted, progress, sink);
                    // The receiver outlives the scope.
                    let _ = tx.send(result);
                });
            }
            drop(tx);

            for result in rx {
                if self.cancel.is_cancelled() {
                    summary.cancelled = true;
                    continue;
                }
                self.aggregate(result, &progress, &mut summary, sink);
            }
        });

        if self.cancel.is_cancelled() {
            summary.cancelled = true;
        } else {
            let mut state = progress.lock();
            state.finish();
            sink.emit(BatchEvent::Progress(state.snapshot()));
        }

        summary.elapsed = started.elapsed();
        *self.state.lock() = BatchState::Completed;

        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            cancelled = summary.cancelled,
            elapsed = ?summary.elapsed,
            "batch finished"
        );
        sink.emit(BatchEvent::Status(summary.describe()));
        sink.emit(BatchEvent::Finished(summary.clone()));
        Ok(summary)
    }

    /// Runs on a worker thread.
    fn process(
        &self,
        path: &Path,
        predicted: u64,
        progress: &Mutex<ProgressState>,
        sink: &dyn EventSink,
    ) -> WorkResult {
        sink.emit(BatchEvent::FileChanged(path.to_path_buf()));

        let reported = Cell::new(0u64);
        let on_progress = |bytes: u64| {
            reported.set(reported.get() + bytes);
            if self.cancel.is_cancelled() {
                return;
            }
            let mut state = progress.lock();
            state.advance(bytes, Instant::now());
            sink.emit(BatchEvent::Progress(state.snapshot()));
        };

        let password: &[u8] = &self.request.password;
        let outcome = match self.request.mode {
            Mode::Encrypt => {
                let options = EncryptOptions {
                    algorithm: self.config.algorithm,
                    chunk_size: self.config.chunk_size,
                    encrypt_filename: self.config.encrypt_filenames,
                    progress_interval: self.config.progress_interval,
                };
                encrypt_path(path, password, &options, Some(&on_progress as &dyn Fn(u64)))
            }
            Mode::Decrypt => {
                let options = DecryptOptions {
                    chunk_size_hint: self.config.chunk_size,
                    progress_interval: self.config.progress_interval,
                };
                decrypt_path(path, password, &options, Some(&on_progress as &dyn Fn(u64)))
            }
        };

        let (classification, message) = classify(self.request.mode, path, outcome);
        WorkResult {
            path: path.to_path_buf(),
            success: classification == Classification::Succeeded,
            message,
            classification,
            reported_bytes: reported.get(),
            predicted_bytes: predicted,
        }
    }

    /// Runs on the driver thread, once per finished job.
    fn aggregate(
        &self,
        result: WorkResult,
        progress: &Mutex<ProgressState>,
        summary: &mut BatchSummary,
        sink: &dyn EventSink,
    ) {
        match result.classification {
            Classification::Succeeded => {
                summary.succeeded += 1;
                sink.emit(BatchEvent::Status(result.message.clone()));
            }
            Classification::Skipped => {
                summary.skipped += 1;
                debug!(path = %result.path.display(), "{}", result.message);
                sink.emit(BatchEvent::Status(result.message.clone()));
            }
            Classification::Failed => {
                summary.failed += 1;
                warn!(path = %result.path.display(), "{}", result.message);
                sink.emit(BatchEvent::Error(result.message.clone()));
                summary
                    .failures
                    .push((result.path.clone(), result.message.clone()));
            }
        }
        summary.messages.push(result.message);

        // Whatever the file did not report (header, tag, or the unread rest
        // of a failed file) is credited now so the total is reached exactly.
        let mut state = progress.lock();
        state.advance(
            result.predicted_bytes.saturating_sub(result.reported_bytes),
            Instant::now(),
        );
        let done = state.complete_file();
        sink.emit(BatchEvent::FilesProgress {
            done,
            total: summary.total,
        });
        sink.emit(BatchEvent::Progress(state.snapshot()));
    }
}

fn classify(mode: Mode, path: &Path, outcome: Result<FileOutcome>) -> (Classification, String) {
    let (verb, done) = match mode {
        Mode::Encrypt => ("encrypting", "Encrypted"),
        Mode::Decrypt => ("decrypting", "Decrypted"),
    };
    match outcome {
        Ok(FileOutcome::Processed { output }) => (
            Classification::Succeeded,
            format!("{}: {} -> {}", done, path.display(), output.display()),
        ),
        Ok(FileOutcome::Skipped { reason }) => (Classification::Skipped, reason),
        Err(e) if mode == Mode::Decrypt && e.is(ErrorKind::UnknownFormat) => (
            Classification::Skipped,
            format!("{} is not an encrypted file", path.display()),
        ),
        Err(e) => (Classification::Failed, failure_message(verb, path, &e)),
    }
}
