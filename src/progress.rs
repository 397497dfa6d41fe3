//! Byte-weighted progress bookkeeping.

use std::time::{Duration, Instant};

use crate::config::EtaConfig;
use crate::eta::EtaEstimator;
use crate::predict::ProgressScale;

/// Coalesces per-chunk byte counts into callbacks of at least `interval`
/// bytes. The remainder is delivered by [`ProgressBatcher::flush`].
pub struct ProgressBatcher<'a> {
    callback: Option<&'a dyn Fn(u64)>,
    interval: u64,
    pending: u64,
}

impl<'a> ProgressBatcher<'a> {
    pub fn new(callback: Option<&'a dyn Fn(u64)>, interval: u64) -> Self {
        Self {
            callback,
            interval: interval.max(1),
            pending: 0,
        }
    }

    pub fn add(&mut self, bytes: u64) {
        let Some(callback) = self.callback else {
            return;
        };
        self.pending += bytes;
        if self.pending >= self.interval {
            callback(self.pending);
            self.pending = 0;
        }
    }

    pub fn flush(&mut self) {
        if let Some(callback) = self.callback {
            if self.pending > 0 {
                callback(self.pending);
            }
        }
        self.pending = 0;
    }
}

/// A point-in-time view of a batch's progress.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub done_bytes: u64,
    pub total_bytes: u64,
    /// `done_bytes` in units of `scale`, for 32-bit progress widgets.
    pub scaled_done: u64,
    pub scale: ProgressScale,
    pub done_files: usize,
    pub total_files: usize,
    pub eta: Option<Duration>,
    /// Whether `eta` already includes the locked correction factor.
    pub eta_calibrated: bool,
}

/// Aggregate progress of one batch.
///
/// The processed byte count never decreases and never exceeds the predicted
/// total, whatever order files finish in. Owned by the batch engine behind a
/// lock; it is created per batch and dropped with it.
#[derive(Debug)]
pub(crate) struct ProgressState {
    total_bytes: u64,
    processed: u64,
    files_completed: usize,
    total_files: usize,
    scale: ProgressScale,
    eta: EtaEstimator,
}

impl ProgressState {
    pub(crate) fn new(total_bytes: u64, total_files: usize, eta: EtaConfig, now: Instant) -> Self {
        Self {
            total_bytes,
            processed: 0,
            files_completed: 0,
            total_files,
            scale: ProgressScale::for_total(total_bytes),
            eta: EtaEstimator::new(eta, now),
        }
    }

    pub(crate) fn advance(&mut self, bytes: u64, now: Instant) {
        self.processed = self.processed.saturating_add(bytes).min(self.total_bytes);
        self.eta.observe(self.processed, now);
    }

    pub(crate) fn complete_file(&mut self) -> usize {
        self.files_completed += 1;
        self.files_completed
    }

    /// Mark every predicted byte as done.
    pub(crate) fn finish(&mut self) {
        self.processed = self.total_bytes;
    }

    pub(crate) fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            done_bytes: self.processed,
            total_bytes: self.total_bytes,
            scaled_done: self.scale.scaled(self.processed),
            scale: self.scale,
            done_files: self.files_completed,
            total_files: self.total_files,
            eta: self.eta.remaining(self.total_bytes - self.processed),
            eta_calibrated: self.eta.is_locked(),
        }
    }
}
