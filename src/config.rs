//! Batch configuration
//!
//! Everything the engine needs is passed in explicitly through these
//! structs; there is no global settings state.

use std::fmt;
use std::time::Duration;

use crate::error::{ErrorCategory, ErrorKind, GfglockError, Result};
use crate::format::Algorithm;

/// Default chunk size for large files: 16 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 16 * 1024 * 1024;

/// Default number of bytes between two progress callbacks: 32 MiB.
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 32 * 1024 * 1024;

/// Direction of a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mode {
    #[default]
    Encrypt,
    Decrypt,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Encrypt => "encrypt",
            Mode::Decrypt => "decrypt",
        })
    }
}

/// Tuning for the adaptive remaining-time estimator.
#[derive(Debug, Clone, PartialEq)]
pub struct EtaConfig {
    /// Minimum spacing between throughput samples.
    pub sample_interval: Duration,
    /// How long the estimator keeps calibrating before it may lock.
    pub calibration_window: Duration,
    /// Samples required before the correction factor may lock.
    pub min_calibration_samples: usize,
    pub min_factor: f64,
    pub max_factor: f64,
}

impl Default for EtaConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(1),
            calibration_window: Duration::from_secs(10),
            min_calibration_samples: 3,
            min_factor: 0.5,
            max_factor: 2.0,
        }
    }
}

/// Parameters shared by every job of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchConfig {
    /// Requested worker count; clamped with [`clamp_threads`] at run time.
    pub threads: usize,
    /// Requested chunk size in bytes; `None` processes every file whole.
    pub chunk_size: Option<u64>,
    pub algorithm: Algorithm,
    pub encrypt_filenames: bool,
    pub progress_interval: u64,
    pub eta: EtaConfig,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            chunk_size: Some(DEFAULT_CHUNK_SIZE),
            algorithm: Algorithm::default(),
            encrypt_filenames: false,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            eta: EtaConfig::default(),
        }
    }
}

impl BatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.progress_interval == 0 {
            return Err(invalid("progress interval must be at least one byte"));
        }
        let eta = &self.eta;
        if eta.sample_interval.is_zero() {
            return Err(invalid("ETA sample interval must be positive"));
        }
        if !(eta.min_factor > 0.0 && eta.min_factor <= eta.max_factor) {
            return Err(invalid(format!(
                "ETA factor bounds [{}, {}] are not a valid range",
                eta.min_factor, eta.max_factor
            )));
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> GfglockError {
    GfglockError::with_kind(ErrorCategory::User, ErrorKind::InvalidArgument, msg)
}

/// Number of logical CPUs, or 1 if it cannot be determined.
pub fn available_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Half the logical CPUs, at least one.
pub fn default_threads() -> usize {
    (available_cpus() / 2).max(1)
}

/// Clamp a requested worker count to `1..=max(cpus - 1, 1)`.
pub fn clamp_threads(requested: usize) -> usize {
    clamp_threads_for(requested, available_cpus())
}

fn clamp_threads_for(requested: usize, cpus: usize) -> usize {
    requested.clamp(1, cpus.saturating_sub(1).max(1))
}
