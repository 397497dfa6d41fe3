//! Size prediction and display helpers for progress reporting.

use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::config::Mode;
use crate::format::Algorithm;

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Filename length assumed when the real one is still encrypted.
const GUESSED_NAME_LEN: u64 = 24;

/// Exact size of the container produced for a plaintext of `plain_len`
/// bytes named with `name_len` UTF-8 bytes.
pub fn predict_encrypted_size(plain_len: u64, name_len: usize, algorithm: Algorithm) -> u64 {
    plain_len + name_len as u64 + algorithm.fixed_overhead()
}

/// Rough plaintext size of an unopened container.
///
/// The embedded filename length is guessed, so this is an approximation
/// only and is never used as a progress denominator.
pub fn estimate_plaintext_size(container_len: u64, algorithm: Algorithm) -> u64 {
    container_len
        .saturating_sub(algorithm.fixed_overhead())
        .saturating_sub(GUESSED_NAME_LEN)
}

/// Bytes a batch job for `path` is expected to move.
///
/// Encryption predicts the container size; decryption uses the on-disk
/// size directly. Paths that cannot be inspected count as zero.
pub fn predicted_job_bytes(path: &Path, mode: Mode, algorithm: Algorithm) -> u64 {
    let Ok(metadata) = fs::metadata(path) else {
        return 0;
    };
    match mode {
        Mode::Encrypt => {
            let name_len = path
                .file_name()
                .map(|n| n.to_string_lossy().len())
                .unwrap_or(0);
            predict_encrypted_size(metadata.len(), name_len, algorithm)
        }
        Mode::Decrypt => metadata.len(),
    }
}

/// A unit chosen so that a byte total fits a signed 32-bit progress range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressScale {
    /// Bytes per scaled unit, a power of 1024.
    pub scale: u64,
    pub unit: &'static str,
    pub scaled_total: u64,
    total: u64,
}

impl ProgressScale {
    pub fn for_total(total: u64) -> ProgressScale {
        let mut scaled = total;
        let mut idx = 0;
        while scaled > i32::MAX as u64 && idx < UNITS.len() - 1 {
            scaled = scaled.div_ceil(1024);
            idx += 1;
        }
        ProgressScale {
            scale: 1024u64.pow(idx as u32),
            unit: UNITS[idx],
            scaled_total: scaled,
            total,
        }
    }

    /// `done` bytes expressed in this scale; reaching the total always maps
    /// to exactly `scaled_total`.
    pub fn scaled(&self, done: u64) -> u64 {
        if done >= self.total {
            self.scaled_total
        } else {
            (done / self.scale).min(self.scaled_total)
        }
    }
}

/// `1536` → `"1.5 KB"`.
pub fn format_bytes(bytes: u64) -> String {
    let mut value = bytes as f64;
    for unit in &UNITS[..UNITS.len() - 1] {
        if value < 1024.0 {
            return format!("{:.1} {}", value, unit);
        }
        value /= 1024.0;
    }
    format!("{:.1} {}", value, UNITS[UNITS.len() - 1])
}

pub fn format_duration(duration: Duration) -> String {
    let seconds = duration.as_secs();
    if seconds < 60 {
        format!("{} seconds", seconds)
    } else if seconds < 3600 {
        format!("{} mins {} sec", seconds / 60, seconds % 60)
    } else {
        format!(
            "{} hrs {} mins {} sec",
            seconds / 3600,
            seconds % 3600 / 60,
            seconds % 60
        )
    }
}
