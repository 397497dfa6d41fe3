//! Adaptive remaining-time estimation
//!
//! Throughput is sampled at most once per `sample_interval`. While the batch
//! is young, every sample is also compared with the speed the previous
//! sample predicted; once enough samples spanning the calibration window
//! have been seen, the mean of those ratios is locked in (clamped) as a
//! multiplicative correction for the rest of the batch.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::EtaConfig;

#[derive(Debug, Clone)]
pub struct EtaEstimator {
    config: EtaConfig,
    started: Instant,
    last_sample_at: Instant,
    last_sample_bytes: u64,
    speed: Option<f64>,
    samples: usize,
    ratios: Vec<f64>,
    factor: Option<f64>,
}

impl EtaEstimator {
    pub fn new(config: EtaConfig, now: Instant) -> Self {
        Self {
            config,
            started: now,
            last_sample_at: now,
            last_sample_bytes: 0,
            speed: None,
            samples: 0,
            ratios: Vec::new(),
            factor: None,
        }
    }

    /// Record that `processed` bytes have been completed by `now`.
    pub fn observe(&mut self, processed: u64, now: Instant) {
        let dt = now.saturating_duration_since(self.last_sample_at);
        if dt < self.config.sample_interval {
            return;
        }
        let delta = processed.saturating_sub(self.last_sample_bytes);
        let speed = delta as f64 / dt.as_secs_f64();

        if self.factor.is_none() {
            self.calibrate(speed, now);
        }

        self.speed = Some(speed);
        self.last_sample_at = now;
        self.last_sample_bytes = processed;
    }

    fn calibrate(&mut self, speed: f64, now: Instant) {
        self.samples += 1;
        if let Some(previous) = self.speed {
            if previous > 0.0 && speed > 0.0 {
                self.ratios.push(previous / speed);
            }
        }
        let elapsed = now.saturating_duration_since(self.started);
        if self.samples >= self.config.min_calibration_samples
            && !self.ratios.is_empty()
            && elapsed > self.config.calibration_window
        {
            let mean = self.ratios.iter().sum::<f64>() / self.ratios.len() as f64;
            let factor = mean.clamp(self.config.min_factor, self.config.max_factor);
            debug!(
                samples = self.samples,
                mean, factor, "locked ETA correction factor"
            );
            self.factor = Some(factor);
        }
    }

    /// Bytes per second over the latest sample.
    pub fn speed(&self) -> Option<f64> {
        self.speed
    }

    pub fn correction_factor(&self) -> f64 {
        self.factor.unwrap_or(1.0)
    }

    pub fn is_locked(&self) -> bool {
        self.factor.is_some()
    }

    /// Time left for `remaining_bytes`, or `None` before the first usable sample.
    pub fn remaining(&self, remaining_bytes: u64) -> Option<Duration> {
        if remaining_bytes == 0 {
            return Some(Duration::ZERO);
        }
        let speed = self.speed.filter(|s| *s > 0.0)?;
        Duration::try_from_secs_f64(remaining_bytes as f64 / speed * self.correction_factor()).ok()
    }
}
