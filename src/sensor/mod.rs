//! # Occupancy sensor
//!
//! The ratio producer (camera processing) is outside this crate. It plugs in as an
//! [OccupancySource]. The [OccupancyGate] turns its samples into asserted/cleared edges,
//! which [poll::occupancy] hands to the control loop, where they drive the automatic
//! emergency override.

pub mod poll;

use std::sync::{Arc, Mutex};

use crate::config;

/// Anything that yields an occupancy ratio in `[0, 1]`.
pub trait OccupancySource: Send {
    /// Latest ratio, or `None` if no new sample is available.
    fn sample(&mut self) -> Option<f64>;
}

/// Source fed by hand, e.g. from the console. Clones share the same value.
#[derive(Debug, Clone, Default)]
pub struct ManualSource {
    ratio: Arc<Mutex<Option<f64>>>,
}

impl ManualSource {
    #[allow(missing_docs)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the ratio reported by the next sample.
    pub fn set(&self, ratio: f64) {
        match self.ratio.lock() {
            Ok(mut r) => *r = Some(ratio),
            Err(poisoned) => *poisoned.into_inner() = Some(ratio),
        }
    }
}

impl OccupancySource for ManualSource {
    fn sample(&mut self) -> Option<f64> {
        self.ratio.lock().ok().and_then(|r| *r)
    }
}

/// Threshold detector with edge output.
#[derive(Debug, Clone)]
pub struct OccupancyGate {
    threshold: f64,
    asserted: bool,
}

impl OccupancyGate {
    /// A cleared gate. `threshold` is clamped into
    /// [config::OCCUPANCY_THRESHOLD_MIN]..=[config::OCCUPANCY_THRESHOLD_MAX].
    pub fn new(threshold: f64) -> Self {
        OccupancyGate { threshold: clamp_threshold(threshold), asserted: false }
    }

    /// Changes the threshold (clamped). Takes effect from the next sample.
    pub fn set_threshold(&mut self, threshold: f64) {
        self.threshold = clamp_threshold(threshold);
    }

    #[allow(missing_docs)]
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    #[allow(missing_docs)]
    pub fn asserted(&self) -> bool {
        self.asserted
    }

    /// Feeds one sample.
    ///
    /// ## Returns
    /// `Some(new_state)` when the sample crosses the threshold, `None` otherwise.
    /// Asserted means `ratio >= threshold`. NaN counts as cleared.
    pub fn update(&mut self, ratio: f64) -> Option<bool> {
        let now = ratio >= self.threshold;
        if now == self.asserted {
            return None;
        }
        self.asserted = now;
        Some(now)
    }
}

fn clamp_threshold(threshold: f64) -> f64 {
    if threshold.is_nan() {
        return config::OCCUPANCY_THRESHOLD;
    }
    threshold.clamp(config::OCCUPANCY_THRESHOLD_MIN, config::OCCUPANCY_THRESHOLD_MAX)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_reports_edges_only() {
        let mut gate = OccupancyGate::new(0.15);
        assert_eq!(gate.update(0.10), None);
        assert_eq!(gate.update(0.15), Some(true));
        assert_eq!(gate.update(0.40), None);
        assert_eq!(gate.update(0.02), Some(false));
        assert_eq!(gate.update(f64::NAN), None);
    }

    #[test]
    fn threshold_is_clamped() {
        assert_eq!(OccupancyGate::new(0.9).threshold(), config::OCCUPANCY_THRESHOLD_MAX);
        let mut gate = OccupancyGate::new(0.0);
        assert_eq!(gate.threshold(), config::OCCUPANCY_THRESHOLD_MIN);
        gate.set_threshold(0.3);
        assert_eq!(gate.threshold(), 0.3);
    }

    #[test]
    fn manual_source_is_shared_between_clones() {
        let source = ManualSource::new();
        let mut reader = source.clone();
        assert_eq!(reader.sample(), None);
        source.set(0.25);
        assert_eq!(reader.sample(), Some(0.25));
    }
}
