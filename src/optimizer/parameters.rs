// Detector parameter vectors and their search bounds
//
// A ParameterSet is the instrument-scoped name → value mapping handed to the
// detector backend. The ParameterSpace declares the bounded step grid the
// coordinate search is allowed to walk.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::analysis::Instrument;
use crate::error::OptimizerError;

/// Minimum activation strength a candidate onset needs to be kept
pub const THRESHOLD: &str = "threshold";
/// Minimum spacing in seconds between kept onsets
pub const MIN_INTERVAL: &str = "min_interval";
/// Seconds added to every kept onset
pub const LATENCY: &str = "latency";

/// Bounds, grid step and starting point for one parameter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
    pub initial: f64,
}

impl ParameterRange {
    pub fn new(min: f64, max: f64, step: f64, initial: f64) -> Self {
        Self {
            min,
            max,
            step,
            initial,
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        value.is_finite() && value >= self.min && value <= self.max
    }

    /// Grid offsets (in steps from `initial`) that stay inside the bounds
    pub fn step_bounds(&self) -> (i64, i64) {
        if self.step <= 0.0 || !self.step.is_finite() {
            return (0, 0);
        }
        // tolerate rounding when a bound lies exactly on the grid
        let slack = 1e-9;
        let below = ((self.initial - self.min) / self.step + slack).floor() as i64;
        let above = ((self.max - self.initial) / self.step + slack).floor() as i64;
        (-below.max(0), above.max(0))
    }

    /// Value at `offset` steps from `initial`, clamped into the bounds
    pub fn value_at(&self, offset: i64) -> f64 {
        (self.initial + offset as f64 * self.step).clamp(self.min, self.max)
    }
}

/// Named parameter ranges explored by the optimizer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpace {
    ranges: BTreeMap<String, ParameterRange>,
}

impl ParameterSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, range: ParameterRange) -> Self {
        self.ranges.insert(name.into(), range);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParameterRange> {
        self.ranges.get(name)
    }

    /// Parameters in name order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParameterRange)> {
        self.ranges.iter()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn initial_values(&self) -> BTreeMap<String, f64> {
        self.ranges
            .iter()
            .map(|(name, range)| (name.clone(), range.initial))
            .collect()
    }

    /// Check every known parameter in `values` against its bounds
    ///
    /// Names absent from the space are ignored; the backend falls back to its
    /// own defaults for parameters the space does not declare.
    ///
    /// # Errors
    /// `ParameterOutOfRange` for the first value outside its range.
    pub fn validate(&self, values: &BTreeMap<String, f64>) -> Result<(), OptimizerError> {
        for (name, &value) in values {
            if let Some(range) = self.ranges.get(name) {
                if !range.contains(value) {
                    return Err(OptimizerError::ParameterOutOfRange {
                        name: name.clone(),
                        value,
                        min: range.min,
                        max: range.max,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Search space for the peak-picking stage of the bundled backends
pub static DEFAULT_PARAMETER_SPACE: Lazy<ParameterSpace> = Lazy::new(|| {
    ParameterSpace::new()
        .with(THRESHOLD, ParameterRange::new(0.0, 1.0, 0.05, 0.3))
        .with(MIN_INTERVAL, ParameterRange::new(0.0, 0.2, 0.01, 0.05))
        .with(LATENCY, ParameterRange::new(-0.05, 0.05, 0.005, 0.0))
});

/// Instrument-scoped detector parameters
///
/// Immutable once built. `version` and `run_id` identify the optimization run
/// that produced the values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    instrument: Instrument,
    values: BTreeMap<String, f64>,
    #[serde(default)]
    version: u32,
    #[serde(default)]
    run_id: String,
}

impl ParameterSet {
    pub fn new(instrument: Instrument, values: BTreeMap<String, f64>) -> Self {
        Self {
            instrument,
            values,
            version: 0,
            run_id: String::new(),
        }
    }

    /// Starting values of `space` for `instrument`
    pub fn initial(instrument: Instrument, space: &ParameterSpace) -> Self {
        Self::new(instrument, space.initial_values())
    }

    /// Copy of this set stamped with a version and run identifier
    pub fn versioned(&self, version: u32, run_id: impl Into<String>) -> Self {
        Self {
            instrument: self.instrument,
            values: self.values.clone(),
            version,
            run_id: run_id.into(),
        }
    }

    pub fn instrument(&self) -> Instrument {
        self.instrument
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn values(&self) -> &BTreeMap<String, f64> {
        &self.values
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_bounds_cover_grid() {
        let range = ParameterRange::new(0.0, 1.0, 0.05, 0.3);
        assert_eq!(range.step_bounds(), (-6, 14));
        assert_eq!(range.value_at(-6), 0.0);
        assert!((range.value_at(14) - 1.0).abs() < 1e-9);
        assert!(range.value_at(14) <= 1.0);
    }

    #[test]
    fn test_step_bounds_degenerate_step() {
        let range = ParameterRange::new(0.0, 1.0, 0.0, 0.5);
        assert_eq!(range.step_bounds(), (0, 0));
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let space = DEFAULT_PARAMETER_SPACE.clone();
        let mut values = space.initial_values();
        assert!(space.validate(&values).is_ok());

        values.insert(THRESHOLD.to_string(), 1.5);
        let err = space.validate(&values).unwrap_err();
        match err {
            OptimizerError::ParameterOutOfRange { name, max, .. } => {
                assert_eq!(name, THRESHOLD);
                assert_eq!(max, 1.0);
            }
            other => panic!("unexpected error {other:?}"),
        }

        values.insert(THRESHOLD.to_string(), f64::NAN);
        assert!(space.validate(&values).is_err());
    }

    #[test]
    fn test_validate_ignores_unknown_names() {
        let space = DEFAULT_PARAMETER_SPACE.clone();
        let mut values = BTreeMap::new();
        values.insert("hop_length".to_string(), 512.0);
        assert!(space.validate(&values).is_ok());
    }

    #[test]
    fn test_versioned_copy_keeps_values() {
        let set = ParameterSet::initial(Instrument::Bass, &DEFAULT_PARAMETER_SPACE);
        let stamped = set.versioned(3, "run-7");
        assert_eq!(stamped.version(), 3);
        assert_eq!(stamped.run_id(), "run-7");
        assert_eq!(stamped.values(), set.values());
        assert_eq!(set.version(), 0);
        assert_eq!(stamped.get(LATENCY), Some(0.0));
    }
}
