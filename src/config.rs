//! Configuration management for tolerances and search settings
//!
//! This module provides runtime configuration loading from JSON files so the
//! quantization and evaluation tolerances can be validated against held-out
//! reference data without recompilation. Missing or unparsable files fall back
//! to the defaults below.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub quantization: QuantizationConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub batch: BatchConfig,
}

/// Onset-to-pulse binding parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuantizationConfig {
    /// Accepted |offset| as a proportion of the enclosing beat duration
    pub tolerance_fraction: f64,
    /// Beats per measure used to derive metrical positions when a detector
    /// dump does not declare its own
    pub beats_per_measure: u32,
}

impl Default for QuantizationConfig {
    fn default() -> Self {
        Self {
            tolerance_fraction: 0.25,
            beats_per_measure: 4,
        }
    }
}

/// Reference evaluation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Absolute matching window in seconds
    pub tolerance_seconds: f64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            tolerance_seconds: 0.05,
        }
    }
}

/// Coordinate search settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Hard cap on full sweeps over the parameter vector
    pub max_sweeps: u32,
    /// Minimum aggregate F-score gain per sweep to keep searching
    pub min_improvement: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_sweeps: 20,
            min_improvement: 0.001,
        }
    }
}

/// Catalog processing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Recordings processed concurrently
    pub concurrency: usize,
    /// Evaluate against reference annotations when a recording has them
    pub evaluate_references: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            evaluate_references: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from JSON file
    ///
    /// # Arguments
    /// * `path` - Path to JSON config file
    ///
    /// # Returns
    /// The parsed configuration, or the default configuration when the file
    /// is missing or invalid (a warning is logged either way)
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }

    /// Load configuration from the bundled assets directory
    pub fn load() -> Self {
        Self::load_from_file("assets/timing_config.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.quantization.tolerance_fraction, 0.25);
        assert_eq!(config.quantization.beats_per_measure, 4);
        assert_eq!(config.evaluation.tolerance_seconds, 0.05);
        assert_eq!(config.optimizer.max_sweeps, 20);
        assert_eq!(config.optimizer.min_improvement, 0.001);
        assert_eq!(config.batch.concurrency, 4);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let parsed: AppConfig =
            serde_json::from_str(r#"{"evaluation": {"tolerance_seconds": 0.03}}"#).unwrap();
        assert_eq!(parsed.evaluation.tolerance_seconds, 0.03);
        assert_eq!(parsed.quantization.tolerance_fraction, 0.25);
        assert_eq!(parsed.optimizer.max_sweeps, 20);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = AppConfig::load_from_file("does/not/exist.json");
        assert_eq!(config.batch.concurrency, 4);
    }
}
