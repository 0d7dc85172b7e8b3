// Optimizer error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Optimizer error code constants
///
/// Error code range: 2001-2004
pub struct OptimizerErrorCodes {}

impl OptimizerErrorCodes {
    /// No usable reference recordings for an instrument
    pub const INSUFFICIENT_REFERENCE_DATA: i32 = 2001;

    /// A proposed parameter value fell outside its declared bounds
    pub const PARAMETER_OUT_OF_RANGE: i32 = 2002;

    /// A parameter set was already published for this instrument
    pub const ALREADY_PUBLISHED: i32 = 2003;

    /// The search was cancelled before it started
    pub const CANCELLED: i32 = 2004;
}

/// Log an optimizer error with structured context
pub fn log_optimizer_error(err: &OptimizerError, context: &str) {
    error!(
        "Optimizer error in {}: code={}, component=ParameterOptimizer, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Parameter optimization errors
///
/// `InsufficientReferenceData` is fatal for that instrument's search and is
/// surfaced to the caller; no default parameter set is substituted.
///
/// Error code ranges: 2001-2004
#[derive(Debug, Clone, PartialEq)]
pub enum OptimizerError {
    /// Zero usable reference recordings for the instrument
    InsufficientReferenceData {
        instrument: String,
        available: usize,
        usable: usize,
    },

    /// Proposed value outside `[min, max]` (or not a declared parameter)
    ParameterOutOfRange {
        name: String,
        value: f64,
        min: f64,
        max: f64,
    },

    /// The instrument's parameter set is write-once
    AlreadyPublished { instrument: String },

    /// Cancelled before the search started; a running search that is
    /// cancelled reports its best vector instead
    Cancelled { instrument: String },
}

impl ErrorCode for OptimizerError {
    fn code(&self) -> i32 {
        match self {
            OptimizerError::InsufficientReferenceData { .. } => {
                OptimizerErrorCodes::INSUFFICIENT_REFERENCE_DATA
            }
            OptimizerError::ParameterOutOfRange { .. } => {
                OptimizerErrorCodes::PARAMETER_OUT_OF_RANGE
            }
            OptimizerError::AlreadyPublished { .. } => OptimizerErrorCodes::ALREADY_PUBLISHED,
            OptimizerError::Cancelled { .. } => OptimizerErrorCodes::CANCELLED,
        }
    }

    fn message(&self) -> String {
        match self {
            OptimizerError::InsufficientReferenceData {
                instrument,
                available,
                usable,
            } => format!(
                "Insufficient reference data for {}: {} recordings available, {} usable",
                instrument, available, usable
            ),
            OptimizerError::ParameterOutOfRange {
                name,
                value,
                min,
                max,
            } => format!(
                "Parameter {} = {} out of range [{}, {}]",
                name, value, min, max
            ),
            OptimizerError::AlreadyPublished { instrument } => {
                format!("Parameter set for {} already published", instrument)
            }
            OptimizerError::Cancelled { instrument } => {
                format!("Optimization for {} cancelled", instrument)
            }
        }
    }
}

impl fmt::Display for OptimizerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OptimizerError (code {}): {}",
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for OptimizerError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optimizer_error_codes() {
        assert_eq!(
            OptimizerError::InsufficientReferenceData {
                instrument: "bass".to_string(),
                available: 0,
                usable: 0
            }
            .code(),
            OptimizerErrorCodes::INSUFFICIENT_REFERENCE_DATA
        );
        assert_eq!(
            OptimizerError::ParameterOutOfRange {
                name: "threshold".to_string(),
                value: 1.5,
                min: 0.0,
                max: 1.0
            }
            .code(),
            OptimizerErrorCodes::PARAMETER_OUT_OF_RANGE
        );
        assert_eq!(
            OptimizerError::AlreadyPublished {
                instrument: "piano".to_string()
            }
            .code(),
            OptimizerErrorCodes::ALREADY_PUBLISHED
        );
        assert_eq!(
            OptimizerError::Cancelled {
                instrument: "drums".to_string()
            }
            .code(),
            OptimizerErrorCodes::CANCELLED
        );
    }

    #[test]
    fn test_optimizer_error_messages() {
        let err = OptimizerError::ParameterOutOfRange {
            name: "threshold".to_string(),
            value: 1.5,
            min: 0.0,
            max: 1.0,
        };
        assert_eq!(err.message(), "Parameter threshold = 1.5 out of range [0, 1]");

        let err = OptimizerError::InsufficientReferenceData {
            instrument: "bass".to_string(),
            available: 2,
            usable: 0,
        };
        assert!(err.message().contains("2 recordings available, 0 usable"));
    }
}
