// Error types for the timing pipeline
//
// This module defines custom error types for per-recording processing and
// parameter optimization, providing structured error handling with numeric
// codes suitable for metadata files and CLI exit reporting.

mod optimizer;
mod pipeline;

pub use optimizer::{log_optimizer_error, OptimizerError, OptimizerErrorCodes};
pub use pipeline::{log_pipeline_error, PipelineError, PipelineErrorCodes};

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types, enabling consistent error handling across
/// the library, the batch metadata and the CLI.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}
