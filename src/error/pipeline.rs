// Per-recording pipeline error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Pipeline error code constants
///
/// Single source of truth for the codes written into batch metadata.
///
/// Error code range: 1001-1004
pub struct PipelineErrorCodes {}

impl PipelineErrorCodes {
    /// Detector could not produce onsets/pulses for a recording
    pub const UPSTREAM_DETECTION_FAILURE: i32 = 1001;

    /// Beat tracker found no beats (valid but degenerate)
    pub const EMPTY_PULSE_SEQUENCE: i32 = 1002;

    /// Timestamp stream is non-finite or out of order
    pub const MALFORMED_STREAM: i32 = 1003;

    /// Recording id is unknown to the detector backend
    pub const RECORDING_NOT_FOUND: i32 = 1004;
}

/// Log a pipeline error with structured context
///
/// Logs the recording id, numeric code and message. Per-recording failures
/// are reported through here and never abort a batch or a sweep.
pub fn log_pipeline_error(err: &PipelineError, recording_id: &str) {
    error!(
        "Pipeline error for recording {}: code={}, component=TimingPipeline, message={}",
        recording_id,
        err.code(),
        err.message()
    );
}

/// Errors raised while turning one recording's detections into annotations
///
/// Error code ranges: 1001-1004
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// The adapter could not produce onsets or pulses (separation failed,
    /// detector dump missing or unreadable, ...)
    UpstreamDetectionFailure { recording_id: String, reason: String },

    /// The beat tracker produced no usable pulses
    EmptyPulseSequence { recording_id: String },

    /// A timestamp stream violated its ordering or finiteness invariant
    MalformedStream { stream: String, reason: String },

    /// The backend has no data for this recording
    RecordingNotFound { recording_id: String },
}

impl PipelineError {
    pub fn upstream(recording_id: impl Into<String>, reason: impl Into<String>) -> Self {
        PipelineError::UpstreamDetectionFailure {
            recording_id: recording_id.into(),
            reason: reason.into(),
        }
    }

    pub fn malformed(stream: impl Into<String>, reason: impl Into<String>) -> Self {
        PipelineError::MalformedStream {
            stream: stream.into(),
            reason: reason.into(),
        }
    }
}

impl ErrorCode for PipelineError {
    fn code(&self) -> i32 {
        match self {
            PipelineError::UpstreamDetectionFailure { .. } => {
                PipelineErrorCodes::UPSTREAM_DETECTION_FAILURE
            }
            PipelineError::EmptyPulseSequence { .. } => PipelineErrorCodes::EMPTY_PULSE_SEQUENCE,
            PipelineError::MalformedStream { .. } => PipelineErrorCodes::MALFORMED_STREAM,
            PipelineError::RecordingNotFound { .. } => PipelineErrorCodes::RECORDING_NOT_FOUND,
        }
    }

    fn message(&self) -> String {
        match self {
            PipelineError::UpstreamDetectionFailure {
                recording_id,
                reason,
            } => {
                format!("Upstream detection failed for {}: {}", recording_id, reason)
            }
            PipelineError::EmptyPulseSequence { recording_id } => {
                format!("Beat tracker found no pulses for {}", recording_id)
            }
            PipelineError::MalformedStream { stream, reason } => {
                format!("Malformed stream {}: {}", stream, reason)
            }
            PipelineError::RecordingNotFound { recording_id } => {
                format!("Recording not found: {}", recording_id)
            }
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PipelineError (code {}): {}",
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for PipelineError {}
