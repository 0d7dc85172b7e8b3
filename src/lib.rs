// Trio Timing Core - beat-relative onset analysis for piano-trio recordings
// Quantization, reference evaluation, detector tuning and batch annotation

// Module declarations
pub mod adapter;
pub mod analysis;
pub mod batch;
pub mod catalog;
pub mod config;
pub mod error;
pub mod optimizer;
pub mod pipeline;
pub mod report;

// Re-exports for convenience
pub use adapter::{Detection, DetectorBackend, InstrumentParameters, PrecomputedBackend};
pub use analysis::{
    evaluate, quantize, BeatFraction, EvaluationResult, Event, Instrument, MatchStatus,
    MatchedEvent, PulseSequence,
};
pub use batch::{BatchOrchestrator, BatchSummary};
pub use catalog::RecordingCatalog;
pub use config::AppConfig;
pub use error::{ErrorCode, OptimizerError, PipelineError};
pub use optimizer::{ParameterRegistry, ParameterSet, Tuner};
pub use pipeline::{QuantizationStatus, RecordingOutcome, RecordingProcessor};
