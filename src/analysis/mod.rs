// Analysis module - pure timing computations
//
// Everything here is deterministic and free of I/O so it can run on any
// worker thread:
// - types: events, pulses and their bindings
// - quantizer: onset → nearest pulse binding
// - evaluation: greedy one-to-one matching against reference onsets
// - asynchrony: beat-relative offsets for matched onsets

pub mod asynchrony;
pub mod evaluation;
pub mod quantizer;
pub mod types;

pub use asynchrony::{asynchrony_points, mean_asynchrony, AsynchronyPoint, BeatAsynchrony};
pub use evaluation::{
    evaluate, evaluate_timestamps, match_onsets, AggregateEvaluation, EvaluationResult,
    MatchedPair,
};
pub use quantizer::{quantize, BeatFraction, QuantizationSummary};
pub use types::{
    event_stream, Event, EventSource, Instrument, MatchStatus, MatchedEvent, Pulse, PulseSequence,
};
