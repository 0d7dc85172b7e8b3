// Objective seam for the coordinate search
//
// The search only needs a per-recording evaluation for a candidate parameter
// set. Closures work directly; BackendObjective re-runs a detector backend and
// scores its onsets against the reference.

use std::sync::Arc;

use crate::adapter::{DetectorBackend, InstrumentParameters};
use crate::analysis::{evaluate, EvaluationResult};
use crate::catalog::ReferenceSet;
use crate::error::PipelineError;

use super::parameters::ParameterSet;

/// Scores one parameter set against one reference recording
pub trait Objective {
    fn evaluate(
        &mut self,
        parameters: &ParameterSet,
        reference: &ReferenceSet,
    ) -> Result<EvaluationResult, PipelineError>;
}

impl<F> Objective for F
where
    F: FnMut(&ParameterSet, &ReferenceSet) -> Result<EvaluationResult, PipelineError>,
{
    fn evaluate(
        &mut self,
        parameters: &ParameterSet,
        reference: &ReferenceSet,
    ) -> Result<EvaluationResult, PipelineError> {
        self(parameters, reference)
    }
}

/// Objective that re-runs a detector backend for every candidate
pub struct BackendObjective {
    backend: Arc<dyn DetectorBackend>,
    tolerance_seconds: f64,
}

impl BackendObjective {
    pub fn new(backend: Arc<dyn DetectorBackend>, tolerance_seconds: f64) -> Self {
        Self {
            backend,
            tolerance_seconds,
        }
    }
}

impl Objective for BackendObjective {
    fn evaluate(
        &mut self,
        parameters: &ParameterSet,
        reference: &ReferenceSet,
    ) -> Result<EvaluationResult, PipelineError> {
        let detection = self.backend.detect(
            &reference.recording_id,
            &InstrumentParameters::single(parameters.clone()),
        )?;
        Ok(evaluate(
            detection.onsets_for(reference.instrument),
            &reference.events,
            self.tolerance_seconds,
        ))
    }
}
