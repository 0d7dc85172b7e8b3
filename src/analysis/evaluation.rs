//! Reference evaluation - onset stream vs. human annotation
//!
//! Pairs algorithmic and reference onsets one-to-one when they lie within an
//! absolute tolerance window. Candidate pairs are taken greedily by increasing
//! time difference (nearest-neighbour assignment, not an optimal solver), each
//! onset used at most once. Pure and stateless, so the optimizer can call it
//! in a tight loop.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::types::Event;

/// Scores for one (algorithmic, reference, tolerance) triple
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub precision: f64,
    pub recall: f64,
    pub f_score: f64,
    /// Mean |algorithmic − reference| over matched pairs, seconds
    pub mean_abs_offset: f64,
    /// Mean signed algorithmic − reference over matched pairs, seconds
    pub mean_signed_offset: f64,
    pub matched: usize,
    /// Reference onsets with no algorithmic partner (misses)
    pub unmatched_reference: usize,
    /// Algorithmic onsets with no reference partner (false alarms)
    pub spurious: usize,
    pub algorithmic_count: usize,
    pub reference_count: usize,
    pub tolerance: f64,
}

impl EvaluationResult {
    fn from_pairs(
        pairs: &[MatchedPair],
        algorithmic_count: usize,
        reference_count: usize,
        tolerance: f64,
    ) -> Self {
        let matched = pairs.len();
        let precision = ratio(matched, algorithmic_count);
        let recall = ratio(matched, reference_count);
        let f_score = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        let (mean_abs_offset, mean_signed_offset) = if matched == 0 {
            (0.0, 0.0)
        } else {
            let abs_sum: f64 = pairs.iter().map(|p| p.offset.abs()).sum();
            let signed_sum: f64 = pairs.iter().map(|p| p.offset).sum();
            (abs_sum / matched as f64, signed_sum / matched as f64)
        };

        EvaluationResult {
            precision,
            recall,
            f_score,
            mean_abs_offset,
            mean_signed_offset,
            matched,
            unmatched_reference: reference_count - matched,
            spurious: algorithmic_count - matched,
            algorithmic_count,
            reference_count,
            tolerance,
        }
    }
}

/// One algorithmic/reference pairing
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchedPair {
    pub algorithmic_index: usize,
    pub reference_index: usize,
    /// algorithmic − reference, seconds
    pub offset: f64,
}

/// Evaluate an algorithmic stream against a reference stream
///
/// # Arguments
/// * `algorithmic` - Detected onsets, in time order
/// * `reference` - Human-annotated onsets, in time order
/// * `tolerance` - Absolute matching window in seconds (negative is treated as 0)
pub fn evaluate(algorithmic: &[Event], reference: &[Event], tolerance: f64) -> EvaluationResult {
    let alg: Vec<f64> = algorithmic.iter().map(Event::timestamp).collect();
    let reference: Vec<f64> = reference.iter().map(Event::timestamp).collect();
    evaluate_timestamps(&alg, &reference, tolerance)
}

/// Timestamp-level variant of [`evaluate`]
pub fn evaluate_timestamps(algorithmic: &[f64], reference: &[f64], tolerance: f64) -> EvaluationResult {
    let tolerance = tolerance.max(0.0);
    let pairs = match_onsets(algorithmic, reference, tolerance);
    EvaluationResult::from_pairs(&pairs, algorithmic.len(), reference.len(), tolerance)
}

/// Greedy one-to-one matching by increasing time difference
///
/// Both inputs must be sorted. Ties on |difference| are broken by the sum of
/// the two timestamps and then by indices, which keeps the matched count
/// independent of which stream is called "algorithmic".
pub fn match_onsets(algorithmic: &[f64], reference: &[f64], tolerance: f64) -> Vec<MatchedPair> {
    let mut candidates: Vec<(f64, f64, usize, usize)> = Vec::new();

    // sliding lower bound over the sorted reference stream
    let mut start = 0usize;
    for (a_idx, &a) in algorithmic.iter().enumerate() {
        while start < reference.len() && reference[start] < a - tolerance {
            start += 1;
        }
        let mut r_idx = start;
        while r_idx < reference.len() && reference[r_idx] <= a + tolerance {
            let diff = (a - reference[r_idx]).abs();
            if diff <= tolerance {
                candidates.push((diff, a + reference[r_idx], a_idx, r_idx));
            }
            r_idx += 1;
        }
    }

    candidates.sort_by(|x, y| {
        x.0.total_cmp(&y.0)
            .then_with(|| x.1.total_cmp(&y.1))
            .then_with(|| match x.2.cmp(&y.2) {
                Ordering::Equal => x.3.cmp(&y.3),
                other => other,
            })
    });

    let mut alg_used = vec![false; algorithmic.len()];
    let mut ref_used = vec![false; reference.len()];
    let mut pairs = Vec::new();
    for (_, _, a_idx, r_idx) in candidates {
        if alg_used[a_idx] || ref_used[r_idx] {
            continue;
        }
        alg_used[a_idx] = true;
        ref_used[r_idx] = true;
        pairs.push(MatchedPair {
            algorithmic_index: a_idx,
            reference_index: r_idx,
            offset: algorithmic[a_idx] - reference[r_idx],
        });
    }

    pairs.sort_by_key(|p| p.algorithmic_index);
    pairs
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Aggregate over several recordings
///
/// `mean_f_score` averages per-recording F-scores so a single long recording
/// cannot dominate; the pooled figures sum counts across recordings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateEvaluation {
    pub recordings: usize,
    pub mean_f_score: f64,
    pub mean_precision: f64,
    pub mean_recall: f64,
    /// Mean |offset| over all matched pairs of all recordings, seconds
    pub mean_abs_offset: f64,
    pub pooled_precision: f64,
    pub pooled_recall: f64,
    pub pooled_f_score: f64,
}

impl AggregateEvaluation {
    pub fn from_results<'a, I>(results: I) -> Self
    where
        I: IntoIterator<Item = &'a EvaluationResult>,
    {
        let mut n = 0usize;
        let (mut f_sum, mut p_sum, mut r_sum) = (0.0, 0.0, 0.0);
        let (mut matched, mut alg, mut reference) = (0usize, 0usize, 0usize);
        let mut offset_sum = 0.0;

        for result in results {
            n += 1;
            f_sum += result.f_score;
            p_sum += result.precision;
            r_sum += result.recall;
            matched += result.matched;
            alg += result.algorithmic_count;
            reference += result.reference_count;
            offset_sum += result.mean_abs_offset * result.matched as f64;
        }

        if n == 0 {
            return Self::default();
        }

        let pooled_precision = ratio(matched, alg);
        let pooled_recall = ratio(matched, reference);
        let pooled_f_score = if pooled_precision + pooled_recall > 0.0 {
            2.0 * pooled_precision * pooled_recall / (pooled_precision + pooled_recall)
        } else {
            0.0
        };

        Self {
            recordings: n,
            mean_f_score: f_sum / n as f64,
            mean_precision: p_sum / n as f64,
            mean_recall: r_sum / n as f64,
            mean_abs_offset: if matched == 0 {
                0.0
            } else {
                offset_sum / matched as f64
            },
            pooled_precision,
            pooled_recall,
            pooled_f_score,
        }
    }
}
