//! Per-worker search results and cross-worker aggregation.

use hs_types::{PayloadFormat, WorkerId};
use serde::{Deserialize, Serialize};

use crate::search::Params;

/// A fitted estimator in its serialized form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatorPayload {
    #[serde(default)]
    pub format: PayloadFormat,
    pub data: Vec<u8>,
}

impl EstimatorPayload {
    pub fn json(value: &serde_json::Value) -> Self {
        Self {
            format: PayloadFormat::Json,
            data: value.to_string().into_bytes(),
        }
    }
}

/// Score of one evaluated candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateScore {
    pub params: Params,
    pub score: f64,
}

/// What one worker's search produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionResult {
    pub worker_id: WorkerId,
    pub best_score: f64,
    pub best_params: Params,
    /// Absent in the lightweight copy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_estimator: Option<EstimatorPayload>,
    #[serde(default)]
    pub candidates: Vec<CandidateScore>,
}

impl PartitionResult {
    /// Build from scored candidates, keeping the first of equally scored
    /// ones. `None` when no candidate has a comparable score.
    pub fn from_candidates(worker_id: WorkerId, candidates: Vec<CandidateScore>) -> Option<Self> {
        let mut best: Option<&CandidateScore> = None;
        for candidate in &candidates {
            if improves(candidate.score, best.map(|b| b.score)) {
                best = Some(candidate);
            }
        }
        let (best_score, best_params) = best.map(|b| (b.score, b.params.clone()))?;

        Some(Self {
            worker_id,
            best_score,
            best_params,
            best_estimator: None,
            candidates,
        })
    }

    pub fn with_estimator(mut self, estimator: EstimatorPayload) -> Self {
        self.best_estimator = Some(estimator);
        self
    }

    /// Copy with the fitted estimator stripped.
    pub fn without_estimator(&self) -> Self {
        Self {
            best_estimator: None,
            ..self.clone()
        }
    }
}

/// Best outcome across workers. Every field stays unset until at least one
/// result is aggregated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub best_worker: Option<WorkerId>,
    pub best_score: Option<f64>,
    pub best_params: Option<Params>,
    pub best_estimator: Option<EstimatorPayload>,
}

/// `true` if `candidate` should replace `incumbent`: strictly greater, and
/// NaN never wins.
pub fn improves(candidate: f64, incumbent: Option<f64>) -> bool {
    if candidate.is_nan() {
        return false;
    }
    match incumbent {
        Some(current) => candidate > current,
        None => true,
    }
}

/// Pick the highest scoring result. Ties keep whichever came first, so callers
/// iterate workers in id order.
pub fn aggregate<'a, I>(results: I) -> AggregateResult
where
    I: IntoIterator<Item = (&'a WorkerId, &'a PartitionResult)>,
{
    let mut aggregate = AggregateResult::default();
    for (worker, result) in results {
        if improves(result.best_score, aggregate.best_score) {
            aggregate.best_worker = Some(*worker);
            aggregate.best_score = Some(result.best_score);
            aggregate.best_params = Some(result.best_params.clone());
            aggregate.best_estimator = result.best_estimator.clone();
        }
    }
    aggregate
}
