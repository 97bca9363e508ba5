//! The search-fit capability run inside each worker.

use async_trait::async_trait;
use hs_types::{HsError, HsResult, WorkerId};
use tracing::{debug, info};

use crate::result::{improves, CandidateScore, EstimatorPayload, PartitionResult};
use crate::search::{Params, SearchRequest};
use crate::strategy::strategy_for;

/// Outcome of training and scoring one candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Higher is better.
    pub score: f64,
    pub estimator: Option<serde_json::Value>,
}

/// Trains and scores a single candidate.
#[async_trait]
pub trait Scorer: Send + Sync {
    /// Called once per fit, before the first candidate, with the dataset
    /// every candidate of that fit is scored on.
    async fn prepare(&self, _features: &[u8], _labels: &[u8]) -> HsResult<()> {
        Ok(())
    }

    async fn score(
        &self,
        request: &SearchRequest,
        params: &Params,
        features: &[u8],
        labels: &[u8],
    ) -> HsResult<Evaluation>;
}

/// Runs a whole (already partitioned) search over a dataset.
#[async_trait]
pub trait SearchFit: Send + Sync {
    async fn fit(
        &self,
        request: &SearchRequest,
        worker_id: WorkerId,
        features: &[u8],
        labels: &[u8],
    ) -> HsResult<PartitionResult>;
}

/// Evaluates every candidate the request's strategy yields and keeps the best.
#[derive(Debug, Clone)]
pub struct ScoredSearch<S> {
    scorer: S,
    /// Candidates requested from the strategy per round. Adaptive strategies
    /// only learn between rounds.
    batch_size: usize,
}

impl<S: Scorer> ScoredSearch<S> {
    pub fn new(scorer: S) -> Self {
        Self {
            scorer,
            batch_size: 1,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn scorer(&self) -> &S {
        &self.scorer
    }
}

#[async_trait]
impl<S: Scorer> SearchFit for ScoredSearch<S> {
    async fn fit(
        &self,
        request: &SearchRequest,
        worker_id: WorkerId,
        features: &[u8],
        labels: &[u8],
    ) -> HsResult<PartitionResult> {
        let mut strategy = strategy_for(&request.spec, request.random_state)?;
        info!(
            "Worker {} running {} search over {} candidates",
            worker_id,
            strategy.name(),
            strategy.budget()
        );

        self.scorer.prepare(features, labels).await?;
        let mut candidates = Vec::with_capacity(strategy.budget());
        let mut best: Option<(f64, Option<serde_json::Value>)> = None;

        loop {
            let batch = strategy.suggest(self.batch_size);
            if batch.is_empty() {
                break;
            }
            for params in batch {
                let evaluation = self.scorer.score(request, &params, features, labels).await?;
                debug!("Candidate {:?} scored {}", params, evaluation.score);

                strategy.report(&params, evaluation.score);
                if improves(evaluation.score, best.as_ref().map(|(score, _)| *score)) {
                    best = Some((evaluation.score, evaluation.estimator));
                }
                candidates.push(CandidateScore {
                    params,
                    score: evaluation.score,
                });
            }
        }

        let evaluated = candidates.len();
        let result = PartitionResult::from_candidates(worker_id, candidates).ok_or_else(|| {
            HsError::Worker(format!(
                "worker {worker_id} produced no scored candidate out of {evaluated}"
            ))
        })?;

        info!(
            "Worker {} best score {} after {} candidates",
            worker_id, result.best_score, evaluated
        );

        Ok(match best.and_then(|(_, estimator)| estimator) {
            Some(estimator) => result.with_estimator(EstimatorPayload::json(&estimator)),
            None => result,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{ParamGrid, ParameterValue, SearchSpecification};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scores `-(x - 3)^2` and records how often it was called.
    #[derive(Debug, Default)]
    struct Parabola {
        calls: AtomicUsize,
        prepared: AtomicUsize,
    }

    #[async_trait]
    impl Scorer for Parabola {
        async fn prepare(&self, features: &[u8], _labels: &[u8]) -> HsResult<()> {
            assert_eq!(features, b"X");
            self.prepared.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn score(
            &self,
            _request: &SearchRequest,
            params: &Params,
            features: &[u8],
            _labels: &[u8],
        ) -> HsResult<Evaluation> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(features, b"X");
            let x = match params.get("x") {
                Some(ParameterValue::Int(x)) => *x as f64,
                other => return Err(HsError::Worker(format!("bad x {other:?}"))),
            };
            Ok(Evaluation {
                score: -(x - 3.0).powi(2),
                estimator: Some(serde_json::json!({ "x": x })),
            })
        }
    }

    fn request(values: &[i64]) -> SearchRequest {
        let mut grid = ParamGrid::new();
        grid.insert("x".into(), values.iter().map(|v| ParameterValue::Int(*v)).collect());
        SearchRequest::new(serde_json::json!({"model": "ridge"}), SearchSpecification::grid(grid))
    }

    #[tokio::test]
    async fn grid_fit_keeps_best_candidate_and_estimator() {
        let search = ScoredSearch::new(Parabola::default());
        let result = search
            .fit(&request(&[1, 2, 3, 4, 5]), WorkerId(3), b"X", b"y")
            .await
            .unwrap();

        assert_eq!(search.scorer().calls.load(Ordering::SeqCst), 5);
        assert_eq!(search.scorer().prepared.load(Ordering::SeqCst), 1);
        assert_eq!(result.worker_id, WorkerId(3));
        assert_eq!(result.best_score, 0.0);
        assert_eq!(result.best_params["x"], ParameterValue::Int(3));
        assert_eq!(result.candidates.len(), 5);

        let estimator = result.best_estimator.unwrap();
        let decoded: serde_json::Value = serde_json::from_slice(&estimator.data).unwrap();
        assert_eq!(decoded["x"], 3.0);
    }

    #[tokio::test]
    async fn scorer_errors_abort_the_fit() {
        let mut grid = ParamGrid::new();
        grid.insert("x".into(), vec!["oops".into()]);
        let req = SearchRequest::new(serde_json::Value::Null, SearchSpecification::grid(grid));

        let err = ScoredSearch::new(Parabola::default())
            .fit(&req, WorkerId(0), b"X", b"y")
            .await
            .unwrap_err();
        assert!(matches!(err, HsError::Worker(_)));
    }

    #[tokio::test]
    async fn batch_size_does_not_change_coverage() {
        let search = ScoredSearch::new(Parabola::default()).with_batch_size(4);
        let result = search
            .fit(&request(&[0, 6, 2]), WorkerId(0), b"X", b"y")
            .await
            .unwrap();
        assert_eq!(result.candidates.len(), 3);
        assert_eq!(result.best_params["x"], ParameterValue::Int(2));
    }
}
