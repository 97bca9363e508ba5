//! Candidate generators for one worker's share of the search.

use hs_types::HsResult;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;

use crate::search::{
    Dimension, Distribution, GridSpec, ParamGrid, ParameterValue, Params, RealPrior,
    SearchSpecification,
};

/// Default probability that the Bayesian strategy samples fresh instead of
/// perturbing the incumbent.
pub const DEFAULT_EXPLORATION_WEIGHT: f64 = 0.3;

/// Common trait for all search strategies.
pub trait SearchStrategy: Send + Sync {
    /// Next batch of candidates. Shorter than `count` once the budget runs out.
    fn suggest(&mut self, count: usize) -> Vec<Params>;

    /// Report a scored candidate so adaptive strategies can learn.
    fn report(&mut self, _params: &Params, _score: f64) {}

    /// Total number of candidates this strategy will produce.
    fn budget(&self) -> usize;

    fn name(&self) -> &str;
}

/// Build the strategy matching a specification.
pub fn strategy_for(spec: &SearchSpecification, seed: Option<u64>) -> HsResult<Box<dyn SearchStrategy>> {
    spec.validate()?;
    let seed = seed.unwrap_or_else(rand::random::<u64>);

    Ok(match spec {
        SearchSpecification::Grid { param_grid } => Box::new(GridSearch::new(param_grid)),
        SearchSpecification::Randomized {
            param_distributions,
            n_iter,
        } => Box::new(RandomSearch::new(param_distributions.clone(), *n_iter, seed)),
        SearchSpecification::Bayesian {
            search_spaces,
            n_iter,
        } => Box::new(BayesianSearch::new(
            search_spaces.clone(),
            *n_iter,
            DEFAULT_EXPLORATION_WEIGHT,
            seed,
        )),
    })
}

// ---- Grid search ----

/// Exhaustive search over every combination of every grid.
#[derive(Debug, Clone)]
pub struct GridSearch {
    cursor: usize,
    combos: Vec<Params>,
}

impl GridSearch {
    pub fn new(grid: &GridSpec) -> Self {
        let combos = match grid {
            GridSpec::Single(grid) => Self::build_grid(grid),
            GridSpec::Partitioned(grids) => grids.iter().flat_map(Self::build_grid).collect(),
        };
        Self { cursor: 0, combos }
    }

    fn build_grid(grid: &ParamGrid) -> Vec<Params> {
        let mut result: Vec<Params> = vec![Params::new()];
        for (name, values) in grid {
            let mut next = Vec::with_capacity(result.len() * values.len());
            for existing in &result {
                for value in values {
                    let mut combo = existing.clone();
                    combo.insert(name.clone(), value.clone());
                    next.push(combo);
                }
            }
            result = next;
        }
        result
    }
}

impl SearchStrategy for GridSearch {
    fn suggest(&mut self, count: usize) -> Vec<Params> {
        let end = (self.cursor + count).min(self.combos.len());
        let batch = self.combos[self.cursor..end].to_vec();
        self.cursor = end;
        batch
    }

    fn budget(&self) -> usize {
        self.combos.len()
    }

    fn name(&self) -> &str {
        "grid"
    }
}

// ---- Random search ----

/// Independent sampling from per-parameter distributions.
#[derive(Debug, Clone)]
pub struct RandomSearch {
    distributions: BTreeMap<String, Distribution>,
    n_iter: usize,
    drawn: usize,
    rng: StdRng,
}

impl RandomSearch {
    pub fn new(distributions: BTreeMap<String, Distribution>, n_iter: usize, seed: u64) -> Self {
        Self {
            distributions,
            n_iter,
            drawn: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn sample_one(&mut self) -> Params {
        let rng = &mut self.rng;
        self.distributions
            .iter()
            .map(|(name, dist)| (name.clone(), sample_distribution(rng, dist)))
            .collect()
    }
}

fn sample_distribution(rng: &mut StdRng, dist: &Distribution) -> ParameterValue {
    match dist {
        Distribution::Uniform { low, high } => ParameterValue::Float(rng.random_range(*low..=*high)),
        Distribution::IntUniform { low, high } => ParameterValue::Int(rng.random_range(*low..=*high)),
        Distribution::LogUniform { low, high } => {
            let log_val: f64 = rng.random_range(low.ln()..=high.ln());
            ParameterValue::Float(log_val.exp())
        }
        Distribution::Choice { values } => values[rng.random_range(0..values.len())].clone(),
    }
}

impl SearchStrategy for RandomSearch {
    fn suggest(&mut self, count: usize) -> Vec<Params> {
        let count = count.min(self.n_iter - self.drawn);
        self.drawn += count;
        (0..count).map(|_| self.sample_one()).collect()
    }

    fn budget(&self) -> usize {
        self.n_iter
    }

    fn name(&self) -> &str {
        "randomized"
    }
}

// ---- Bayesian search ----

/// Sequential model-based search over a bounded space.
///
/// Tracks observed (params, score) pairs and either samples the space fresh
/// (with probability `exploration_weight`, and always before the first
/// report) or perturbs the best point seen so far.
#[derive(Debug, Clone)]
pub struct BayesianSearch {
    spaces: BTreeMap<String, Dimension>,
    n_iter: usize,
    drawn: usize,
    observations: Vec<(Params, f64)>,
    exploration_weight: f64,
    rng: StdRng,
}

impl BayesianSearch {
    pub fn new(
        spaces: BTreeMap<String, Dimension>,
        n_iter: usize,
        exploration_weight: f64,
        seed: u64,
    ) -> Self {
        Self {
            spaces,
            n_iter,
            drawn: 0,
            observations: Vec::new(),
            exploration_weight,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn explore(&mut self) -> Params {
        let rng = &mut self.rng;
        self.spaces
            .iter()
            .map(|(name, dim)| (name.clone(), sample_dimension(rng, dim)))
            .collect()
    }

    /// Perturb the best-known point.
    fn exploit(&mut self) -> Params {
        let best = self
            .observations
            .iter()
            .filter(|(_, score)| !score.is_nan())
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(params, _)| params.clone());

        let Some(base) = best else {
            return self.explore();
        };

        let rng = &mut self.rng;
        self.spaces
            .iter()
            .map(|(name, dim)| {
                let value = match (dim, base.get(name)) {
                    (Dimension::Real { low, high, prior }, Some(ParameterValue::Float(v))) => {
                        let perturbed = match prior {
                            RealPrior::Uniform => v + rng.random_range(-0.1..0.1) * (high - low),
                            RealPrior::LogUniform => {
                                let log_range = high.ln() - low.ln();
                                (v.ln() + rng.random_range(-0.1..0.1) * log_range).exp()
                            }
                        };
                        ParameterValue::Float(perturbed.clamp(*low, *high))
                    }
                    (Dimension::Integer { low, high }, Some(ParameterValue::Int(v))) => {
                        let delta: i64 = rng.random_range(-2..=2);
                        ParameterValue::Int(v.saturating_add(delta).clamp(*low, *high))
                    }
                    // Categories and missing base values are resampled.
                    _ => sample_dimension(rng, dim),
                };
                (name.clone(), value)
            })
            .collect()
    }
}

fn sample_dimension(rng: &mut StdRng, dim: &Dimension) -> ParameterValue {
    match dim {
        Dimension::Categorical { categories, prior } => {
            let idx = match prior {
                Some(weights) => weighted_index(rng, weights),
                None => rng.random_range(0..categories.len()),
            };
            categories[idx.min(categories.len() - 1)].clone()
        }
        Dimension::Integer { low, high } => ParameterValue::Int(rng.random_range(*low..=*high)),
        Dimension::Real { low, high, prior } => match prior {
            RealPrior::Uniform => ParameterValue::Float(rng.random_range(*low..=*high)),
            RealPrior::LogUniform => {
                let log_val: f64 = rng.random_range(low.ln()..=high.ln());
                ParameterValue::Float(log_val.exp().clamp(*low, *high))
            }
        },
    }
}

/// Index drawn proportionally to `weights`.
fn weighted_index(rng: &mut StdRng, weights: &[f64]) -> usize {
    let total: f64 = weights.iter().sum();
    let mut target = rng.random::<f64>() * total;
    for (idx, weight) in weights.iter().enumerate() {
        if target < *weight {
            return idx;
        }
        target -= weight;
    }
    weights.len().saturating_sub(1)
}

impl SearchStrategy for BayesianSearch {
    fn suggest(&mut self, count: usize) -> Vec<Params> {
        let count = count.min(self.n_iter - self.drawn);
        self.drawn += count;
        (0..count)
            .map(|_| {
                if self.observations.is_empty() || self.rng.random::<f64>() < self.exploration_weight {
                    self.explore()
                } else {
                    self.exploit()
                }
            })
            .collect()
    }

    fn report(&mut self, params: &Params, score: f64) {
        self.observations.push((params.clone(), score));
    }

    fn budget(&self) -> usize {
        self.n_iter
    }

    fn name(&self) -> &str {
        "bayesian"
    }
}
