//! Search specification data model.

use hs_types::{config_error, HsResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::partition::Partition;

/// A concrete parameter value.
///
/// Integers are tried before floats so `3` stays an integer across a JSON
/// round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Int(i64),
    Float(f64),
    Json(serde_json::Value),
}

impl std::fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Json(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for ParameterValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for ParameterValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for ParameterValue {
    fn from(v: &str) -> Self {
        Self::Json(serde_json::Value::String(v.to_string()))
    }
}

impl From<bool> for ParameterValue {
    fn from(v: bool) -> Self {
        Self::Json(serde_json::Value::Bool(v))
    }
}

/// One concrete assignment of every searched parameter.
pub type Params = BTreeMap<String, ParameterValue>;

/// Parameter name to ordered candidate values.
pub type ParamGrid = BTreeMap<String, Vec<ParameterValue>>;

/// A grid, or a list of grids the caller already partitioned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GridSpec {
    Single(ParamGrid),
    Partitioned(Vec<ParamGrid>),
}

/// Sampling distribution for randomized search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Distribution {
    /// Continuous uniform range [low, high].
    Uniform { low: f64, high: f64 },
    /// Integer range [low, high] inclusive.
    IntUniform { low: i64, high: i64 },
    /// Log-uniform range (sampled in log-space then exponentiated).
    LogUniform { low: f64, high: f64 },
    /// Categorical choices.
    Choice { values: Vec<ParameterValue> },
}

/// How a real-valued Bayesian dimension is sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RealPrior {
    #[default]
    Uniform,
    LogUniform,
}

/// One dimension of a Bayesian search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Dimension {
    Categorical {
        categories: Vec<ParameterValue>,
        /// Selection weights, one per category. Sum to 1 when present.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prior: Option<Vec<f64>>,
    },
    Integer { low: i64, high: i64 },
    Real {
        low: f64,
        high: f64,
        #[serde(default)]
        prior: RealPrior,
    },
}

/// What to search: exactly one of grid, randomized or Bayesian.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SearchSpecification {
    Grid {
        param_grid: GridSpec,
    },
    Randomized {
        param_distributions: BTreeMap<String, Distribution>,
        n_iter: usize,
    },
    Bayesian {
        search_spaces: BTreeMap<String, Dimension>,
        n_iter: usize,
    },
}

impl SearchSpecification {
    pub fn grid(param_grid: ParamGrid) -> Self {
        Self::Grid {
            param_grid: GridSpec::Single(param_grid),
        }
    }

    pub fn randomized(param_distributions: BTreeMap<String, Distribution>, n_iter: usize) -> Self {
        Self::Randomized {
            param_distributions,
            n_iter,
        }
    }

    pub fn bayesian(search_spaces: BTreeMap<String, Dimension>, n_iter: usize) -> Self {
        Self::Bayesian {
            search_spaces,
            n_iter,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Grid { .. } => "grid",
            Self::Randomized { .. } => "randomized",
            Self::Bayesian { .. } => "bayesian",
        }
    }

    /// Check the specification can be partitioned and searched.
    pub fn validate(&self) -> HsResult<()> {
        match self {
            Self::Grid { param_grid } => match param_grid {
                GridSpec::Single(grid) => validate_grid(grid),
                GridSpec::Partitioned(grids) => {
                    if grids.is_empty() {
                        return Err(config_error!("pre-partitioned grid list is empty"));
                    }
                    grids.iter().try_for_each(validate_grid)
                }
            },
            Self::Randomized {
                param_distributions,
                n_iter,
            } => {
                if *n_iter == 0 {
                    return Err(config_error!("randomized search needs n_iter > 0"));
                }
                param_distributions
                    .iter()
                    .try_for_each(|(name, dist)| validate_distribution(name, dist))
            }
            Self::Bayesian {
                search_spaces,
                n_iter,
            } => {
                if *n_iter == 0 {
                    return Err(config_error!("bayesian search needs n_iter > 0"));
                }
                search_spaces
                    .iter()
                    .try_for_each(|(name, dim)| validate_dimension(name, dim))
            }
        }
    }

    /// Replace the searched space with one worker's partition.
    pub fn splice(&mut self, partition: Partition) -> HsResult<()> {
        match (self, partition) {
            (Self::Grid { param_grid }, Partition::Grid { param_grid: part }) => {
                *param_grid = GridSpec::Single(part);
            }
            (
                Self::Randomized {
                    param_distributions,
                    n_iter,
                },
                Partition::Randomized {
                    param_distributions: dists,
                    n_iter: part_iter,
                },
            ) => {
                *param_distributions = dists;
                *n_iter = part_iter;
            }
            (
                Self::Bayesian {
                    search_spaces,
                    n_iter,
                },
                Partition::Bayesian {
                    search_spaces: spaces,
                    n_iter: part_iter,
                },
            ) => {
                *search_spaces = spaces;
                *n_iter = part_iter;
            }
            (spec, partition) => {
                return Err(config_error!(
                    "cannot splice a {} partition into a {} search",
                    partition.kind(),
                    spec.kind()
                ));
            }
        }
        Ok(())
    }
}

fn validate_grid(grid: &ParamGrid) -> HsResult<()> {
    match grid.iter().find(|(_, values)| values.is_empty()) {
        Some((name, _)) => Err(config_error!(
            "grid parameter {name:?} has no candidate values"
        )),
        None => Ok(()),
    }
}

fn validate_distribution(name: &str, dist: &Distribution) -> HsResult<()> {
    let ok = match dist {
        Distribution::Uniform { low, high } => low <= high,
        Distribution::IntUniform { low, high } => low <= high,
        Distribution::LogUniform { low, high } => *low > 0.0 && low <= high,
        Distribution::Choice { values } => !values.is_empty(),
    };
    if ok {
        Ok(())
    } else {
        Err(config_error!("invalid distribution for {name:?}: {dist:?}"))
    }
}

fn validate_dimension(name: &str, dim: &Dimension) -> HsResult<()> {
    let ok = match dim {
        Dimension::Categorical { categories, prior } => {
            !categories.is_empty()
                && prior.as_ref().map_or(true, |weights| {
                    weights.len() == categories.len()
                        && weights.iter().all(|w| *w >= 0.0)
                        && weights.iter().sum::<f64>() > 0.0
                })
        }
        Dimension::Integer { low, high } => low <= high,
        Dimension::Real { low, high, prior } => {
            low <= high && (*prior == RealPrior::Uniform || *low > 0.0)
        }
    };
    if ok {
        Ok(())
    } else {
        Err(config_error!("invalid search space for {name:?}: {dim:?}"))
    }
}

/// Everything a worker needs to run its share of the search.
///
/// `estimator` is opaque to the orchestrator and handed to the search-fit
/// capability untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub estimator: serde_json::Value,
    pub spec: SearchSpecification,
    /// Metric name forwarded to the scorer.
    #[serde(default)]
    pub scoring: Option<String>,
    /// Seed for candidate sampling; fresh entropy when unset.
    #[serde(default)]
    pub random_state: Option<u64>,
}

impl SearchRequest {
    pub fn new(estimator: serde_json::Value, spec: SearchSpecification) -> Self {
        Self {
            estimator,
            spec,
            scoring: None,
            random_state: None,
        }
    }

    pub fn with_scoring(mut self, scoring: &str) -> Self {
        self.scoring = Some(scoring.to_string());
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hs_types::HsError;
    use serde_json::json;

    #[test]
    fn parameter_values_keep_their_type() {
        let values: Vec<ParameterValue> = serde_json::from_value(json!([1, 0.5, "gini", true])).unwrap();
        assert_eq!(
            values,
            vec![
                ParameterValue::Int(1),
                ParameterValue::Float(0.5),
                ParameterValue::from("gini"),
                ParameterValue::from(true),
            ]
        );
    }

    #[test]
    fn grid_spec_accepts_map_or_list() {
        let single: GridSpec = serde_json::from_value(json!({"a": [1, 2]})).unwrap();
        assert!(matches!(single, GridSpec::Single(_)));

        let listed: GridSpec = serde_json::from_value(json!([{"a": [1]}, {"a": [2]}])).unwrap();
        assert!(matches!(listed, GridSpec::Partitioned(ref grids) if grids.len() == 2));
    }

    #[test]
    fn specification_json_shape() {
        let spec: SearchSpecification = serde_json::from_value(json!({
            "kind": "bayesian",
            "n_iter": 20,
            "search_spaces": {
                "C": {"type": "real", "low": 0.001, "high": 10.0, "prior": "log-uniform"},
                "kernel": {"type": "categorical", "categories": ["rbf", "linear"]},
                "degree": {"type": "integer", "low": 1, "high": 5}
            }
        }))
        .unwrap();

        assert_eq!(spec.kind(), "bayesian");
        spec.validate().unwrap();
        match spec {
            SearchSpecification::Bayesian { search_spaces, .. } => {
                assert_eq!(
                    search_spaces["C"],
                    Dimension::Real {
                        low: 0.001,
                        high: 10.0,
                        prior: RealPrior::LogUniform
                    }
                );
            }
            other => panic!("unexpected spec: {other:?}"),
        }
    }

    #[test]
    fn validation_rejects_bad_specs() {
        let mut grid = ParamGrid::new();
        grid.insert("a".into(), vec![]);
        assert!(SearchSpecification::grid(grid).validate().is_err());

        let mut dists = BTreeMap::new();
        dists.insert("lr".to_string(), Distribution::LogUniform { low: 0.0, high: 1.0 });
        assert!(SearchSpecification::randomized(dists, 10).validate().is_err());

        let mut spaces = BTreeMap::new();
        spaces.insert(
            "k".to_string(),
            Dimension::Categorical {
                categories: vec!["a".into(), "b".into()],
                prior: Some(vec![1.0]),
            },
        );
        assert!(SearchSpecification::bayesian(spaces, 5).validate().is_err());

        assert!(SearchSpecification::randomized(BTreeMap::new(), 0).validate().is_err());
    }

    #[test]
    fn splice_replaces_the_matching_field() {
        let mut grid = ParamGrid::new();
        grid.insert("a".into(), vec![1i64.into(), 2i64.into()]);
        let mut spec = SearchSpecification::grid(grid);

        let mut part = ParamGrid::new();
        part.insert("a".into(), vec![2i64.into()]);
        spec.splice(Partition::Grid {
            param_grid: part.clone(),
        })
        .unwrap();

        assert_eq!(
            spec,
            SearchSpecification::Grid {
                param_grid: GridSpec::Single(part)
            }
        );
    }

    #[test]
    fn splice_rejects_variant_mismatch() {
        let mut spec = SearchSpecification::randomized(BTreeMap::new(), 4);
        let err = spec
            .splice(Partition::Grid {
                param_grid: ParamGrid::new(),
            })
            .unwrap_err();
        assert!(matches!(err, HsError::Config(_)));
    }
}
