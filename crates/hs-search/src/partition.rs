//! Splitting a search specification across workers.
//!
//! Partitions are matched back to workers by position, so every function here
//! is deterministic: maps are traversed in key order and nothing is sampled.

use hs_types::{config_error, HsResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tracing::debug;

use crate::search::{Dimension, Distribution, GridSpec, ParamGrid, RealPrior, SearchSpecification};

/// The slice of a search specification handed to one worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Partition {
    Grid {
        param_grid: ParamGrid,
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

impl Partition {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Grid { .. } => "grid",
            Self::Randomized { .. } => "randomized",
            Self::Bayesian { .. } => "bayesian",
        }
    }

    /// Stem of the blob object this partition is stored under.
    pub fn object_stem(&self) -> &'static str {
        Self::object_stem_for(self.kind())
    }

    /// Stem for the partition kind of a specification (`grid`, `randomized`
    /// or `bayesian`).
    pub fn object_stem_for(kind: &str) -> &'static str {
        match kind {
            "randomized" => "param_distributions",
            "bayesian" => "param_spaces",
            _ => "param_grid",
        }
    }
}

/// Split `spec` into partitions for `target_count` workers.
pub fn partition(spec: &SearchSpecification, target_count: usize) -> HsResult<Vec<Partition>> {
    if target_count == 0 {
        return Err(config_error!("target partition count must be at least 1"));
    }
    spec.validate()?;

    let partitions: Vec<Partition> = match spec {
        SearchSpecification::Grid { param_grid } => match param_grid {
            // Caller-provided partitioning wins.
            GridSpec::Partitioned(grids) => grids
                .iter()
                .cloned()
                .map(|param_grid| Partition::Grid { param_grid })
                .collect(),
            GridSpec::Single(grid) => expand_param_grid(grid, target_count)
                .into_iter()
                .map(|param_grid| Partition::Grid { param_grid })
                .collect(),
        },
        SearchSpecification::Randomized {
            param_distributions,
            n_iter,
        } => {
            let per_worker = iterations_per_worker(*n_iter, target_count);
            (0..target_count)
                .map(|_| Partition::Randomized {
                    param_distributions: param_distributions.clone(),
                    n_iter: per_worker,
                })
                .collect()
        }
        SearchSpecification::Bayesian {
            search_spaces,
            n_iter,
        } => {
            let spaces = bisect_search_spaces(search_spaces, target_count);
            let per_worker = iterations_per_worker(*n_iter, spaces.len());
            spaces
                .into_iter()
                .map(|search_spaces| Partition::Bayesian {
                    search_spaces,
                    n_iter: per_worker,
                })
                .collect()
        }
    };

    debug!(
        "Partitioned {} search into {} partitions (target {})",
        spec.kind(),
        partitions.len(),
        target_count
    );
    Ok(partitions)
}

/// Rounds up so the total is never under-covered.
pub fn iterations_per_worker(total: usize, workers: usize) -> usize {
    total / workers.max(1) + 1
}

/// Expand leading keys into singleton-valued sub-grids until there are at
/// least `target_count` of them. The first key is always expanded. Keys not
/// expanded are shared unchanged by every sub-grid.
pub fn expand_param_grid(grid: &ParamGrid, target_count: usize) -> Vec<ParamGrid> {
    let mut expand_keys: Vec<&String> = Vec::new();
    let mut n_fold = 1usize;
    for (key, values) in grid {
        expand_keys.push(key);
        n_fold = n_fold.saturating_mul(values.len());
        if n_fold >= target_count {
            break;
        }
    }

    let shared: ParamGrid = grid
        .iter()
        .filter(|(key, _)| !expand_keys.contains(key))
        .map(|(key, values)| (key.clone(), values.clone()))
        .collect();

    // Cartesian product over the expanded keys, first key varying slowest.
    let mut expanded: Vec<ParamGrid> = vec![shared];
    for key in expand_keys {
        let mut next = Vec::with_capacity(expanded.len() * grid[key].len());
        for existing in &expanded {
            for value in &grid[key] {
                let mut sub_grid = existing.clone();
                sub_grid.insert(key.clone(), vec![value.clone()]);
                next.push(sub_grid);
            }
        }
        expanded = next;
    }

    expanded
}

/// Breadth-first bisection of a Bayesian search space into `target_count`
/// sub-spaces.
///
/// The front of a FIFO queue is split along the first splittable dimension at
/// or after `depth % dims` (key order, wrapping) and both halves go to the
/// back. Entries that cannot be split are rotated; the loop ends early once a
/// full rotation splits nothing.
pub fn bisect_search_spaces(
    spaces: &BTreeMap<String, Dimension>,
    target_count: usize,
) -> Vec<BTreeMap<String, Dimension>> {
    let keys: Vec<&String> = spaces.keys().collect();
    let mut queue: VecDeque<(BTreeMap<String, Dimension>, usize)> = VecDeque::new();
    queue.push_back((spaces.clone(), 0));

    let mut stalled = 0;
    while queue.len() < target_count && stalled < queue.len() {
        let Some((space, depth)) = queue.pop_front() else {
            break;
        };

        match bisect_space(&space, &keys, depth) {
            Some((left, right)) => {
                queue.push_back((left, depth + 1));
                queue.push_back((right, depth + 1));
                stalled = 0;
            }
            None => {
                queue.push_back((space, depth));
                stalled += 1;
            }
        }
    }

    queue.into_iter().map(|(space, _)| space).collect()
}

fn bisect_space(
    space: &BTreeMap<String, Dimension>,
    keys: &[&String],
    depth: usize,
) -> Option<(BTreeMap<String, Dimension>, BTreeMap<String, Dimension>)> {
    let n = keys.len();
    (0..n).find_map(|offset| {
        let key = keys[(depth + offset) % n];
        let (lower, upper) = space.get(key)?.bisect()?;

        let mut left = space.clone();
        let mut right = space.clone();
        left.insert(key.clone(), lower);
        right.insert(key.clone(), upper);
        Some((left, right))
    })
}

impl Dimension {
    /// Split into two halves, or `None` if the dimension is a single point.
    ///
    /// Numeric halves share the midpoint. Categorical halves are disjoint
    /// and carry renormalized prior weights.
    pub fn bisect(&self) -> Option<(Dimension, Dimension)> {
        match self {
            Dimension::Categorical { categories, prior } => {
                if categories.len() < 2 {
                    return None;
                }
                let mid = categories.len() / 2;
                let (left_prior, right_prior) = match prior {
                    Some(weights) => (
                        Some(renormalize(&weights[..mid])),
                        Some(renormalize(&weights[mid..])),
                    ),
                    None => (None, None),
                };
                Some((
                    Dimension::Categorical {
                        categories: categories[..mid].to_vec(),
                        prior: left_prior,
                    },
                    Dimension::Categorical {
                        categories: categories[mid..].to_vec(),
                        prior: right_prior,
                    },
                ))
            }
            Dimension::Integer { low, high } => {
                if high <= low {
                    return None;
                }
                let (wide_low, wide_high) = (i128::from(*low), i128::from(*high));
                if wide_high - wide_low == 1 {
                    return Some((
                        Dimension::Integer { low: *low, high: *low },
                        Dimension::Integer { low: *high, high: *high },
                    ));
                }
                // Lies within [low, high], so it always fits back into i64.
                let mid = ((wide_low + wide_high).div_euclid(2)) as i64;
                Some((
                    Dimension::Integer { low: *low, high: mid },
                    Dimension::Integer { low: mid, high: *high },
                ))
            }
            Dimension::Real { low, high, prior } => {
                if high <= low {
                    return None;
                }
                let mid = match prior {
                    RealPrior::Uniform => low + (high - low) / 2.0,
                    RealPrior::LogUniform => (low * high).sqrt(),
                };
                // Too narrow to split in floating point.
                if mid <= *low || mid >= *high {
                    return None;
                }
                Some((
                    Dimension::Real {
                        low: *low,
                        high: mid,
                        prior: *prior,
                    },
                    Dimension::Real {
                        low: mid,
                        high: *high,
                        prior: *prior,
                    },
                ))
            }
        }
    }
}

/// Scale weights to sum to 1; equal weights when they sum to zero.
fn renormalize(weights: &[f64]) -> Vec<f64> {
    let total: f64 = weights.iter().sum();
    if total > 0.0 {
        weights.iter().map(|w| w / total).collect()
    } else {
        vec![1.0 / weights.len() as f64; weights.len()]
    }
}
