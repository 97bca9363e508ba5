//! # hs-engine
//!
//! Runs a hyperparameter search in parallel on a cluster: the
//! [`ParallelSearch`] orchestrator dispatches one batch job per partition,
//! each job runs [`worker::execute`], and the orchestrator aggregates what
//! the workers upload.

pub mod cli;
pub mod config;
pub mod orchestrator;
pub mod scorer;
pub mod task;
pub mod worker;

pub use config::*;
pub use orchestrator::*;
pub use scorer::*;
pub use task::*;
pub use worker::*;
