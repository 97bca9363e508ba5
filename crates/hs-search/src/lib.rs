//! # hs-search
//!
//! Search specifications and how they are split across workers, the
//! per-worker search-fit capability, and aggregation of partial results.

pub mod fit;
pub mod partition;
pub mod result;
pub mod search;
pub mod strategy;

pub use fit::*;
pub use partition::*;
pub use result::*;
pub use search::*;
pub use strategy::*;
