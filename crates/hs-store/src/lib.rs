//! # hs-store
//!
//! Collaborators the orchestrator talks to: blob stores (in-memory, local
//! filesystem, Cloud Storage) and the batch job runner (Kubernetes).

pub mod blob;
pub mod gcs;
pub mod jobs;
pub mod kubernetes;
pub mod local;
mod objects;

pub use blob::*;
pub use gcs::*;
pub use jobs::*;
pub use kubernetes::*;
pub use local::*;
