pub mod errors;
pub mod ids;
pub mod uri;

pub use errors::*;
pub use ids::*;
pub use uri::*;
