//! Application model and the per-cycle context derived from it.

mod context;
mod model;

pub use context::{ApplicationContext, SourceInfo};
pub use model::*;
