//! The per-event reconciliation cycle.

mod orchestrator;

pub use orchestrator::{CycleOutcome, Orchestrator};
