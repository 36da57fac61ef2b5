//! The H3ERE decision pipeline: eleven step points from START_ROUND to
//! ROUND_COMPLETE, with recursive re-selection on conscience failure.
//!
//! The runner drives one thought through the steps strictly in order;
//! concurrency exists only across different thoughts (the processor's
//! job) and inside PERFORM_DMAS (three evaluators joined by a barrier).
//! All recoverable errors are reified as values and resolved by the
//! FINALIZE_ACTION override ladder — nothing throws across a step
//! boundary.

pub mod conscience;
pub mod context;
pub mod dma;
pub mod finalize;
pub mod gate;
pub mod handlers;
pub mod runner;

pub use conscience::{Conscience, RuleConscience};
pub use context::{ContextBuilder, SnapshotSource};
pub use dma::DmaSuite;
pub use gate::StepGate;
pub use handlers::Handlers;
pub use runner::{Pipeline, RoundOutcome, RoundResult};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Test support
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
