//! Periodic jobs fired by the scheduler: scoring, distance pruning, and
//! narration dispatch.

mod narrate_job;
mod prune_job;
mod scoring_job;

pub use narrate_job::NarrateJob;
pub use prune_job::PruneJob;
pub use scoring_job::{ScoringCompleteFn, ScoringJob};
