//! Sync orchestration: run state, pacing and the source/sink boundaries.

mod orchestrator;
mod schedule;
mod source;
mod task;

pub use orchestrator::{SyncConfig, SyncOrchestrator};
pub use schedule::inter_creator_delay;
pub use source::{CatalogSource, DiscardSink, SinkReport, SyncSink};
pub use task::{RosterEntry, RunState, SyncMode, SyncRun, SyncTask, TaskStatus};
