/// Batch processing
///
/// This module handles:
/// - Numbering and chunking a run before it starts (plan.rs)
/// - Running chunks on a bounded worker pool (dispatcher.rs)
/// - Progress events flowing back to the coordinator (events.rs)

pub mod dispatcher;
pub mod events;
pub mod plan;

pub use dispatcher::{BatchDispatcher, BatchHandle, CancelToken, ImageCorrector};
pub use events::{BatchEvent, Progress};
pub use plan::{plan, BatchPlan, Chunk, ImageJob, NamingMode, PlannedImage, RenameMap, RunSettings};
