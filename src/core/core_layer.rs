// The core module contains the pipeline logic and the traits it depends on.
// Each pipeline stage gets its own submodule.

pub mod backend_error;

#[path = "records/mod.rs"]
pub mod records;

#[path = "merge/mod.rs"]
pub mod merge;

#[path = "delivery/mod.rs"]
pub mod delivery;

#[path = "pipeline/mod.rs"]
pub mod pipeline;

#[path = "schedule/daily_trigger.rs"]
pub mod schedule;
