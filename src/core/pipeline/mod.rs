pub mod bootstrap;
pub mod history;
pub mod pipeline_models;
pub mod pipeline_service;

pub use bootstrap::install;
pub use history::{HistoryEntry, OutcomeLog};
pub use pipeline_models::{
    FailurePolicy, OutcomeStatus, PipelineOptions, RecordOutcome, RunReport, RunSettings,
};
pub use pipeline_service::{PipelineService, SettingsSource};
