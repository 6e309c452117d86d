use crate::core::delivery::{ColumnNames, FolderRef};
use crate::core::merge::Template;
use crate::core::records::{FAILED_MARKER, SENT_MARKER};
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("Configuration missing: {0}")]
    ConfigurationMissing(String),
    #[error("Data source unavailable: {0}")]
    SourceUnavailable(String),
    #[error("Merge failed: {0}")]
    MergeFailed(String),
    #[error("Export failed: {0}")]
    ExportFailed(String),
    #[error("Dispatch failed: {0}")]
    DispatchFailed(String),
    #[error("Write-back failed: {0}")]
    WriteBackFailed(String),
    #[error("Install failed: {0}")]
    InstallFailed(String),
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// What to do with the rest of the batch after a record fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    #[default]
    ContinueOnError,
    AbortOnError,
}

impl std::str::FromStr for FailurePolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "continue" => Ok(FailurePolicy::ContinueOnError),
            "abort" => Ok(FailurePolicy::AbortOnError),
            other => Err(format!("unknown failure policy '{}'", other)),
        }
    }
}

/// Settings that do not change between runs.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub columns: ColumnNames,
    pub file_name_template: String,
    pub failure_policy: FailurePolicy,
    pub keep_documents: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            columns: ColumnNames::default(),
            file_name_template: "NDA - {{Full Name}}".to_string(),
            failure_policy: FailurePolicy::default(),
            keep_documents: false,
        }
    }
}

/// Settings read once per run from the settings source. Any of them may be
/// missing; the orchestrator decides which are required.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSettings {
    pub template_id: Option<String>,
    pub email_subject: Option<String>,
    pub email_body: Option<String>,
    pub destination_folder: Option<String>,
}

impl RunSettings {
    /// Fills every unset field from `fallback`.
    pub fn or(self, fallback: RunSettings) -> RunSettings {
        RunSettings {
            template_id: self.template_id.or(fallback.template_id),
            email_subject: self.email_subject.or(fallback.email_subject),
            email_body: self.email_body.or(fallback.email_body),
            destination_folder: self.destination_folder.or(fallback.destination_folder),
        }
    }
}

/// Everything one run needs, resolved up front and passed explicitly to each step.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub template: Template,
    pub destination: FolderRef,
    pub email_subject: String,
    pub email_body: String,
    pub file_name_template: String,
    pub columns: ColumnNames,
    pub failure_policy: FailurePolicy,
    pub keep_documents: bool,
}

// ============================================================================
// OUTCOMES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Pending,
    Sent,
    Failed,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Pending => "Pending",
            OutcomeStatus::Sent => SENT_MARKER,
            OutcomeStatus::Failed => FAILED_MARKER,
        }
    }

    pub fn parse(value: &str) -> OutcomeStatus {
        if value.eq_ignore_ascii_case(SENT_MARKER) {
            OutcomeStatus::Sent
        } else if value.eq_ignore_ascii_case(FAILED_MARKER) {
            OutcomeStatus::Failed
        } else {
            OutcomeStatus::Pending
        }
    }
}

/// What happened to one record in one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordOutcome {
    pub source_position: usize,
    pub recipient: String,
    pub status: OutcomeStatus,
    pub artifact_url: Option<String>,
    pub error: Option<String>,
}

/// A record that did not complete, with the step that stopped it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
    pub source_position: usize,
    pub recipient: String,
    pub error: PipelineError,
}

impl RecordFailure {
    pub fn to_outcome(&self) -> RecordOutcome {
        RecordOutcome {
            source_position: self.source_position,
            recipient: self.recipient.clone(),
            status: OutcomeStatus::Failed,
            artifact_url: None,
            error: Some(self.error.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub run_id: String,
    pub sent: Vec<RecordOutcome>,
    pub failures: Vec<RecordFailure>,
    /// Pending records never attempted because the run was aborted.
    pub skipped: usize,
}

impl RunReport {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            sent: Vec::new(),
            failures: Vec::new(),
            skipped: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.skipped == 0
    }

    /// One line per failure, for the end-of-run summary.
    pub fn failure_summary(&self) -> Vec<String> {
        self.failures
            .iter()
            .map(|f| format!("row {} ({}): {}", f.source_position, f.recipient, f.error))
            .collect()
    }
}
