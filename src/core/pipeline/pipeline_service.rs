use super::history::OutcomeLog;
use super::pipeline_models::{
    FailurePolicy, OutcomeStatus, PipelineConfig, PipelineError, PipelineOptions, RecordFailure,
    RecordOutcome, RunReport, RunSettings,
};
use crate::core::backend_error::BackendError;
use crate::core::delivery::{
    ArtifactExporter, ArtifactStore, ColumnMap, DataSource, MailTransport, Notifier, StatusWriter,
};
use crate::core::merge::{
    build_substitutions, render_text, DocumentBackend, Template, TemplateMerger,
};
use crate::core::records::{extract_records, filter_pending, Record, SENT_MARKER};
use async_trait::async_trait;
use chrono::{Local, Utc};

/// Where the per-run settings live (a settings sheet, the environment, ...).
#[async_trait]
pub trait SettingsSource: Send + Sync {
    async fn load_settings(&self) -> Result<RunSettings, BackendError>;

    /// Remembers the template id so later runs pick it up.
    async fn store_template_id(&self, template_id: &str) -> Result<(), BackendError>;
}

/// Wires the pipeline steps together: extract → filter → merge → export →
/// notify → write back, one record at a time.
pub struct PipelineService<S, T, D, A, M, L>
where
    S: DataSource,
    T: SettingsSource,
    D: DocumentBackend,
    A: ArtifactStore,
    M: MailTransport,
    L: OutcomeLog,
{
    source: S,
    settings: T,
    merger: TemplateMerger<D>,
    exporter: ArtifactExporter<A>,
    notifier: Notifier<M>,
    history: L,
    options: PipelineOptions,
}

impl<S, T, D, A, M, L> PipelineService<S, T, D, A, M, L>
where
    S: DataSource,
    T: SettingsSource,
    D: DocumentBackend,
    A: ArtifactStore,
    M: MailTransport,
    L: OutcomeLog,
{
    pub fn new(
        source: S,
        settings: T,
        documents: D,
        artifacts: A,
        mail: M,
        history: L,
        options: PipelineOptions,
    ) -> Self {
        Self {
            source,
            settings,
            merger: TemplateMerger::new(documents),
            exporter: ArtifactExporter::new(artifacts),
            notifier: Notifier::new(mail),
            history,
            options,
        }
    }

    #[cfg(test)]
    pub fn source(&self) -> &S {
        &self.source
    }

    #[cfg(test)]
    pub fn history(&self) -> &L {
        &self.history
    }

    /// Reads settings, checks them and looks up the template. Does not touch
    /// the destination folder.
    async fn resolve_settings(&self) -> Result<(RunSettings, Template), PipelineError> {
        let settings = self
            .settings
            .load_settings()
            .await
            .map_err(|e| PipelineError::ConfigurationMissing(format!("cannot read settings: {}", e)))?;

        let template_id = required(&settings.template_id, "template id")?;
        required(&settings.email_subject, "email subject")?;
        required(&settings.email_body, "email body")?;
        required(&settings.destination_folder, "destination folder name")?;

        let template = self
            .merger
            .resolve_template(template_id)
            .await
            .map_err(|e| match e {
                BackendError::NotFound(_) => {
                    PipelineError::ConfigurationMissing(format!("template '{}' not found", template_id))
                }
                other => PipelineError::ConfigurationMissing(other.to_string()),
            })?;

        Ok((settings, template))
    }

    /// Runs the whole batch once.
    ///
    /// Run-level problems (settings, missing columns, unreadable source) are
    /// returned as errors before any record is touched. Per-record problems
    /// end up in the report.
    pub async fn run(&self) -> Result<RunReport, PipelineError> {
        let mut report = RunReport::new(new_run_id());
        let (settings, template) = self.resolve_settings().await?;

        let grid = self
            .source
            .read_grid()
            .await
            .map_err(|e| PipelineError::SourceUnavailable(e.to_string()))?;

        let columns = ColumnMap::resolve(&grid.header(), &self.options.columns).map_err(|name| {
            PipelineError::ConfigurationMissing(format!("column '{}' not found in header", name))
        })?;

        let records = extract_records(&grid);
        let total = records.len();
        let pending = filter_pending(
            records,
            &self.options.columns.status,
            &self.options.columns.output_only(),
        );

        tracing::info!(
            run_id = %report.run_id,
            total,
            pending = pending.len(),
            "Loaded records"
        );

        if pending.is_empty() {
            return Ok(report);
        }

        // Checked by resolve_settings above.
        let folder_name = settings.destination_folder.unwrap_or_default();
        let destination = self
            .exporter
            .resolve_destination(&folder_name)
            .await
            .map_err(|e| PipelineError::ConfigurationMissing(format!("destination folder: {}", e)))?;

        let config = PipelineConfig {
            template,
            destination,
            email_subject: settings.email_subject.unwrap_or_default(),
            email_body: settings.email_body.unwrap_or_default(),
            file_name_template: self.options.file_name_template.clone(),
            columns: self.options.columns.clone(),
            failure_policy: self.options.failure_policy,
            keep_documents: self.options.keep_documents,
        };

        let writer = StatusWriter::new(&self.source, columns);

        for (index, record) in pending.iter().enumerate() {
            let recipient = record.text(&config.columns.email);

            match self.process_record(&config, &writer, record).await {
                Ok(outcome) => {
                    self.log_outcome(&report.run_id, &outcome).await;
                    report.sent.push(outcome);
                }
                Err(error) => {
                    tracing::error!(
                        source_position = record.source_position,
                        recipient = %recipient,
                        "Record failed: {}",
                        error
                    );

                    let failure = RecordFailure {
                        source_position: record.source_position,
                        recipient,
                        error,
                    };
                    self.log_outcome(&report.run_id, &failure.to_outcome()).await;
                    report.failures.push(failure);

                    if config.failure_policy == FailurePolicy::AbortOnError {
                        report.skipped = pending.len() - index - 1;
                        tracing::warn!(skipped = report.skipped, "Aborting run after failure");
                        break;
                    }
                }
            }
        }

        tracing::info!(
            run_id = %report.run_id,
            sent = report.sent.len(),
            failed = report.failures.len(),
            skipped = report.skipped,
            "Run finished"
        );

        Ok(report)
    }

    async fn process_record(
        &self,
        config: &PipelineConfig,
        writer: &StatusWriter<'_, S>,
        record: &Record,
    ) -> Result<RecordOutcome, PipelineError> {
        let email = record.text(&config.columns.email);
        let full_name = record.text(&config.columns.full_name);
        let file_name = render_text(&config.file_name_template, &build_substitutions(record));

        let document = self
            .merger
            .merge(&config.template, record, &file_name, &config.destination)
            .await
            .map_err(|e| PipelineError::MergeFailed(e.to_string()))?;

        let exported = self
            .exporter
            .export(&document, &file_name, &config.destination)
            .await;
        if !config.keep_documents {
            self.merger.discard(&document).await;
        }
        let artifact = exported.map_err(|e| PipelineError::ExportFailed(e.to_string()))?;

        self.notifier
            .notify(
                &email,
                &full_name,
                &config.email_subject,
                &config.email_body,
                &artifact,
            )
            .await
            .map_err(|e| PipelineError::DispatchFailed(e.to_string()))?;

        writer
            .write(
                record,
                &email,
                SENT_MARKER,
                Some(&artifact.url),
                Local::now().naive_local(),
            )
            .await
            .map_err(|e| PipelineError::WriteBackFailed(e.to_string()))?;

        Ok(RecordOutcome {
            source_position: record.source_position,
            recipient: email,
            status: OutcomeStatus::Sent,
            artifact_url: Some(artifact.url),
            error: None,
        })
    }

    async fn log_outcome(&self, run_id: &str, outcome: &RecordOutcome) {
        if let Err(err) = self.history.record(run_id, outcome).await {
            tracing::warn!(
                source_position = outcome.source_position,
                "Failed to record outcome in history: {}",
                err
            );
        }
    }
}

fn required<'a>(value: &'a Option<String>, what: &str) -> Result<&'a str, PipelineError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(PipelineError::ConfigurationMissing(format!("{} is not set", what))),
    }
}

fn new_run_id() -> String {
    Utc::now().format("%Y%m%dT%H%M%S%.3fZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::delivery::ColumnNames;
    use crate::core::pipeline::bootstrap::{install, PDF_FOLDER};
    use crate::core::records::CellValue;
    use crate::infra::memory::{
        InMemoryDocuments, InMemoryDrive, InMemoryHistory, InMemoryMailer, InMemorySettings,
        InMemorySheet,
    };

    type TestService = PipelineService<
        InMemorySheet,
        InMemorySettings,
        InMemoryDocuments,
        InMemoryDrive,
        InMemoryMailer,
        InMemoryHistory,
    >;

    fn settings() -> InMemorySettings {
        InMemorySettings::new(RunSettings {
            template_id: Some("tmpl-nda".to_string()),
            email_subject: Some("Your NDA".to_string()),
            email_body: Some("Please review.\nThanks".to_string()),
            destination_folder: Some("NDAs".to_string()),
        })
    }

    fn options() -> PipelineOptions {
        PipelineOptions {
            columns: ColumnNames {
                link: None,
                ..ColumnNames::default()
            },
            ..PipelineOptions::default()
        }
    }

    fn service(sheet: InMemorySheet, mailer: InMemoryMailer, options: PipelineOptions) -> TestService {
        let documents = InMemoryDocuments::new();
        documents.add_template("tmpl-nda", "NDA Template", "Dear {{Full Name}},");
        let drive = InMemoryDrive::new(documents.clone());

        PipelineService::new(
            sheet,
            settings(),
            documents,
            drive,
            mailer,
            InMemoryHistory::new(),
            options,
        )
    }

    fn three_pending() -> InMemorySheet {
        InMemorySheet::from_rows(&[
            &["Full Name", "Email Address", "NDA Status"],
            &["Ann Lee", "ann@example.com", ""],
            &["Bo Chen", "bo@example.com", ""],
            &["Cy Diaz", "cy@example.com", ""],
        ])
    }

    #[tokio::test]
    async fn test_single_row_end_to_end() {
        let sheet = InMemorySheet::from_rows(&[
            &["Full Name", "Email Address", "NDA Status"],
            &["Ann Lee", "ann@example.com", ""],
        ]);
        let service = service(sheet, InMemoryMailer::new(), options());

        let report = service.run().await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.sent.len(), 1);
        assert_eq!(report.sent[0].source_position, 2);

        let artifacts = service.exporter.store().artifacts();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].name, "NDA - Ann Lee.pdf");
        assert_eq!(String::from_utf8_lossy(&artifacts[0].content), "Dear Ann Lee,");

        let sent = service.notifier_transport().sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "ann@example.com");
        assert_eq!(sent[0].subject, "Your NDA");
        assert!(sent[0].html_body.contains("Please review.<br>Thanks"));

        assert_eq!(service.source().cell(2, 2), CellValue::from("Sent"));
        // Working copy is removed after export.
        assert_eq!(service.merger.backend().document_count(), 1);
    }

    #[tokio::test]
    async fn test_template_is_never_mutated() {
        let service = service(three_pending(), InMemoryMailer::new(), options());
        service.run().await.unwrap();

        assert_eq!(
            service.merger.backend().body("tmpl-nda").as_deref(),
            Some("Dear {{Full Name}},")
        );
    }

    #[tokio::test]
    async fn test_sent_rows_are_not_processed_again() {
        let service = service(three_pending(), InMemoryMailer::new(), options());

        let first = service.run().await.unwrap();
        assert_eq!(first.sent.len(), 3);

        let second = service.run().await.unwrap();
        assert!(second.sent.is_empty());
        assert!(second.failures.is_empty());
        assert_eq!(service.notifier_transport().sent().len(), 3);
    }

    #[tokio::test]
    async fn test_dispatch_failure_is_isolated() {
        let mailer = InMemoryMailer::new();
        mailer.fail_for("bo@example.com");
        let service = service(three_pending(), mailer, options());

        let report = service.run().await.unwrap();

        assert_eq!(report.sent.len(), 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].source_position, 3);
        assert!(matches!(report.failures[0].error, PipelineError::DispatchFailed(_)));

        let sheet = service.source();
        assert_eq!(sheet.cell(2, 2), CellValue::from("Sent"));
        assert_eq!(sheet.cell(3, 2), CellValue::Empty);
        assert_eq!(sheet.cell(4, 2), CellValue::from("Sent"));

        let history = service.history().entries();
        assert_eq!(history.len(), 3);
        assert_eq!(history[1].1.status, OutcomeStatus::Failed);
    }

    #[tokio::test]
    async fn test_abort_policy_stops_the_batch() {
        let mailer = InMemoryMailer::new();
        mailer.fail_for("bo@example.com");
        let options = PipelineOptions {
            failure_policy: FailurePolicy::AbortOnError,
            ..options()
        };
        let service = service(three_pending(), mailer, options);

        let report = service.run().await.unwrap();

        assert_eq!(report.sent.len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(service.source().cell(4, 2), CellValue::Empty);
    }

    #[tokio::test]
    async fn test_invalid_address_fails_only_that_record() {
        let sheet = InMemorySheet::from_rows(&[
            &["Full Name", "Email Address", "NDA Status"],
            &["Ann Lee", "not an address", ""],
            &["Bo Chen", "bo@example.com", ""],
        ]);
        let service = service(sheet, InMemoryMailer::new(), options());

        let report = service.run().await.unwrap();

        assert_eq!(report.sent.len(), 1);
        assert_eq!(report.failures[0].source_position, 2);
        assert!(matches!(report.failures[0].error, PipelineError::DispatchFailed(_)));
    }

    #[tokio::test]
    async fn test_missing_status_column_fails_before_any_record() {
        let sheet = InMemorySheet::from_rows(&[
            &["Full Name", "Email Address"],
            &["Ann Lee", "ann@example.com"],
        ]);
        let service = service(sheet, InMemoryMailer::new(), options());

        let err = service.run().await.unwrap_err();

        assert!(matches!(err, PipelineError::ConfigurationMissing(ref m) if m.contains("NDA Status")));
        assert!(service.notifier_transport().sent().is_empty());
    }

    #[tokio::test]
    async fn test_missing_settings_fail_the_run() {
        let documents = InMemoryDocuments::new();
        let drive = InMemoryDrive::new(documents.clone());
        let service = PipelineService::new(
            three_pending(),
            InMemorySettings::new(RunSettings {
                template_id: Some("tmpl-nda".to_string()),
                ..RunSettings::default()
            }),
            documents,
            drive,
            InMemoryMailer::new(),
            InMemoryHistory::new(),
            options(),
        );

        let err = service.run().await.unwrap_err();
        assert_eq!(
            err,
            PipelineError::ConfigurationMissing("email subject is not set".to_string())
        );
    }

    #[tokio::test]
    async fn test_unknown_template_fails_the_run() {
        let documents = InMemoryDocuments::new();
        let drive = InMemoryDrive::new(documents.clone());
        let service = PipelineService::new(
            three_pending(),
            settings(),
            documents,
            drive,
            InMemoryMailer::new(),
            InMemoryHistory::new(),
            options(),
        );

        let err = service.run().await.unwrap_err();
        assert!(matches!(err, PipelineError::ConfigurationMissing(ref m) if m.contains("tmpl-nda")));
    }

    #[tokio::test]
    async fn test_rejected_merge_leaves_no_working_copy() {
        let service = service(three_pending(), InMemoryMailer::new(), options());
        service.merger.backend().reject_batches(true);

        let report = service.run().await.unwrap();

        assert_eq!(report.failures.len(), 3);
        assert!(matches!(report.failures[0].error, PipelineError::MergeFailed(_)));
        assert_eq!(service.merger.backend().document_count(), 1);
        assert!(service.notifier_transport().sent().is_empty());
    }

    #[tokio::test]
    async fn test_links_and_timestamps_are_written_when_configured() {
        let sheet = InMemorySheet::from_rows(&[
            &["Full Name", "Email Address", "NDA Status", "NDA Link PDF", "Sent At"],
            &["Ann Lee", "ann@example.com", "", "", ""],
        ]);
        let options = PipelineOptions {
            columns: ColumnNames {
                timestamp: Some("Sent At".to_string()),
                ..ColumnNames::default()
            },
            keep_documents: true,
            ..PipelineOptions::default()
        };
        let service = service(sheet, InMemoryMailer::new(), options);

        let report = service.run().await.unwrap();
        let url = report.sent[0].artifact_url.clone().unwrap();

        let sheet = service.source();
        assert_eq!(sheet.cell(2, 3), CellValue::Text(url));
        assert!(matches!(sheet.cell(2, 4), CellValue::Date(_)));
        // Template plus the kept working copy.
        assert_eq!(service.merger.backend().document_count(), 2);
    }

    #[tokio::test]
    async fn test_run_exports_into_installed_pdf_folder() {
        let documents = InMemoryDocuments::new();
        documents.add_template("tmpl-nda", "NDA Template", "Dear {{Full Name}},");
        let drive = InMemoryDrive::new(documents.clone());
        let settings = InMemorySettings::new(RunSettings {
            destination_folder: Some(PDF_FOLDER.to_string()),
            ..settings().load_settings().await.unwrap()
        });
        let service = PipelineService::new(
            three_pending(),
            settings,
            documents,
            drive,
            InMemoryMailer::new(),
            InMemoryHistory::new(),
            options(),
        );

        let installed = install(
            service.merger.backend(),
            service.exporter.store(),
            &service.settings,
            "tmpl-nda",
        )
        .await
        .unwrap();
        let report = service.run().await.unwrap();

        assert_eq!(report.sent.len(), 3);
        let drive = service.exporter.store();
        assert_eq!(drive.folder_count(), 2);
        let artifacts = drive.artifacts();
        assert_eq!(artifacts.len(), 3);
        for artifact in &artifacts {
            assert_eq!(drive.location_of(&artifact.id), Some(installed.pdf_folder.id.clone()));
        }
    }

    impl TestService {
        fn notifier_transport(&self) -> &InMemoryMailer {
            self.notifier.transport()
        }
    }
}
