// Entry point of the document merge pipeline.
//
// **Architecture Overview:**
// - `core/` = Pipeline logic and the traits it depends on (backend-agnostic)
// - `infra/` = Implementations of core traits (Google APIs, SQLite, env config)
// - `cli.rs` = Command-line surface
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection)
// 3. Dispatch the requested command

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "infra/infra_layer.rs"]
mod infra;

mod cli;

use crate::cli::{Cli, Command};
use crate::core::pipeline::{install, PipelineService, RunReport};
use crate::core::schedule::DailyTrigger;
use crate::infra::google::{
    GmailClient, GoogleDocsClient, GoogleDriveClient, GoogleSheetsClient, ServiceAccountAuth,
};
use crate::infra::history::SqliteOutcomeLog;
use crate::infra::settings::{AppConfig, LayeredSettings};
use anyhow::{anyhow, Context};
use chrono::Utc;
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

type GooglePipeline = PipelineService<
    GoogleSheetsClient,
    LayeredSettings<GoogleSheetsClient>,
    GoogleDocsClient,
    GoogleDriveClient,
    GmailClient,
    SqliteOutcomeLog,
>;

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match dispatch(cli.command).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            tracing::error!("Something went wrong: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

/// Runs one command. `Ok(false)` means it finished but something failed.
async fn dispatch(command: Command) -> anyhow::Result<bool> {
    let config = AppConfig::from_env().context("invalid configuration")?;

    match command {
        Command::Run => {
            let pipeline = build_pipeline(&config).await?;
            let report = pipeline.run().await?;
            Ok(summarize(&report))
        }
        Command::Schedule => {
            let pipeline = build_pipeline(&config).await?;
            schedule(&pipeline, config.trigger).await;
            Ok(true)
        }
        Command::Install => run_install(&config).await,
        Command::History { limit } => {
            let history = SqliteOutcomeLog::new(&config.history_db_path).await?;
            print_history(&history, limit).await?;
            Ok(true)
        }
    }
}

async fn google_auth() -> anyhow::Result<Arc<ServiceAccountAuth>> {
    let auth = ServiceAccountAuth::from_env()
        .await
        .context("cannot load Google service account")?;
    tracing::debug!(client_email = %auth.client_email(), "Loaded service account");
    Ok(Arc::new(auth))
}

fn settings_sheet(
    config: &AppConfig,
    auth: &Arc<ServiceAccountAuth>,
) -> LayeredSettings<GoogleSheetsClient> {
    LayeredSettings::new(
        config.overrides.clone(),
        GoogleSheetsClient::new(
            Arc::clone(auth),
            &config.spreadsheet_id,
            &config.responses_sheet,
            &config.settings_sheet,
        ),
    )
}

// ========================================================================
// DEPENDENCY INJECTION
// ========================================================================
// This is the "composition root" where the Google backends get wired into
// the pipeline service.

async fn build_pipeline(config: &AppConfig) -> anyhow::Result<GooglePipeline> {
    let auth = google_auth().await?;

    let source = GoogleSheetsClient::new(
        Arc::clone(&auth),
        &config.spreadsheet_id,
        &config.responses_sheet,
        &config.settings_sheet,
    );
    let documents = GoogleDocsClient::new(Arc::clone(&auth));
    let drive = GoogleDriveClient::new(
        Arc::clone(&auth),
        &config.spreadsheet_id,
        config.parent_folder_id.clone(),
    );
    let mail = GmailClient::new(Arc::clone(&auth));
    let history = SqliteOutcomeLog::new(&config.history_db_path)
        .await
        .with_context(|| format!("cannot open history store at {}", config.history_db_path))?;

    Ok(PipelineService::new(
        source,
        settings_sheet(config, &auth),
        documents,
        drive,
        mail,
        history,
        config.options.clone(),
    ))
}

/// Logs the end-of-run summary. Returns whether every record went through.
fn summarize(report: &RunReport) -> bool {
    for line in report.failure_summary() {
        tracing::error!(run_id = %report.run_id, "{}", line);
    }
    if report.skipped > 0 {
        tracing::warn!(run_id = %report.run_id, skipped = report.skipped, "Records left for the next run");
    }
    tracing::info!(
        run_id = %report.run_id,
        sent = report.sent.len(),
        failed = report.failures.len(),
        "Run complete"
    );
    report.is_success()
}

/// Runs the pipeline once a day until Ctrl-C. A failed run is logged and the
/// trigger stays armed.
async fn schedule(pipeline: &GooglePipeline, trigger: DailyTrigger) {
    tracing::info!(
        hour = trigger.hour(),
        timezone = %trigger.timezone(),
        "Daily trigger enabled"
    );

    loop {
        let now = Utc::now();
        let next = trigger.next_after(now);
        tracing::info!(next_run = %next, "Waiting for next run");

        tokio::select! {
            _ = tokio::time::sleep(trigger.delay_from(now)) => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Daily trigger disabled");
                return;
            }
        }

        match pipeline.run().await {
            Ok(report) => {
                summarize(&report);
            }
            Err(err) => tracing::error!("Scheduled run failed: {}", err),
        }
    }
}

async fn run_install(config: &AppConfig) -> anyhow::Result<bool> {
    let source_template_id = config
        .source_template_id
        .as_deref()
        .ok_or_else(|| anyhow!("SOURCE_TEMPLATE_ID is not set"))?;

    let auth = google_auth().await?;
    let documents = GoogleDocsClient::new(Arc::clone(&auth));
    let drive = GoogleDriveClient::new(
        Arc::clone(&auth),
        &config.spreadsheet_id,
        config.parent_folder_id.clone(),
    );
    let settings = settings_sheet(config, &auth);

    let report = install(&documents, &drive, &settings, source_template_id).await?;

    println!("Solution folder: {} ({})", report.solution_folder.name, report.solution_folder.id);
    println!("Template copy:   {} ({})", report.template.name, report.template.id);
    println!("PDF folder:      {} ({})", report.pdf_folder.name, report.pdf_folder.id);
    Ok(true)
}

async fn print_history(history: &SqliteOutcomeLog, limit: usize) -> anyhow::Result<()> {
    use crate::core::pipeline::OutcomeLog;

    let entries = history.recent(limit).await?;
    if entries.is_empty() {
        println!("No runs recorded yet.");
        return Ok(());
    }

    for entry in entries {
        let outcome = &entry.outcome;
        let detail = outcome
            .artifact_url
            .as_deref()
            .or(outcome.error.as_deref())
            .unwrap_or("");
        println!(
            "{}  {}  row {:>4}  {:<7} {}  {}",
            entry.recorded_at.format("%Y-%m-%d %H:%M:%S"),
            entry.run_id,
            outcome.source_position,
            outcome.status.as_str(),
            outcome.recipient,
            detail
        );
    }
    Ok(())
}
