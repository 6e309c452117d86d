// Environment configuration.
//
// `main` loads `.env` through dotenv first, so everything here reads plain
// environment variables. Per-run settings (template, subject, body, folder)
// normally come from the settings sheet; any of them set here overrides the
// sheet for every run.

use crate::core::backend_error::BackendError;
use crate::core::delivery::ColumnNames;
use crate::core::pipeline::{FailurePolicy, PipelineOptions, RunSettings, SettingsSource};
use crate::core::schedule::DailyTrigger;
use async_trait::async_trait;
use chrono_tz::Tz;
use thiserror::Error;

pub const DEFAULT_RESPONSES_SHEET: &str = "Form Responses";
pub const DEFAULT_SETTINGS_SHEET: &str = "Settings";
pub const DEFAULT_HISTORY_DB_PATH: &str = "data/history.db";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("{key}='{value}' is invalid: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub spreadsheet_id: String,
    pub responses_sheet: String,
    pub settings_sheet: String,
    /// Home folder when the spreadsheet has no visible parent.
    pub parent_folder_id: Option<String>,
    pub source_template_id: Option<String>,
    pub history_db_path: String,
    pub trigger: DailyTrigger,
    pub options: PipelineOptions,
    pub overrides: RunSettings,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let or_default = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let spreadsheet_id = get("SPREADSHEET_ID").ok_or(ConfigError::Missing("SPREADSHEET_ID"))?;

        let failure_policy = match get("FAILURE_POLICY") {
            Some(value) => value
                .parse::<FailurePolicy>()
                .map_err(|reason| ConfigError::Invalid {
                    key: "FAILURE_POLICY",
                    value,
                    reason,
                })?,
            None => FailurePolicy::default(),
        };

        let keep_documents = match get("KEEP_MERGED_DOCUMENTS") {
            Some(value) => parse_bool(&value).ok_or_else(|| ConfigError::Invalid {
                key: "KEEP_MERGED_DOCUMENTS",
                value,
                reason: "expected true or false".to_string(),
            })?,
            None => false,
        };

        let hour = match get("TRIGGER_HOUR") {
            Some(value) => value.parse::<u32>().map_err(|e| ConfigError::Invalid {
                key: "TRIGGER_HOUR",
                value: value.clone(),
                reason: e.to_string(),
            })?,
            None => 0,
        };
        let timezone_name = or_default("TRIGGER_TIMEZONE", "UTC");
        let timezone = timezone_name.parse::<Tz>().map_err(|e| ConfigError::Invalid {
            key: "TRIGGER_TIMEZONE",
            value: timezone_name.clone(),
            reason: e.to_string(),
        })?;
        let trigger = DailyTrigger::new(hour, timezone).ok_or_else(|| ConfigError::Invalid {
            key: "TRIGGER_HOUR",
            value: hour.to_string(),
            reason: "expected an hour between 0 and 23".to_string(),
        })?;

        let defaults = ColumnNames::default();
        let columns = ColumnNames {
            full_name: or_default("COLUMN_FULL_NAME", &defaults.full_name),
            email: or_default("COLUMN_EMAIL", &defaults.email),
            status: or_default("COLUMN_STATUS", &defaults.status),
            // Present but blank disables the link column.
            link: match lookup("COLUMN_LINK") {
                Some(value) if value.trim().is_empty() => None,
                Some(value) => Some(value.trim().to_string()),
                None => defaults.link,
            },
            timestamp: get("COLUMN_TIMESTAMP"),
        };

        let options = PipelineOptions {
            columns,
            file_name_template: or_default(
                "FILE_NAME_TEMPLATE",
                &PipelineOptions::default().file_name_template,
            ),
            failure_policy,
            keep_documents,
        };

        Ok(Self {
            spreadsheet_id,
            responses_sheet: or_default("RESPONSES_SHEET", DEFAULT_RESPONSES_SHEET),
            settings_sheet: or_default("SETTINGS_SHEET", DEFAULT_SETTINGS_SHEET),
            parent_folder_id: get("PARENT_FOLDER_ID"),
            source_template_id: get("SOURCE_TEMPLATE_ID"),
            history_db_path: or_default("HISTORY_DB_PATH", DEFAULT_HISTORY_DB_PATH),
            trigger,
            options,
            overrides: RunSettings {
                template_id: get("TEMPLATE_ID"),
                email_subject: get("EMAIL_SUBJECT"),
                email_body: get("EMAIL_BODY"),
                destination_folder: get("DESTINATION_FOLDER"),
            },
        })
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Settings source that lets fixed overrides win over an inner source.
pub struct LayeredSettings<T: SettingsSource> {
    overrides: RunSettings,
    inner: T,
}

impl<T: SettingsSource> LayeredSettings<T> {
    pub fn new(overrides: RunSettings, inner: T) -> Self {
        Self { overrides, inner }
    }
}

#[async_trait]
impl<T: SettingsSource> SettingsSource for LayeredSettings<T> {
    async fn load_settings(&self) -> Result<RunSettings, BackendError> {
        let base = self.inner.load_settings().await?;
        Ok(self.overrides.clone().or(base))
    }

    async fn store_template_id(&self, template_id: &str) -> Result<(), BackendError> {
        if self.overrides.template_id.is_some() {
            tracing::warn!("TEMPLATE_ID is set and will keep overriding the stored template id");
        }
        self.inner.store_template_id(template_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::memory::InMemorySettings;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[("SPREADSHEET_ID", "sheet-1")]).unwrap();

        assert_eq!(config.spreadsheet_id, "sheet-1");
        assert_eq!(config.responses_sheet, "Form Responses");
        assert_eq!(config.settings_sheet, "Settings");
        assert_eq!(config.history_db_path, "data/history.db");
        assert_eq!(config.options.columns, ColumnNames::default());
        assert_eq!(config.options.file_name_template, "NDA - {{Full Name}}");
        assert_eq!(config.options.failure_policy, FailurePolicy::ContinueOnError);
        assert!(!config.options.keep_documents);
        assert_eq!(config.trigger.hour(), 0);
        assert_eq!(config.trigger.timezone(), Tz::UTC);
        assert_eq!(config.overrides, RunSettings::default());
        assert_eq!(config.source_template_id, None);
    }

    #[test]
    fn test_spreadsheet_id_required() {
        assert_eq!(
            config(&[("SPREADSHEET_ID", "  ")]).unwrap_err(),
            ConfigError::Missing("SPREADSHEET_ID")
        );
    }

    #[test]
    fn test_overrides_and_options() {
        let config = config(&[
            ("SPREADSHEET_ID", "sheet-1"),
            ("COLUMN_LINK", ""),
            ("COLUMN_TIMESTAMP", "Sent At"),
            ("FAILURE_POLICY", "abort"),
            ("KEEP_MERGED_DOCUMENTS", "yes"),
            ("TRIGGER_HOUR", "7"),
            ("TRIGGER_TIMEZONE", "Europe/Berlin"),
            ("EMAIL_SUBJECT", "Your NDA"),
        ])
        .unwrap();

        assert_eq!(config.options.columns.link, None);
        assert_eq!(config.options.columns.timestamp.as_deref(), Some("Sent At"));
        assert_eq!(config.options.failure_policy, FailurePolicy::AbortOnError);
        assert!(config.options.keep_documents);
        assert_eq!(config.trigger.hour(), 7);
        assert_eq!(config.trigger.timezone(), chrono_tz::Europe::Berlin);
        assert_eq!(config.overrides.email_subject.as_deref(), Some("Your NDA"));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = config(&[("SPREADSHEET_ID", "s"), ("TRIGGER_HOUR", "24")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "TRIGGER_HOUR", .. }));

        let err = config(&[("SPREADSHEET_ID", "s"), ("TRIGGER_TIMEZONE", "Mars/Base")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "TRIGGER_TIMEZONE", .. }));

        let err = config(&[("SPREADSHEET_ID", "s"), ("FAILURE_POLICY", "retry")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "FAILURE_POLICY", .. }));
    }

    #[tokio::test]
    async fn test_layered_settings_prefer_overrides() {
        let sheet = InMemorySettings::new(RunSettings {
            template_id: Some("tmpl-sheet".to_string()),
            email_subject: Some("Sheet subject".to_string()),
            ..RunSettings::default()
        });
        let layered = LayeredSettings::new(
            RunSettings {
                email_subject: Some("Env subject".to_string()),
                ..RunSettings::default()
            },
            sheet,
        );

        let settings = layered.load_settings().await.unwrap();
        assert_eq!(settings.template_id.as_deref(), Some("tmpl-sheet"));
        assert_eq!(settings.email_subject.as_deref(), Some("Env subject"));

        layered.store_template_id("tmpl-new").await.unwrap();
        let settings = layered.load_settings().await.unwrap();
        assert_eq!(settings.template_id.as_deref(), Some("tmpl-new"));
    }
}
