use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::service_account::ServiceAccountAuth;
use super::{check_response, DOCS_API, DRIVE_API};
use crate::core::backend_error::BackendError;
use crate::core::delivery::FolderRef;
use crate::core::merge::{DocumentBackend, DocumentRef, Replacement, Template};

const GOOGLE_DOC_MIME: &str = "application/vnd.google-apps.document";

// =============================================================================
// REQUEST / RESPONSE STRUCTURES
// =============================================================================

#[derive(Debug, Serialize)]
struct BatchUpdateRequest<'a> {
    requests: Vec<DocsRequest<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DocsRequest<'a> {
    replace_all_text: ReplaceAllText<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReplaceAllText<'a> {
    contains_text: SubstringMatchCriteria<'a>,
    replace_text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubstringMatchCriteria<'a> {
    text: &'a str,
    match_case: bool,
}

#[derive(Debug, Serialize)]
struct CopyRequest<'a> {
    name: &'a str,
    parents: [&'a str; 1],
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    #[serde(default)]
    mime_type: Option<String>,
}

fn batch_request(replacements: &[Replacement]) -> BatchUpdateRequest<'_> {
    BatchUpdateRequest {
        requests: replacements
            .iter()
            .map(|r| DocsRequest {
                replace_all_text: ReplaceAllText {
                    contains_text: SubstringMatchCriteria {
                        text: &r.placeholder,
                        match_case: true,
                    },
                    replace_text: &r.value,
                },
            })
            .collect(),
    }
}

// =============================================================================
// GOOGLE DOCS CLIENT
// =============================================================================

/// Document backend on top of the Docs API (edits) and Drive API (copies).
pub struct GoogleDocsClient {
    client: Client,
    auth: Arc<ServiceAccountAuth>,
}

impl GoogleDocsClient {
    pub fn new(auth: Arc<ServiceAccountAuth>) -> Self {
        Self {
            client: Client::new(),
            auth,
        }
    }

    /// Extracts the document ID from a Google Docs URL, or accepts a bare ID.
    pub fn extract_doc_id(url_or_id: &str) -> Option<String> {
        let url_or_id = url_or_id.trim();
        if url_or_id.contains("docs.google.com") {
            if let Some(start) = url_or_id.find("/document/d/") {
                let after_d = &url_or_id[start + 12..];
                let end = after_d.find('/').unwrap_or(after_d.len());
                let id = &after_d[..end];
                if !id.is_empty() {
                    return Some(id.to_string());
                }
            }
        } else if !url_or_id.is_empty() && !url_or_id.contains('/') && !url_or_id.contains(' ') {
            return Some(url_or_id.to_string());
        }
        None
    }
}

#[async_trait]
impl DocumentBackend for GoogleDocsClient {
    async fn fetch_template(&self, template_id: &str) -> Result<Template, BackendError> {
        let doc_id = Self::extract_doc_id(template_id).ok_or_else(|| {
            BackendError::NotFound(format!("Could not extract document ID from: {}", template_id))
        })?;
        let token = self.auth.get_access_token().await?;

        let response = self
            .client
            .get(format!("{}/files/{}", DRIVE_API, doc_id))
            .bearer_auth(&token)
            .query(&[("fields", "id,name,mimeType"), ("supportsAllDrives", "true")])
            .send()
            .await?;
        let file: DriveFile = check_response(response, "fetch template").await?.json().await?;

        if file.mime_type.as_deref() != Some(GOOGLE_DOC_MIME) {
            return Err(BackendError::Api(format!(
                "'{}' is not a Google Doc ({})",
                file.name,
                file.mime_type.unwrap_or_default()
            )));
        }

        Ok(Template {
            id: file.id,
            title: file.name,
        })
    }

    async fn copy_template(
        &self,
        template: &Template,
        name: &str,
        folder: &FolderRef,
    ) -> Result<DocumentRef, BackendError> {
        let token = self.auth.get_access_token().await?;

        let response = self
            .client
            .post(format!("{}/files/{}/copy", DRIVE_API, template.id))
            .bearer_auth(&token)
            .query(&[("fields", "id,name"), ("supportsAllDrives", "true")])
            .json(&CopyRequest {
                name,
                parents: [folder.id.as_str()],
            })
            .send()
            .await?;
        let file: DriveFile = check_response(response, "copy template").await?.json().await?;

        tracing::debug!(template_id = %template.id, document_id = %file.id, "Copied template");
        Ok(DocumentRef {
            id: file.id,
            name: file.name,
        })
    }

    async fn replace_all(
        &self,
        document: &DocumentRef,
        replacements: &[Replacement],
    ) -> Result<(), BackendError> {
        if replacements.is_empty() {
            return Ok(());
        }
        let token = self.auth.get_access_token().await?;

        // batchUpdate is atomic: one invalid request and nothing is applied.
        let response = self
            .client
            .post(format!("{}/documents/{}:batchUpdate", DOCS_API, document.id))
            .bearer_auth(&token)
            .json(&batch_request(replacements))
            .send()
            .await?;
        check_response(response, "merge fields").await?;
        Ok(())
    }

    async fn delete_document(&self, document: &DocumentRef) -> Result<(), BackendError> {
        let token = self.auth.get_access_token().await?;

        let response = self
            .client
            .delete(format!("{}/files/{}", DRIVE_API, document.id))
            .bearer_auth(&token)
            .query(&[("supportsAllDrives", "true")])
            .send()
            .await?;
        check_response(response, "delete document").await?;
        Ok(())
    }
}
