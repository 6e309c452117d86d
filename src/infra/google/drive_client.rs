use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::service_account::ServiceAccountAuth;
use super::{check_response, DRIVE_API, DRIVE_UPLOAD_API};
use crate::core::backend_error::BackendError;
use crate::core::delivery::{Artifact, ArtifactStore, FolderRef, PDF_MIME_TYPE};
use crate::core::merge::DocumentRef;

const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const UPLOAD_BOUNDARY: &str = "docmerge_upload_boundary";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    #[serde(default)]
    web_view_link: Option<String>,
    #[serde(default)]
    parents: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NewFile<'a> {
    name: &'a str,
    mime_type: &'a str,
    parents: [&'a str; 1],
}

/// Drive query literals are single-quoted; quotes and backslashes are escaped.
fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn folder_query(name: &str, parent_id: &str) -> String {
    format!(
        "name = '{}' and mimeType = '{}' and '{}' in parents and trashed = false",
        escape_query(name),
        FOLDER_MIME,
        escape_query(parent_id)
    )
}

/// `files.update` parameters that move a file into `target`, dropping every
/// other parent.
fn move_params(target: &str, current_parents: &[String]) -> Vec<(&'static str, String)> {
    let remove: Vec<&str> = current_parents
        .iter()
        .map(String::as_str)
        .filter(|parent| *parent != target)
        .collect();

    let mut params = vec![
        ("addParents", target.to_string()),
        ("fields", "id,parents".to_string()),
        ("supportsAllDrives", "true".to_string()),
    ];
    if !remove.is_empty() {
        params.push(("removeParents", remove.join(",")));
    }
    params
}

/// Builds a `multipart/related` upload body: JSON metadata, then the file bytes.
fn multipart_body(metadata: &serde_json::Value, mime_type: &str, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(content.len() + 512);
    body.extend_from_slice(format!("--{}\r\n", UPLOAD_BOUNDARY).as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(metadata.to_string().as_bytes());
    body.extend_from_slice(format!("\r\n--{}\r\n", UPLOAD_BOUNDARY).as_bytes());
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", mime_type).as_bytes());
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{}--", UPLOAD_BOUNDARY).as_bytes());
    body
}

/// Artifact store on Google Drive.
///
/// Folders without an explicit parent are created next to the spreadsheet.
/// When the spreadsheet has no visible parent (shared with the service
/// account only), the fallback folder is used, then the drive root.
pub struct GoogleDriveClient {
    client: Client,
    auth: Arc<ServiceAccountAuth>,
    spreadsheet_id: String,
    fallback_parent: Option<String>,
    home: RwLock<Option<FolderRef>>,
}

impl GoogleDriveClient {
    pub fn new(
        auth: Arc<ServiceAccountAuth>,
        spreadsheet_id: impl Into<String>,
        fallback_parent: Option<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            auth,
            spreadsheet_id: spreadsheet_id.into(),
            fallback_parent,
            home: RwLock::new(None),
        }
    }

    async fn get_file(&self, file_id: &str, fields: &str) -> Result<DriveFile, BackendError> {
        let token = self.auth.get_access_token().await?;

        let response = self
            .client
            .get(format!("{}/files/{}", DRIVE_API, file_id))
            .bearer_auth(&token)
            .query(&[("fields", fields), ("supportsAllDrives", "true")])
            .send()
            .await?;
        Ok(check_response(response, "look up file").await?.json().await?)
    }

    async fn spreadsheet_parents(&self) -> Result<Vec<String>, BackendError> {
        Ok(self
            .get_file(&self.spreadsheet_id, "id,name,parents")
            .await?
            .parents)
    }

    async fn find_folder(&self, name: &str, parent_id: &str) -> Result<Option<FolderRef>, BackendError> {
        let token = self.auth.get_access_token().await?;
        let query = folder_query(name, parent_id);

        let response = self
            .client
            .get(format!("{}/files", DRIVE_API))
            .bearer_auth(&token)
            .query(&[
                ("q", query.as_str()),
                ("fields", "files(id,name)"),
                ("supportsAllDrives", "true"),
                ("includeItemsFromAllDrives", "true"),
            ])
            .send()
            .await?;
        let list: FileList = check_response(response, "search folders").await?.json().await?;

        Ok(list.files.into_iter().next().map(|f| FolderRef {
            id: f.id,
            name: f.name,
        }))
    }

    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<FolderRef, BackendError> {
        let token = self.auth.get_access_token().await?;

        let response = self
            .client
            .post(format!("{}/files", DRIVE_API))
            .bearer_auth(&token)
            .query(&[("fields", "id,name"), ("supportsAllDrives", "true")])
            .json(&NewFile {
                name,
                mime_type: FOLDER_MIME,
                parents: [parent_id],
            })
            .send()
            .await?;
        let file: DriveFile = check_response(response, "create folder").await?.json().await?;

        tracing::info!(folder_id = %file.id, parent_id, "Created folder '{}'", file.name);
        Ok(FolderRef {
            id: file.id,
            name: file.name,
        })
    }

    async fn download_pdf(&self, document: &DocumentRef) -> Result<Vec<u8>, BackendError> {
        let token = self.auth.get_access_token().await?;

        let response = self
            .client
            .get(format!("{}/files/{}/export", DRIVE_API, document.id))
            .bearer_auth(&token)
            .query(&[("mimeType", PDF_MIME_TYPE)])
            .send()
            .await?;
        let bytes = check_response(response, "export PDF").await?.bytes().await?;
        Ok(bytes.to_vec())
    }

    async fn upload(
        &self,
        display_name: &str,
        folder: &FolderRef,
        content: &[u8],
    ) -> Result<DriveFile, BackendError> {
        let token = self.auth.get_access_token().await?;
        let metadata = serde_json::json!({
            "name": display_name,
            "mimeType": PDF_MIME_TYPE,
            "parents": [folder.id],
        });

        let response = self
            .client
            .post(format!("{}/files", DRIVE_UPLOAD_API))
            .bearer_auth(&token)
            .query(&[
                ("uploadType", "multipart"),
                ("fields", "id,name,webViewLink"),
                ("supportsAllDrives", "true"),
            ])
            .header(
                "Content-Type",
                format!("multipart/related; boundary={}", UPLOAD_BOUNDARY),
            )
            .body(multipart_body(&metadata, PDF_MIME_TYPE, content))
            .send()
            .await?;

        Ok(check_response(response, "upload PDF").await?.json().await?)
    }
}

#[async_trait]
impl ArtifactStore for GoogleDriveClient {
    async fn source_folder(&self) -> Result<FolderRef, BackendError> {
        if let Some(home) = self.home.read().await.as_ref() {
            return Ok(home.clone());
        }

        let parent_id = self
            .spreadsheet_parents()
            .await?
            .into_iter()
            .next()
            .or_else(|| self.fallback_parent.clone())
            .unwrap_or_else(|| "root".to_string());
        let folder = self.get_file(&parent_id, "id,name").await?;
        let home = FolderRef {
            id: folder.id,
            name: folder.name,
        };

        tracing::debug!(folder_id = %home.id, "Spreadsheet lives in '{}'", home.name);
        *self.home.write().await = Some(home.clone());
        Ok(home)
    }

    async fn move_source(&self, folder: &FolderRef) -> Result<(), BackendError> {
        let parents = self.spreadsheet_parents().await?;
        if parents.len() != 1 || parents[0] != folder.id {
            let token = self.auth.get_access_token().await?;
            let response = self
                .client
                .patch(format!("{}/files/{}", DRIVE_API, self.spreadsheet_id))
                .bearer_auth(&token)
                .query(&move_params(&folder.id, &parents))
                .json(&serde_json::json!({}))
                .send()
                .await?;
            check_response(response, "move spreadsheet").await?;

            tracing::info!(folder_id = %folder.id, "Moved spreadsheet into '{}'", folder.name);
        }

        *self.home.write().await = Some(folder.clone());
        Ok(())
    }

    async fn find_or_create_folder(
        &self,
        name: &str,
        parent: Option<&FolderRef>,
    ) -> Result<FolderRef, BackendError> {
        let parent = match parent {
            Some(parent) => parent.clone(),
            None => self.source_folder().await?,
        };

        match self.find_folder(name, &parent.id).await? {
            Some(folder) => Ok(folder),
            None => self.create_folder(name, &parent.id).await,
        }
    }

    async fn export_pdf(
        &self,
        document: &DocumentRef,
        display_name: &str,
        folder: &FolderRef,
    ) -> Result<Artifact, BackendError> {
        let content = self.download_pdf(document).await?;
        let file = self.upload(display_name, folder, &content).await?;

        let url = file
            .web_view_link
            .unwrap_or_else(|| format!("https://drive.google.com/file/d/{}/view", file.id));

        Ok(Artifact {
            id: file.id,
            name: file.name,
            url,
            mime_type: PDF_MIME_TYPE.to_string(),
            content,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_folder_query_escapes_quotes() {
        assert_eq!(
            folder_query("Ann's NDAs", "parent1"),
            "name = 'Ann\\'s NDAs' and mimeType = 'application/vnd.google-apps.folder' \
             and 'parent1' in parents and trashed = false"
        );
    }

    #[test]
    fn test_move_params_drop_old_parents() {
        let parents = vec!["home".to_string(), "shared".to_string()];
        assert_eq!(
            move_params("solution", &parents),
            vec![
                ("addParents", "solution".to_string()),
                ("fields", "id,parents".to_string()),
                ("supportsAllDrives", "true".to_string()),
                ("removeParents", "home,shared".to_string()),
            ]
        );

        let params = move_params("solution", &["solution".to_string()]);
        assert!(params.iter().all(|(key, _)| *key != "removeParents"));
    }

    #[test]
    fn test_multipart_body_layout() {
        let metadata = serde_json::json!({ "name": "NDA - Ann.pdf" });
        let body = multipart_body(&metadata, PDF_MIME_TYPE, b"%PDF");
        let text = String::from_utf8(body).unwrap();

        let expected = format!(
            "--{b}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n\
             {{\"name\":\"NDA - Ann.pdf\"}}\r\n--{b}\r\n\
             Content-Type: application/pdf\r\n\r\n%PDF\r\n--{b}--",
            b = UPLOAD_BOUNDARY
        );
        assert_eq!(text, expected);
    }
}
