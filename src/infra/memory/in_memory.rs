// In-memory implementations of every core trait.
//
// These back the service tests: they behave like the hosted services closely
// enough (exact-text batch replace, find-or-create folders, row-addressed
// writes) while letting a test inject failures and inspect state afterwards.

use crate::core::backend_error::BackendError;
use crate::core::delivery::{
    Artifact, ArtifactStore, CellWrite, DataSource, FolderRef, MailTransport, OutgoingMessage,
    PDF_MIME_TYPE,
};
use crate::core::merge::{render_text, DocumentBackend, DocumentRef, Replacement, Template};
use crate::core::pipeline::{HistoryEntry, OutcomeLog, RecordOutcome, RunSettings, SettingsSource};
use crate::core::records::{CellValue, Grid};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ============================================================================
// SHEET
// ============================================================================

pub struct InMemorySheet {
    rows: Mutex<Vec<Vec<CellValue>>>,
}

impl InMemorySheet {
    pub fn from_rows(rows: &[&[&str]]) -> Self {
        let rows = rows
            .iter()
            .map(|row| row.iter().map(|cell| CellValue::from(*cell)).collect())
            .collect();
        Self {
            rows: Mutex::new(rows),
        }
    }

    /// Cell at a 1-based row position and zero-based column.
    pub fn cell(&self, position: usize, column: usize) -> CellValue {
        let rows = self.rows.lock().unwrap();
        rows.get(position - 1)
            .and_then(|row| row.get(column))
            .cloned()
            .unwrap_or(CellValue::Empty)
    }

    /// Simulates someone deleting a row while a run is in progress.
    pub fn delete_row(&self, position: usize) {
        self.rows.lock().unwrap().remove(position - 1);
    }
}

#[async_trait]
impl DataSource for InMemorySheet {
    async fn read_grid(&self) -> Result<Grid, BackendError> {
        Ok(Grid::new(self.rows.lock().unwrap().clone()))
    }

    async fn read_row(&self, position: usize) -> Result<Option<Vec<CellValue>>, BackendError> {
        let rows = self.rows.lock().unwrap();
        Ok(position
            .checked_sub(1)
            .and_then(|index| rows.get(index))
            .cloned())
    }

    async fn write_cells(&self, position: usize, cells: &[CellWrite]) -> Result<(), BackendError> {
        let mut rows = self.rows.lock().unwrap();
        let row = position
            .checked_sub(1)
            .and_then(|index| rows.get_mut(index))
            .ok_or_else(|| BackendError::NotFound(format!("row {}", position)))?;

        for cell in cells {
            if row.len() <= cell.column {
                row.resize(cell.column + 1, CellValue::Empty);
            }
            row[cell.column] = cell.value.clone();
        }
        Ok(())
    }
}

// ============================================================================
// SETTINGS
// ============================================================================

pub struct InMemorySettings {
    settings: Mutex<RunSettings>,
}

impl InMemorySettings {
    pub fn new(settings: RunSettings) -> Self {
        Self {
            settings: Mutex::new(settings),
        }
    }
}

#[async_trait]
impl SettingsSource for InMemorySettings {
    async fn load_settings(&self) -> Result<RunSettings, BackendError> {
        Ok(self.settings.lock().unwrap().clone())
    }

    async fn store_template_id(&self, template_id: &str) -> Result<(), BackendError> {
        self.settings.lock().unwrap().template_id = Some(template_id.to_string());
        Ok(())
    }
}

// ============================================================================
// DOCUMENTS
// ============================================================================

#[derive(Clone, Debug)]
struct StoredDocument {
    title: String,
    body: String,
}

/// Cloning shares the underlying store, so a drive can read what the
/// document backend wrote.
#[derive(Clone, Default)]
pub struct InMemoryDocuments {
    documents: Arc<DashMap<String, StoredDocument>>,
    next_id: Arc<AtomicUsize>,
    reject: Arc<AtomicBool>,
}

impl InMemoryDocuments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_template(&self, id: &str, title: &str, body: &str) {
        self.documents.insert(
            id.to_string(),
            StoredDocument {
                title: title.to_string(),
                body: body.to_string(),
            },
        );
    }

    pub fn body(&self, id: &str) -> Option<String> {
        self.documents.get(id).map(|doc| doc.body.clone())
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    /// Makes every following batch update fail.
    pub fn reject_batches(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }
}

#[async_trait]
impl DocumentBackend for InMemoryDocuments {
    async fn fetch_template(&self, template_id: &str) -> Result<Template, BackendError> {
        self.documents
            .get(template_id)
            .map(|doc| Template {
                id: template_id.to_string(),
                title: doc.title.clone(),
            })
            .ok_or_else(|| BackendError::NotFound(format!("document {}", template_id)))
    }

    async fn copy_template(
        &self,
        template: &Template,
        name: &str,
        _folder: &FolderRef,
    ) -> Result<DocumentRef, BackendError> {
        let body = self
            .body(&template.id)
            .ok_or_else(|| BackendError::NotFound(format!("document {}", template.id)))?;

        let id = format!("doc-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.documents.insert(
            id.clone(),
            StoredDocument {
                title: name.to_string(),
                body,
            },
        );

        Ok(DocumentRef {
            id,
            name: name.to_string(),
        })
    }

    async fn replace_all(
        &self,
        document: &DocumentRef,
        replacements: &[Replacement],
    ) -> Result<(), BackendError> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(BackendError::Api("batch rejected".to_string()));
        }

        let mut doc = self
            .documents
            .get_mut(&document.id)
            .ok_or_else(|| BackendError::NotFound(format!("document {}", document.id)))?;
        let rendered = render_text(&doc.body, replacements);
        doc.body = rendered;
        Ok(())
    }

    async fn delete_document(&self, document: &DocumentRef) -> Result<(), BackendError> {
        self.documents
            .remove(&document.id)
            .map(|_| ())
            .ok_or_else(|| BackendError::NotFound(format!("document {}", document.id)))
    }
}

// ============================================================================
// DRIVE
// ============================================================================

#[derive(Clone, Debug)]
struct StoredFolder {
    name: String,
    parent: Option<String>,
}

const ROOT_ID: &str = "root";
const ROOT_NAME: &str = "My Drive";

/// Folder parents are `None` at the drive root. The data source starts there.
pub struct InMemoryDrive {
    documents: InMemoryDocuments,
    folders: DashMap<String, StoredFolder>,
    artifacts: Mutex<Vec<Artifact>>,
    locations: DashMap<String, String>,
    source_parent: Mutex<Option<String>>,
    next_id: AtomicUsize,
}

impl InMemoryDrive {
    pub fn new(documents: InMemoryDocuments) -> Self {
        Self {
            documents,
            folders: DashMap::new(),
            artifacts: Mutex::new(Vec::new()),
            locations: DashMap::new(),
            source_parent: Mutex::new(None),
            next_id: AtomicUsize::new(0),
        }
    }

    pub fn artifacts(&self) -> Vec<Artifact> {
        self.artifacts.lock().unwrap().clone()
    }

    /// Folder id an artifact was stored in.
    pub fn location_of(&self, artifact_id: &str) -> Option<String> {
        self.locations.get(artifact_id).map(|folder| folder.clone())
    }

    pub fn parent_of(&self, folder_id: &str) -> Option<String> {
        self.folders.get(folder_id).and_then(|f| f.parent.clone())
    }

    pub fn folder_count(&self) -> usize {
        self.folders.len()
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Stored parent for a requested one: the source folder when unset, `None`
    /// for the root.
    fn parent_id(&self, parent: Option<&FolderRef>) -> Option<String> {
        match parent {
            Some(folder) if folder.id == ROOT_ID => None,
            Some(folder) => Some(folder.id.clone()),
            None => self.source_parent.lock().unwrap().clone(),
        }
    }
}

#[async_trait]
impl ArtifactStore for InMemoryDrive {
    async fn source_folder(&self) -> Result<FolderRef, BackendError> {
        let parent = self.source_parent.lock().unwrap().clone();
        match parent {
            None => Ok(FolderRef {
                id: ROOT_ID.to_string(),
                name: ROOT_NAME.to_string(),
            }),
            Some(id) => {
                let folder = self
                    .folders
                    .get(&id)
                    .ok_or_else(|| BackendError::NotFound(format!("folder {}", id)))?;
                Ok(FolderRef {
                    id,
                    name: folder.name.clone(),
                })
            }
        }
    }

    async fn move_source(&self, folder: &FolderRef) -> Result<(), BackendError> {
        if folder.id != ROOT_ID && !self.folders.contains_key(&folder.id) {
            return Err(BackendError::NotFound(format!("folder {}", folder.id)));
        }
        let parent = self.parent_id(Some(folder));
        *self.source_parent.lock().unwrap() = parent;
        Ok(())
    }

    async fn find_or_create_folder(
        &self,
        name: &str,
        parent: Option<&FolderRef>,
    ) -> Result<FolderRef, BackendError> {
        let parent_id = self.parent_id(parent);

        if let Some(existing) = self
            .folders
            .iter()
            .find(|entry| entry.name == name && entry.parent == parent_id)
        {
            return Ok(FolderRef {
                id: existing.key().clone(),
                name: existing.name.clone(),
            });
        }

        let id = self.next_id("folder");
        self.folders.insert(
            id.clone(),
            StoredFolder {
                name: name.to_string(),
                parent: parent_id,
            },
        );
        Ok(FolderRef {
            id,
            name: name.to_string(),
        })
    }

    async fn export_pdf(
        &self,
        document: &DocumentRef,
        display_name: &str,
        folder: &FolderRef,
    ) -> Result<Artifact, BackendError> {
        if !self.folders.contains_key(&folder.id) {
            return Err(BackendError::NotFound(format!("folder {}", folder.id)));
        }

        // The "PDF" is the rendered text, so tests can read it back.
        let body = self
            .documents
            .body(&document.id)
            .ok_or_else(|| BackendError::NotFound(format!("document {}", document.id)))?;

        let id = self.next_id("pdf");
        let artifact = Artifact {
            url: format!("memory://drive/{}", id),
            id,
            name: display_name.to_string(),
            mime_type: PDF_MIME_TYPE.to_string(),
            content: body.into_bytes(),
        };
        self.locations.insert(artifact.id.clone(), folder.id.clone());
        self.artifacts.lock().unwrap().push(artifact.clone());
        Ok(artifact)
    }
}

// ============================================================================
// MAIL
// ============================================================================

#[derive(Default)]
pub struct InMemoryMailer {
    sent: Mutex<Vec<OutgoingMessage>>,
    failing: Mutex<HashSet<String>>,
}

impl InMemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every message to `address` will fail to send.
    pub fn fail_for(&self, address: &str) {
        self.failing.lock().unwrap().insert(address.to_string());
    }

    pub fn sent(&self) -> Vec<OutgoingMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailTransport for InMemoryMailer {
    async fn send(&self, message: &OutgoingMessage) -> Result<(), BackendError> {
        if self.failing.lock().unwrap().contains(&message.to) {
            return Err(BackendError::Api(format!("mailbox {} unavailable", message.to)));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

// ============================================================================
// HISTORY
// ============================================================================

#[derive(Default)]
pub struct InMemoryHistory {
    entries: Mutex<Vec<(String, RecordOutcome)>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(String, RecordOutcome)> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl OutcomeLog for InMemoryHistory {
    async fn record(&self, run_id: &str, outcome: &RecordOutcome) -> Result<(), BackendError> {
        self.entries
            .lock()
            .unwrap()
            .push((run_id.to_string(), outcome.clone()));
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<HistoryEntry>, BackendError> {
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .iter()
            .rev()
            .take(limit)
            .map(|(run_id, outcome)| HistoryEntry {
                run_id: run_id.clone(),
                outcome: outcome.clone(),
                recorded_at: Utc::now(),
            })
            .collect())
    }
}
