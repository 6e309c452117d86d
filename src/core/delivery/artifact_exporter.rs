use crate::core::backend_error::BackendError;
use crate::core::merge::DocumentRef;
use async_trait::async_trait;

pub const PDF_SUFFIX: &str = ".pdf";
pub const PDF_MIME_TYPE: &str = "application/pdf";

/// A folder in the storage backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderRef {
    pub id: String,
    pub name: String,
}

/// A stored fixed-layout export.
///
/// The bytes are kept alongside the reference so the notifier can attach them
/// without a second download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub id: String,
    pub name: String,
    pub url: String,
    pub mime_type: String,
    pub content: Vec<u8>,
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// The folder currently holding the data source. Folders created without
    /// an explicit parent go here.
    async fn source_folder(&self) -> Result<FolderRef, BackendError>;

    /// Moves the data source into `folder`. Later calls to `source_folder`
    /// return it.
    async fn move_source(&self, folder: &FolderRef) -> Result<(), BackendError>;

    /// Finds a folder by exact name under `parent` (or the source folder when
    /// `None`), creating it if missing.
    async fn find_or_create_folder(
        &self,
        name: &str,
        parent: Option<&FolderRef>,
    ) -> Result<FolderRef, BackendError>;

    /// Converts the document to PDF and stores it as `display_name` in `folder`.
    async fn export_pdf(
        &self,
        document: &DocumentRef,
        display_name: &str,
        folder: &FolderRef,
    ) -> Result<Artifact, BackendError>;
}

pub struct ArtifactExporter<A: ArtifactStore> {
    store: A,
}

impl<A: ArtifactStore> ArtifactExporter<A> {
    pub fn new(store: A) -> Self {
        Self { store }
    }

    #[cfg(test)]
    pub fn store(&self) -> &A {
        &self.store
    }

    /// Resolves the destination folder. Called once per run.
    pub async fn resolve_destination(&self, folder_name: &str) -> Result<FolderRef, BackendError> {
        let folder = self.store.find_or_create_folder(folder_name, None).await?;
        tracing::info!(folder_id = %folder.id, "Using destination folder '{}'", folder.name);
        Ok(folder)
    }

    pub async fn export(
        &self,
        document: &DocumentRef,
        file_name: &str,
        folder: &FolderRef,
    ) -> Result<Artifact, BackendError> {
        let display_name = format!("{}{}", file_name, PDF_SUFFIX);
        let artifact = self.store.export_pdf(document, &display_name, folder).await?;

        tracing::debug!(
            artifact_id = %artifact.id,
            bytes = artifact.content.len(),
            "Exported '{}'",
            artifact.name
        );
        Ok(artifact)
    }
}
