use super::pipeline_models::PipelineError;
use super::pipeline_service::SettingsSource;
use crate::core::backend_error::BackendError;
use crate::core::delivery::{ArtifactStore, FolderRef};
use crate::core::merge::{DocumentBackend, DocumentRef};

pub const SOLUTION_FOLDER: &str = "NDA Generator";
pub const TEMPLATE_COPY_NAME: &str = "Non Disclosure Agreement Template";
pub const PDF_FOLDER: &str = "PDF Folder";

/// Ids created (or reused) by an install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub solution_folder: FolderRef,
    pub template: DocumentRef,
    pub pdf_folder: FolderRef,
}

/// Sets up a fresh workspace: a solution folder holding the data source, a
/// private copy of the source template and a folder for the generated PDFs.
/// The copy's id is stored as the template setting.
///
/// Running it again reuses the folders, since the data source already sits in
/// the solution folder.
pub async fn install<D, A, T>(
    documents: &D,
    store: &A,
    settings: &T,
    source_template_id: &str,
) -> Result<InstallReport, PipelineError>
where
    D: DocumentBackend,
    A: ArtifactStore,
    T: SettingsSource,
{
    let failed = |e: BackendError| PipelineError::InstallFailed(e.to_string());

    let source = documents
        .fetch_template(source_template_id)
        .await
        .map_err(|e| match e {
            BackendError::NotFound(_) => PipelineError::ConfigurationMissing(format!(
                "source template '{}' not found",
                source_template_id
            )),
            other => failed(other),
        })?;

    let home = store.source_folder().await.map_err(failed)?;
    let solution_folder = if home.name == SOLUTION_FOLDER {
        home
    } else {
        let folder = store
            .find_or_create_folder(SOLUTION_FOLDER, Some(&home))
            .await
            .map_err(failed)?;
        store.move_source(&folder).await.map_err(failed)?;
        folder
    };

    let template = documents
        .copy_template(&source, TEMPLATE_COPY_NAME, &solution_folder)
        .await
        .map_err(failed)?;

    settings
        .store_template_id(&template.id)
        .await
        .map_err(failed)?;

    let pdf_folder = store
        .find_or_create_folder(PDF_FOLDER, Some(&solution_folder))
        .await
        .map_err(failed)?;

    tracing::info!(
        solution_folder = %solution_folder.id,
        template_id = %template.id,
        pdf_folder = %pdf_folder.id,
        "Install complete"
    );

    Ok(InstallReport {
        solution_folder,
        template,
        pdf_folder,
    })
}
