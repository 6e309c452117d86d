use super::merge_models::{DocumentRef, Replacement, Template};
use crate::core::backend_error::BackendError;
use crate::core::delivery::FolderRef;
use crate::core::records::Record;
use async_trait::async_trait;

/// Document operations the merger needs from a document store.
#[async_trait]
pub trait DocumentBackend: Send + Sync {
    /// Looks up a template by id, failing with `NotFound` if it does not exist.
    async fn fetch_template(&self, template_id: &str) -> Result<Template, BackendError>;

    /// Creates a fresh copy of the template inside `folder`.
    async fn copy_template(
        &self,
        template: &Template,
        name: &str,
        folder: &FolderRef,
    ) -> Result<DocumentRef, BackendError>;

    /// Applies every replacement as one batch. Either all of them land or none do.
    async fn replace_all(
        &self,
        document: &DocumentRef,
        replacements: &[Replacement],
    ) -> Result<(), BackendError>;

    async fn delete_document(&self, document: &DocumentRef) -> Result<(), BackendError>;
}

/// Builds the substitution list for a record, one entry per field, in field order.
pub fn build_substitutions(record: &Record) -> Vec<Replacement> {
    record
        .fields
        .iter()
        .map(|(field, value)| Replacement::new(field, value.to_string()))
        .collect()
}

/// Applies replacements to plain text the same way the document store does:
/// in order, each one an exact replace-all. Unknown placeholders stay verbatim.
pub fn render_text(text: &str, replacements: &[Replacement]) -> String {
    replacements
        .iter()
        .fold(text.to_string(), |acc, replacement| {
            acc.replace(&replacement.placeholder, &replacement.value)
        })
}

pub struct TemplateMerger<D: DocumentBackend> {
    backend: D,
}

impl<D: DocumentBackend> TemplateMerger<D> {
    pub fn new(backend: D) -> Self {
        Self { backend }
    }

    #[cfg(test)]
    pub fn backend(&self) -> &D {
        &self.backend
    }

    pub async fn resolve_template(&self, template_id: &str) -> Result<Template, BackendError> {
        self.backend.fetch_template(template_id).await
    }

    /// Copies the template and fills in the record's fields.
    ///
    /// If the batch is rejected the half-made copy is removed before the
    /// error is returned.
    pub async fn merge(
        &self,
        template: &Template,
        record: &Record,
        name: &str,
        folder: &FolderRef,
    ) -> Result<DocumentRef, BackendError> {
        let document = self.backend.copy_template(template, name, folder).await?;
        let replacements = build_substitutions(record);

        tracing::debug!(
            document_id = %document.id,
            source_position = record.source_position,
            replacements = replacements.len(),
            "Submitting merge batch"
        );

        if let Err(err) = self.backend.replace_all(&document, &replacements).await {
            self.discard(&document).await;
            return Err(err);
        }

        Ok(document)
    }

    /// Best-effort removal of a working document.
    pub async fn discard(&self, document: &DocumentRef) {
        if let Err(err) = self.backend.delete_document(document).await {
            tracing::warn!(
                document_id = %document.id,
                "Failed to delete working document: {}",
                err
            );
        }
    }
}
