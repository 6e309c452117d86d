pub mod artifact_exporter;
pub mod notifier;
pub mod status_writer;

pub use artifact_exporter::{Artifact, ArtifactExporter, ArtifactStore, FolderRef, PDF_MIME_TYPE};
pub use notifier::{MailTransport, Notifier, OutgoingMessage};
pub use status_writer::{CellWrite, ColumnMap, ColumnNames, DataSource, StatusWriter};
