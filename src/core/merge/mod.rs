pub mod merge_models;
pub mod template_merger;

pub use merge_models::{DocumentRef, Replacement, Template};
pub use template_merger::{build_substitutions, render_text, DocumentBackend, TemplateMerger};
