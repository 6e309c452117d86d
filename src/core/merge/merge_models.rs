/// A document that is only ever copied, never edited in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub id: String,
    pub title: String,
}

/// A fresh per-record document derived from a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRef {
    pub id: String,
    pub name: String,
}

/// One exact-text, case-sensitive, replace-all substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    pub placeholder: String,
    pub value: String,
}

impl Replacement {
    pub fn new(field: &str, value: impl Into<String>) -> Self {
        Self {
            placeholder: placeholder_for(field),
            value: value.into(),
        }
    }
}

/// Wraps a field name in the `{{` `}}` delimiter pair.
pub fn placeholder_for(field: &str) -> String {
    format!("{{{{{}}}}}", field)
}
