use std::collections::HashMap;

/// Descriptive fields attached to a carrier.
///
/// The recognized fields are closed; `headers` is the only open extension
/// point and feeds response headers verbatim.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    pub file_name: Option<String>,
    pub media_type: Option<String>,
    /// Color mode of an image payload (`L`, `LA`, `RGB`, `RGBA`, ...).
    pub mode: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub headers: HashMap<String, String>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_file(file_name: impl Into<String>, media_type: impl Into<String>) -> Self {
        Self {
            file_name: Some(file_name.into()),
            media_type: Some(media_type.into()),
            ..Self::default()
        }
    }

    pub fn json() -> Self {
        Self {
            media_type: Some("application/json".to_string()),
            ..Self::default()
        }
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn is_json(&self) -> bool {
        self.media_type.as_deref() == Some("application/json")
    }
}
