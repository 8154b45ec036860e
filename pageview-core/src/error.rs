use thiserror::Error;

#[derive(Debug, Error)]
pub enum ViewerError {
    #[error("no document is loaded")]
    NoDocument,
    #[error("view has no layout yet")]
    NotReady,
    #[error("page {page} is out of range (document has {count} pages)")]
    PageOutOfRange { page: u32, count: u32 },
    #[error("document changed while the request was in flight")]
    DocumentChanged,
    #[error("failed to load document: {0}")]
    DocumentLoad(String),
    #[error("failed to parse configuration: {0}")]
    Config(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Service(#[from] anyhow::Error),
}

/// Persistent document-level failure shown in place of content until a reload
/// succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentFailure {
    pub message: String,
    /// Full error chain.
    pub detail: String,
}

impl DocumentFailure {
    pub fn from_error(error: &anyhow::Error) -> Self {
        Self {
            message: error.to_string(),
            detail: format!("{error:?}"),
        }
    }
}
