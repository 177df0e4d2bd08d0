use serde::{Deserialize, Serialize};
use std::fmt;

/// A successfully stored asset.
///
/// Replaced wholesale on re-upload and cleared on removal; never patched in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadValue {
    pub url: String,
    pub public_id: String,
}

impl UploadValue {
    pub fn new(url: impl Into<String>, public_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            public_id: public_id.into(),
        }
    }
}

/// Upload-scoped credential that allows removing one remote asset.
///
/// Only ever issued to the session that performed the upload, so it is
/// never persisted or read back from a form value.
#[derive(Clone, PartialEq, Eq)]
pub struct DeletionToken(String);

impl DeletionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Tokens are credentials; keep them out of logs.
impl fmt::Debug for DeletionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DeletionToken(***)")
    }
}

/// The asset currently shown by a controller.
///
/// Holding the token inside the asset makes "token without a value"
/// unrepresentable: both are cleared together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentAsset {
    pub value: UploadValue,
    pub token: Option<DeletionToken>,
}

impl CurrentAsset {
    /// An asset supplied from outside (form default, saved record). No token.
    pub fn external(value: UploadValue) -> Self {
        Self { value, token: None }
    }

    /// An asset produced by an upload in this session.
    pub fn uploaded(value: UploadValue, token: Option<DeletionToken>) -> Self {
        Self { value, token }
    }
}

/// Lifecycle of the upload widget owned by one controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WidgetState {
    Uninitialized,
    Probing { attempt: u32 },
    Ready,
    Failed(String),
}

impl WidgetState {
    pub fn is_ready(&self) -> bool {
        matches!(self, WidgetState::Ready)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WidgetState::Ready | WidgetState::Failed(_))
    }
}

impl Default for WidgetState {
    fn default() -> Self {
        WidgetState::Uninitialized
    }
}

/// Remote deletion failures. Local state is left untouched when one is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeletionError {
    #[error("Delete request failed: {0}")]
    Transport(String),

    #[error("Delete failed with status {0}")]
    Status(u16),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UploadError {
    #[error("Upload target is not configured: {0}")]
    NotConfigured(String),

    #[error("Upload widget failed to load after {attempts} attempts. Please refresh and try again.")]
    InitializationTimeout { attempts: u32 },

    #[error("Upload failed: {0}")]
    UploadCallback(String),

    #[error(transparent)]
    Deletion(#[from] DeletionError),
}

impl UploadError {
    /// Short message suitable for showing next to the upload control.
    pub fn user_message(&self) -> String {
        match self {
            UploadError::NotConfigured(_) => "Cloudinary is not configured.".to_string(),
            UploadError::InitializationTimeout { .. } => {
                "Upload widget failed to load. Please refresh and try again.".to_string()
            }
            UploadError::UploadCallback(_) => "Upload failed. Please try again.".to_string(),
            UploadError::Deletion(e) => format!("Could not remove image: {}", e),
        }
    }
}

pub type AppResult<T> = std::result::Result<T, UploadError>;
