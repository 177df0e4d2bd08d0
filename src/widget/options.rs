use serde::{Deserialize, Serialize};

use crate::config::CloudinaryConfig;
use crate::types::{AppResult, UploadError};

/// Largest file the widget accepts client-side (5 MB)
pub const MAX_FILE_SIZE_BYTES: u64 = 5_000_000;

/// Construction parameters handed to the widget factory.
///
/// Serializes to the camelCase shape the hosted widget expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetOptions {
    pub cloud_name: String,
    pub upload_preset: String,
    pub multiple: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
    pub max_file_size: u64,
    pub client_allowed_formats: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_files: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
}

impl WidgetOptions {
    /// Form-field upload: one png/jpg file into the configured folder
    pub fn component(config: &CloudinaryConfig) -> Self {
        Self {
            cloud_name: config.cloud_name.clone(),
            upload_preset: config.upload_preset.clone(),
            multiple: false,
            folder: Some(config.folder.clone()),
            max_file_size: MAX_FILE_SIZE_BYTES,
            client_allowed_formats: formats(&["png", "jpg", "jpeg"]),
            max_files: None,
            resource_type: None,
            sources: Vec::new(),
        }
    }

    /// Page-level banner upload: also accepts webp and remote/camera sources
    pub fn banner(config: &CloudinaryConfig) -> Self {
        Self {
            cloud_name: config.cloud_name.clone(),
            upload_preset: config.upload_preset.clone(),
            multiple: false,
            folder: None,
            max_file_size: MAX_FILE_SIZE_BYTES,
            client_allowed_formats: formats(&["png", "jpg", "jpeg", "webp"]),
            max_files: Some(1),
            resource_type: Some("image".to_string()),
            sources: formats(&["local", "url", "camera"]),
        }
    }

    /// Widgets cannot be built without a cloud name and an unsigned preset.
    pub fn ensure_configured(&self) -> AppResult<()> {
        if self.cloud_name.trim().is_empty() {
            return Err(UploadError::NotConfigured("cloud name is empty".to_string()));
        }
        if self.upload_preset.trim().is_empty() {
            return Err(UploadError::NotConfigured("upload preset is empty".to_string()));
        }
        Ok(())
    }
}

fn formats(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
