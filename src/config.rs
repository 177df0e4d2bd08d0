use anyhow::Result;
use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::utils::retry::LinearBackoff;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub cloudinary: CloudinaryConfig,
    pub widget: WidgetRetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloudinaryConfig {
    pub cloud_name: String,
    pub upload_preset: String,
    pub api_host: String,
    pub folder: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WidgetRetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub delay_increment_ms: u64,
}

impl Default for WidgetRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_delay_ms: 300,
            delay_increment_ms: 200,
        }
    }
}

impl WidgetRetryConfig {
    pub fn backoff(&self) -> LinearBackoff {
        LinearBackoff::new(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.delay_increment_ms),
        )
    }
}

impl CloudinaryConfig {
    pub const DEFAULT_API_HOST: &'static str = "https://api.cloudinary.com";
    pub const DEFAULT_FOLDER: &'static str = "uploads";

    pub fn new(cloud_name: impl Into<String>, upload_preset: impl Into<String>) -> Self {
        Self {
            cloud_name: cloud_name.into(),
            upload_preset: upload_preset.into(),
            api_host: Self::DEFAULT_API_HOST.to_string(),
            folder: Self::DEFAULT_FOLDER.to_string(),
        }
    }

    /// Point deletion requests at another host (mock servers, proxies)
    pub fn with_api_host(mut self, host: impl Into<String>) -> Self {
        self.api_host = host.into();
        self
    }

    pub fn with_folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = folder.into();
        self
    }

    pub fn delete_by_token_url(&self) -> String {
        format!(
            "{}/v1_1/{}/delete_by_token",
            self.api_host.trim_end_matches('/'),
            self.cloud_name
        )
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            cloudinary: CloudinaryConfig {
                cloud_name: env::var("CLOUDINARY_CLOUD_NAME").unwrap_or_default(),
                upload_preset: env::var("CLOUDINARY_UPLOAD_PRESET").unwrap_or_default(),
                api_host: env::var("CLOUDINARY_API_HOST")
                    .unwrap_or_else(|_| CloudinaryConfig::DEFAULT_API_HOST.to_string()),
                folder: env::var("CLOUDINARY_UPLOAD_FOLDER")
                    .unwrap_or_else(|_| CloudinaryConfig::DEFAULT_FOLDER.to_string()),
            },
            widget: WidgetRetryConfig {
                max_attempts: env::var("WIDGET_MAX_ATTEMPTS")
                    .unwrap_or_else(|_| "8".to_string())
                    .parse()?,
                base_delay_ms: env::var("WIDGET_BASE_DELAY_MS")
                    .unwrap_or_else(|_| "300".to_string())
                    .parse()?,
                delay_increment_ms: env::var("WIDGET_DELAY_INCREMENT_MS")
                    .unwrap_or_else(|_| "200".to_string())
                    .parse()?,
            },
        })
    }
}
