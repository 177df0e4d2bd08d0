// Cloudinary deletion client

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::CloudinaryConfig;
use crate::types::{DeletionError, DeletionToken};

#[async_trait]
pub trait DeletionTransport: Send + Sync {
    /// Delete the asset the token was issued for.
    async fn delete_by_token(&self, token: &DeletionToken) -> Result<(), DeletionError>;
}

pub struct CloudinaryClient {
    http: reqwest::Client,
    endpoint: String,
}

impl CloudinaryClient {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(config: &CloudinaryConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            endpoint: config.delete_by_token_url(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl DeletionTransport for CloudinaryClient {
    async fn delete_by_token(&self, token: &DeletionToken) -> Result<(), DeletionError> {
        debug!(endpoint = %self.endpoint, "Sending delete_by_token request");

        let response = self
            .http
            .post(&self.endpoint)
            .form(&[("token", token.as_str())])
            .send()
            .await
            .map_err(|e| DeletionError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "delete_by_token rejected");
            return Err(DeletionError::Status(status.as_u16()));
        }

        Ok(())
    }
}
