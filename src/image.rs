//! Image hosting collaborator
//!
//! Turns a raw image payload into a durable URL the partner can load.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::CollaboratorError;

/// Uploads image payloads and returns a durable URL
#[async_trait]
pub trait ImageHost: Send + Sync {
    async fn host_image(&self, payload: &str) -> Result<String, CollaboratorError>;
}

/// Image host used when uploads are not configured; every image is dropped
#[derive(Debug, Default)]
pub struct NoImageHost;

#[async_trait]
impl ImageHost for NoImageHost {
    async fn host_image(&self, _payload: &str) -> Result<String, CollaboratorError> {
        Err(CollaboratorError::Unavailable)
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    secure_url: Option<String>,
    url: Option<String>,
}

/// Unsigned form upload to an image CDN
///
/// POSTs `file=<payload>` (plus `upload_preset` when set) and reads
/// `secure_url`, falling back to `url`, from the JSON reply.
#[derive(Debug, Clone)]
pub struct UploadImageHost {
    client: reqwest::Client,
    endpoint: String,
    preset: Option<String>,
    max_bytes: usize,
}

impl UploadImageHost {
    pub fn new(endpoint: String, preset: Option<String>, max_bytes: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            preset,
            max_bytes,
        }
    }
}

#[async_trait]
impl ImageHost for UploadImageHost {
    async fn host_image(&self, payload: &str) -> Result<String, CollaboratorError> {
        if payload.len() > self.max_bytes {
            return Err(CollaboratorError::TooLarge {
                size: payload.len(),
                limit: self.max_bytes,
            });
        }

        let mut form = vec![("file", payload)];
        if let Some(preset) = &self.preset {
            form.push(("upload_preset", preset.as_str()));
        }

        let response = self
            .client
            .post(&self.endpoint)
            .form(&form)
            .send()
            .await?
            .error_for_status()?;

        let body: UploadResponse = response.json().await?;
        let url = body
            .secure_url
            .or(body.url)
            .ok_or_else(|| CollaboratorError::InvalidResponse("no url in upload reply".into()))?;

        debug!("Image hosted at {}", url);
        Ok(url)
    }
}
