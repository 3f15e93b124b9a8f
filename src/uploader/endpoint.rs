//! Generic HTTP endpoint backend.
//!
//! Covers object-storage style hosts that accept a raw `PUT` of the file
//! bytes at `{upload_url}/{filename}` and serve the result from a public
//! base URL. Authentication, when the host wants it, is a bearer token;
//! anything fancier belongs in a relay (see the PicGo backend).

use super::{UploadError, Uploader};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Uploads by PUTting file bytes to an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct EndpointUploader {
    upload_url: String,
    public_base: String,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl EndpointUploader {
    pub fn new(
        upload_url: impl Into<String>,
        public_base: Option<String>,
        auth_token: Option<String>,
    ) -> Self {
        let upload_url = upload_url.into().trim_end_matches('/').to_string();
        let public_base = public_base
            .map(|b| b.trim_end_matches('/').to_string())
            .unwrap_or_else(|| upload_url.clone());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("default reqwest client");
        Self {
            upload_url,
            public_base,
            auth_token,
            client,
        }
    }

    /// The URL the uploaded object will be served from.
    pub fn public_url(&self, filename: &str) -> String {
        format!("{}/{}", self.public_base, filename)
    }
}

#[async_trait]
impl Uploader for EndpointUploader {
    async fn upload(&self, image: &Path) -> Result<String, UploadError> {
        let filename = image
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| UploadError::new(image, "image has no usable file name"))?
            .to_string();

        let bytes = tokio::fs::read(image)
            .await
            .map_err(|e| UploadError::new(image, format!("cannot read file: {e}")))?;

        let url = format!("{}/{}", self.upload_url, filename);
        debug!("Endpoint upload: {} ({} bytes)", url, bytes.len());

        let mut request = self.client.put(&url).body(bytes);
        if let Some(ref token) = self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| UploadError::new(image, format!("endpoint unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(UploadError::new(
                image,
                format!("endpoint returned HTTP {}", response.status()),
            ));
        }

        Ok(self.public_url(&filename))
    }

    fn name(&self) -> &str {
        "endpoint"
    }
}
