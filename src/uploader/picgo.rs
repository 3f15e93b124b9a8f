//! PicGo local-relay backend.
//!
//! PicGo (and compatible relays like PicList) runs on the user's machine
//! and exposes a tiny HTTP API: POST a JSON list of absolute file paths to
//! `/upload`, get back the hosted URLs. The relay owns the real backend
//! credentials, which keeps them out of this process entirely.

use super::{UploadError, Uploader};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

pub(super) const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:36677";

#[derive(Debug, Serialize)]
struct UploadRequest {
    list: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    success: bool,
    #[serde(default)]
    result: Vec<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Uploads via a PicGo-compatible relay server.
#[derive(Debug, Clone)]
pub struct PicGoUploader {
    endpoint: String,
    client: reqwest::Client,
}

impl PicGoUploader {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("default reqwest client");
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Uploader for PicGoUploader {
    async fn upload(&self, image: &Path) -> Result<String, UploadError> {
        // The relay opens the file itself, so it needs an absolute path.
        let absolute = std::fs::canonicalize(image)
            .map_err(|e| UploadError::new(image, format!("cannot resolve path: {e}")))?;

        let url = format!("{}/upload", self.endpoint);
        debug!("PicGo upload: {} -> {}", absolute.display(), url);

        let response = self
            .client
            .post(&url)
            .json(&UploadRequest {
                list: vec![absolute.to_string_lossy().into_owned()],
            })
            .send()
            .await
            .map_err(|e| UploadError::new(image, format!("relay unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(UploadError::new(
                image,
                format!("relay returned HTTP {}", response.status()),
            ));
        }

        let body: UploadResponse = response
            .json()
            .await
            .map_err(|e| UploadError::new(image, format!("invalid relay response: {e}")))?;

        if !body.success {
            return Err(UploadError::new(
                image,
                body.message
                    .unwrap_or_else(|| "relay reported failure".into()),
            ));
        }

        body.result
            .into_iter()
            .next()
            .ok_or_else(|| UploadError::new(image, "relay returned no URL"))
    }

    fn name(&self) -> &str {
        "picgo"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_stripped_from_endpoint() {
        let uploader = PicGoUploader::new("http://127.0.0.1:36677/");
        assert_eq!(uploader.endpoint(), "http://127.0.0.1:36677");
    }

    #[test]
    fn response_parsing_tolerates_missing_fields() {
        let ok: UploadResponse =
            serde_json::from_str(r#"{"success": true, "result": ["https://x/y.png"]}"#).unwrap();
        assert!(ok.success);
        assert_eq!(ok.result, vec!["https://x/y.png".to_string()]);

        let fail: UploadResponse =
            serde_json::from_str(r#"{"success": false, "message": "no uploader configured"}"#)
                .unwrap();
        assert!(!fail.success);
        assert!(fail.result.is_empty());
        assert_eq!(fail.message.as_deref(), Some("no uploader configured"));
    }

    #[tokio::test]
    async fn missing_file_fails_before_any_network_call() {
        let uploader = PicGoUploader::new("http://127.0.0.1:1");
        let err = uploader
            .upload(Path::new("/no/such/image.png"))
            .await
            .unwrap_err();
        assert!(err.cause.contains("cannot resolve path"), "got: {}", err.cause);
    }
}
