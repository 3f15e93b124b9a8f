//! Image upload capability.
//!
//! The orchestration layer depends on exactly one operation: give a local
//! image path, get back a public URL or an [`UploadError`]. Both shipped
//! backends — the PicGo local relay and a generic authenticated HTTP
//! endpoint — adapt to [`Uploader`] at construction time, so the upload
//! stage never branches on backend shape at call time.
//!
//! Implementations must be safe to call concurrently from multiple
//! workers; the shipped backends share a pooled [`reqwest::Client`] and
//! carry no other mutable state.

mod endpoint;
mod picgo;

pub use endpoint::EndpointUploader;
pub use picgo::PicGoUploader;

use crate::error::PipelineError;
use crate::settings::UploaderSettings;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// One failed upload attempt.
#[derive(Debug, Clone, Error)]
#[error("{cause}")]
pub struct UploadError {
    pub path: PathBuf,
    pub cause: String,
}

impl UploadError {
    pub fn new(path: impl Into<PathBuf>, cause: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            cause: cause.into(),
        }
    }
}

/// Capability over upload backends: local image path in, remote URL out.
#[async_trait]
pub trait Uploader: std::fmt::Debug + Send + Sync {
    /// Upload one image file and return its public URL.
    async fn upload(&self, image: &Path) -> Result<String, UploadError>;

    /// Backend name for logs and error hints.
    fn name(&self) -> &str;
}

/// Which upload backend to build, with any flag-level overrides.
///
/// Fields left `None` are resolved from the settings file; parameters
/// still missing after that are a configuration error.
#[derive(Debug, Clone)]
pub enum UploaderKind {
    /// PicGo-style local HTTP relay.
    PicGo { endpoint: Option<String> },
    /// Generic object-storage style endpoint: PUT bytes, derive the URL.
    Endpoint {
        upload_url: Option<String>,
        public_base: Option<String>,
        auth_token: Option<String>,
    },
}

impl UploaderKind {
    pub fn name(&self) -> &'static str {
        match self {
            UploaderKind::PicGo { .. } => "picgo",
            UploaderKind::Endpoint { .. } => "endpoint",
        }
    }

    /// Resolve parameters (flags first, then settings file, then defaults
    /// where they exist) and construct the backend.
    pub fn build(&self, settings: &UploaderSettings) -> Result<Arc<dyn Uploader>, PipelineError> {
        match self {
            UploaderKind::PicGo { endpoint } => {
                let endpoint = endpoint
                    .clone()
                    .or_else(|| settings.picgo.as_ref().map(|p| p.endpoint.clone()))
                    .unwrap_or_else(|| picgo::DEFAULT_ENDPOINT.to_string());
                Ok(Arc::new(PicGoUploader::new(endpoint)))
            }
            UploaderKind::Endpoint {
                upload_url,
                public_base,
                auth_token,
            } => {
                let file_settings = settings.endpoint.as_ref();
                let upload_url = upload_url
                    .clone()
                    .or_else(|| file_settings.map(|s| s.upload_url.clone()))
                    .ok_or_else(|| PipelineError::UploaderNotConfigured {
                        kind: "endpoint".into(),
                        hint: "Set --endpoint-url or add an 'endpoint' section with \
                               'upload_url' to the settings file."
                            .into(),
                    })?;
                let public_base = public_base
                    .clone()
                    .or_else(|| file_settings.and_then(|s| s.public_base.clone()));
                let auth_token = auth_token
                    .clone()
                    .or_else(|| file_settings.and_then(|s| s.auth_token.clone()));
                Ok(Arc::new(EndpointUploader::new(
                    upload_url,
                    public_base,
                    auth_token,
                )))
            }
        }
    }
}
