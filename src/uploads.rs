use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

use crate::storage::{
    file_extension, is_allowed_image, title_from_filename, ImageRecord, ImageStore, StoreError,
};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("No file provided")]
    NoFile,

    #[error("No file selected")]
    EmptyFilename,

    #[error("Invalid file type: {0}. Allowed: png, jpg, jpeg, gif, webp")]
    UnsupportedExtension(String),

    #[error("Uploaded file is empty")]
    EmptyFile,

    #[error("Upload to {store} failed: {source}")]
    Store {
        store: &'static str,
        #[source]
        source: StoreError,
    },
}

impl UploadError {
    pub fn is_client_error(&self) -> bool {
        !matches!(self, UploadError::Store { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadedImage {
    pub id: String,
    pub url: String,
    pub title: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl From<ImageRecord> for UploadedImage {
    fn from(record: ImageRecord) -> Self {
        UploadedImage {
            id: record.id,
            url: record.src,
            title: record.title,
            width: record.width,
            height: record.height,
        }
    }
}

pub fn validate_upload(filename: &str, bytes: &[u8]) -> Result<(), UploadError> {
    if filename.trim().is_empty() {
        return Err(UploadError::EmptyFilename);
    }
    if !is_allowed_image(filename) {
        let ext = file_extension(filename).unwrap_or_else(|| "none".to_string());
        return Err(UploadError::UnsupportedExtension(ext));
    }
    if bytes.is_empty() {
        return Err(UploadError::EmptyFile);
    }
    Ok(())
}

/// Routes each upload to exactly one store: primary when configured, else
/// secondary, else the local directory. A failing store is reported, never
/// retried on another one.
#[derive(Clone)]
pub struct UploadDispatcher {
    primary: Option<Arc<dyn ImageStore>>,
    secondary: Option<Arc<dyn ImageStore>>,
    local: Arc<dyn ImageStore>,
}

impl UploadDispatcher {
    pub fn new(
        primary: Option<Arc<dyn ImageStore>>,
        secondary: Option<Arc<dyn ImageStore>>,
        local: Arc<dyn ImageStore>,
    ) -> Self {
        UploadDispatcher {
            primary,
            secondary,
            local,
        }
    }

    fn target(&self) -> &Arc<dyn ImageStore> {
        self.primary
            .as_ref()
            .or(self.secondary.as_ref())
            .unwrap_or(&self.local)
    }

    pub async fn upload(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        title: &str,
    ) -> Result<UploadedImage, UploadError> {
        validate_upload(filename, &bytes)?;

        let title = match title.trim() {
            "" => title_from_filename(filename),
            trimmed => trimmed.to_string(),
        };

        let store = self.target();
        info!(
            "Uploading {filename} ({} bytes) as '{title}' to {}",
            bytes.len(),
            store.name()
        );
        match store.upload(bytes, filename, &title).await {
            Ok(record) => {
                info!("Upload of '{title}' stored as {}", record.id);
                Ok(record.into())
            }
            Err(source) => {
                error!("Upload of {filename} to {} failed: {source}", store.name());
                Err(UploadError::Store {
                    store: store.name(),
                    source,
                })
            }
        }
    }
}
