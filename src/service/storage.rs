use actix_web::web;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::AppError;

const ALLOWED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "pdf"];

#[derive(Debug, Deserialize, ToSchema)]
pub struct UploadReq {
    #[schema(example = "receipt.pdf")]
    pub file_name: String,
    /// Raw base64 or a `data:<mime>;base64,` URL.
    pub content_base64: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StoredFile {
    #[schema(example = "uploads/2f1c0a9e-6f1d-4c55-a3c4-5b8e1f0d2a11.pdf")]
    pub path: String,
    pub size: usize,
}

/// Local directory for uploaded documents and punch photos.
#[derive(Debug, Clone)]
pub struct UploadStore {
    dir: PathBuf,
    max_bytes: usize,
}

fn extension_of(file_name: &str) -> Result<String, AppError> {
    let ext = Path::new(file_name.trim())
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .ok_or_else(|| AppError::validation("File name must have an extension"))?;

    if ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        Ok(ext)
    } else {
        Err(AppError::validation(format!(
            "Unsupported file type `{ext}`; allowed: {}",
            ALLOWED_EXTENSIONS.join(", ")
        )))
    }
}

fn decode(content: &str) -> Result<Vec<u8>, AppError> {
    let content = content.trim();
    let encoded = match content.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => content,
    };
    STANDARD
        .decode(encoded)
        .map_err(|_| AppError::validation("content_base64 is not valid base64"))
}

impl UploadStore {
    pub fn new(dir: impl Into<PathBuf>, max_bytes: usize) -> Self {
        Self {
            dir: dir.into(),
            max_bytes,
        }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub async fn save(&self, file_name: &str, content_base64: &str) -> Result<StoredFile, AppError> {
        let ext = extension_of(file_name)?;
        let bytes = decode(content_base64)?;

        if bytes.is_empty() {
            return Err(AppError::validation("File is empty"));
        }
        if bytes.len() > self.max_bytes {
            return Err(AppError::validation(format!(
                "File exceeds the {} byte limit",
                self.max_bytes
            )));
        }

        let size = bytes.len();
        let dir = self.dir.clone();
        let target = dir.join(format!("{}.{ext}", Uuid::new_v4()));
        let written = target.clone();

        web::block(move || {
            std::fs::create_dir_all(&dir)?;
            std::fs::write(&written, bytes)
        })
        .await?
        .map_err(|e| AppError::internal(format!("failed to store upload: {e}")))?;

        let path = target.to_string_lossy().into_owned();
        info!(path = %path, size, "Stored upload");
        Ok(StoredFile { path, size })
    }
}

impl UploadStore {
    /// Removes a file stored by `save` whose owning write was rolled back.
    pub async fn discard(&self, path: &str) {
        let target = PathBuf::from(path);
        if !target.starts_with(&self.dir) {
            warn!(path, "Refusing to discard a file outside the upload dir");
            return;
        }
        match web::block(move || std::fs::remove_file(target)).await {
            Ok(Ok(())) => info!(path, "Discarded upload"),
            Ok(Err(e)) => warn!(path, error = %e, "Failed to discard upload"),
            Err(e) => warn!(path, error = %e, "Failed to discard upload"),
        }
    }
}
