//! Filesystem blob storage for avatars and message attachments.
//!
//! Each upload gets a stable UUID reference and a public URL under
//! `/api/v1/blob/`.  The content type is kept in a `.mime` sidecar file so
//! downloads are served with the original type after a restart.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ApiError;

/// Result of storing one blob.
#[derive(Debug, Clone)]
pub struct StoredBlob {
    /// Stable reference usable for deletion.
    pub id: Uuid,
    /// URL clients fetch the blob from.
    pub public_url: String,
}

/// Verify that a resolved path stays within the expected base directory.
/// Prevents path traversal attacks.
fn ensure_within(base: &Path, target: &Path) -> Result<PathBuf, ApiError> {
    // Canonicalize base; target may not exist yet so normalize manually
    let canonical_base = base.canonicalize().unwrap_or_else(|_| base.to_path_buf());
    let mut resolved = canonical_base.clone();
    for component in target
        .strip_prefix(&canonical_base)
        .unwrap_or(target)
        .components()
    {
        match component {
            std::path::Component::Normal(c) => resolved.push(c),
            std::path::Component::ParentDir => {
                return Err(ApiError::Validation("Path traversal detected".to_string()));
            }
            _ => {} // RootDir, CurDir, Prefix -- skip
        }
    }
    if !resolved.starts_with(&canonical_base) {
        return Err(ApiError::Validation("Path traversal detected".to_string()));
    }
    Ok(resolved)
}

#[derive(Debug, Clone)]
pub struct BlobStore {
    base_path: PathBuf,
    base_url: String,
    max_size: usize,
}

impl BlobStore {
    pub async fn new(
        base_path: PathBuf,
        base_url: String,
        max_size: usize,
    ) -> Result<Self, ApiError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            ApiError::Internal(format!(
                "Failed to create blob directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        info!(path = %base_path.display(), "Blob store initialized");

        Ok(Self {
            base_path,
            base_url,
            max_size,
        })
    }

    /// Store raw bytes with their content type, returning the stable
    /// reference and the public URL.
    pub async fn store_blob(&self, data: &[u8], mime_type: &str) -> Result<StoredBlob, ApiError> {
        if data.is_empty() {
            return Err(ApiError::Validation("Empty file".to_string()));
        }
        if data.len() > self.max_size {
            return Err(ApiError::BlobTooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }

        let id = Uuid::new_v4();
        let path = self.safe_blob_path(&id)?;

        fs::write(&path, data)
            .await
            .map_err(|e| ApiError::Internal(format!("Failed to write blob {id}: {e}")))?;
        fs::write(self.mime_path(&path), mime_type.as_bytes())
            .await
            .map_err(|e| ApiError::Internal(format!("Failed to write blob meta {id}: {e}")))?;

        debug!(id = %id, size = data.len(), mime = mime_type, "Stored blob");
        Ok(StoredBlob {
            id,
            public_url: format!("{}/api/v1/blob/{}", self.base_url, id),
        })
    }

    /// Read a blob back together with its content type.
    pub async fn get_blob(&self, id: Uuid) -> Result<(Vec<u8>, String), ApiError> {
        let path = self.safe_blob_path(&id)?;

        if !path.exists() {
            return Err(ApiError::BlobNotFound);
        }

        let data = fs::read(&path)
            .await
            .map_err(|e| ApiError::Internal(format!("Failed to read blob {id}: {e}")))?;

        let mime_type = fs::read_to_string(self.mime_path(&path))
            .await
            .unwrap_or_else(|_| "application/octet-stream".to_string());

        debug!(id = %id, size = data.len(), "Retrieved blob");
        Ok((data, mime_type))
    }

    /// Delete one blob.  Missing blobs are ignored.
    pub async fn delete_blob(&self, id: Uuid) -> Result<(), ApiError> {
        let path = self.safe_blob_path(&id)?;

        if path.exists() {
            fs::remove_file(&path)
                .await
                .map_err(|e| ApiError::Internal(format!("Failed to delete blob {id}: {e}")))?;
            let _ = fs::remove_file(self.mime_path(&path)).await;
            debug!(id = %id, "Deleted blob");
        }
        Ok(())
    }

    /// Batch-delete blobs by their stable references.  References that do
    /// not parse or no longer exist are skipped.
    pub async fn delete_blobs(&self, refs: &[String]) -> Result<usize, ApiError> {
        let mut deleted = 0usize;
        for blob_ref in refs {
            let Ok(id) = Uuid::parse_str(blob_ref) else {
                debug!(blob_ref, "Skipping unparseable blob reference");
                continue;
            };
            self.delete_blob(id).await?;
            deleted += 1;
        }
        Ok(deleted)
    }

    /// Safe blob path that validates against traversal.
    fn safe_blob_path(&self, id: &Uuid) -> Result<PathBuf, ApiError> {
        let raw = self.base_path.join(id.to_string());
        ensure_within(&self.base_path, &raw)
    }

    fn mime_path(&self, blob_path: &Path) -> PathBuf {
        let mut path = blob_path.to_path_buf();
        path.set_extension("mime");
        path
    }
}
