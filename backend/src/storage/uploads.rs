use log::warn;
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum UploadStoreError {
    #[error("Upload write error: {0}")]
    Io(#[from] std::io::Error),
}

/// Transient storage for uploaded files, one unique name per request.
#[derive(Clone)]
pub struct UploadStore {
    dir: PathBuf,
}

impl UploadStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub async fn persist(&self, image_data: &[u8]) -> Result<TempUpload, UploadStoreError> {
        let path = self.dir.join(Uuid::new_v4().to_string());
        tokio::fs::write(&path, image_data).await?;
        Ok(TempUpload { path })
    }
}

/// Handle to a stored upload. Dropping it removes the file, so cleanup
/// happens on success and failure paths alike; removal failure is logged
/// and never fails the request.
pub struct TempUpload {
    path: PathBuf,
}

impl TempUpload {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempUpload {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            warn!(
                "Failed to remove temp upload {}: {}",
                self.path.display(),
                err
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_upload_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("upload-store-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn persists_bytes_and_removes_them_on_drop() {
        let dir = temp_upload_dir();
        let store = UploadStore::new(dir.clone());

        let upload = store.persist(b"fake image bytes").await.unwrap();
        let path = upload.path().to_path_buf();
        assert_eq!(std::fs::read(&path).unwrap(), b"fake image bytes");

        drop(upload);
        assert!(!path.exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn each_upload_gets_its_own_file() {
        let dir = temp_upload_dir();
        let store = UploadStore::new(dir.clone());

        let first = store.persist(b"first").await.unwrap();
        let second = store.persist(b"second").await.unwrap();
        assert_ne!(first.path(), second.path());

        drop(first);
        drop(second);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
