use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use super::{FileHandle, UploadedFile};

/// Durable storage for uploaded files.
#[async_trait]
pub trait FileStager: Send + Sync {
    /// Persist `file` as `stored_name` inside the `staging_key` area.
    async fn stage(
        &self,
        staging_key: &str,
        stored_name: &str,
        file: &UploadedFile,
    ) -> std::io::Result<FileHandle>;

    /// Remove everything staged under `staging_key`. Missing areas are fine.
    async fn discard(&self, staging_key: &str) -> std::io::Result<()>;
}

/// Stages files under `<root>/<staging_key>/` on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalFileStager {
    root: PathBuf,
}

impl LocalFileStager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    fn area(&self, staging_key: &str) -> std::io::Result<PathBuf> {
        if staging_key.is_empty()
            || staging_key.contains(['/', '\\'])
            || staging_key == "."
            || staging_key == ".."
        {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid staging key: {staging_key:?}"),
            ));
        }
        Ok(self.root.join(staging_key))
    }
}

#[async_trait]
impl FileStager for LocalFileStager {
    async fn stage(
        &self,
        staging_key: &str,
        stored_name: &str,
        file: &UploadedFile,
    ) -> std::io::Result<FileHandle> {
        let dir = self.area(staging_key)?;
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(stored_name);
        tokio::fs::write(&path, &file.bytes).await?;
        debug!(path = %path.display(), size_bytes = file.bytes.len(), "staged upload");

        Ok(FileHandle {
            path,
            original_name: file.file_name.clone(),
            content_type: file.content_type.clone(),
            size_bytes: file.size_bytes(),
        })
    }

    async fn discard(&self, staging_key: &str) -> std::io::Result<()> {
        let dir = self.area(staging_key)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}
