use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

use super::{validate_key, FileStore, LocalFile, StorageError, StorageResult};

/// Files under a root directory, served from `public_base_url`
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
    public_base_url: String,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    fn backend(&self) -> &'static str {
        "local"
    }

    async fn local_path(&self, key: &str) -> StorageResult<LocalFile> {
        let path = self.resolve(key)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(LocalFile::in_place(path)),
            Ok(_) => Err(StorageError::NotFound(key.to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, src), fields(src = %src.display()))]
    async fn save_upload(&self, key: &str, src: &Path) -> StorageResult<()> {
        let dest = self.resolve(key)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // rename fails across filesystems; fall back to a copy
        if let Err(e) = tokio::fs::rename(src, &dest).await {
            debug!(error = %e, "Rename failed, copying instead");
            tokio::fs::copy(src, &dest).await?;
        }

        info!(path = %dest.display(), "Stored file");
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), "Deleted file");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn url_for(&self, key: &str) -> StorageResult<String> {
        validate_key(key)?;
        Ok(format!("{}/{}", self.public_base_url.trim_end_matches('/'), key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, LocalFileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::new(dir.path(), "http://files.test/");
        (dir, store)
    }

    fn staged(contents: &str) -> tempfile::TempPath {
        let path = tempfile::NamedTempFile::new().unwrap().into_temp_path();
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[tokio::test]
    async fn test_save_then_read_then_delete() {
        let (_dir, store) = store();
        let src = staged("phone\n13800000000\n");

        store.save_upload("uploads/1_leads.csv", &src).await.unwrap();
        let local = store.local_path("uploads/1_leads.csv").await.unwrap();
        assert_eq!(std::fs::read_to_string(local.path()).unwrap(), "phone\n13800000000\n");

        store.delete("uploads/1_leads.csv").await.unwrap();
        assert!(store.local_path("uploads/1_leads.csv").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let (_dir, store) = store();
        store.delete("uploads/never.csv").await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let (_dir, store) = store();
        let err = store.local_path("raw_uploads/missing.csv").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_put_export_returns_public_url() {
        let (dir, store) = store();
        let src = staged("phone\n");

        let url = store.put_export("exports/data_export.csv", &src).await.unwrap();

        assert_eq!(url, "http://files.test/exports/data_export.csv");
        assert!(dir.path().join("exports/data_export.csv").exists());
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let (_dir, store) = store();
        let src = staged("x");
        let err = store.save_upload("../outside.csv", &src).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));
    }
}
