//! File storage for uploads and exports
//!
//! Uploaded source files and generated exports live behind [`FileStore`],
//! addressed by relative keys such as `raw_uploads/1712345678_leads.csv` or
//! `exports/data_export_2024-05-01_13-45-10.xlsx`. Files move by path, never
//! as whole in-memory buffers.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

pub mod config;
pub mod local;
pub mod s3;

pub use config::{S3Config, StorageBackend, StorageConfig};
pub use local::LocalFileStore;
pub use s3::S3FileStore;

pub type StorageResult<T> = std::result::Result<T, StorageError>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("S3 error: {0}")]
    S3(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Missing files and bad keys fail the same way on every attempt
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::NotFound(_) | Self::InvalidKey(_))
    }
}

/// A stored file made readable on the local filesystem.
///
/// Backends that download to a temp file delete it when this is dropped.
#[derive(Debug)]
pub struct LocalFile {
    path: PathBuf,
    _temp: Option<tempfile::TempPath>,
}

impl LocalFile {
    pub fn in_place(path: PathBuf) -> Self {
        Self { path, _temp: None }
    }

    pub fn temporary(temp: tempfile::TempPath) -> Self {
        Self {
            path: temp.to_path_buf(),
            _temp: Some(temp),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
pub trait FileStore: Send + Sync {
    /// Backend name for logs
    fn backend(&self) -> &'static str;

    /// Make `key` readable locally for the lifetime of the returned guard
    async fn local_path(&self, key: &str) -> StorageResult<LocalFile>;

    /// Store the file at `src` under `key`; `src` may be moved
    async fn save_upload(&self, key: &str, src: &Path) -> StorageResult<()>;

    /// Remove `key`; a missing file is not an error
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// URL a client can download `key` from
    async fn url_for(&self, key: &str) -> StorageResult<String>;

    /// Store an export and return its download URL
    async fn put_export(&self, key: &str, src: &Path) -> StorageResult<String> {
        self.save_upload(key, src).await?;
        self.url_for(key).await
    }
}

/// Reject empty, absolute and `..` keys
pub fn validate_key(key: &str) -> StorageResult<()> {
    let path = Path::new(key);
    let plain = !key.is_empty()
        && !key.contains('\\')
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_)));

    if plain {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

/// Build the store selected by `STORAGE_BACKEND`
pub fn build_store(config: &StorageConfig) -> Arc<dyn FileStore> {
    let store: Arc<dyn FileStore> = match config.backend {
        StorageBackend::Local => Arc::new(LocalFileStore::new(
            config.root.clone(),
            config.public_base_url.clone(),
        )),
        StorageBackend::S3 => Arc::new(S3FileStore::new(&config.s3)),
    };
    tracing::info!(backend = store.backend(), "File store initialized");
    store
}
