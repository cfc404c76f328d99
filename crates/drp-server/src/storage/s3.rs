use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    presigning::PresigningConfig,
    primitives::ByteStream,
    Client,
};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, instrument};

use super::config::S3Config;
use super::{validate_key, FileStore, LocalFile, StorageError, StorageResult};

/// Files in an S3 (or MinIO) bucket; downloads are presigned URLs
#[derive(Clone)]
pub struct S3FileStore {
    client: Client,
    bucket: String,
    presign_expiry: Duration,
}

impl S3FileStore {
    pub fn new(config: &S3Config) -> Self {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "drp-storage",
        );

        let mut s3_config_builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(s3_config_builder.build());

        info!(bucket = %config.bucket, "S3 storage client initialized");

        Self {
            client,
            bucket: config.bucket.clone(),
            presign_expiry: Duration::from_secs(config.presign_expiry_secs),
        }
    }
}

/// Temp files keep the key's extension so the row source can be picked from it
fn temp_suffix(key: &str) -> String {
    Path::new(key)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext))
        .unwrap_or_default()
}

#[async_trait]
impl FileStore for S3FileStore {
    fn backend(&self) -> &'static str {
        "s3"
    }

    #[instrument(skip(self))]
    async fn local_path(&self, key: &str) -> StorageResult<LocalFile> {
        validate_key(key)?;
        debug!("Downloading s3://{}/{}", self.bucket, key);

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    StorageError::NotFound(key.to_string())
                } else {
                    StorageError::S3(format!("failed to download {}: {}", key, e))
                }
            })?;

        let temp = tempfile::Builder::new()
            .prefix("drp-")
            .suffix(&temp_suffix(key))
            .tempfile()?
            .into_temp_path();

        let mut body = response.body.into_async_read();
        let mut file = tokio::fs::File::create(&temp).await?;
        let bytes = tokio::io::copy(&mut body, &mut file).await?;

        debug!(bytes, path = %temp.display(), "Downloaded to temp file");
        Ok(LocalFile::temporary(temp))
    }

    #[instrument(skip(self, src), fields(src = %src.display()))]
    async fn save_upload(&self, key: &str, src: &Path) -> StorageResult<()> {
        validate_key(key)?;
        let body = ByteStream::from_path(src)
            .await
            .map_err(|e| StorageError::S3(format!("failed to read {}: {}", src.display(), e)))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| StorageError::S3(format!("failed to upload {}: {}", key, e)))?;

        info!("Successfully uploaded to s3://{}/{}", self.bucket, key);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        // DeleteObject succeeds for keys that do not exist
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::S3(format!("failed to delete {}: {}", key, e)))?;

        debug!("Deleted s3://{}/{}", self.bucket, key);
        Ok(())
    }

    async fn url_for(&self, key: &str) -> StorageResult<String> {
        validate_key(key)?;
        let presigning_config = PresigningConfig::expires_in(self.presign_expiry)
            .map_err(|e| StorageError::S3(format!("invalid presign expiry: {}", e)))?;

        let presigned_request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning_config)
            .await
            .map_err(|e| StorageError::S3(format!("failed to presign {}: {}", key, e)))?;

        Ok(presigned_request.uri().to_string())
    }
}
