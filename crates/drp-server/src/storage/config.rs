use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

const DEFAULT_STORAGE_ROOT: &str = "./storage";
const DEFAULT_PUBLIC_BASE_URL: &str = "http://localhost:8000/files";
const DEFAULT_PRESIGN_EXPIRY_SECS: u64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Local,
    S3,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "fs" => Ok(Self::Local),
            "s3" | "minio" => Ok(Self::S3),
            other => anyhow::bail!("unknown STORAGE_BACKEND '{}' (expected local or s3)", other),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Local backend: directory holding every key
    pub root: PathBuf,
    /// Local backend: URL prefix the files are served under
    pub public_base_url: String,
    pub s3: S3Config,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub path_style: bool,
    /// Lifetime of presigned download URLs
    pub presign_expiry_secs: u64,
}

impl StorageConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            backend: env::var("STORAGE_BACKEND")
                .map(|v| v.parse())
                .unwrap_or(Ok(StorageBackend::Local))?,
            root: env::var("STORAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_STORAGE_ROOT)),
            public_base_url: env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_PUBLIC_BASE_URL.to_string()),
            s3: S3Config::from_env(),
        })
    }

    pub fn local(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            backend: StorageBackend::Local,
            root: root.into(),
            public_base_url: public_base_url.into(),
            s3: S3Config::for_minio("http://localhost:9000", "drp-data"),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        match self.backend {
            StorageBackend::Local if self.public_base_url.trim().is_empty() => {
                anyhow::bail!("PUBLIC_BASE_URL must not be empty")
            }
            StorageBackend::S3 if self.s3.bucket.trim().is_empty() => {
                anyhow::bail!("S3_BUCKET must not be empty")
            }
            StorageBackend::S3 if self.s3.presign_expiry_secs == 0 => {
                anyhow::bail!("S3_PRESIGN_EXPIRY_SECS must be greater than 0")
            }
            _ => Ok(()),
        }
    }
}

impl S3Config {
    pub fn from_env() -> Self {
        Self {
            endpoint: env::var("S3_ENDPOINT").ok(),
            region: env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            bucket: env::var("S3_BUCKET").unwrap_or_else(|_| "drp-data".to_string()),
            access_key: env::var("S3_ACCESS_KEY")
                .or_else(|_| env::var("AWS_ACCESS_KEY_ID"))
                .unwrap_or_else(|_| "minioadmin".to_string()),
            secret_key: env::var("S3_SECRET_KEY")
                .or_else(|_| env::var("AWS_SECRET_ACCESS_KEY"))
                .unwrap_or_else(|_| "minioadmin".to_string()),
            path_style: env::var("S3_PATH_STYLE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
            presign_expiry_secs: env::var("S3_PRESIGN_EXPIRY_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_PRESIGN_EXPIRY_SECS),
        }
    }

    pub fn for_minio(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            region: "us-east-1".to_string(),
            bucket: bucket.into(),
            access_key: "minioadmin".to_string(),
            secret_key: "minioadmin".to_string(),
            path_style: true,
            presign_expiry_secs: DEFAULT_PRESIGN_EXPIRY_SECS,
        }
    }
}
