use async_trait::async_trait;
use log::{error, info, warn};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::config::{AppConfig, StorageBackend};
use crate::models::Id;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("not_found")]
    NotFound,
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("other: {0}")]
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    ChatAttachments,
    Avatars,
    Notes,
}

impl Bucket {
    pub const ALL: [Bucket; 3] = [Bucket::ChatAttachments, Bucket::Avatars, Bucket::Notes];

    pub fn name(self) -> &'static str {
        match self {
            Bucket::ChatAttachments => "chat-attachments",
            Bucket::Avatars => "avatars",
            Bucket::Notes => "notes",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.name() == name)
    }
}

/// Path-keyed blob storage with public URLs; no signed URLs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores the object and returns its public URL.
    async fn put(&self, bucket: Bucket, path: &str, content_type: &str, bytes: Vec<u8>) -> Result<String, ObjectStoreError>;
    async fn get(&self, bucket: Bucket, path: &str) -> Result<(Vec<u8>, String), ObjectStoreError>;
    async fn remove(&self, bucket: Bucket, path: &str) -> Result<(), ObjectStoreError>;
    fn public_url(&self, bucket: Bucket, path: &str) -> String;
}

/// Keeps `[A-Za-z0-9._-]`, replaces everything else with `_`.
pub fn sanitize_file_name(name: &str) -> String {
    // browsers may send a full client path
    let base = name.rsplit(&['/', '\\'][..]).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .take(100)
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() { "file".into() } else { cleaned }
}

/// `<uploader>/<unix_millis>_<sanitized name>`
pub fn object_key(uploader: Id, file_name: &str, unix_millis: i64) -> String {
    format!("{uploader}/{unix_millis}_{}", sanitize_file_name(file_name))
}

/// Rejects absolute paths and parent traversal.
fn checked_relative(path: &str) -> Result<PathBuf, ObjectStoreError> {
    let p = Path::new(path);
    if path.is_empty() || !p.components().all(|c| matches!(c, Component::Normal(_))) {
        return Err(ObjectStoreError::InvalidKey(path.to_string()));
    }
    Ok(p.to_path_buf())
}

fn sniff_mime(bytes: &[u8]) -> String {
    infer::get(bytes)
        .map(|t| t.mime_type().to_string())
        .unwrap_or_else(|| "application/octet-stream".into())
}

// ---------------- Filesystem implementation (local dev + tests) ----------------
pub struct FsObjectStore {
    root: PathBuf,
    public_base: String,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>, public_base: impl Into<String>) -> Self {
        Self { root: root.into(), public_base: public_base.into().trim_end_matches('/').to_string() }
    }

    fn full_path(&self, bucket: Bucket, path: &str) -> Result<PathBuf, ObjectStoreError> {
        Ok(self.root.join(bucket.name()).join(checked_relative(path)?))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, bucket: Bucket, path: &str, _content_type: &str, bytes: Vec<u8>) -> Result<String, ObjectStoreError> {
        let full = self.full_path(bucket, path)?;
        if let Some(dir) = full.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(|e| ObjectStoreError::Other(e.to_string()))?;
        }
        tokio::fs::write(&full, bytes).await.map_err(|e| {
            error!("fs put failed path={}: {e}", full.display());
            ObjectStoreError::Other(e.to_string())
        })?;
        Ok(self.public_url(bucket, path))
    }

    async fn get(&self, bucket: Bucket, path: &str) -> Result<(Vec<u8>, String), ObjectStoreError> {
        let full = self.full_path(bucket, path)?;
        let bytes = tokio::fs::read(&full).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ObjectStoreError::NotFound,
            _ => ObjectStoreError::Other(e.to_string()),
        })?;
        let mime = sniff_mime(&bytes);
        Ok((bytes, mime))
    }

    async fn remove(&self, bucket: Bucket, path: &str) -> Result<(), ObjectStoreError> {
        let full = self.full_path(bucket, path)?;
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ObjectStoreError::Other(e.to_string())),
        }
    }

    fn public_url(&self, bucket: Bucket, path: &str) -> String {
        format!("{}/{}/{}", self.public_base, bucket.name(), path)
    }
}

// ---------------- S3 implementation (MinIO compatible) ----------------
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    public_base: String,
}

impl S3ObjectStore {
    pub async fn new(public_base: &str) -> anyhow::Result<Self> {
        use aws_credential_types::provider::SharedCredentialsProvider;
        use aws_credential_types::Credentials;

        let endpoint = std::env::var("S3_ENDPOINT")
            .map_err(|_| anyhow::anyhow!("S3_ENDPOINT must be set (MinIO / S3 endpoint)"))?;
        let region = std::env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".into());
        let access = std::env::var("S3_ACCESS_KEY").unwrap_or_default();
        let secret = std::env::var("S3_SECRET_KEY").unwrap_or_default();

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(region));
        loader = loader.endpoint_url(endpoint);
        if !access.is_empty() && !secret.is_empty() {
            let creds = Credentials::new(access, secret, None, None, "static");
            loader = loader.credentials_provider(SharedCredentialsProvider::new(creds));
        }
        let conf = loader.load().await;
        // path-style addressing: MinIO/local endpoints have no wildcard DNS
        let s3_conf = aws_sdk_s3::config::Builder::from(&conf).force_path_style(true).build();
        let client = aws_sdk_s3::Client::from_conf(s3_conf);
        info!("Initialized S3/MinIO client (path-style addressing enabled)");

        for bucket in Bucket::ALL {
            let name = bucket.name();
            if let Err(e) = client.head_bucket().bucket(name).send().await {
                warn!("head_bucket failed for '{name}' (will attempt create): {e:?}");
                client
                    .create_bucket()
                    .bucket(name)
                    .send()
                    .await
                    .map_err(|e2| anyhow::anyhow!("failed to ensure bucket '{name}': {e2}"))?;
                info!("created bucket '{name}'");
            }
        }

        Ok(Self { client, public_base: public_base.trim_end_matches('/').to_string() })
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, bucket: Bucket, path: &str, content_type: &str, bytes: Vec<u8>) -> Result<String, ObjectStoreError> {
        use aws_sdk_s3::primitives::ByteStream;
        checked_relative(path)?;
        let put = self
            .client
            .put_object()
            .bucket(bucket.name())
            .key(path)
            .content_type(content_type)
            .body(ByteStream::from(bytes));
        if let Err(e) = put.send().await {
            error!("put_object failed key={path} bucket={} err={:?}", bucket.name(), e);
            let hint = if e.to_string().contains("NoSuchBucket") {
                " (bucket missing or not yet propagated)"
            } else if e.to_string().contains("AccessDenied") {
                " (check S3_ACCESS_KEY/S3_SECRET_KEY permissions)"
            } else {
                ""
            };
            return Err(ObjectStoreError::Other(format!("{e}{hint}")));
        }
        Ok(self.public_url(bucket, path))
    }

    async fn get(&self, bucket: Bucket, path: &str) -> Result<(Vec<u8>, String), ObjectStoreError> {
        let obj = self
            .client
            .get_object()
            .bucket(bucket.name())
            .key(path)
            .send()
            .await
            .map_err(|_| ObjectStoreError::NotFound)?;
        let declared = obj.content_type().map(str::to_string);
        let data = obj.body.collect().await.map_err(|e| ObjectStoreError::Other(e.to_string()))?;
        let bytes = data.into_bytes().to_vec();
        let mime = declared.unwrap_or_else(|| sniff_mime(&bytes));
        Ok((bytes, mime))
    }

    async fn remove(&self, bucket: Bucket, path: &str) -> Result<(), ObjectStoreError> {
        // deleting a missing key is not an error in S3
        self.client
            .delete_object()
            .bucket(bucket.name())
            .key(path)
            .send()
            .await
            .map_err(|e| ObjectStoreError::Other(e.to_string()))?;
        Ok(())
    }

    fn public_url(&self, bucket: Bucket, path: &str) -> String {
        format!("{}/{}/{}", self.public_base, bucket.name(), path)
    }
}

/// Picks the backend named by `STORAGE_BACKEND`.
pub async fn build_object_store(cfg: &AppConfig) -> anyhow::Result<Arc<dyn ObjectStore>> {
    match cfg.storage_backend {
        StorageBackend::S3 => Ok(Arc::new(S3ObjectStore::new(&cfg.storage_public_url).await?)),
        StorageBackend::Fs => {
            info!("using filesystem object store at '{}'", cfg.storage_dir.display());
            Ok(Arc::new(FsObjectStore::new(&cfg.storage_dir, &cfg.storage_public_url)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_paths_and_odd_chars() {
        assert_eq!(sanitize_file_name("C:\\Users\\me\\my report (1).pdf"), "my_report__1_.pdf");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("..."), "file");
        assert_eq!(sanitize_file_name("naïve.txt"), "na_ve.txt");
    }

    #[test]
    fn object_keys_are_namespaced_by_uploader() {
        let user = uuid::Uuid::nil();
        assert_eq!(object_key(user, "a b.png", 42), format!("{user}/42_a_b.png"));
    }

    #[test]
    fn traversal_is_rejected() {
        assert!(checked_relative("../x").is_err());
        assert!(checked_relative("/abs").is_err());
        assert!(checked_relative("").is_err());
        assert!(checked_relative("u/1_a.png").is_ok());
    }

    #[tokio::test]
    async fn fs_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path(), "/storage/");
        let url = store.put(Bucket::Avatars, "u/a.txt", "text/plain", b"hi".to_vec()).await.unwrap();
        assert_eq!(url, "/storage/avatars/u/a.txt");
        let (bytes, _) = store.get(Bucket::Avatars, "u/a.txt").await.unwrap();
        assert_eq!(bytes, b"hi");
        store.remove(Bucket::Avatars, "u/a.txt").await.unwrap();
        assert!(matches!(store.get(Bucket::Avatars, "u/a.txt").await, Err(ObjectStoreError::NotFound)));
    }
}
