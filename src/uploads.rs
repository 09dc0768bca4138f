use std::path::{Component, Path, PathBuf};

use rand::distributions::Alphanumeric;
use rand::Rng;
use thiserror::Error;
use tracing::{error, info};

use crate::error::ApiError;
use crate::storage::sanitize_file_name;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("file is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },
    #[error("invalid file name")]
    InvalidName,
    #[error("not found")]
    NotFound,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl From<UploadError> for ApiError {
    fn from(e: UploadError) -> Self {
        match e {
            UploadError::TooLarge { .. } => ApiError::PayloadTooLarge,
            UploadError::InvalidName | UploadError::NotFound => ApiError::NotFound,
            UploadError::Io(err) => {
                error!("upload write failed: {err}");
                ApiError::Internal
            }
        }
    }
}

/// Server-local upload directory served back under `/uploads/`.
#[derive(Debug, Clone)]
pub struct LocalUploads {
    dir: PathBuf,
    max_bytes: usize,
}

impl LocalUploads {
    pub fn new(dir: impl Into<PathBuf>, max_bytes: usize) -> Self {
        Self { dir: dir.into(), max_bytes }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// `<stem>_<unix_millis>_<6 random alnum>.<ext>`
    pub fn unique_name(original: &str) -> String {
        let clean = sanitize_file_name(original);
        let (stem, ext) = match clean.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => (stem.to_string(), Some(ext.to_ascii_lowercase())),
            _ => (clean.clone(), None),
        };
        let suffix: String = rand::thread_rng().sample_iter(&Alphanumeric).take(6).map(char::from).collect();
        let millis = chrono::Utc::now().timestamp_millis();
        match ext {
            Some(ext) => format!("{stem}_{millis}_{suffix}.{ext}"),
            None => format!("{stem}_{millis}_{suffix}"),
        }
    }

    /// Writes the bytes and returns the relative URL.
    pub async fn save(&self, original: &str, bytes: &[u8]) -> Result<String, UploadError> {
        if bytes.len() > self.max_bytes {
            return Err(UploadError::TooLarge { size: bytes.len(), limit: self.max_bytes });
        }
        tokio::fs::create_dir_all(&self.dir).await?;
        let name = Self::unique_name(original);
        tokio::fs::write(self.dir.join(&name), bytes).await?;
        info!(file = %name, size = bytes.len(), "upload stored");
        Ok(format!("/uploads/{name}"))
    }

    pub async fn open(&self, name: &str) -> Result<(Vec<u8>, String), UploadError> {
        let mut parts = Path::new(name).components();
        match (parts.next(), parts.next()) {
            (Some(Component::Normal(_)), None) => {}
            _ => return Err(UploadError::InvalidName),
        }
        let bytes = tokio::fs::read(self.dir.join(name)).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => UploadError::NotFound,
            _ => UploadError::Io(e),
        })?;
        let mime = infer::get(&bytes)
            .map(|t| t.mime_type().to_string())
            .unwrap_or_else(|| "application/octet-stream".into());
        Ok((bytes, mime))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_name_shape() {
        let name = LocalUploads::unique_name("My Photo.JPG");
        let (rest, ext) = name.rsplit_once('.').unwrap();
        assert_eq!(ext, "jpg");
        let parts: Vec<&str> = rest.rsplitn(3, '_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 6);
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2], "My_Photo");
        assert_ne!(name, LocalUploads::unique_name("My Photo.JPG"));
    }

    #[test]
    fn unique_name_without_extension() {
        assert!(LocalUploads::unique_name("README").starts_with("README_"));
    }

    #[tokio::test]
    async fn rejects_oversized_and_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = LocalUploads::new(dir.path(), 4);
        assert!(matches!(uploads.save("a.txt", b"12345").await, Err(UploadError::TooLarge { .. })));
        assert!(matches!(uploads.open("../secret").await, Err(UploadError::InvalidName)));
        let url = uploads.save("a.txt", b"1234").await.unwrap();
        let name = url.trim_start_matches("/uploads/");
        assert_eq!(uploads.open(name).await.unwrap().0, b"1234");
    }
}
