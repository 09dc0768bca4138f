use std::env;
use std::path::PathBuf;

use crate::rate_limit::RateLimitConfig;

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024; // 10 MB
const MIN_JWT_SECRET_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    S3,
    Fs,
}

/// Process configuration gathered from the environment at start-up.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub frontend_url: String,
    pub database_url: Option<String>,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub storage_backend: StorageBackend,
    pub storage_dir: PathBuf,
    pub storage_public_url: String,
    pub data_dir: Option<PathBuf>,
    pub enable_hsts: bool,
    pub rate_limit_enabled: bool,
    pub rate_limits: RateLimitConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variables: {0:?}")]
    Missing(Vec<&'static str>),
    #[error("JWT_SECRET must be at least 32 characters long")]
    WeakSecret,
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}

fn flag(name: &str) -> bool {
    env::var(name).map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false)
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut missing = Vec::new();
        match env::var("JWT_SECRET") {
            Ok(secret) if secret.len() < MIN_JWT_SECRET_LEN => return Err(ConfigError::WeakSecret),
            Ok(_) => {}
            Err(_) => missing.push("JWT_SECRET"),
        }
        if cfg!(feature = "postgres-store") && env::var("DATABASE_URL").is_err() {
            missing.push("DATABASE_URL");
        }
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        let storage_backend = match env::var("STORAGE_BACKEND").unwrap_or_else(|_| "fs".into()).to_lowercase().as_str() {
            "s3" => StorageBackend::S3,
            "fs" => StorageBackend::Fs,
            other => return Err(ConfigError::Invalid("STORAGE_BACKEND", other.to_string())),
        };
        let max_upload_bytes = match env::var("MAX_UPLOAD_BYTES") {
            Ok(v) => v.parse().map_err(|_| ConfigError::Invalid("MAX_UPLOAD_BYTES", v))?,
            Err(_) => DEFAULT_MAX_UPLOAD_BYTES,
        };
        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into());

        Ok(Self {
            bind_addr,
            storage_public_url: env::var("STORAGE_PUBLIC_URL").unwrap_or_else(|_| "/storage".into()),
            frontend_url: env::var("FRONTEND_URL").unwrap_or_else(|_| "http://localhost:5173".into()),
            database_url: env::var("DATABASE_URL").ok(),
            upload_dir: env::var("UPLOAD_DIR").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("uploads")),
            max_upload_bytes,
            storage_backend,
            storage_dir: env::var("STORAGE_DIR").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("storage")),
            data_dir: env::var("CAMPUS_DATA_DIR").ok().map(PathBuf::from),
            enable_hsts: flag("ENABLE_HSTS"),
            rate_limit_enabled: !flag("RL_DISABLED"),
            rate_limits: RateLimitConfig::from_env(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn rejects_short_secret() {
        env::set_var("JWT_SECRET", "short");
        assert!(matches!(AppConfig::from_env(), Err(ConfigError::WeakSecret)));
    }

    #[test]
    #[serial]
    fn defaults_apply() {
        env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
        env::remove_var("MAX_UPLOAD_BYTES");
        env::remove_var("STORAGE_BACKEND");
        let cfg = AppConfig::from_env().unwrap();
        assert_eq!(cfg.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
        assert_eq!(cfg.storage_backend, StorageBackend::Fs);
    }
}
