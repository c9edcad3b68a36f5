use crate::utils::validation::MAX_FILE_SIZE;
use std::env;

/// Configuration of the submitting side (CLI or embedding application)
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the grant issuing API (default: "http://127.0.0.1:3000")
    pub frontend_api_url: String,

    /// Base URL of the job submission API (default: "http://127.0.0.1:8080")
    pub backend_api_url: String,

    /// Maximum size of each file in bytes (default: 200,000,000)
    pub max_file_size: u64,

    /// Validity assumed for a grant that carries no policy, in seconds (default: 3600)
    pub grant_validity_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            frontend_api_url: "http://127.0.0.1:3000".to_string(),
            backend_api_url: "http://127.0.0.1:8080".to_string(),
            max_file_size: MAX_FILE_SIZE,
            grant_validity_secs: 3600,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            frontend_api_url: env::var("FRONTEND_API_URL").unwrap_or(default.frontend_api_url),

            backend_api_url: env::var("BACKEND_API_URL").unwrap_or(default.backend_api_url),

            max_file_size: env::var("MAX_FILE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_file_size),

            grant_validity_secs: env::var("GRANT_VALIDITY_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.grant_validity_secs),
        }
    }
}

/// Configuration of the grant issuing service
#[derive(Debug, Clone)]
pub struct IssuerConfig {
    /// Listen address (default: "127.0.0.1:3000")
    pub bind_addr: String,

    /// Bucket receiving uploads
    pub bucket: String,

    /// Signing region (default: "us-east-1")
    pub region: String,

    /// Custom S3 endpoint; grants use path-style URLs when set
    pub endpoint: Option<String>,

    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,

    /// Key prefix of uploaded objects (default: "uploads")
    pub upload_prefix: String,

    /// Per-grant content-length limit in bytes (default: 200,000,000)
    pub grant_max_bytes: u64,

    /// Grant lifetime in seconds (default: 3600)
    pub grant_expiry_secs: u64,

    /// Allowed CORS Origins (comma separated)
    pub allowed_origins: Vec<String>,
}

impl Default for IssuerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".to_string(),
            bucket: "uploads".to_string(),
            region: "us-east-1".to_string(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            upload_prefix: "uploads".to_string(),
            grant_max_bytes: MAX_FILE_SIZE,
            grant_expiry_secs: 3600,
            allowed_origins: vec![
                "http://localhost:4200".to_string(),
                "http://127.0.0.1:4200".to_string(),
            ],
        }
    }
}

impl IssuerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            bind_addr: env::var("BIND_ADDR").unwrap_or(default.bind_addr),

            bucket: env::var("UPLOAD_BUCKET").unwrap_or(default.bucket),

            region: env::var("AWS_REGION").unwrap_or(default.region),

            endpoint: env::var("S3_ENDPOINT").ok().filter(|v| !v.is_empty()),

            access_key_id: env::var("AWS_ACCESS_KEY_ID").ok(),
            secret_access_key: env::var("AWS_SECRET_ACCESS_KEY").ok(),
            session_token: env::var("AWS_SESSION_TOKEN").ok().filter(|v| !v.is_empty()),

            upload_prefix: env::var("UPLOAD_PREFIX").unwrap_or(default.upload_prefix),

            grant_max_bytes: env::var("GRANT_MAX_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.grant_max_bytes),

            grant_expiry_secs: env::var("GRANT_EXPIRY_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.grant_expiry_secs),

            allowed_origins: env::var("ALLOWED_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or(default.allowed_origins),
        }
    }

    /// Create config for development against a local MinIO
    pub fn development() -> Self {
        Self {
            endpoint: Some("http://127.0.0.1:9000".to_string()),
            access_key_id: Some("minioadmin".to_string()),
            secret_access_key: Some("minioadmin".to_string()),
            ..Self::default()
        }
    }
}
