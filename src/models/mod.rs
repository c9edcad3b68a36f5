use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use utoipa::ToSchema;

/// Where the bytes of a candidate file live.
#[derive(Debug, Clone)]
pub enum FileSource {
    Path(PathBuf),
    Memory(Bytes),
}

/// A user-supplied file, as picked or dropped, before pairing.
#[derive(Debug, Clone)]
pub struct FileCandidate {
    pub name: String,
    pub size: u64,
    pub source: FileSource,
}

impl FileCandidate {
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            name: name.into(),
            size: data.len() as u64,
            source: FileSource::Memory(data),
        }
    }

    /// Builds a candidate from a file on disk; the name is the final path component.
    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();

        Ok(Self {
            name,
            size: metadata.len(),
            source: FileSource::Path(path.to_path_buf()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileRole {
    Primary,
    Index,
}

impl fmt::Display for FileRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileRole::Primary => write!(f, "vcf"),
            FileRole::Index => write!(f, "index"),
        }
    }
}

/// A matched VCF and index. Only the validator hands these out.
#[derive(Debug, Clone)]
pub struct FilePair {
    primary: FileCandidate,
    index: FileCandidate,
}

impl FilePair {
    pub(crate) fn new(primary: FileCandidate, index: FileCandidate) -> Self {
        Self { primary, index }
    }

    pub fn primary(&self) -> &FileCandidate {
        &self.primary
    }

    pub fn index(&self) -> &FileCandidate {
        &self.index
    }

    pub fn get(&self, role: FileRole) -> &FileCandidate {
        match role {
            FileRole::Primary => &self.primary,
            FileRole::Index => &self.index,
        }
    }

    pub fn total_size(&self) -> u64 {
        self.primary.size + self.index.size
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrantConstraints {
    pub max_bytes: u64,
}

/// Single-use permission to POST one object to storage.
#[derive(Debug, Clone)]
pub struct WriteGrant {
    pub url: String,
    pub bucket: String,
    pub target_key: String,
    pub expires_at: DateTime<Utc>,
    pub constraints: GrantConstraints,
    /// Opaque form fields, sent verbatim ahead of the file part.
    pub fields: BTreeMap<String, String>,
}

impl WriteGrant {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone)]
pub struct GrantPair {
    pub primary: WriteGrant,
    pub index: WriteGrant,
}

impl GrantPair {
    pub fn get(&self, role: FileRole) -> &WriteGrant {
        match role {
            FileRole::Primary => &self.primary,
            FileRole::Index => &self.index,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Pending,
    InProgress,
    Complete,
    Failed,
}

impl TransferStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TransferStatus::Complete | TransferStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferState {
    pub bytes_sent: u64,
    pub bytes_total: u64,
    pub status: TransferStatus,
}

impl TransferState {
    pub fn new(bytes_total: u64) -> Self {
        Self {
            bytes_sent: 0,
            bytes_total,
            status: TransferStatus::Pending,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == TransferStatus::Complete
    }
}

/// One progress report from a running transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub role: FileRole,
    pub bytes_sent: u64,
    pub status: TransferStatus,
}

/// Canonical address of an object in the content store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLocator {
    pub bucket: String,
    pub key: String,
}

impl StorageLocator {
    pub fn from_grant(grant: &WriteGrant) -> Self {
        Self {
            bucket: grant.bucket.clone(),
            key: grant.target_key.clone(),
        }
    }
}

impl fmt::Display for StorageLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmissionRequest {
    pub location: String,
    #[serde(rename = "callerId", default, skip_serializing_if = "Option::is_none")]
    pub caller_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: String,
}

// Wire types of the grant issuing endpoint.

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SignedPost {
    pub url: String,
    pub fields: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SignedUrls {
    pub vcf_url: SignedPost,
    pub index_url: SignedPost,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SignedUrlResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urls: Option<SignedUrls>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
