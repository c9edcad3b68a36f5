use crate::models::{
    FileCandidate, FilePair, FileRole, FileSource, GrantPair, TransferProgress, TransferStatus,
    WriteGrant,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::future::Either;
use futures::stream;
use reqwest::multipart::{Form, Part};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::io::ReaderStream;

/// Size of the slices in-memory files are streamed in
pub const MEMORY_CHUNK_SIZE: usize = 64 * 1024;

/// Form field carrying the file content; must follow every grant field
pub const FILE_FIELD: &str = "file";

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("{role} upload failed: {source}")]
    Network {
        role: FileRole,
        #[source]
        source: reqwest::Error,
    },

    #[error("{role} upload rejected by storage with status {status}: {body}")]
    Rejected {
        role: FileRole,
        status: u16,
        body: String,
    },

    #[error("{role} grant expired at {expired_at}")]
    GrantExpired {
        role: FileRole,
        expired_at: DateTime<Utc>,
    },

    #[error("{role} file is {size} bytes but its grant allows at most {max}")]
    ExceedsGrant { role: FileRole, size: u64, max: u64 },

    #[error("Failed to read {role} file: {source}")]
    Io {
        role: FileRole,
        #[source]
        source: std::io::Error,
    },

    #[error("Upload task ended abnormally: {0}")]
    Task(String),

    #[error("Storage did not confirm both uploads")]
    Unconfirmed,
}

impl TransferError {
    pub fn role(&self) -> Option<FileRole> {
        match self {
            TransferError::Network { role, .. }
            | TransferError::Rejected { role, .. }
            | TransferError::GrantExpired { role, .. }
            | TransferError::ExceedsGrant { role, .. }
            | TransferError::Io { role, .. } => Some(*role),
            TransferError::Task(_) | TransferError::Unconfirmed => None,
        }
    }
}

/// Reports progress of one transfer to the attempt's reducer.
///
/// Sends never fail the transfer: a dropped receiver only means nobody is
/// watching any more.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    role: FileRole,
    tx: mpsc::UnboundedSender<TransferProgress>,
}

impl ProgressSink {
    pub fn new(role: FileRole, tx: mpsc::UnboundedSender<TransferProgress>) -> Self {
        Self { role, tx }
    }

    pub fn role(&self) -> FileRole {
        self.role
    }

    fn emit(&self, bytes_sent: u64, status: TransferStatus) {
        let _ = self.tx.send(TransferProgress {
            role: self.role,
            bytes_sent,
            status,
        });
    }

    pub fn sent(&self, bytes_sent: u64) {
        self.emit(bytes_sent, TransferStatus::InProgress);
    }

    pub fn complete(&self, bytes_total: u64) {
        self.emit(bytes_total, TransferStatus::Complete);
    }

    pub fn failed(&self) {
        self.emit(0, TransferStatus::Failed);
    }
}

/// Performs one form POST against a write grant
#[async_trait]
pub trait StorageUploader: Send + Sync {
    async fn post(
        &self,
        grant: &WriteGrant,
        file: &FileCandidate,
        progress: ProgressSink,
    ) -> Result<(), TransferError>;
}

/// Posts grant fields plus the file straight to the storage endpoint
pub struct HttpStorageUploader {
    client: reqwest::Client,
}

impl HttpStorageUploader {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StorageUploader for HttpStorageUploader {
    async fn post(
        &self,
        grant: &WriteGrant,
        file: &FileCandidate,
        progress: ProgressSink,
    ) -> Result<(), TransferError> {
        let role = progress.role();

        let chunks = match &file.source {
            FileSource::Path(path) => {
                let handle = tokio::fs::File::open(path)
                    .await
                    .map_err(|source| TransferError::Io { role, source })?;
                Either::Left(ReaderStream::new(handle))
            }
            FileSource::Memory(data) => {
                let slices: Vec<Result<Bytes, std::io::Error>> = (0..data.len())
                    .step_by(MEMORY_CHUNK_SIZE)
                    .map(|start| Ok(data.slice(start..(start + MEMORY_CHUNK_SIZE).min(data.len()))))
                    .collect();
                Either::Right(stream::iter(slices))
            }
        };

        progress.sent(0);
        let counter = progress.clone();
        let mut sent = 0u64;
        let body = chunks.map(move |chunk| {
            if let Ok(bytes) = &chunk {
                sent += bytes.len() as u64;
                tracing::trace!("{} chunk of {} bytes ({} sent)", counter.role(), bytes.len(), sent);
                counter.sent(sent);
            }
            chunk
        });

        let part = Part::stream_with_length(reqwest::Body::wrap_stream(body), file.size)
            .file_name(file.name.clone())
            .mime_str(mime::APPLICATION_OCTET_STREAM.as_ref())
            .map_err(|source| TransferError::Network { role, source })?;

        let mut form = Form::new();
        for (name, value) in &grant.fields {
            form = form.text(name.clone(), value.clone());
        }
        let form = form.part(FILE_FIELD, part);

        let response = self
            .client
            .post(&grant.url)
            .multipart(form)
            .send()
            .await
            .map_err(|source| TransferError::Network { role, source })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransferError::Rejected {
                role,
                status: status.as_u16(),
                body: body.chars().take(512).collect(),
            });
        }

        progress.complete(file.size);
        Ok(())
    }
}

/// Runs the two transfers of an attempt side by side.
///
/// The first failure aborts the sibling and is returned as is; success means
/// storage acknowledged both files.
#[derive(Clone)]
pub struct UploadCoordinator {
    uploader: Arc<dyn StorageUploader>,
}

impl UploadCoordinator {
    pub fn new(uploader: Arc<dyn StorageUploader>) -> Self {
        Self { uploader }
    }

    /// Rejects grants that are already unusable before any byte is sent
    fn check_grant(
        role: FileRole,
        file: &FileCandidate,
        grant: &WriteGrant,
        now: DateTime<Utc>,
    ) -> Result<(), TransferError> {
        if grant.is_expired(now) {
            return Err(TransferError::GrantExpired {
                role,
                expired_at: grant.expires_at,
            });
        }
        if file.size > grant.constraints.max_bytes {
            return Err(TransferError::ExceedsGrant {
                role,
                size: file.size,
                max: grant.constraints.max_bytes,
            });
        }
        Ok(())
    }

    pub async fn upload(
        &self,
        pair: &FilePair,
        grants: &GrantPair,
        events: mpsc::UnboundedSender<TransferProgress>,
    ) -> Result<(), TransferError> {
        let roles = [FileRole::Primary, FileRole::Index];

        let now = Utc::now();
        for role in roles {
            if let Err(e) = Self::check_grant(role, pair.get(role), grants.get(role), now) {
                ProgressSink::new(role, events.clone()).failed();
                return Err(e);
            }
        }

        let mut tasks = JoinSet::new();
        for role in roles {
            let uploader = self.uploader.clone();
            let file = pair.get(role).clone();
            let grant = grants.get(role).clone();
            let sink = ProgressSink::new(role, events.clone());

            tasks.spawn(async move {
                tracing::info!("⬆️  Uploading {} ({} bytes) to {}", file.name, file.size, grant.target_key);
                let result = uploader.post(&grant, &file, sink.clone()).await;
                if result.is_err() {
                    sink.failed();
                }
                result
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let failure = match joined {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e,
                Err(e) => TransferError::Task(e.to_string()),
            };

            if !tasks.is_empty() {
                tracing::warn!("Cancelling sibling transfer after failure: {}", failure);
            }
            tasks.abort_all();
            return Err(failure);
        }

        Ok(())
    }
}
