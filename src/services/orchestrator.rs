//! Sequencing of one submission attempt: validate, obtain grants, upload,
//! submit. The current state is published on a watch channel for whatever
//! presentation sits on top.

use crate::models::{
    FileCandidate, FilePair, FileRole, GrantPair, Job, StorageLocator, TransferProgress,
    TransferState,
};
use crate::services::credentials::{CredentialError, CredentialIssuer};
use crate::services::progress::ProgressAggregator;
use crate::services::submission::{JobSubmitter, SubmissionDispatcher, SubmissionError};
use crate::services::upload::{StorageUploader, TransferError, UploadCoordinator};
use crate::utils::validation::{self, ValidationError};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

#[derive(Debug, Clone, PartialEq)]
pub enum OrchestratorState {
    Idle,
    Validating,
    CredentialsPending,
    Uploading { percent: f64 },
    Submitting,
    Done { job: Job },
    Error { message: String },
}

impl OrchestratorState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrchestratorState::Done { .. } | OrchestratorState::Error { .. }
        )
    }
}

/// What a user hands over to start an attempt.
///
/// Dropped files, a pair from a [`validation::FileSelection`] and a location
/// picked from already-resident data all enter through here.
#[derive(Debug, Clone)]
pub enum AttemptInput {
    Files(Vec<FileCandidate>),
    Pair(FilePair),
    Locator(String),
}

#[derive(Debug, Error)]
pub enum AttemptError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Submission(#[from] SubmissionError),

    #[error("An attempt is already in progress or awaiting reset")]
    Busy,

    #[error("This attempt has already been submitted")]
    AlreadyDispatched,
}

impl AttemptError {
    /// Whether the error was caught locally, before any network call
    pub fn is_validation(&self) -> bool {
        matches!(self, AttemptError::Validation(_))
    }
}

/// Everything bound to the current attempt; dropped wholesale on reset
#[derive(Debug, Default)]
struct Attempt {
    pair: Option<FilePair>,
    grants: Option<GrantPair>,
    transfers: Option<ProgressAggregator>,
    locator: Option<StorageLocator>,
    dispatched: bool,
    job: Option<Job>,
}

pub struct Orchestrator {
    issuer: Arc<dyn CredentialIssuer>,
    coordinator: UploadCoordinator,
    dispatcher: SubmissionDispatcher,
    max_file_size: u64,
    attempt: Attempt,
    state: watch::Sender<OrchestratorState>,
}

impl Orchestrator {
    pub fn new(
        issuer: Arc<dyn CredentialIssuer>,
        uploader: Arc<dyn StorageUploader>,
        submitter: Arc<dyn JobSubmitter>,
        max_file_size: u64,
    ) -> Self {
        let (state, _) = watch::channel(OrchestratorState::Idle);
        Self {
            issuer,
            coordinator: UploadCoordinator::new(uploader),
            dispatcher: SubmissionDispatcher::new(submitter),
            max_file_size,
            attempt: Attempt::default(),
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<OrchestratorState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> OrchestratorState {
        self.state.borrow().clone()
    }

    pub fn transfer_state(&self, role: FileRole) -> Option<TransferState> {
        self.attempt.transfers.as_ref().map(|t| *t.state(role))
    }

    pub fn pair(&self) -> Option<&FilePair> {
        self.attempt.pair.as_ref()
    }

    pub fn grants(&self) -> Option<&GrantPair> {
        self.attempt.grants.as_ref()
    }

    pub fn locator(&self) -> Option<&StorageLocator> {
        self.attempt.locator.as_ref()
    }

    pub fn job(&self) -> Option<&Job> {
        self.attempt.job.as_ref()
    }

    /// Discards the current attempt and returns to `Idle`
    pub fn reset(&mut self) {
        self.attempt = Attempt::default();
        self.transition(OrchestratorState::Idle);
    }

    fn transition(&self, next: OrchestratorState) {
        let previous = self.state.send_replace(next);
        let current = self.state.borrow();
        if std::mem::discriminant(&previous) != std::mem::discriminant(&*current) {
            tracing::info!("Attempt state {:?} -> {:?}", previous, *current);
        }
    }

    /// Runs one attempt to `Done` or `Error`.
    ///
    /// Only accepted from `Idle`; a finished attempt must be reset first.
    pub async fn submit(
        &mut self,
        input: AttemptInput,
        caller_id: Option<&str>,
    ) -> Result<Job, AttemptError> {
        if *self.state.borrow() != OrchestratorState::Idle {
            return Err(AttemptError::Busy);
        }

        let result = self.run(input, caller_id).await;
        match &result {
            Ok(job) => self.transition(OrchestratorState::Done { job: job.clone() }),
            Err(e) => {
                if e.is_validation() {
                    tracing::warn!("Attempt rejected: {}", e);
                } else {
                    tracing::error!("Attempt failed: {}", e);
                }
                self.transition(OrchestratorState::Error {
                    message: e.to_string(),
                });
            }
        }
        result
    }

    async fn run(
        &mut self,
        input: AttemptInput,
        caller_id: Option<&str>,
    ) -> Result<Job, AttemptError> {
        self.transition(OrchestratorState::Validating);

        let (locator, location) = match input {
            // Resident data is submitted exactly as typed
            AttemptInput::Locator(raw) => (validation::parse_locator(&raw)?, raw),
            AttemptInput::Files(candidates) => {
                let pair = match validation::validate(&candidates, self.max_file_size)? {
                    Some(pair) => pair,
                    None => return Err(Self::missing_role(&candidates).into()),
                };
                let locator = self.upload(pair).await?;
                let location = locator.to_string();
                (locator, location)
            }
            AttemptInput::Pair(pair) => {
                validation::validate_file_size(pair.primary(), self.max_file_size)?;
                validation::validate_file_size(pair.index(), self.max_file_size)?;
                let locator = self.upload(pair).await?;
                let location = locator.to_string();
                (locator, location)
            }
        };

        self.dispatch(locator, &location, caller_id).await
    }

    fn missing_role(candidates: &[FileCandidate]) -> ValidationError {
        let has_primary = candidates
            .iter()
            .any(|c| validation::role_of(&c.name) == Some(FileRole::Primary));
        ValidationError::MissingCounterpart(if has_primary {
            FileRole::Index
        } else {
            FileRole::Primary
        })
    }

    async fn upload(&mut self, pair: FilePair) -> Result<StorageLocator, AttemptError> {
        self.attempt.pair = Some(pair.clone());
        self.transition(OrchestratorState::CredentialsPending);

        let grants = self
            .issuer
            .issue(&pair.primary().name, &pair.index().name)
            .await?;
        let locator = StorageLocator::from_grant(&grants.primary);
        self.attempt.grants = Some(grants.clone());
        self.attempt.transfers = Some(ProgressAggregator::new(
            pair.primary().size,
            pair.index().size,
        ));
        self.transition(OrchestratorState::Uploading { percent: 0.0 });

        let coordinator = self.coordinator.clone();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let transfer = coordinator.upload(&pair, &grants, tx);
        tokio::pin!(transfer);

        let outcome = loop {
            tokio::select! {
                outcome = &mut transfer => break outcome,
                Some(event) = rx.recv() => self.record(event),
            }
        };
        while let Ok(event) = rx.try_recv() {
            self.record(event);
        }
        outcome?;

        let confirmed = self
            .attempt
            .transfers
            .as_ref()
            .is_some_and(ProgressAggregator::both_complete);
        if !confirmed {
            return Err(TransferError::Unconfirmed.into());
        }

        Ok(locator)
    }

    fn record(&mut self, event: TransferProgress) {
        let Some(transfers) = self.attempt.transfers.as_mut() else {
            return;
        };
        let percent = transfers.apply(&event);
        tracing::debug!("{} at {} bytes, attempt {:.1}%", event.role, event.bytes_sent, percent);

        self.state.send_if_modified(|state| match state {
            OrchestratorState::Uploading { percent: current } if *current != percent => {
                *current = percent;
                true
            }
            _ => false,
        });
    }

    async fn dispatch(
        &mut self,
        locator: StorageLocator,
        location: &str,
        caller_id: Option<&str>,
    ) -> Result<Job, AttemptError> {
        if self.attempt.dispatched {
            return Err(AttemptError::AlreadyDispatched);
        }
        self.attempt.dispatched = true;
        self.attempt.locator = Some(locator);
        self.transition(OrchestratorState::Submitting);

        let job = self.dispatcher.submit(location, caller_id).await?;
        self.attempt.job = Some(job.clone());
        Ok(job)
    }
}
