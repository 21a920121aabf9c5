use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::info;

use super::domain::{
    Did, InvalidDid, ParticipantId, ParticipantRecord, ParticipantState, ParticipantStatusView,
};
use super::machine::is_stalled;
use super::store::{ParticipantStore, StoreError};

/// Submission and query surface over the participant store.
///
/// Only [`RegistrationService::submit_registration`] writes; every other operation reads
/// the last committed state.
pub struct RegistrationService<S> {
    store: Arc<S>,
    stall_threshold: Duration,
}

impl<S> RegistrationService<S>
where
    S: ParticipantStore + 'static,
{
    pub fn new(store: Arc<S>, stall_threshold: Duration) -> Self {
        Self {
            store,
            stall_threshold,
        }
    }

    /// Create a record in ONBOARDING_INITIATED and return it without waiting for any step.
    ///
    /// A DID whose latest registration is still in progress or already onboarded is
    /// rejected; one whose latest registration failed may start over.
    pub async fn submit_registration(
        &self,
        did: &str,
    ) -> Result<ParticipantRecord, RegistrationServiceError> {
        self.submit_at(did, Utc::now()).await
    }

    pub(crate) async fn submit_at(
        &self,
        did: &str,
        now: DateTime<Utc>,
    ) -> Result<ParticipantRecord, RegistrationServiceError> {
        let did = Did::parse(did)?;

        if let Some(existing) = self.store.find_by_did(&did).await? {
            if !existing.state.is_failure() {
                return Err(RegistrationServiceError::AlreadyRegistered {
                    did,
                    participant_id: existing.participant_id,
                    state: existing.state,
                });
            }
        }

        let record = ParticipantRecord::new(ParticipantId::generate(), did, now);
        let stored = self.store.create(record).await?;
        info!(
            participant_id = %stored.participant_id,
            did = %stored.did,
            "registration submitted"
        );
        Ok(stored)
    }

    pub async fn get_status(
        &self,
        participant_id: &ParticipantId,
    ) -> Result<ParticipantStatusView, RegistrationServiceError> {
        let record = self.store.get(participant_id).await?;
        Ok(record.status_view())
    }

    /// Status of the most recent registration for `did`.
    pub async fn find_by_did(
        &self,
        did: &str,
    ) -> Result<ParticipantStatusView, RegistrationServiceError> {
        let did = Did::parse(did)?;
        match self.store.find_by_did(&did).await? {
            Some(record) => Ok(record.status_view()),
            None => Err(RegistrationServiceError::UnknownDid(did)),
        }
    }

    pub async fn list(
        &self,
        state: Option<ParticipantState>,
    ) -> Result<Vec<ParticipantStatusView>, RegistrationServiceError> {
        let records = self.store.list(state).await?;
        Ok(records.iter().map(ParticipantRecord::status_view).collect())
    }

    /// Non-terminal records that have not changed state within the stall threshold.
    pub async fn stalled(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ParticipantStatusView>, RegistrationServiceError> {
        let records = self.store.list(None).await?;
        Ok(records
            .iter()
            .filter(|record| is_stalled(record, now, self.stall_threshold))
            .map(ParticipantRecord::status_view)
            .collect())
    }
}

/// Error raised by the registration service.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationServiceError {
    #[error(transparent)]
    InvalidDid(#[from] InvalidDid),
    #[error("{did} already has registration {participant_id} in state {state}")]
    AlreadyRegistered {
        did: Did,
        participant_id: ParticipantId,
        state: ParticipantState,
    },
    #[error("no registration found for {0}")]
    UnknownDid(Did),
    #[error(transparent)]
    Store(#[from] StoreError),
}
