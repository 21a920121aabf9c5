mod memory;

pub use memory::InMemoryParticipantStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::domain::{Did, ParticipantId, ParticipantRecord, ParticipantState};

/// Durable keyed storage for participant records.
///
/// `compare_and_swap` is the only concurrency-control primitive the state machine relies
/// on: a write succeeds only when the stored version equals `expected_version`, and the
/// persisted copy then carries `expected_version + 1`. Implementations must apply each
/// record write atomically.
#[async_trait]
pub trait ParticipantStore: Send + Sync {
    async fn create(&self, record: ParticipantRecord) -> Result<ParticipantRecord, StoreError>;

    async fn get(&self, id: &ParticipantId) -> Result<ParticipantRecord, StoreError>;

    /// Most recently created record for `did`, if any.
    async fn find_by_did(&self, did: &Did) -> Result<Option<ParticipantRecord>, StoreError>;

    async fn list(
        &self,
        state: Option<ParticipantState>,
    ) -> Result<Vec<ParticipantRecord>, StoreError>;

    /// Non-terminal records whose backoff deadline is at or before `eligible_before`,
    /// oldest `state_timestamp` first. No lock is taken.
    async fn lease_batch(
        &self,
        limit: usize,
        eligible_before: DateTime<Utc>,
    ) -> Result<Vec<ParticipantRecord>, StoreError>;

    async fn compare_and_swap(
        &self,
        record: ParticipantRecord,
        expected_version: u64,
    ) -> Result<ParticipantRecord, StoreError>;
}

/// Error enumeration for store failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("participant {0} already exists")]
    AlreadyExists(ParticipantId),
    #[error("participant {0} not found")]
    NotFound(ParticipantId),
    #[error("version conflict for participant {participant_id} (expected {expected}, found {found})")]
    Conflict {
        participant_id: ParticipantId,
        expected: u64,
        found: u64,
    },
    #[error("participant store unavailable: {0}")]
    Unavailable(String),
}
