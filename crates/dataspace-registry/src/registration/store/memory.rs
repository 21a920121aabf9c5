use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{ParticipantStore, StoreError};
use crate::registration::domain::{Did, ParticipantId, ParticipantRecord, ParticipantState};

/// Process-local store used by the demo service and tests.
#[derive(Debug, Default, Clone)]
pub struct InMemoryParticipantStore {
    records: Arc<Mutex<HashMap<ParticipantId, ParticipantRecord>>>,
}

impl InMemoryParticipantStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(
        &self,
    ) -> Result<MutexGuard<'_, HashMap<ParticipantId, ParticipantRecord>>, StoreError> {
        self.records
            .lock()
            .map_err(|_| StoreError::Unavailable("participant store mutex poisoned".to_string()))
    }
}

#[async_trait]
impl ParticipantStore for InMemoryParticipantStore {
    async fn create(&self, record: ParticipantRecord) -> Result<ParticipantRecord, StoreError> {
        let mut guard = self.records()?;
        if guard.contains_key(&record.participant_id) {
            return Err(StoreError::AlreadyExists(record.participant_id));
        }
        guard.insert(record.participant_id.clone(), record.clone());
        Ok(record)
    }

    async fn get(&self, id: &ParticipantId) -> Result<ParticipantRecord, StoreError> {
        let guard = self.records()?;
        guard
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn find_by_did(&self, did: &Did) -> Result<Option<ParticipantRecord>, StoreError> {
        let guard = self.records()?;
        Ok(guard
            .values()
            .filter(|record| &record.did == did)
            .max_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.participant_id.cmp(&b.participant_id))
            })
            .cloned())
    }

    async fn list(
        &self,
        state: Option<ParticipantState>,
    ) -> Result<Vec<ParticipantRecord>, StoreError> {
        let guard = self.records()?;
        let mut records: Vec<ParticipantRecord> = guard
            .values()
            .filter(|record| state.map_or(true, |wanted| record.state == wanted))
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.participant_id.cmp(&b.participant_id))
        });
        Ok(records)
    }

    async fn lease_batch(
        &self,
        limit: usize,
        eligible_before: DateTime<Utc>,
    ) -> Result<Vec<ParticipantRecord>, StoreError> {
        let guard = self.records()?;
        let mut due: Vec<ParticipantRecord> = guard
            .values()
            .filter(|record| {
                !record.state.is_terminal() && record.next_attempt_at <= eligible_before
            })
            .cloned()
            .collect();
        due.sort_by(|a, b| {
            a.state_timestamp
                .cmp(&b.state_timestamp)
                .then_with(|| a.participant_id.cmp(&b.participant_id))
        });
        due.truncate(limit);
        Ok(due)
    }

    async fn compare_and_swap(
        &self,
        mut record: ParticipantRecord,
        expected_version: u64,
    ) -> Result<ParticipantRecord, StoreError> {
        let mut guard = self.records()?;
        let stored = guard
            .get(&record.participant_id)
            .ok_or_else(|| StoreError::NotFound(record.participant_id.clone()))?;

        if stored.version != expected_version {
            return Err(StoreError::Conflict {
                participant_id: record.participant_id,
                expected: expected_version,
                found: stored.version,
            });
        }

        record.version = expected_version + 1;
        guard.insert(record.participant_id.clone(), record.clone());
        Ok(record)
    }
}
