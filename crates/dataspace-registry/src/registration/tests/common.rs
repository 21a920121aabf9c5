use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::response::Response;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};

use crate::config::{BackoffConfig, RegistrationConfig, RetryBudgets};
use crate::registration::domain::{
    ClaimSet, Did, IdentityDescriptor, ParticipantId, ParticipantRecord, ParticipantState,
    PolicyDecision, VerifiedClaims,
};
use crate::registration::policy::{ClaimPolicy, PolicyError, PolicyEvaluator};
use crate::registration::store::{InMemoryParticipantStore, ParticipantStore, StoreError};
use crate::registration::verification::{VerificationClient, VerificationError};
use crate::registration::{RegistrationService, RegistrationStateMachine};

pub(super) type TestMachine =
    RegistrationStateMachine<InMemoryParticipantStore, ScriptedVerifier, ScriptedPolicy>;

pub(super) fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn registration_config() -> RegistrationConfig {
    RegistrationConfig {
        poll_interval: Duration::from_millis(10),
        batch_size: 10,
        workers: 1,
        retry_budgets: RetryBudgets::default(),
        backoff: BackoffConfig {
            base: Duration::from_secs(1),
            multiplier: 2.0,
            cap: Duration::from_secs(8),
        },
        call_timeout: Duration::from_millis(200),
        stall_threshold: Duration::from_secs(15 * 60),
    }
}

pub(super) fn member_claims() -> ClaimSet {
    let mut claims = ClaimSet::new();
    claims.insert(
        "vc-membership".to_string(),
        json!({ "vc": { "credentialSubject": { "gaiaXMember": "true" } } }),
    );
    claims
}

pub(super) fn identity_for(did: &Did) -> IdentityDescriptor {
    IdentityDescriptor {
        did: did.clone(),
        verification_methods: vec![format!("{did}#key-1")],
        credentials_endpoint: Some("https://registry.example/credentials".to_string()),
        presented_claims: member_claims(),
    }
}

pub(super) fn did(raw: &str) -> Did {
    Did::parse(raw).expect("valid did")
}

pub(super) fn seeded_record(raw_did: &str, now: DateTime<Utc>) -> ParticipantRecord {
    ParticipantRecord::new(ParticipantId::generate(), did(raw_did), now)
}

/// Verifier that replays queued failures before succeeding.
#[derive(Default)]
pub(super) struct ScriptedVerifier {
    identity_failures: Mutex<VecDeque<VerificationError>>,
    credential_failures: Mutex<VecDeque<VerificationError>>,
    identity_calls: AtomicUsize,
    credential_calls: AtomicUsize,
    hang_for: Option<Duration>,
}

impl ScriptedVerifier {
    pub(super) fn hanging(delay: Duration) -> Self {
        Self {
            hang_for: Some(delay),
            ..Self::default()
        }
    }

    pub(super) fn fail_identity(&self, error: VerificationError, times: usize) {
        let mut queue = self.identity_failures.lock().expect("script mutex poisoned");
        queue.extend(std::iter::repeat(error).take(times));
    }

    pub(super) fn fail_credentials(&self, error: VerificationError, times: usize) {
        let mut queue = self
            .credential_failures
            .lock()
            .expect("script mutex poisoned");
        queue.extend(std::iter::repeat(error).take(times));
    }

    pub(super) fn identity_calls(&self) -> usize {
        self.identity_calls.load(Ordering::SeqCst)
    }

    pub(super) fn credential_calls(&self) -> usize {
        self.credential_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VerificationClient for ScriptedVerifier {
    async fn resolve_identity(&self, did: &Did) -> Result<IdentityDescriptor, VerificationError> {
        self.identity_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.hang_for {
            tokio::time::sleep(delay).await;
        }
        let scripted = self
            .identity_failures
            .lock()
            .expect("script mutex poisoned")
            .pop_front();
        match scripted {
            Some(error) => Err(error),
            None => Ok(identity_for(did)),
        }
    }

    async fn verify_credentials(
        &self,
        participant_id: &ParticipantId,
        claims: &ClaimSet,
    ) -> Result<VerifiedClaims, VerificationError> {
        self.credential_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self
            .credential_failures
            .lock()
            .expect("script mutex poisoned")
            .pop_front();
        match scripted {
            Some(error) => Err(error),
            None => Ok(VerifiedClaims {
                participant_id: participant_id.clone(),
                claims: claims.clone(),
            }),
        }
    }
}

/// Policy that replays queued outcomes, then defers to the default claim policy.
#[derive(Default)]
pub(super) struct ScriptedPolicy {
    outcomes: Mutex<VecDeque<Result<PolicyDecision, PolicyError>>>,
    calls: AtomicUsize,
}

impl ScriptedPolicy {
    pub(super) fn push(&self, outcome: Result<PolicyDecision, PolicyError>) {
        self.outcomes
            .lock()
            .expect("script mutex poisoned")
            .push_back(outcome);
    }

    pub(super) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PolicyEvaluator for ScriptedPolicy {
    async fn evaluate(&self, claims: &VerifiedClaims) -> Result<PolicyDecision, PolicyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self
            .outcomes
            .lock()
            .expect("script mutex poisoned")
            .pop_front();
        match scripted {
            Some(outcome) => outcome,
            None => ClaimPolicy::default().evaluate(claims).await,
        }
    }
}

pub(super) struct UnavailableStore;

#[async_trait]
impl ParticipantStore for UnavailableStore {
    async fn create(&self, _record: ParticipantRecord) -> Result<ParticipantRecord, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    async fn get(&self, _id: &ParticipantId) -> Result<ParticipantRecord, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    async fn find_by_did(&self, _did: &Did) -> Result<Option<ParticipantRecord>, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    async fn list(
        &self,
        _state: Option<ParticipantState>,
    ) -> Result<Vec<ParticipantRecord>, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    async fn lease_batch(
        &self,
        _limit: usize,
        _eligible_before: DateTime<Utc>,
    ) -> Result<Vec<ParticipantRecord>, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    async fn compare_and_swap(
        &self,
        _record: ParticipantRecord,
        _expected_version: u64,
    ) -> Result<ParticipantRecord, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }
}

pub(super) struct Harness {
    pub(super) store: Arc<InMemoryParticipantStore>,
    pub(super) verifier: Arc<ScriptedVerifier>,
    pub(super) policy: Arc<ScriptedPolicy>,
    pub(super) machine: Arc<TestMachine>,
    pub(super) service: Arc<RegistrationService<InMemoryParticipantStore>>,
}

pub(super) fn harness() -> Harness {
    harness_with(ScriptedVerifier::default(), registration_config())
}

pub(super) fn harness_with(verifier: ScriptedVerifier, config: RegistrationConfig) -> Harness {
    let store = Arc::new(InMemoryParticipantStore::new());
    let verifier = Arc::new(verifier);
    let policy = Arc::new(ScriptedPolicy::default());
    let service = Arc::new(RegistrationService::new(
        store.clone(),
        config.stall_threshold,
    ));
    let machine = Arc::new(RegistrationStateMachine::new(
        store.clone(),
        verifier.clone(),
        policy.clone(),
        config,
    ));
    Harness {
        store,
        verifier,
        policy,
        machine,
        service,
    }
}

impl Harness {
    /// Run cycles a minute apart until nothing is leased, returning the final clock.
    pub(super) async fn drain(&self, mut now: DateTime<Utc>) -> DateTime<Utc> {
        for _ in 0..64 {
            let report = self.machine.run_cycle(now).await.expect("cycle runs");
            if report.leased == 0 {
                break;
            }
            now += chrono::Duration::minutes(1);
        }
        now
    }

    pub(super) async fn record(&self, id: &ParticipantId) -> ParticipantRecord {
        self.store.get(id).await.expect("record exists")
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
