use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier wrapper for participant records. Assigned once, never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub String);

impl ParticipantId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Decentralized identifier supplied by the participant at registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Did(String);

impl Did {
    /// Accepts `did:<method>:<method-specific-id>` with non-empty segments.
    pub fn parse(raw: &str) -> Result<Self, InvalidDid> {
        let trimmed = raw.trim();
        let mut segments = trimmed.splitn(3, ':');
        let scheme = segments.next().unwrap_or_default();
        let method = segments.next().unwrap_or_default();
        let specific = segments.next().unwrap_or_default();

        let method_ok = !method.is_empty()
            && method
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit());

        if scheme != "did" || !method_ok || specific.is_empty() {
            return Err(InvalidDid(raw.to_string()));
        }

        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn method(&self) -> &str {
        self.0.split(':').nth(1).unwrap_or_default()
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Did {
    type Error = InvalidDid;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl From<Did> for String {
    fn from(did: Did) -> Self {
        did.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{0}' is not a valid DID (expected did:<method>:<id>)")]
pub struct InvalidDid(pub String);

/// Registration states. Transitions are restricted to [`ParticipantState::successors`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantState {
    OnboardingInitiated,
    VerifyingIdentity,
    VerifyingCredentials,
    EvaluatingPolicy,
    Onboarded,
    PolicyDenied,
    VerificationFailed,
}

impl ParticipantState {
    pub const fn ordered() -> [Self; 7] {
        [
            Self::OnboardingInitiated,
            Self::VerifyingIdentity,
            Self::VerifyingCredentials,
            Self::EvaluatingPolicy,
            Self::Onboarded,
            Self::PolicyDenied,
            Self::VerificationFailed,
        ]
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::OnboardingInitiated => "ONBOARDING_INITIATED",
            Self::VerifyingIdentity => "VERIFYING_IDENTITY",
            Self::VerifyingCredentials => "VERIFYING_CREDENTIALS",
            Self::EvaluatingPolicy => "EVALUATING_POLICY",
            Self::Onboarded => "ONBOARDED",
            Self::PolicyDenied => "POLICY_DENIED",
            Self::VerificationFailed => "VERIFICATION_FAILED",
        }
    }

    pub fn from_label(raw: &str) -> Option<Self> {
        Self::ordered()
            .into_iter()
            .find(|state| state.label().eq_ignore_ascii_case(raw.trim()))
    }

    /// The transition graph; terminal states have no successors.
    pub const fn successors(self) -> &'static [Self] {
        match self {
            Self::OnboardingInitiated => &[Self::VerifyingIdentity],
            Self::VerifyingIdentity => &[
                Self::VerifyingCredentials,
                Self::VerificationFailed,
                Self::OnboardingInitiated,
            ],
            Self::VerifyingCredentials => &[
                Self::EvaluatingPolicy,
                Self::VerificationFailed,
                Self::VerifyingCredentials,
            ],
            Self::EvaluatingPolicy => &[
                Self::Onboarded,
                Self::PolicyDenied,
                Self::EvaluatingPolicy,
            ],
            Self::Onboarded | Self::PolicyDenied | Self::VerificationFailed => &[],
        }
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        self.successors().contains(&next)
    }

    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Onboarded | Self::PolicyDenied | Self::VerificationFailed
        )
    }

    pub const fn is_failure(self) -> bool {
        matches!(self, Self::PolicyDenied | Self::VerificationFailed)
    }

    /// Coarse status exposed to callers so internal pipeline states stay private.
    pub const fn public_status(self) -> PublicStatus {
        match self {
            Self::OnboardingInitiated
            | Self::VerifyingIdentity
            | Self::VerifyingCredentials
            | Self::EvaluatingPolicy => PublicStatus::OnboardingInProgress,
            Self::Onboarded => PublicStatus::Onboarded,
            Self::PolicyDenied | Self::VerificationFailed => PublicStatus::Denied,
        }
    }
}

impl fmt::Display for ParticipantState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PublicStatus {
    OnboardingInProgress,
    Onboarded,
    Denied,
}

/// Claim set keyed by credential/claim name; ordered so evaluation is deterministic.
pub type ClaimSet = BTreeMap<String, serde_json::Value>;

/// Result of resolving a participant DID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityDescriptor {
    pub did: Did,
    pub verification_methods: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_endpoint: Option<String>,
    /// Credentials the participant presents, still unverified.
    pub presented_claims: ClaimSet,
}

/// Claims that passed credential verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifiedClaims {
    pub participant_id: ParticipantId,
    pub claims: ClaimSet,
}

impl VerifiedClaims {
    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.claims.get(name)
    }
}

/// Outcome of a membership policy evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyDecision {
    Allow,
    Deny { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot transition from {from} to {to}")]
pub struct TransitionError {
    pub from: ParticipantState,
    pub to: ParticipantState,
}

/// Persisted registration entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantRecord {
    pub participant_id: ParticipantId,
    pub did: Did,
    pub state: ParticipantState,
    pub state_timestamp: DateTime<Utc>,
    pub retry_count: u32,
    pub error_detail: Option<String>,
    /// Backoff deadline; the record is not leased before this instant.
    pub next_attempt_at: DateTime<Utc>,
    pub identity: Option<IdentityDescriptor>,
    pub verified_claims: Option<VerifiedClaims>,
    pub created_at: DateTime<Utc>,
    pub version: u64,
}

impl ParticipantRecord {
    pub fn new(participant_id: ParticipantId, did: Did, now: DateTime<Utc>) -> Self {
        Self {
            participant_id,
            did,
            state: ParticipantState::OnboardingInitiated,
            state_timestamp: now,
            retry_count: 0,
            error_detail: None,
            next_attempt_at: now,
            identity: None,
            verified_claims: None,
            created_at: now,
            version: 0,
        }
    }

    fn move_to(
        &mut self,
        next: ParticipantState,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(next) {
            return Err(TransitionError {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        self.state_timestamp = now;
        self.next_attempt_at = now;
        Ok(())
    }

    /// Leaves ONBOARDING_INITIATED. Retry bookkeeping from a bounced identity attempt
    /// carries over so the identity budget is not refilled.
    pub fn pick_up(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.move_to(ParticipantState::VerifyingIdentity, now)
    }

    /// Successful step: clears retry bookkeeping.
    pub fn advance(
        &mut self,
        next: ParticipantState,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.move_to(next, now)?;
        self.retry_count = 0;
        self.error_detail = None;
        Ok(())
    }

    /// Terminal failure; `retry_count` and the detail are retained for diagnostics.
    pub fn fail(
        &mut self,
        terminal: ParticipantState,
        detail: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if !terminal.is_failure() {
            return Err(TransitionError {
                from: self.state,
                to: terminal,
            });
        }
        self.move_to(terminal, now)?;
        self.error_detail = Some(detail.into());
        Ok(())
    }

    /// Transient failure: move to the retry state and wait until `next_attempt_at`.
    pub fn schedule_retry(
        &mut self,
        retry_state: ParticipantState,
        detail: impl Into<String>,
        next_attempt_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.move_to(retry_state, now)?;
        self.retry_count += 1;
        self.error_detail = Some(detail.into());
        self.next_attempt_at = next_attempt_at;
        Ok(())
    }

    pub fn status_view(&self) -> ParticipantStatusView {
        ParticipantStatusView {
            participant_id: self.participant_id.clone(),
            did: self.did.clone(),
            status: self.state.public_status(),
            state: self.state,
            error_detail: self.error_detail.clone(),
            retry_count: self.retry_count,
            state_timestamp: self.state_timestamp,
        }
    }
}

/// Read model returned by status queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantStatusView {
    pub participant_id: ParticipantId,
    pub did: Did,
    pub status: PublicStatus,
    pub state: ParticipantState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    pub retry_count: u32,
    pub state_timestamp: DateTime<Utc>,
}
