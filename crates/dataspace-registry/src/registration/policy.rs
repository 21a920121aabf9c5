use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::domain::{PolicyDecision, VerifiedClaims};
use super::retry::{Classify, FailureKind};

/// Decides dataspace membership from verified claims.
///
/// Implementations must be deterministic for identical claims; the state machine replays
/// evaluations after crashes and transient failures.
#[async_trait]
pub trait PolicyEvaluator: Send + Sync {
    async fn evaluate(&self, claims: &VerifiedClaims) -> Result<PolicyDecision, PolicyError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("policy engine unreachable: {0}")]
    Unreachable(String),
    #[error("policy evaluation timed out")]
    Timeout,
}

impl Classify for PolicyError {
    fn failure_kind(&self) -> FailureKind {
        FailureKind::Transient
    }
}

pub const DEFAULT_MEMBERSHIP_CLAIM: &str = "gaiaXMember";
pub const DEFAULT_MEMBERSHIP_VALUE: &str = "true";

/// Allows membership when a verified claim carries the expected value.
///
/// A claim matches either directly (`{"gaiaXMember": "true"}`) or through a verifiable
/// credential envelope (`{"<vc-id>": {"vc": {"credentialSubject": {"gaiaXMember": "true"}}}}`).
/// Claims are visited in key order.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimPolicy {
    claim: String,
    expected: Value,
}

impl ClaimPolicy {
    pub fn new(claim: impl Into<String>, expected: impl Into<Value>) -> Self {
        Self {
            claim: claim.into(),
            expected: expected.into(),
        }
    }

    pub fn claim(&self) -> &str {
        &self.claim
    }

    pub fn decide(&self, claims: &VerifiedClaims) -> PolicyDecision {
        if claims.get(&self.claim) == Some(&self.expected) {
            return PolicyDecision::Allow;
        }

        for (key, value) in &claims.claims {
            let subject = value
                .get("vc")
                .and_then(|vc| vc.get("credentialSubject"))
                .and_then(|subject| subject.get(&self.claim));
            match subject {
                Some(found) if found == &self.expected => return PolicyDecision::Allow,
                Some(_) => debug!(credential = %key, claim = %self.claim, "claim value does not match"),
                None => continue,
            }
        }

        PolicyDecision::Deny {
            reason: format!("no verified claim {} = {}", self.claim, self.expected),
        }
    }
}

impl Default for ClaimPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MEMBERSHIP_CLAIM, DEFAULT_MEMBERSHIP_VALUE)
    }
}

#[async_trait]
impl PolicyEvaluator for ClaimPolicy {
    async fn evaluate(&self, claims: &VerifiedClaims) -> Result<PolicyDecision, PolicyError> {
        Ok(self.decide(claims))
    }
}
