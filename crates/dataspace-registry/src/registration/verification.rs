use async_trait::async_trait;

use super::domain::{ClaimSet, Did, IdentityDescriptor, ParticipantId, VerifiedClaims};
use super::retry::{Classify, FailureKind};

/// Resolves participant identities and validates presented credentials.
///
/// Both calls are read-only against the backing services, so the state machine retries
/// them freely after timeouts or crashes.
#[async_trait]
pub trait VerificationClient: Send + Sync {
    async fn resolve_identity(&self, did: &Did) -> Result<IdentityDescriptor, VerificationError>;

    async fn verify_credentials(
        &self,
        participant_id: &ParticipantId,
        claims: &ClaimSet,
    ) -> Result<VerifiedClaims, VerificationError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerificationError {
    #[error("identity not found")]
    NotFound,
    #[error("identity rejected: {0}")]
    Rejected(String),
    #[error("credentials invalid: {0}")]
    Invalid(String),
    #[error("verification service unreachable: {0}")]
    Unreachable(String),
    #[error("verification call timed out")]
    Timeout,
}

impl Classify for VerificationError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            VerificationError::NotFound
            | VerificationError::Rejected(_)
            | VerificationError::Invalid(_) => FailureKind::Permanent,
            VerificationError::Unreachable(_) | VerificationError::Timeout => {
                FailureKind::Transient
            }
        }
    }
}
