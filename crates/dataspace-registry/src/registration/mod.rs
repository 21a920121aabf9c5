//! Participant registration: the record model, the polling state machine that walks each
//! record through identity, credential and policy checks, and the submission/query surface.

pub mod domain;
pub mod machine;
pub mod pipeline;
pub mod policy;
pub mod retry;
pub mod router;
pub mod service;
pub mod store;
pub mod verification;

#[cfg(test)]
mod tests;

pub use domain::{
    ClaimSet, Did, IdentityDescriptor, InvalidDid, ParticipantId, ParticipantRecord,
    ParticipantState, ParticipantStatusView, PolicyDecision, PublicStatus, TransitionError,
    VerifiedClaims,
};
pub use machine::{AdvanceOutcome, CycleReport, RegistrationStateMachine};
pub use pipeline::{Step, StepRoute};
pub use policy::{ClaimPolicy, PolicyError, PolicyEvaluator};
pub use retry::{FailureKind, RetryPolicy};
pub use router::registry_router;
pub use service::{RegistrationService, RegistrationServiceError};
pub use store::{InMemoryParticipantStore, ParticipantStore, StoreError};
pub use verification::{VerificationClient, VerificationError};
