use super::domain::ParticipantState;

/// Action dispatched for a non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    PickUp,
    ResolveIdentity,
    VerifyCredentials,
    EvaluatePolicy,
}

/// Where each step leads. `on_transient`/`on_permanent` are `None` for steps that make
/// no external call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepRoute {
    pub state: ParticipantState,
    pub step: Step,
    pub on_success: ParticipantState,
    pub on_transient: Option<ParticipantState>,
    pub on_permanent: Option<ParticipantState>,
}

const ROUTES: [StepRoute; 4] = [
    StepRoute {
        state: ParticipantState::OnboardingInitiated,
        step: Step::PickUp,
        on_success: ParticipantState::VerifyingIdentity,
        on_transient: None,
        on_permanent: None,
    },
    StepRoute {
        state: ParticipantState::VerifyingIdentity,
        step: Step::ResolveIdentity,
        on_success: ParticipantState::VerifyingCredentials,
        on_transient: Some(ParticipantState::OnboardingInitiated),
        on_permanent: Some(ParticipantState::VerificationFailed),
    },
    StepRoute {
        state: ParticipantState::VerifyingCredentials,
        step: Step::VerifyCredentials,
        on_success: ParticipantState::EvaluatingPolicy,
        on_transient: Some(ParticipantState::VerifyingCredentials),
        on_permanent: Some(ParticipantState::VerificationFailed),
    },
    StepRoute {
        state: ParticipantState::EvaluatingPolicy,
        step: Step::EvaluatePolicy,
        on_success: ParticipantState::Onboarded,
        on_transient: Some(ParticipantState::EvaluatingPolicy),
        on_permanent: Some(ParticipantState::PolicyDenied),
    },
];

impl StepRoute {
    /// Route for `state`, or `None` when the state is terminal.
    pub fn for_state(state: ParticipantState) -> Option<Self> {
        ROUTES.iter().find(|route| route.state == state).copied()
    }
}

impl Step {
    pub const fn label(self) -> &'static str {
        match self {
            Step::PickUp => "pick_up",
            Step::ResolveIdentity => "resolve_identity",
            Step::VerifyCredentials => "verify_credentials",
            Step::EvaluatePolicy => "evaluate_policy",
        }
    }
}
