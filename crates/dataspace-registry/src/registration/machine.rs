use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::RegistrationConfig;

use super::domain::{ParticipantRecord, ParticipantState, PolicyDecision, TransitionError};
use super::pipeline::{Step, StepRoute};
use super::policy::PolicyEvaluator;
use super::retry::{Classify, FailureKind, RetryPolicy};
use super::store::{ParticipantStore, StoreError};
use super::verification::VerificationClient;

/// What happened to a single leased record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvanceOutcome {
    Advanced {
        from: ParticipantState,
        to: ParticipantState,
    },
    RetryScheduled {
        state: ParticipantState,
        attempt: u32,
        next_attempt_at: DateTime<Utc>,
    },
    Failed {
        from: ParticipantState,
        to: ParticipantState,
        detail: String,
    },
    /// Another worker committed first; this attempt was discarded.
    Conflict,
    /// Terminal, vanished, or otherwise not actionable.
    Skipped,
}

/// Per-cycle counters, mostly for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub leased: usize,
    pub advanced: usize,
    pub retried: usize,
    pub failed: usize,
    pub conflicts: usize,
    pub skipped: usize,
    pub stalled: usize,
}

impl CycleReport {
    fn record(&mut self, outcome: &AdvanceOutcome) {
        match outcome {
            AdvanceOutcome::Advanced { .. } => self.advanced += 1,
            AdvanceOutcome::RetryScheduled { .. } => self.retried += 1,
            AdvanceOutcome::Failed { .. } => self.failed += 1,
            AdvanceOutcome::Conflict => self.conflicts += 1,
            AdvanceOutcome::Skipped => self.skipped += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct StepFailure {
    kind: FailureKind,
    detail: String,
}

impl StepFailure {
    fn permanent(detail: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Permanent,
            detail: detail.into(),
        }
    }

    fn transient(detail: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            detail: detail.into(),
        }
    }
}

enum StepResult {
    Success,
    Denied(String),
    Failure(StepFailure),
}

/// Drives participant records through the registration pipeline.
///
/// Every step reads a leased snapshot, performs at most one external call, and commits the
/// result with a single compare-and-swap. Losing the swap discards the work, which is safe
/// because all external calls are idempotent. Any number of workers may share one machine.
pub struct RegistrationStateMachine<S, V, P> {
    store: Arc<S>,
    verifier: Arc<V>,
    policy: Arc<P>,
    retry: RetryPolicy,
    config: RegistrationConfig,
}

impl<S, V, P> RegistrationStateMachine<S, V, P>
where
    S: ParticipantStore + 'static,
    V: VerificationClient + 'static,
    P: PolicyEvaluator + 'static,
{
    pub fn new(
        store: Arc<S>,
        verifier: Arc<V>,
        policy: Arc<P>,
        config: RegistrationConfig,
    ) -> Self {
        Self {
            store,
            verifier,
            policy,
            retry: RetryPolicy::from(&config),
            config,
        }
    }

    pub fn config(&self) -> &RegistrationConfig {
        &self.config
    }

    /// Lease one batch and advance each record by a single step.
    ///
    /// Conflicts are skipped. An unavailable store aborts the cycle; nothing committed
    /// before the abort is lost and the remaining records are leased again next cycle.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleReport, StoreError> {
        self.run_cycle_with(|| now).await
    }

    /// [`run_cycle`](Self::run_cycle) reading `clock` once for the lease and again
    /// before each record, so late records in a slow batch are stamped accurately.
    pub async fn run_cycle_with<C>(&self, clock: C) -> Result<CycleReport, StoreError>
    where
        C: Fn() -> DateTime<Utc>,
    {
        let batch = self
            .store
            .lease_batch(self.config.batch_size, clock())
            .await?;
        let mut report = CycleReport {
            leased: batch.len(),
            ..CycleReport::default()
        };

        for record in batch {
            let now = clock();
            if self.is_stalled(&record, now) {
                report.stalled += 1;
                warn!(
                    participant_id = %record.participant_id,
                    state = %record.state,
                    since = %record.state_timestamp,
                    retry_count = record.retry_count,
                    "registration stalled"
                );
            }
            let outcome = self.advance(record, now).await?;
            report.record(&outcome);
        }

        Ok(report)
    }

    /// Perform the step for `record.state` and commit it against `record.version`.
    pub async fn advance(
        &self,
        record: ParticipantRecord,
        now: DateTime<Utc>,
    ) -> Result<AdvanceOutcome, StoreError> {
        let Some(route) = StepRoute::for_state(record.state) else {
            return Ok(AdvanceOutcome::Skipped);
        };

        let expected_version = record.version;
        let participant_id = record.participant_id.clone();
        let mut next = record;

        let outcome = match self.apply_step(route, &mut next, now).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(
                    participant_id = %participant_id,
                    step = route.step.label(),
                    error = %err,
                    "step produced an illegal transition"
                );
                return Ok(AdvanceOutcome::Skipped);
            }
        };

        match self.store.compare_and_swap(next, expected_version).await {
            Ok(committed) => {
                log_committed(&committed, route, &outcome);
                Ok(outcome)
            }
            Err(StoreError::Conflict { expected, found, .. }) => {
                debug!(
                    participant_id = %participant_id,
                    expected,
                    found,
                    "lost compare-and-swap; discarding step result"
                );
                Ok(AdvanceOutcome::Conflict)
            }
            Err(StoreError::NotFound(id)) => {
                warn!(participant_id = %id, "leased record disappeared before commit");
                Ok(AdvanceOutcome::Skipped)
            }
            Err(other) => Err(other),
        }
    }

    async fn apply_step(
        &self,
        route: StepRoute,
        record: &mut ParticipantRecord,
        now: DateTime<Utc>,
    ) -> Result<AdvanceOutcome, TransitionError> {
        let from = record.state;
        let result = match route.step {
            Step::PickUp => {
                record.pick_up(now)?;
                return Ok(AdvanceOutcome::Advanced {
                    from,
                    to: record.state,
                });
            }
            Step::ResolveIdentity => self.resolve_identity(record).await,
            Step::VerifyCredentials => self.verify_credentials(record).await,
            Step::EvaluatePolicy => self.evaluate_policy(record).await,
        };

        match result {
            StepResult::Success => {
                record.advance(route.on_success, now)?;
                Ok(AdvanceOutcome::Advanced {
                    from,
                    to: route.on_success,
                })
            }
            StepResult::Denied(detail) => {
                let to = ParticipantState::PolicyDenied;
                record.fail(to, detail.clone(), now)?;
                Ok(AdvanceOutcome::Failed { from, to, detail })
            }
            StepResult::Failure(failure) => self.apply_failure(route, record, failure, now),
        }
    }

    fn apply_failure(
        &self,
        route: StepRoute,
        record: &mut ParticipantRecord,
        failure: StepFailure,
        now: DateTime<Utc>,
    ) -> Result<AdvanceOutcome, TransitionError> {
        let from = record.state;
        let (Some(retry_state), Some(terminal)) = (route.on_transient, route.on_permanent) else {
            return Err(TransitionError { from, to: from });
        };

        if failure.kind == FailureKind::Permanent {
            record.fail(terminal, failure.detail.clone(), now)?;
            return Ok(AdvanceOutcome::Failed {
                from,
                to: terminal,
                detail: failure.detail,
            });
        }

        let attempt = record.retry_count.saturating_add(1);
        if self.retry.is_exhausted(route.step, attempt) {
            let detail = format!(
                "retry budget exhausted after {attempt} attempts: {}",
                failure.detail
            );
            record.retry_count = attempt;
            record.fail(terminal, detail.clone(), now)?;
            return Ok(AdvanceOutcome::Failed {
                from,
                to: terminal,
                detail,
            });
        }

        let next_attempt_at = self.retry.retry_at(now, attempt);
        record.schedule_retry(retry_state, failure.detail, next_attempt_at, now)?;
        Ok(AdvanceOutcome::RetryScheduled {
            state: retry_state,
            attempt,
            next_attempt_at,
        })
    }

    async fn resolve_identity(&self, record: &mut ParticipantRecord) -> StepResult {
        let resolved = self
            .bounded("identity resolution", self.verifier.resolve_identity(&record.did))
            .await;
        match resolved {
            Ok(identity) => {
                record.identity = Some(identity);
                StepResult::Success
            }
            Err(failure) => StepResult::Failure(failure),
        }
    }

    async fn verify_credentials(&self, record: &mut ParticipantRecord) -> StepResult {
        let Some(identity) = record.identity.as_ref() else {
            return StepResult::Failure(StepFailure::permanent(
                "identity descriptor missing from record",
            ));
        };

        let call = self
            .verifier
            .verify_credentials(&record.participant_id, &identity.presented_claims);
        match self.bounded("credential verification", call).await {
            Ok(verified) => {
                record.verified_claims = Some(verified);
                StepResult::Success
            }
            Err(failure) => StepResult::Failure(failure),
        }
    }

    async fn evaluate_policy(&self, record: &mut ParticipantRecord) -> StepResult {
        let Some(claims) = record.verified_claims.as_ref() else {
            return StepResult::Denied("no verified claims to evaluate".to_string());
        };

        let decision = self
            .bounded("policy evaluation", self.policy.evaluate(claims))
            .await;
        match decision {
            Ok(PolicyDecision::Allow) => StepResult::Success,
            Ok(PolicyDecision::Deny { reason }) => {
                StepResult::Denied(format!("policy denied membership: {reason}"))
            }
            Err(failure) => StepResult::Failure(failure),
        }
    }

    /// Run a collaborator call under the configured timeout; a timeout is transient.
    async fn bounded<T, E, F>(&self, operation: &'static str, call: F) -> Result<T, StepFailure>
    where
        F: Future<Output = Result<T, E>>,
        E: Classify + std::fmt::Display,
    {
        match tokio::time::timeout(self.config.call_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(StepFailure {
                kind: err.failure_kind(),
                detail: err.to_string(),
            }),
            Err(_) => Err(StepFailure::transient(format!(
                "{operation} timed out after {}ms",
                self.config.call_timeout.as_millis()
            ))),
        }
    }

    fn is_stalled(&self, record: &ParticipantRecord, now: DateTime<Utc>) -> bool {
        is_stalled(record, now, self.config.stall_threshold)
    }

    /// Spawn a polling worker. Exits when `shutdown` flips to `true` or its sender drops.
    pub fn start(
        self: Arc<Self>,
        worker: usize,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let interval = self.config.poll_interval;
            info!(
                worker,
                interval_ms = interval.as_millis() as u64,
                "registration worker started"
            );
            loop {
                if *shutdown.borrow() {
                    break;
                }

                match self.run_cycle_with(Utc::now).await {
                    Ok(report) if report.leased > 0 => {
                        debug!(
                            worker,
                            leased = report.leased,
                            advanced = report.advanced,
                            retried = report.retried,
                            failed = report.failed,
                            conflicts = report.conflicts,
                            "registration cycle complete"
                        );
                    }
                    Ok(_) => {}
                    Err(err) => error!(worker, error = %err, "registration cycle aborted"),
                }

                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = sleep(interval) => {}
                }
            }
            info!(worker, "registration worker stopped");
        })
    }
}

/// Non-terminal and unchanged for longer than `threshold`.
pub fn is_stalled(record: &ParticipantRecord, now: DateTime<Utc>, threshold: Duration) -> bool {
    if record.state.is_terminal() {
        return false;
    }
    let age = now.signed_duration_since(record.state_timestamp);
    age.to_std().map(|age| age > threshold).unwrap_or(false)
}

fn log_committed(record: &ParticipantRecord, route: StepRoute, outcome: &AdvanceOutcome) {
    match outcome {
        AdvanceOutcome::Advanced { from, to } => info!(
            participant_id = %record.participant_id,
            did = %record.did,
            from = %from,
            to = %to,
            "participant advanced"
        ),
        AdvanceOutcome::RetryScheduled {
            state,
            attempt,
            next_attempt_at,
        } => warn!(
            participant_id = %record.participant_id,
            step = route.step.label(),
            state = %state,
            attempt,
            next_attempt_at = %next_attempt_at,
            detail = record.error_detail.as_deref().unwrap_or_default(),
            "transient failure; retry scheduled"
        ),
        AdvanceOutcome::Failed { from, to, detail } => info!(
            participant_id = %record.participant_id,
            did = %record.did,
            from = %from,
            to = %to,
            detail = %detail,
            "participant reached terminal failure"
        ),
        AdvanceOutcome::Conflict | AdvanceOutcome::Skipped => {}
    }
}
