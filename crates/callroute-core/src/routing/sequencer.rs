//! Connection attempt sequencing
//!
//! A synchronous state machine over a [`CandidatePlan`]. It owns no I/O:
//! the processor feeds it attempt results and acts on the returned
//! [`Step`]. Every attempt carries an [`AttemptId`], and results tagged with
//! anything other than the in-flight attempt are ignored.
//!
//! ```text
//! Idle ──start──▶ Attempting(0) ──failure──▶ Attempting(n) ──▶ ...
//!                      │                          │
//!                      └──success──▶ Succeeded     └──exhausted──▶ Failed
//! ```
//!
//! `Succeeded` and `Failed` absorb every further input.

use std::fmt;

use tracing::debug;

use super::candidates::CandidatePlan;
use crate::types::{AttemptResult, Candidate, CreatedConnection, DisconnectCause, DisconnectCode};

/// Identifies one dispatched attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttemptId(pub u64);

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "attempt-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequencerState {
    Idle,
    Attempting {
        attempt: AttemptId,
        candidate: Candidate,
    },
    Succeeded,
    Failed,
}

impl SequencerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SequencerState::Succeeded | SequencerState::Failed)
    }
}

/// What the processor must do next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Bind and call the service for this candidate
    Attempt {
        attempt: AttemptId,
        candidate: Candidate,
    },
    Succeeded {
        candidate: Candidate,
        connection: CreatedConnection,
    },
    Failed {
        cause: DisconnectCause,
    },
    /// Input did not change state
    Ignored,
}

impl Step {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Step::Succeeded { .. } | Step::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the target directly, without its connection manager
    BypassManager(Candidate),
    /// Move on to the next precomputed candidate
    Next,
    Fail,
}

/// Decide how to continue after `candidate` failed with `cause`.
///
/// The manager bypass applies only to `CONNECTION_MANAGER_NOT_SUPPORTED`
/// on a candidate that actually went through a manager.
pub fn retry_decision(
    candidate: &Candidate,
    cause: &DisconnectCause,
    bypass_available: bool,
    remaining: usize,
) -> RetryDecision {
    if cause.code == DisconnectCode::ConnectionManagerNotSupported
        && candidate.uses_connection_manager()
        && bypass_available
    {
        return RetryDecision::BypassManager(Candidate::direct(candidate.target.clone()));
    }
    if remaining > 0 {
        RetryDecision::Next
    } else {
        RetryDecision::Fail
    }
}

/// Walks a candidate plan one attempt at a time
#[derive(Debug)]
pub struct ConnectionAttemptSequencer {
    plan: CandidatePlan,
    next_index: usize,
    state: SequencerState,
    last_attempt: u64,
    bypass_enabled: bool,
    bypass_used: bool,
    attempted: Vec<Candidate>,
}

impl ConnectionAttemptSequencer {
    pub fn new(plan: CandidatePlan, bypass_enabled: bool) -> Self {
        Self {
            plan,
            next_index: 0,
            state: SequencerState::Idle,
            last_attempt: 0,
            bypass_enabled,
            bypass_used: false,
            attempted: Vec::new(),
        }
    }

    pub fn state(&self) -> &SequencerState {
        &self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn current_attempt(&self) -> Option<(AttemptId, &Candidate)> {
        match &self.state {
            SequencerState::Attempting { attempt, candidate } => Some((*attempt, candidate)),
            _ => None,
        }
    }

    /// Candidates dispatched so far, including a manager bypass
    pub fn attempted(&self) -> &[Candidate] {
        &self.attempted
    }

    pub fn plan(&self) -> &CandidatePlan {
        &self.plan
    }

    pub fn start(&mut self) -> Step {
        if self.state != SequencerState::Idle {
            return Step::Ignored;
        }
        match self.plan.get(0).cloned() {
            Some(candidate) => {
                self.next_index = 1;
                self.begin(candidate)
            }
            None => {
                let cause = self
                    .plan
                    .no_candidate_reason()
                    .map(|reason| reason.disconnect_cause())
                    .unwrap_or_else(DisconnectCause::error);
                self.state = SequencerState::Failed;
                Step::Failed { cause }
            }
        }
    }

    pub fn on_attempt_result(&mut self, attempt: AttemptId, result: AttemptResult) -> Step {
        let candidate = match &self.state {
            SequencerState::Attempting {
                attempt: current,
                candidate,
            } if *current == attempt => candidate.clone(),
            state => {
                debug!(%attempt, ?state, "Ignoring result for an attempt that is not in flight");
                return Step::Ignored;
            }
        };

        match result {
            AttemptResult::Success(connection) => {
                self.state = SequencerState::Succeeded;
                Step::Succeeded {
                    candidate,
                    connection,
                }
            }
            AttemptResult::Failure(cause) => self.after_failure(&candidate, cause),
        }
    }

    /// The service for the in-flight attempt could not be bound or used
    pub fn on_bind_failure(&mut self, attempt: AttemptId, reason: impl Into<String>) -> Step {
        let cause = DisconnectCause::with_reason(DisconnectCode::Error, reason);
        self.on_attempt_result(attempt, AttemptResult::Failure(cause))
    }

    /// Abort the sequence with `LOCAL`, unless it already finished
    pub fn cancel(&mut self) -> Step {
        if self.state.is_terminal() {
            return Step::Ignored;
        }
        self.state = SequencerState::Failed;
        Step::Failed {
            cause: DisconnectCause::local(),
        }
    }

    fn after_failure(&mut self, candidate: &Candidate, cause: DisconnectCause) -> Step {
        let remaining = self.plan.len().saturating_sub(self.next_index);
        let bypass_available = self.bypass_enabled && !self.bypass_used;
        match retry_decision(candidate, &cause, bypass_available, remaining) {
            RetryDecision::BypassManager(direct) => {
                debug!(failed = %candidate, retry = %direct, "Connection manager not supported, retrying without it");
                self.bypass_used = true;
                self.begin(direct)
            }
            RetryDecision::Next => match self.plan.get(self.next_index).cloned() {
                Some(next) => {
                    self.next_index += 1;
                    self.begin(next)
                }
                None => self.fail(cause),
            },
            RetryDecision::Fail => self.fail(cause),
        }
    }

    fn begin(&mut self, candidate: Candidate) -> Step {
        self.last_attempt += 1;
        let attempt = AttemptId(self.last_attempt);
        self.attempted.push(candidate.clone());
        self.state = SequencerState::Attempting {
            attempt,
            candidate: candidate.clone(),
        };
        Step::Attempt { attempt, candidate }
    }

    fn fail(&mut self, cause: DisconnectCause) -> Step {
        self.state = SequencerState::Failed;
        Step::Failed { cause }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ComponentName, NoCandidateReason, PhoneAccountHandle};
    use pretty_assertions::assert_eq;

    fn tel(id: &str) -> PhoneAccountHandle {
        PhoneAccountHandle::new(ComponentName::new("com.example.tel", "TelService"), id)
    }

    fn manager() -> PhoneAccountHandle {
        PhoneAccountHandle::new(ComponentName::new("com.example.manager", "ManagerService"), "sim_mgr")
    }

    fn failure(code: DisconnectCode) -> AttemptResult {
        AttemptResult::Failure(DisconnectCause::new(code))
    }

    fn expect_attempt(step: Step) -> (AttemptId, Candidate) {
        match step {
            Step::Attempt { attempt, candidate } => (attempt, candidate),
            other => panic!("expected an attempt, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_plan_fails_on_start() {
        let plan = CandidatePlan::empty(NoCandidateReason::NoTargetAccount);
        let mut sequencer = ConnectionAttemptSequencer::new(plan, true);
        match sequencer.start() {
            Step::Failed { cause } => assert_eq!(cause.code, DisconnectCode::Error),
            other => panic!("unexpected step {:?}", other),
        }
        assert!(sequencer.attempted().is_empty());
        assert_eq!(sequencer.start(), Step::Ignored);
    }

    #[test]
    fn test_success_forwards_connection_unchanged() {
        let plan = CandidatePlan::new(vec![Candidate::direct(tel("tel_acct"))]);
        let mut sequencer = ConnectionAttemptSequencer::new(plan, true);
        let (attempt, candidate) = expect_attempt(sequencer.start());
        assert_eq!(candidate, Candidate::direct(tel("tel_acct")));

        let connection = CreatedConnection::new("conn-1").with_extra("k", "v");
        let step = sequencer.on_attempt_result(attempt, AttemptResult::Success(connection.clone()));
        assert_eq!(
            step,
            Step::Succeeded {
                candidate,
                connection
            }
        );
        assert_eq!(sequencer.state(), &SequencerState::Succeeded);
    }

    #[test]
    fn test_manager_not_supported_bypasses_once() {
        let plan = CandidatePlan::new(vec![Candidate::new(manager(), tel("tel_acct"))]);
        let mut sequencer = ConnectionAttemptSequencer::new(plan, true);
        let (first, _) = expect_attempt(sequencer.start());

        let step = sequencer.on_attempt_result(first, failure(DisconnectCode::ConnectionManagerNotSupported));
        let (second, candidate) = expect_attempt(step);
        assert_eq!(candidate, Candidate::direct(tel("tel_acct")));
        assert_ne!(first, second);

        // A direct candidate never bypasses, so the same cause is now terminal
        let step = sequencer.on_attempt_result(second, failure(DisconnectCode::ConnectionManagerNotSupported));
        assert_eq!(
            step,
            Step::Failed {
                cause: DisconnectCause::new(DisconnectCode::ConnectionManagerNotSupported)
            }
        );
        assert_eq!(sequencer.attempted().len(), 2);
    }

    #[test]
    fn test_bypass_disabled_fails_with_original_cause() {
        let plan = CandidatePlan::new(vec![Candidate::new(manager(), tel("tel_acct"))]);
        let mut sequencer = ConnectionAttemptSequencer::new(plan, false);
        let (attempt, _) = expect_attempt(sequencer.start());
        let step = sequencer.on_attempt_result(attempt, failure(DisconnectCode::ConnectionManagerNotSupported));
        assert!(matches!(step, Step::Failed { .. }));
    }

    #[test]
    fn test_other_cause_fails_without_follow_up() {
        let plan = CandidatePlan::new(vec![Candidate::new(manager(), tel("tel_acct"))]);
        let mut sequencer = ConnectionAttemptSequencer::new(plan, true);
        let (attempt, _) = expect_attempt(sequencer.start());
        let step = sequencer.on_attempt_result(attempt, failure(DisconnectCode::Other));
        assert_eq!(
            step,
            Step::Failed {
                cause: DisconnectCause::new(DisconnectCode::Other)
            }
        );
        assert_eq!(sequencer.attempted().len(), 1);
    }

    #[test]
    fn test_failure_moves_to_next_precomputed_candidate() {
        let plan = CandidatePlan::new(vec![
            Candidate::direct(tel("tel_emer")),
            Candidate::new(manager(), tel("tel_acct")),
        ]);
        let mut sequencer = ConnectionAttemptSequencer::new(plan, true);
        let (first, _) = expect_attempt(sequencer.start());
        let (_, next) = expect_attempt(sequencer.on_attempt_result(first, failure(DisconnectCode::Rejected)));
        assert_eq!(next, Candidate::new(manager(), tel("tel_acct")));
    }

    #[test]
    fn test_bind_failure_counts_as_error() {
        let plan = CandidatePlan::new(vec![Candidate::direct(tel("tel_acct"))]);
        let mut sequencer = ConnectionAttemptSequencer::new(plan, true);
        let (attempt, _) = expect_attempt(sequencer.start());
        match sequencer.on_bind_failure(attempt, "service not found") {
            Step::Failed { cause } => {
                assert_eq!(cause.code, DisconnectCode::Error);
                assert_eq!(cause.reason.as_deref(), Some("service not found"));
            }
            other => panic!("unexpected step {:?}", other),
        }
    }

    #[test]
    fn test_stale_and_late_results_are_ignored() {
        let plan = CandidatePlan::new(vec![Candidate::new(manager(), tel("tel_acct"))]);
        let mut sequencer = ConnectionAttemptSequencer::new(plan, true);
        let (first, _) = expect_attempt(sequencer.start());
        let (second, _) = expect_attempt(
            sequencer.on_attempt_result(first, failure(DisconnectCode::ConnectionManagerNotSupported)),
        );

        let stale = sequencer.on_attempt_result(first, AttemptResult::Success(CreatedConnection::new("late")));
        assert_eq!(stale, Step::Ignored);
        assert_eq!(sequencer.current_attempt().map(|(id, _)| id), Some(second));

        let done = sequencer.on_attempt_result(second, AttemptResult::Success(CreatedConnection::new("ok")));
        assert!(done.is_terminal());
        let late = sequencer.on_attempt_result(second, failure(DisconnectCode::Error));
        assert_eq!(late, Step::Ignored);
        assert_eq!(sequencer.state(), &SequencerState::Succeeded);
    }

    #[test]
    fn test_cancel_is_local_once() {
        let plan = CandidatePlan::new(vec![Candidate::direct(tel("tel_acct"))]);
        let mut sequencer = ConnectionAttemptSequencer::new(plan, true);
        let (attempt, _) = expect_attempt(sequencer.start());

        assert_eq!(
            sequencer.cancel(),
            Step::Failed {
                cause: DisconnectCause::local()
            }
        );
        assert_eq!(sequencer.cancel(), Step::Ignored);
        let late = sequencer.on_attempt_result(attempt, AttemptResult::Success(CreatedConnection::new("x")));
        assert_eq!(late, Step::Ignored);
    }

    #[test]
    fn test_retry_decision_requires_manager_candidate() {
        let cause = DisconnectCause::new(DisconnectCode::ConnectionManagerNotSupported);
        let direct = Candidate::direct(tel("tel_acct"));
        assert_eq!(retry_decision(&direct, &cause, true, 0), RetryDecision::Fail);
        assert_eq!(retry_decision(&direct, &cause, true, 1), RetryDecision::Next);

        let managed = Candidate::new(manager(), tel("tel_acct"));
        assert_eq!(
            retry_decision(&managed, &cause, true, 1),
            RetryDecision::BypassManager(direct)
        );
        assert_eq!(retry_decision(&managed, &cause, false, 0), RetryDecision::Fail);
    }
}
