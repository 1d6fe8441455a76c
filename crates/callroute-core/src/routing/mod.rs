//! Candidate construction, attempt sequencing and the per-call processor

pub mod candidates;
pub mod processor;
pub mod responder;
pub mod sequencer;

pub use candidates::{CandidateListBuilder, CandidatePlan};
pub use processor::{CreateConnectionProcessor, RoutingHandle, RoutingOutcome, RoutingResult};
pub use responder::AttemptResponder;
pub use sequencer::{
    retry_decision, AttemptId, ConnectionAttemptSequencer, RetryDecision, SequencerState, Step,
};
