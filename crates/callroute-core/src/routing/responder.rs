//! One-shot response handle given to connection services
//!
//! A service answers an attempt through its [`AttemptResponder`]. The
//! responder is consumed by the answer, so one `create_connection` call can
//! produce at most one result. Results travel over a channel back to the
//! processor task, which is the only place sequencing state is touched,
//! whatever thread the service answers from.

use tokio::sync::mpsc;
use tracing::debug;

use super::sequencer::AttemptId;
use crate::types::{AttemptResult, CreatedConnection, DisconnectCause, DisconnectCode};

/// Events consumed by the processor task
#[derive(Debug)]
pub(crate) enum ProcessorEvent {
    AttemptFinished {
        attempt: AttemptId,
        result: AttemptResult,
    },
    Cancel,
}

/// Answers a single connection attempt
#[derive(Debug)]
pub struct AttemptResponder {
    attempt: AttemptId,
    tx: Option<mpsc::UnboundedSender<ProcessorEvent>>,
}

impl AttemptResponder {
    pub(crate) fn new(attempt: AttemptId, tx: mpsc::UnboundedSender<ProcessorEvent>) -> Self {
        Self {
            attempt,
            tx: Some(tx),
        }
    }

    pub fn attempt_id(&self) -> AttemptId {
        self.attempt
    }

    pub fn respond(mut self, result: AttemptResult) {
        self.deliver(result);
    }

    pub fn succeed(self, connection: CreatedConnection) {
        self.respond(AttemptResult::Success(connection));
    }

    pub fn fail(self, cause: impl Into<DisconnectCause>) {
        self.respond(AttemptResult::Failure(cause.into()));
    }

    fn deliver(&mut self, result: AttemptResult) {
        let Some(tx) = self.tx.take() else {
            return;
        };
        let event = ProcessorEvent::AttemptFinished {
            attempt: self.attempt,
            result,
        };
        if tx.send(event).is_err() {
            debug!(attempt = %self.attempt, "Routing already finished, discarding late attempt result");
        }
    }
}

impl Drop for AttemptResponder {
    fn drop(&mut self) {
        if self.tx.is_some() {
            self.deliver(AttemptResult::Failure(DisconnectCause::with_reason(
                DisconnectCode::Error,
                "connection service dropped the attempt without answering",
            )));
        }
    }
}
