//! Per-call routing driver
//!
//! [`CreateConnectionProcessor`] builds the candidate plan for a call, then
//! runs a task that binds each candidate's connection service and feeds the
//! answers to the sequencer. All sequencing happens on that one task;
//! services answer through [`AttemptResponder`]s that post back to it.
//! `create_connection` runs on its own task, and binds race the event
//! channel, so a cancel is handled at any point of an attempt.
//!
//! Exactly one terminal notification reaches the [`ResponseSink`] per call,
//! whether routing succeeds, runs out of candidates, or is cancelled.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::candidates::CandidateListBuilder;
use super::responder::{AttemptResponder, ProcessorEvent};
use super::sequencer::{AttemptId, ConnectionAttemptSequencer, Step};
use crate::collaborators::{
    ConnectionRequest, ConnectionService, ConnectionServiceBinder, PhoneAccountCatalog,
    ResponseSink, SlotResolver,
};
use crate::config::RoutingConfig;
use crate::error::BindError;
use crate::types::{
    CallId, CallState, Candidate, CreatedConnection, DisconnectCause, DisconnectCode, ServiceId,
    SharedCall,
};

/// How a routing run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingResult {
    Connected {
        candidate: Candidate,
        service: ServiceId,
        connection: CreatedConnection,
    },
    Failed {
        cause: DisconnectCause,
    },
}

/// Terminal result plus the candidates that were tried, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingOutcome {
    pub call_id: CallId,
    pub result: RoutingResult,
    pub attempts: Vec<Candidate>,
}

impl RoutingOutcome {
    pub fn is_connected(&self) -> bool {
        matches!(self.result, RoutingResult::Connected { .. })
    }

    pub fn disconnect_cause(&self) -> Option<&DisconnectCause> {
        match &self.result {
            RoutingResult::Failed { cause } => Some(cause),
            RoutingResult::Connected { .. } => None,
        }
    }
}

/// Handle to a routing run started by [`CreateConnectionProcessor::process`]
#[derive(Debug, Clone)]
pub struct RoutingHandle {
    call_id: CallId,
    events: mpsc::UnboundedSender<ProcessorEvent>,
    outcome: watch::Receiver<Option<RoutingOutcome>>,
}

impl RoutingHandle {
    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    /// Request cancellation.
    ///
    /// Returns `false` when routing already finished; the request is then a
    /// no-op and no further notification is sent.
    pub fn cancel(&self) -> bool {
        if self.is_finished() {
            return false;
        }
        self.events.send(ProcessorEvent::Cancel).is_ok()
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.borrow().is_some()
    }

    pub fn outcome(&self) -> Option<RoutingOutcome> {
        self.outcome.borrow().clone()
    }

    /// Wait for the terminal outcome
    pub async fn wait(&self) -> RoutingOutcome {
        let mut outcome = self.outcome.clone();
        loop {
            if let Some(done) = outcome.borrow_and_update().clone() {
                return done;
            }
            if outcome.changed().await.is_err() {
                // Task ended without publishing, which only happens if it panicked
                return outcome.borrow().clone().unwrap_or_else(|| RoutingOutcome {
                    call_id: self.call_id.clone(),
                    result: RoutingResult::Failed {
                        cause: DisconnectCause::with_reason(
                            DisconnectCode::Error,
                            "routing task ended without a result",
                        ),
                    },
                    attempts: Vec::new(),
                });
            }
        }
    }
}

/// Routes one call through its candidates to a connection service
pub struct CreateConnectionProcessor {
    call: SharedCall,
    catalog: Arc<dyn PhoneAccountCatalog>,
    builder: CandidateListBuilder,
    binder: Arc<dyn ConnectionServiceBinder>,
    sink: Arc<dyn ResponseSink>,
    config: RoutingConfig,
}

impl CreateConnectionProcessor {
    pub fn new(
        call: SharedCall,
        catalog: Arc<dyn PhoneAccountCatalog>,
        slots: Arc<dyn SlotResolver>,
        binder: Arc<dyn ConnectionServiceBinder>,
        sink: Arc<dyn ResponseSink>,
        config: RoutingConfig,
    ) -> Self {
        let builder = CandidateListBuilder::new(catalog.clone(), slots, config.clone());
        Self {
            call,
            catalog,
            builder,
            binder,
            sink,
            config,
        }
    }

    /// Start routing.
    ///
    /// An empty candidate plan fails before this returns, without touching
    /// the binder. Otherwise attempts run on a spawned task; use the
    /// returned handle to cancel or wait.
    pub async fn process(self) -> RoutingHandle {
        let call = {
            let mut call = self.call.lock();
            call.state = CallState::Routing;
            call.clone()
        };
        info!(call_id = %call.id, emergency = call.is_emergency, target = ?call.target_account, "Routing call");

        let plan = self.builder.build(&call);
        let mut sequencer =
            ConnectionAttemptSequencer::new(plan, self.config.connection_manager_fallback);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = watch::channel(None);
        let handle = RoutingHandle {
            call_id: call.id.clone(),
            events: events_tx.clone(),
            outcome: outcome_rx,
        };

        let first = sequencer.start();
        if first.is_terminal() {
            let outcome = self.complete(first, &sequencer, None).await;
            outcome_tx.send_replace(Some(outcome));
            return handle;
        }

        let task = RoutingTask {
            processor: self,
            sequencer,
            events_tx,
            events_rx,
            service: None,
            in_flight: None,
        };
        tokio::spawn(async move {
            let outcome = task.run(first).await;
            outcome_tx.send_replace(Some(outcome));
        });
        handle
    }

    /// Write the terminal state onto the call and notify the sink once
    async fn complete(
        &self,
        step: Step,
        sequencer: &ConnectionAttemptSequencer,
        service: Option<ServiceId>,
    ) -> RoutingOutcome {
        let attempts = sequencer.attempted().to_vec();
        match step {
            Step::Succeeded {
                candidate,
                connection,
            } => {
                let service = service.unwrap_or_else(|| ServiceId(candidate.connection_manager.component.to_string()));
                let call_id = {
                    let mut call = self.call.lock();
                    call.connection_manager_account = Some(candidate.connection_manager.clone());
                    call.target_account = Some(candidate.target.clone());
                    call.connection_service = Some(service.clone());
                    call.state = CallState::Connected;
                    call.id.clone()
                };
                info!(
                    call_id = %call_id,
                    candidate = %candidate,
                    service = %service,
                    connection_id = %connection.connection_id,
                    "Call routed"
                );
                self.sink.on_routing_succeeded(connection.clone()).await;
                RoutingOutcome {
                    call_id,
                    result: RoutingResult::Connected {
                        candidate,
                        service,
                        connection,
                    },
                    attempts,
                }
            }
            other => {
                let cause = match other {
                    Step::Failed { cause } => cause,
                    _ => DisconnectCause::with_reason(
                        DisconnectCode::Error,
                        "routing ended in a non-terminal step",
                    ),
                };
                let call_id = {
                    let mut call = self.call.lock();
                    call.state = CallState::Failed;
                    call.id.clone()
                };
                warn!(call_id = %call_id, cause = %cause, attempts = attempts.len(), "Call routing failed");
                self.sink.on_routing_failed(cause.clone()).await;
                RoutingOutcome {
                    call_id,
                    result: RoutingResult::Failed { cause },
                    attempts,
                }
            }
        }
    }
}

/// State owned by the spawned routing task
struct RoutingTask {
    processor: CreateConnectionProcessor,
    sequencer: ConnectionAttemptSequencer,
    events_tx: mpsc::UnboundedSender<ProcessorEvent>,
    events_rx: mpsc::UnboundedReceiver<ProcessorEvent>,
    /// Service bound for the in-flight attempt
    service: Option<Arc<dyn ConnectionService>>,
    /// Task running the service's `create_connection`
    in_flight: Option<JoinHandle<()>>,
}

impl RoutingTask {
    async fn run(mut self, first: Step) -> RoutingOutcome {
        let mut step = first;
        loop {
            match step {
                Step::Attempt { attempt, candidate } => {
                    if let Some(next) = self.dispatch(attempt, candidate).await {
                        step = next;
                        continue;
                    }
                }
                Step::Succeeded { .. } | Step::Failed { .. } => {
                    let service = self.service.as_ref().map(|s| s.id());
                    return self.processor.complete(step, &self.sequencer, service).await;
                }
                Step::Ignored => {}
            }

            // The task holds a sender, so the channel never closes under it
            let Some(event) = self.events_rx.recv().await else {
                let step = self.sequencer.cancel();
                return self.processor.complete(step, &self.sequencer, None).await;
            };
            step = self.handle_event(event).await;
        }
    }

    async fn handle_event(&mut self, event: ProcessorEvent) -> Step {
        match event {
            ProcessorEvent::AttemptFinished { attempt, result } => {
                let step = self.sequencer.on_attempt_result(attempt, result);
                if step == Step::Ignored {
                    debug!(%attempt, "Discarded stale attempt result");
                }
                step
            }
            ProcessorEvent::Cancel => {
                let step = self.sequencer.cancel();
                if step.is_terminal() {
                    let call_id = self.processor.call.lock().id.clone();
                    info!(call_id = %call_id, "Routing cancelled");
                    if let Some(service) = self.service.take() {
                        service.abort(&call_id).await;
                    }
                    if let Some(task) = self.in_flight.take() {
                        task.abort();
                    }
                }
                step
            }
        }
    }

    /// Bind the candidate's service and hand it the request.
    ///
    /// Returns the next step when the attempt fails before reaching a
    /// service or is cancelled while binding, or `None` while waiting for
    /// the service's answer.
    async fn dispatch(&mut self, attempt: AttemptId, candidate: Candidate) -> Option<Step> {
        let (call_id, handle, is_emergency) = {
            let call = self.processor.call.lock();
            (call.id.clone(), call.handle.clone(), call.is_emergency)
        };
        info!(call_id = %call_id, %attempt, candidate = %candidate, "Attempting connection");
        self.service = None;
        self.in_flight = None;

        let manager = &candidate.connection_manager;
        if !self.processor.catalog.requires_bind_permission(manager) {
            warn!(call_id = %call_id, manager = %manager, "Skipping candidate without bind permission");
            let denied = BindError::PermissionDenied {
                component: manager.component.clone(),
            };
            return Some(self.sequencer.on_bind_failure(attempt, denied.to_string()));
        }

        // Dropping the resolve future abandons the bind
        let bound = {
            let resolve = self.processor.binder.resolve(&manager.component, &manager.user);
            tokio::pin!(resolve);
            loop {
                tokio::select! {
                    bound = &mut resolve => break bound,
                    Some(event) = self.events_rx.recv() => match event {
                        ProcessorEvent::Cancel => {
                            info!(call_id = %call_id, %attempt, "Routing cancelled while binding");
                            return Some(self.sequencer.cancel());
                        }
                        ProcessorEvent::AttemptFinished { attempt: stale, .. } => {
                            debug!(attempt = %stale, "Discarded stale attempt result");
                        }
                    },
                }
            }
        };
        let service = match bound {
            Ok(service) => service,
            Err(e) => {
                warn!(call_id = %call_id, manager = %manager, error = %e, "Failed to bind connection service");
                return Some(self.sequencer.on_bind_failure(attempt, e.to_string()));
            }
        };
        self.service = Some(service.clone());

        let request = ConnectionRequest {
            call_id,
            handle,
            candidate,
            is_emergency,
        };
        let responder = AttemptResponder::new(attempt, self.events_tx.clone());
        self.in_flight = Some(tokio::spawn(async move {
            service.create_connection(request, responder).await;
        }));
        None
    }
}
