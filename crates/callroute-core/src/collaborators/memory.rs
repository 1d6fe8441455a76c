//! In-memory collaborators
//!
//! Simple, lock-protected implementations of the collaborator traits. The
//! CLI simulator builds a whole routing environment out of these, and the
//! integration tests use them in place of real telephony services.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::{
    ConnectionRequest, ConnectionService, ConnectionServiceBinder, PhoneAccountCatalog,
    ResponseSink, SlotResolver,
};
use crate::error::BindError;
use crate::routing::AttemptResponder;
use crate::types::{
    AttemptResult, Call, CallId, ComponentName, CreatedConnection, DisconnectCause, PhoneAccount,
    PhoneAccountHandle, ServiceId, SlotIndex, SubscriptionId, UserHandle, INVALID_SLOT_INDEX,
};

/// Catalog backed by a list of accounts plus a few routing knobs
#[derive(Default)]
pub struct InMemoryCatalog {
    accounts: RwLock<Vec<PhoneAccount>>,
    connection_manager: RwLock<Option<PhoneAccountHandle>>,
    default_connection_manager: RwLock<Option<PhoneAccountHandle>>,
    default_outgoing: RwLock<Option<PhoneAccountHandle>>,
    permitted: RwLock<HashSet<PhoneAccountHandle>>,
    denied: RwLock<HashSet<PhoneAccountHandle>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an account and grant its service the bind permission.
    /// Registering the same handle again replaces the previous entry.
    pub fn register(&self, account: PhoneAccount) {
        self.permitted.write().insert(account.handle.clone());
        let mut accounts = self.accounts.write();
        match accounts.iter_mut().find(|a| a.handle == account.handle) {
            Some(existing) => *existing = account,
            None => accounts.push(account),
        }
    }

    pub fn deny_bind_permission(&self, handle: PhoneAccountHandle) {
        self.permitted.write().remove(&handle);
        self.denied.write().insert(handle);
    }

    /// Connection manager returned for every call
    pub fn set_connection_manager(&self, handle: Option<PhoneAccountHandle>) {
        if let Some(h) = &handle {
            if !self.denied.read().contains(h) {
                self.permitted.write().insert(h.clone());
            }
        }
        *self.connection_manager.write() = handle;
    }

    pub fn set_default_connection_manager(&self, handle: Option<PhoneAccountHandle>) {
        *self.default_connection_manager.write() = handle;
    }

    pub fn set_default_outgoing_account(&self, handle: Option<PhoneAccountHandle>) {
        *self.default_outgoing.write() = handle;
    }
}

impl PhoneAccountCatalog for InMemoryCatalog {
    fn lookup(&self, handle: &PhoneAccountHandle) -> Option<PhoneAccount> {
        self.accounts
            .read()
            .iter()
            .find(|a| &a.handle == handle)
            .cloned()
    }

    fn connection_manager_for(&self, _call: &Call) -> Option<PhoneAccountHandle> {
        self.connection_manager.read().clone()
    }

    fn default_connection_manager(&self) -> Option<PhoneAccountHandle> {
        self.default_connection_manager.read().clone()
    }

    fn requires_bind_permission(&self, handle: &PhoneAccountHandle) -> bool {
        self.permitted.read().contains(handle)
    }

    fn all_accounts_for_current_user(&self) -> Vec<PhoneAccount> {
        self.accounts.read().clone()
    }

    fn default_outgoing_account(&self) -> Option<PhoneAccountHandle> {
        self.default_outgoing.read().clone()
    }
}

/// Slot resolver driven by explicit maps
///
/// Subscriptions come from the per-handle override map first, then from the
/// account's own `subscription_id`. Unknown subscriptions resolve to
/// [`INVALID_SLOT_INDEX`].
#[derive(Default)]
pub struct StaticSlotResolver {
    subscriptions: RwLock<HashMap<PhoneAccountHandle, SubscriptionId>>,
    slots: RwLock<HashMap<SubscriptionId, SlotIndex>>,
}

impl StaticSlotResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map an account to a subscription and that subscription to a slot
    pub fn map(&self, handle: PhoneAccountHandle, subscription_id: SubscriptionId, slot: SlotIndex) {
        self.subscriptions.write().insert(handle, subscription_id);
        self.slots.write().insert(subscription_id, slot);
    }

    pub fn set_slot(&self, subscription_id: SubscriptionId, slot: SlotIndex) {
        self.slots.write().insert(subscription_id, slot);
    }
}

impl SlotResolver for StaticSlotResolver {
    fn subscription_id_for(&self, account: &PhoneAccount) -> Option<SubscriptionId> {
        self.subscriptions
            .read()
            .get(&account.handle)
            .copied()
            .or(account.subscription_id)
    }

    fn slot_index_for(&self, subscription_id: SubscriptionId) -> SlotIndex {
        self.slots
            .read()
            .get(&subscription_id)
            .copied()
            .unwrap_or(INVALID_SLOT_INDEX)
    }
}

/// Binder that hands out pre-registered services
#[derive(Default)]
pub struct InMemoryBinder {
    services: DashMap<ComponentName, Arc<dyn ConnectionService>>,
    unavailable: DashMap<ComponentName, String>,
}

impl InMemoryBinder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, component: ComponentName, service: Arc<dyn ConnectionService>) {
        self.services.insert(component, service);
    }

    /// Make binding to `component` fail even if a service is registered
    pub fn mark_unavailable(&self, component: ComponentName, reason: impl Into<String>) {
        self.unavailable.insert(component, reason.into());
    }
}

#[async_trait]
impl ConnectionServiceBinder for InMemoryBinder {
    async fn resolve(
        &self,
        component: &ComponentName,
        user: &UserHandle,
    ) -> std::result::Result<Arc<dyn ConnectionService>, BindError> {
        if let Some(reason) = self.unavailable.get(component) {
            return Err(BindError::Unavailable {
                component: component.clone(),
                reason: reason.value().clone(),
            });
        }
        self.services
            .get(component)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| BindError::not_found(component, user))
    }
}

/// Scripted reaction of a [`ScriptedConnectionService`] to one request
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    /// Answer immediately with this result
    Respond(AttemptResult),
    /// Keep the responder; answer later through [`ScriptedConnectionService::take_pending`]
    Hold,
}

impl ScriptedResponse {
    pub fn success(connection_id: impl Into<String>) -> Self {
        Self::Respond(AttemptResult::Success(CreatedConnection::new(connection_id)))
    }

    pub fn failure(cause: impl Into<DisconnectCause>) -> Self {
        Self::Respond(AttemptResult::Failure(cause.into()))
    }
}

/// Connection service that answers from a script and records what it saw
///
/// When the script runs dry the service succeeds with a connection id
/// derived from its own id.
pub struct ScriptedConnectionService {
    id: ServiceId,
    script: Mutex<VecDeque<ScriptedResponse>>,
    requests: Mutex<Vec<ConnectionRequest>>,
    aborted: Mutex<Vec<CallId>>,
    pending: Mutex<Vec<AttemptResponder>>,
}

impl ScriptedConnectionService {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: ServiceId(id.into()),
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            aborted: Mutex::new(Vec::new()),
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn with_script(self, script: impl IntoIterator<Item = ScriptedResponse>) -> Self {
        self.script.lock().extend(script);
        self
    }

    /// Requests received so far, oldest first
    pub fn requests(&self) -> Vec<ConnectionRequest> {
        self.requests.lock().clone()
    }

    pub fn create_connection_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn aborted_calls(&self) -> Vec<CallId> {
        self.aborted.lock().clone()
    }

    /// Take the oldest responder kept by a [`ScriptedResponse::Hold`]
    pub fn take_pending(&self) -> Option<AttemptResponder> {
        let mut pending = self.pending.lock();
        if pending.is_empty() {
            None
        } else {
            Some(pending.remove(0))
        }
    }
}

#[async_trait]
impl ConnectionService for ScriptedConnectionService {
    fn id(&self) -> ServiceId {
        self.id.clone()
    }

    async fn create_connection(&self, request: ConnectionRequest, responder: AttemptResponder) {
        debug!(service = %self.id, call_id = %request.call_id, candidate = %request.candidate, "create_connection");
        self.requests.lock().push(request);
        let next = self.script.lock().pop_front();
        match next {
            Some(ScriptedResponse::Respond(result)) => responder.respond(result),
            Some(ScriptedResponse::Hold) => self.pending.lock().push(responder),
            None => responder.succeed(CreatedConnection::new(format!("{}-conn", self.id))),
        }
    }

    async fn abort(&self, call_id: &CallId) {
        self.aborted.lock().push(call_id.clone());
    }
}

/// Terminal notification observed by a [`RecordingSink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Succeeded(CreatedConnection),
    Failed(DisconnectCause),
}

/// Sink that records every notification it receives
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().clone()
    }

    pub fn notification_count(&self) -> usize {
        self.events.lock().len()
    }
}

#[async_trait]
impl ResponseSink for RecordingSink {
    async fn on_routing_succeeded(&self, connection: CreatedConnection) {
        self.events.lock().push(SinkEvent::Succeeded(connection));
    }

    async fn on_routing_failed(&self, cause: DisconnectCause) {
        self.events.lock().push(SinkEvent::Failed(cause));
    }
}
