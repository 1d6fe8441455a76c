//! External collaborators of the routing engine
//!
//! The engine never reaches for global registries. Everything it consults
//! is injected as one of these traits:
//!
//! - [`PhoneAccountCatalog`] - registered accounts and their capabilities
//! - [`SlotResolver`] - account to subscription to SIM slot mapping
//! - [`ConnectionServiceBinder`] - produces a [`ConnectionService`] for a component
//! - [`ResponseSink`] - receives exactly one terminal outcome per routing attempt
//!
//! In-memory implementations live in [`memory`]; they back the CLI simulator
//! and the test suite.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::BindError;
use crate::routing::AttemptResponder;
use crate::types::{
    Call, CallId, Candidate, ComponentName, CreatedConnection, DisconnectCause, PhoneAccount,
    PhoneAccountHandle, ServiceId, SlotIndex, SubscriptionId, UserHandle,
};

/// Read-only source of truth for registered phone accounts
pub trait PhoneAccountCatalog: Send + Sync {
    /// Look up an account regardless of its enabled state
    fn lookup(&self, handle: &PhoneAccountHandle) -> Option<PhoneAccount>;

    /// Connection manager that should proxy this call, if any
    fn connection_manager_for(&self, call: &Call) -> Option<PhoneAccountHandle>;

    /// Connection manager of the current user
    fn default_connection_manager(&self) -> Option<PhoneAccountHandle>;

    /// Whether the account's service holds the bind permission
    fn requires_bind_permission(&self, handle: &PhoneAccountHandle) -> bool;

    fn all_accounts_for_current_user(&self) -> Vec<PhoneAccount>;

    /// Default outgoing account of the current user
    fn default_outgoing_account(&self) -> Option<PhoneAccountHandle> {
        None
    }
}

/// Maps accounts to subscriptions and subscriptions to SIM slots
pub trait SlotResolver: Send + Sync {
    fn subscription_id_for(&self, account: &PhoneAccount) -> Option<SubscriptionId>;

    /// Returns [`crate::types::INVALID_SLOT_INDEX`] when the subscription has no slot
    fn slot_index_for(&self, subscription_id: SubscriptionId) -> SlotIndex;
}

/// What a connection service is asked to set up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRequest {
    pub call_id: CallId,
    pub handle: Option<String>,
    pub candidate: Candidate,
    pub is_emergency: bool,
}

/// A bound connection-providing service
#[async_trait]
pub trait ConnectionService: Send + Sync {
    fn id(&self) -> ServiceId;

    /// Start creating a connection.
    ///
    /// The service must eventually answer through `responder`, from any task
    /// or thread. Dropping the responder unanswered is reported as an
    /// `ERROR` failure for the attempt.
    async fn create_connection(&self, request: ConnectionRequest, responder: AttemptResponder);

    /// Cancel a pending attempt for `call_id`, where supported
    async fn abort(&self, _call_id: &CallId) {}
}

/// Resolves component identities to bound services
#[async_trait]
pub trait ConnectionServiceBinder: Send + Sync {
    async fn resolve(
        &self,
        component: &ComponentName,
        user: &UserHandle,
    ) -> std::result::Result<Arc<dyn ConnectionService>, BindError>;
}

/// The routing requester
#[async_trait]
pub trait ResponseSink: Send + Sync {
    async fn on_routing_succeeded(&self, connection: CreatedConnection);

    async fn on_routing_failed(&self, cause: DisconnectCause);
}
