//! # callroute-core
//!
//! Connection routing engine for outgoing calls.
//!
//! Given a call and the registered phone accounts, the engine decides which
//! connection-providing service should set the call up, then tries the
//! candidates in order until one succeeds or all have failed:
//!
//! - [`routing::CandidateListBuilder`] turns a call into an ordered list of
//!   `(connection manager, target)` candidates
//! - [`policy::emergency`] picks the account for emergency calls
//! - [`routing::ConnectionAttemptSequencer`] is the pure retry state machine
//! - [`routing::CreateConnectionProcessor`] binds services and drives the
//!   sequencer on a tokio task
//!
//! Collaborators (account catalog, slot mapping, service binding, result
//! sink) are traits in [`collaborators`], with in-memory versions in
//! [`collaborators::memory`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use callroute_core::collaborators::memory::{
//!     InMemoryBinder, InMemoryCatalog, RecordingSink, ScriptedConnectionService, StaticSlotResolver,
//! };
//! use callroute_core::prelude::*;
//!
//! # async fn example() {
//! let tel = PhoneAccountHandle::new(ComponentName::new("com.example.tel", "TelService"), "tel_acct");
//! let catalog = Arc::new(InMemoryCatalog::new());
//! catalog.register(PhoneAccount::new(tel.clone(), Capabilities::SIM_SUBSCRIPTION));
//!
//! let binder = Arc::new(InMemoryBinder::new());
//! binder.register(tel.component.clone(), Arc::new(ScriptedConnectionService::new("tel")));
//!
//! let call = Call::outgoing("555-0100").with_target(tel).into_shared();
//! let handle = CreateConnectionProcessor::new(
//!     call,
//!     catalog,
//!     Arc::new(StaticSlotResolver::new()),
//!     binder,
//!     Arc::new(RecordingSink::new()),
//!     RoutingConfig::default(),
//! )
//! .process()
//! .await;
//! assert!(handle.wait().await.is_connected());
//! # }
//! ```

pub mod collaborators;
pub mod config;
pub mod error;
pub mod logging;
pub mod policy;
pub mod routing;
pub mod types;

pub use config::RoutingConfig;
pub use error::{BindError, Result, RoutingError};
pub use routing::{CreateConnectionProcessor, RoutingHandle, RoutingOutcome, RoutingResult};

pub mod prelude {
    pub use crate::collaborators::{
        ConnectionRequest, ConnectionService, ConnectionServiceBinder, PhoneAccountCatalog,
        ResponseSink, SlotResolver,
    };
    pub use crate::config::RoutingConfig;
    pub use crate::error::{BindError, RoutingError};
    pub use crate::routing::{
        AttemptResponder, CreateConnectionProcessor, RoutingHandle, RoutingOutcome, RoutingResult,
    };
    pub use crate::types::*;
}
