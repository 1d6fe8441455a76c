#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use callroute_core::collaborators::memory::{
    InMemoryBinder, InMemoryCatalog, RecordingSink, ScriptedConnectionService, ScriptedResponse,
    StaticSlotResolver,
};
use callroute_core::prelude::*;

pub fn account_handle(package: &str, id: &str) -> PhoneAccountHandle {
    PhoneAccountHandle::new(ComponentName::new(package, "ConnectionService"), id)
}

pub fn tel_acct() -> PhoneAccountHandle {
    account_handle("com.example.tel", "tel_acct")
}

pub fn sim_manager() -> PhoneAccountHandle {
    account_handle("com.example.manager", "sim_mgr")
}

/// Routing environment built from the in-memory collaborators
pub struct Harness {
    pub catalog: Arc<InMemoryCatalog>,
    pub slots: Arc<StaticSlotResolver>,
    pub binder: Arc<InMemoryBinder>,
    pub sink: Arc<RecordingSink>,
    pub config: RoutingConfig,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            catalog: Arc::new(InMemoryCatalog::new()),
            slots: Arc::new(StaticSlotResolver::new()),
            binder: Arc::new(InMemoryBinder::new()),
            sink: Arc::new(RecordingSink::new()),
            config: RoutingConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RoutingConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a scripted service for the handle's component
    pub fn service(
        &self,
        handle: &PhoneAccountHandle,
        script: impl IntoIterator<Item = ScriptedResponse>,
    ) -> Arc<ScriptedConnectionService> {
        let service = Arc::new(ScriptedConnectionService::new(handle.component.package.clone()).with_script(script));
        self.binder.register(handle.component.clone(), service.clone());
        service
    }

    pub fn register_sim(&self, handle: PhoneAccountHandle) {
        self.catalog
            .register(PhoneAccount::new(handle, Capabilities::SIM_SUBSCRIPTION));
    }

    pub fn register_emergency(&self, handle: PhoneAccountHandle, extra: Capabilities, sub: i32, slot: SlotIndex) {
        let caps = Capabilities::SIM_SUBSCRIPTION | Capabilities::PLACE_EMERGENCY_CALLS | extra;
        self.catalog
            .register(PhoneAccount::new(handle, caps).with_subscription(SubscriptionId(sub)));
        self.slots.set_slot(SubscriptionId(sub), slot);
    }

    pub async fn route(&self, call: SharedCall) -> RoutingHandle {
        self.route_with_binder(call, self.binder.clone()).await
    }

    /// Route through a binder other than the harness's in-memory one
    pub async fn route_with_binder(
        &self,
        call: SharedCall,
        binder: Arc<dyn ConnectionServiceBinder>,
    ) -> RoutingHandle {
        CreateConnectionProcessor::new(
            call,
            self.catalog.clone(),
            self.slots.clone(),
            binder,
            self.sink.clone(),
            self.config.clone(),
        )
        .process()
        .await
    }
}

/// Wait until `service` has received `count` requests
pub async fn wait_for_requests(service: &ScriptedConnectionService, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while service.create_connection_count() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("service never received the expected requests");
}
