//! Candidate list construction
//!
//! Builds the ordered, immutable list of `(connection manager, target)`
//! pairs the sequencer works through. The manager-bypass retry is not
//! precomputed here; it depends on a failure cause only seen at runtime.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::collaborators::{PhoneAccountCatalog, SlotResolver};
use crate::config::RoutingConfig;
use crate::policy::EmergencyPolicyResolver;
use crate::types::{Call, Candidate, Capabilities, NoCandidateReason, PhoneAccountHandle};

/// Immutable, ordered candidates for one routing attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidatePlan {
    candidates: Arc<[Candidate]>,
    no_candidate_reason: Option<NoCandidateReason>,
}

impl CandidatePlan {
    pub fn new(candidates: Vec<Candidate>) -> Self {
        Self {
            candidates: candidates.into(),
            no_candidate_reason: None,
        }
    }

    pub fn empty(reason: NoCandidateReason) -> Self {
        Self {
            candidates: Vec::new().into(),
            no_candidate_reason: Some(reason),
        }
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn get(&self, index: usize) -> Option<&Candidate> {
        self.candidates.get(index)
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Set only for empty plans
    pub fn no_candidate_reason(&self) -> Option<NoCandidateReason> {
        self.no_candidate_reason
    }
}

impl fmt::Display for CandidatePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(reason) = self.no_candidate_reason {
            return write!(f, "[] ({})", reason);
        }
        let parts: Vec<String> = self.candidates.iter().map(|c| c.to_string()).collect();
        write!(f, "[{}]", parts.join(", "))
    }
}

/// Produces the [`CandidatePlan`] for a call
pub struct CandidateListBuilder {
    catalog: Arc<dyn PhoneAccountCatalog>,
    emergency: EmergencyPolicyResolver,
    config: RoutingConfig,
}

impl CandidateListBuilder {
    pub fn new(
        catalog: Arc<dyn PhoneAccountCatalog>,
        slots: Arc<dyn SlotResolver>,
        config: RoutingConfig,
    ) -> Self {
        let emergency = EmergencyPolicyResolver::new(catalog.clone(), slots);
        Self {
            catalog,
            emergency,
            config,
        }
    }

    pub fn build(&self, call: &Call) -> CandidatePlan {
        let plan = if call.is_emergency {
            self.build_emergency(call)
        } else {
            self.build_standard(call)
        };
        info!(call_id = %call.id, emergency = call.is_emergency, candidates = %plan, "Built candidate list");
        plan
    }

    fn build_standard(&self, call: &Call) -> CandidatePlan {
        let Some(target) = call.target_account.clone() else {
            return CandidatePlan::empty(NoCandidateReason::NoTargetAccount);
        };
        if !self.catalog.requires_bind_permission(&target) {
            warn!(call_id = %call.id, target = %target, "Target phone account lacks bind permission");
            return CandidatePlan::empty(NoCandidateReason::TargetNotPermitted);
        }

        let candidate = match self.connection_manager_for(call, &target) {
            Some(manager) => Candidate::new(manager, target),
            None => Candidate::direct(target),
        };
        CandidatePlan::new(vec![candidate])
    }

    /// Connection manager to route `target` through, if one applies.
    ///
    /// Managers only proxy SIM subscriptions, must differ from the target,
    /// and must hold the bind permission themselves.
    fn connection_manager_for(&self, call: &Call, target: &PhoneAccountHandle) -> Option<PhoneAccountHandle> {
        if !self.config.use_connection_manager {
            return None;
        }
        let manager = self.catalog.connection_manager_for(call)?;
        if &manager == target {
            return None;
        }
        let is_sim = self
            .catalog
            .lookup(target)
            .map(|account| account.has_capabilities(Capabilities::SIM_SUBSCRIPTION))
            .unwrap_or(false);
        if !is_sim {
            debug!(call_id = %call.id, target = %target, "Connection manager skipped for non-SIM target");
            return None;
        }
        if !self.catalog.requires_bind_permission(&manager) {
            warn!(call_id = %call.id, manager = %manager, "Connection manager lacks bind permission");
            return None;
        }
        Some(manager)
    }

    fn build_emergency(&self, call: &Call) -> CandidatePlan {
        let requested = call.target_account.as_ref();
        let primary = match self.emergency.select_primary(requested) {
            Ok(primary) => primary.account,
            Err(reason) => return CandidatePlan::empty(reason),
        };

        let mut candidates = vec![Candidate::direct(primary.clone())];
        if self.config.emergency_manager_fallback {
            if let Some(fallback) = self.emergency.manager_fallback(requested, &primary) {
                debug!(call_id = %call.id, fallback = %fallback, "Reserved emergency connection manager fallback");
                candidates.push(fallback);
            }
        }
        CandidatePlan::new(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::memory::{InMemoryCatalog, StaticSlotResolver};
    use crate::types::{ComponentName, PhoneAccount, SubscriptionId};
    use pretty_assertions::assert_eq;

    fn tel(id: &str) -> PhoneAccountHandle {
        PhoneAccountHandle::new(ComponentName::new("com.example.tel", "TelService"), id)
    }

    fn sim_manager() -> PhoneAccountHandle {
        PhoneAccountHandle::new(ComponentName::new("com.example.manager", "ManagerService"), "sim_mgr")
    }

    struct Fixture {
        catalog: Arc<InMemoryCatalog>,
        slots: Arc<StaticSlotResolver>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                catalog: Arc::new(InMemoryCatalog::new()),
                slots: Arc::new(StaticSlotResolver::new()),
            }
        }

        fn builder(&self, config: RoutingConfig) -> CandidateListBuilder {
            CandidateListBuilder::new(self.catalog.clone(), self.slots.clone(), config)
        }
    }

    #[test]
    fn test_missing_target_yields_empty_plan() {
        let fixture = Fixture::new();
        let plan = fixture.builder(RoutingConfig::default()).build(&Call::outgoing("555"));
        assert!(plan.is_empty());
        assert_eq!(plan.no_candidate_reason(), Some(NoCandidateReason::NoTargetAccount));
    }

    #[test]
    fn test_target_without_bind_permission_yields_empty_plan() {
        let fixture = Fixture::new();
        fixture.catalog.register(PhoneAccount::new(tel("tel_acct"), Capabilities::SIM_SUBSCRIPTION));
        fixture.catalog.deny_bind_permission(tel("tel_acct"));

        let call = Call::outgoing("555").with_target(tel("tel_acct"));
        let plan = fixture.builder(RoutingConfig::default()).build(&call);
        assert_eq!(plan.no_candidate_reason(), Some(NoCandidateReason::TargetNotPermitted));
    }

    #[test]
    fn test_direct_candidate_without_manager() {
        let fixture = Fixture::new();
        fixture.catalog.register(PhoneAccount::new(tel("tel_acct"), Capabilities::SIM_SUBSCRIPTION));

        let call = Call::outgoing("555").with_target(tel("tel_acct"));
        let plan = fixture.builder(RoutingConfig::default()).build(&call);
        assert_eq!(plan.candidates(), &[Candidate::direct(tel("tel_acct"))]);
    }

    #[test]
    fn test_manager_wraps_sim_target() {
        let fixture = Fixture::new();
        fixture.catalog.register(PhoneAccount::new(tel("tel_acct"), Capabilities::SIM_SUBSCRIPTION));
        fixture.catalog.set_connection_manager(Some(sim_manager()));

        let call = Call::outgoing("555").with_target(tel("tel_acct"));
        let plan = fixture.builder(RoutingConfig::default()).build(&call);
        assert_eq!(plan.candidates(), &[Candidate::new(sim_manager(), tel("tel_acct"))]);
    }

    #[test]
    fn test_manager_skipped_for_non_sim_target() {
        let fixture = Fixture::new();
        fixture.catalog.register(PhoneAccount::new(tel("voip_acct"), Capabilities::CALL_PROVIDER));
        fixture.catalog.set_connection_manager(Some(sim_manager()));

        let call = Call::outgoing("555").with_target(tel("voip_acct"));
        let plan = fixture.builder(RoutingConfig::default()).build(&call);
        assert_eq!(plan.candidates(), &[Candidate::direct(tel("voip_acct"))]);
    }

    #[test]
    fn test_manager_without_bind_permission_is_skipped() {
        let fixture = Fixture::new();
        fixture.catalog.register(PhoneAccount::new(tel("tel_acct"), Capabilities::SIM_SUBSCRIPTION));
        fixture.catalog.set_connection_manager(Some(sim_manager()));
        fixture.catalog.deny_bind_permission(sim_manager());

        let call = Call::outgoing("555").with_target(tel("tel_acct"));
        let plan = fixture.builder(RoutingConfig::default()).build(&call);
        assert_eq!(plan.candidates(), &[Candidate::direct(tel("tel_acct"))]);
    }

    #[test]
    fn test_manager_disabled_by_config() {
        let fixture = Fixture::new();
        fixture.catalog.register(PhoneAccount::new(tel("tel_acct"), Capabilities::SIM_SUBSCRIPTION));
        fixture.catalog.set_connection_manager(Some(sim_manager()));

        let call = Call::outgoing("555").with_target(tel("tel_acct"));
        let config = RoutingConfig::default().with_connection_manager(false);
        let plan = fixture.builder(config).build(&call);
        assert_eq!(plan.candidates(), &[Candidate::direct(tel("tel_acct"))]);
    }

    #[test]
    fn test_emergency_plan_reserves_manager_fallback() {
        let fixture = Fixture::new();
        let caps = Capabilities::SIM_SUBSCRIPTION | Capabilities::PLACE_EMERGENCY_CALLS;
        fixture
            .catalog
            .register(PhoneAccount::new(tel("tel_emer"), caps).with_subscription(SubscriptionId(1)));
        fixture.catalog.register(PhoneAccount::new(
            sim_manager(),
            Capabilities::CONNECTION_MANAGER | Capabilities::PLACE_EMERGENCY_CALLS,
        ));
        fixture.catalog.set_default_connection_manager(Some(sim_manager()));
        fixture.slots.set_slot(SubscriptionId(1), 0);

        let call = Call::outgoing("911").with_target(tel("tel_acct")).with_emergency(true);
        let plan = fixture.builder(RoutingConfig::default()).build(&call);
        assert_eq!(
            plan.candidates(),
            &[
                Candidate::direct(tel("tel_emer")),
                Candidate::new(sim_manager(), tel("tel_acct")),
            ]
        );

        let config = RoutingConfig::default().with_emergency_manager_fallback(false);
        let plan = fixture.builder(config).build(&call);
        assert_eq!(plan.candidates(), &[Candidate::direct(tel("tel_emer"))]);
    }

    #[test]
    fn test_emergency_without_capable_account() {
        let fixture = Fixture::new();
        fixture.catalog.register(PhoneAccount::new(tel("tel_acct"), Capabilities::SIM_SUBSCRIPTION));

        let call = Call::outgoing("911").with_emergency(true);
        let plan = fixture.builder(RoutingConfig::default()).build(&call);
        assert_eq!(plan.no_candidate_reason(), Some(NoCandidateReason::NoEmergencyAccount));
        assert_eq!(plan.to_string(), "[] (no emergency-capable phone account)");
    }
}
