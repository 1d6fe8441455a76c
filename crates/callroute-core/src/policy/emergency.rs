//! Emergency account selection
//!
//! Picks the primary account for an emergency call and, separately, the
//! connection-manager fallback tried if that primary fails.
//!
//! Rules, first match wins:
//!
//! 1. a capable account flagged `EMERGENCY_PREFERRED`, regardless of any
//!    other preference or slot validity
//! 2. the call's requested target, if capable and in a valid slot
//! 3. the capable account in the lowest valid slot
//! 4. nothing: the call fails with `ERROR`
//!
//! "Capable" means enabled, `PLACE_EMERGENCY_CALLS` and `SIM_SUBSCRIPTION`.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::collaborators::{PhoneAccountCatalog, SlotResolver};
use crate::types::{
    Candidate, Capabilities, NoCandidateReason, PhoneAccount, PhoneAccountHandle, SlotIndex,
    INVALID_SLOT_INDEX,
};

/// Which rule produced the primary emergency account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmergencyRule {
    TelephonyPreferred,
    UserPreferred,
    LowestSlot,
}

/// Primary account chosen for an emergency call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmergencyPrimary {
    pub account: PhoneAccountHandle,
    pub rule: EmergencyRule,
    /// Slot index, `None` when the account has no valid slot
    pub slot: Option<SlotIndex>,
}

/// Capabilities an account needs to be considered for emergency routing
pub const EMERGENCY_CAPABLE: Capabilities = Capabilities::from_bits(
    Capabilities::PLACE_EMERGENCY_CALLS.bits() | Capabilities::SIM_SUBSCRIPTION.bits(),
);

pub fn is_emergency_capable(account: &PhoneAccount) -> bool {
    account.enabled && account.has_capabilities(EMERGENCY_CAPABLE)
}

/// Pure selection over a snapshot of accounts.
///
/// `slot_of` returns the slot index for an account, or
/// [`INVALID_SLOT_INDEX`] when it has none.
pub fn select_emergency_primary<F>(
    accounts: &[PhoneAccount],
    requested_target: Option<&PhoneAccountHandle>,
    slot_of: F,
) -> Result<EmergencyPrimary, NoCandidateReason>
where
    F: Fn(&PhoneAccount) -> SlotIndex,
{
    let capable: Vec<&PhoneAccount> = accounts.iter().filter(|a| is_emergency_capable(*a)).collect();
    if capable.is_empty() {
        return Err(NoCandidateReason::NoEmergencyAccount);
    }

    let valid_slot = |account: &PhoneAccount| {
        let slot = slot_of(account);
        (slot != INVALID_SLOT_INDEX).then_some(slot)
    };

    if let Some(preferred) = capable
        .iter()
        .find(|a| a.has_capabilities(Capabilities::EMERGENCY_PREFERRED))
    {
        return Ok(EmergencyPrimary {
            account: preferred.handle.clone(),
            rule: EmergencyRule::TelephonyPreferred,
            slot: valid_slot(*preferred),
        });
    }

    if let Some(target) = requested_target {
        if let Some(account) = capable.iter().find(|a| &a.handle == target) {
            if let Some(slot) = valid_slot(*account) {
                return Ok(EmergencyPrimary {
                    account: account.handle.clone(),
                    rule: EmergencyRule::UserPreferred,
                    slot: Some(slot),
                });
            }
        }
    }

    // min_by_key keeps the first of equal keys, so ties stay in catalog order
    capable
        .iter()
        .filter_map(|a| valid_slot(*a).map(|slot| (*a, slot)))
        .min_by_key(|(_, slot)| *slot)
        .map(|(account, slot)| EmergencyPrimary {
            account: account.handle.clone(),
            rule: EmergencyRule::LowestSlot,
            slot: Some(slot),
        })
        .ok_or(NoCandidateReason::NoValidSlot)
}

/// Emergency policy bound to its collaborators
pub struct EmergencyPolicyResolver {
    catalog: Arc<dyn PhoneAccountCatalog>,
    slots: Arc<dyn SlotResolver>,
}

impl EmergencyPolicyResolver {
    pub fn new(catalog: Arc<dyn PhoneAccountCatalog>, slots: Arc<dyn SlotResolver>) -> Self {
        Self { catalog, slots }
    }

    /// Slot index of an account, [`INVALID_SLOT_INDEX`] without a subscription
    pub fn slot_index_of(&self, account: &PhoneAccount) -> SlotIndex {
        match self.slots.subscription_id_for(account) {
            Some(sub_id) => self.slots.slot_index_for(sub_id),
            None => INVALID_SLOT_INDEX,
        }
    }

    pub fn select_primary(
        &self,
        requested_target: Option<&PhoneAccountHandle>,
    ) -> Result<EmergencyPrimary, NoCandidateReason> {
        let accounts = self.catalog.all_accounts_for_current_user();
        let selection =
            select_emergency_primary(&accounts, requested_target, |a| self.slot_index_of(a));
        match &selection {
            Ok(primary) => debug!(
                account = %primary.account,
                rule = ?primary.rule,
                slot = ?primary.slot,
                "Selected emergency phone account"
            ),
            Err(reason) => warn!(%reason, accounts = accounts.len(), "No emergency phone account available"),
        }
        selection
    }

    /// Connection-manager fallback for a failed emergency primary.
    ///
    /// Uses the current user's connection manager when it can place
    /// emergency calls. The fallback keeps the call's requested target,
    /// or the default outgoing account, or the primary, in that order.
    pub fn manager_fallback(
        &self,
        requested_target: Option<&PhoneAccountHandle>,
        primary: &PhoneAccountHandle,
    ) -> Option<Candidate> {
        let manager = self.catalog.default_connection_manager()?;
        let manager_account = self.catalog.lookup(&manager)?;
        if !manager_account.has_capabilities(Capabilities::PLACE_EMERGENCY_CALLS) {
            debug!(manager = %manager, "Connection manager cannot place emergency calls");
            return None;
        }

        let target = requested_target
            .cloned()
            .or_else(|| self.catalog.default_outgoing_account())
            .unwrap_or_else(|| primary.clone());
        let fallback = Candidate::new(manager, target);
        if fallback == Candidate::direct(primary.clone()) {
            return None;
        }
        Some(fallback)
    }
}
