//! Core types for the connection routing engine
//!
//! This module defines the identifiers, account descriptors, call state and
//! attempt outcomes shared by the policy, candidate and sequencing layers.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;

/// Call ID type
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct CallId(pub String);

impl CallId {
    pub fn new() -> Self {
        Self(format!("call-{}", uuid::Uuid::new_v4()))
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a connection-providing component (package + class)
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ComponentName {
    pub package: String,
    pub class: String,
}

impl ComponentName {
    pub fn new(package: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            class: class.into(),
        }
    }
}

impl fmt::Display for ComponentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.package, self.class)
    }
}

/// User scope a service is bound under
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct UserHandle(pub u32);

impl UserHandle {
    pub const SYSTEM: UserHandle = UserHandle(0);
}

impl Default for UserHandle {
    fn default() -> Self {
        Self::SYSTEM
    }
}

/// Globally unique handle of a registered phone account
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct PhoneAccountHandle {
    pub component: ComponentName,
    pub id: String,
    #[serde(default)]
    pub user: UserHandle,
}

impl PhoneAccountHandle {
    pub fn new(component: ComponentName, id: impl Into<String>) -> Self {
        Self {
            component,
            id: id.into(),
            user: UserHandle::SYSTEM,
        }
    }

    pub fn with_user(mut self, user: UserHandle) -> Self {
        self.user = user;
        self
    }
}

impl fmt::Display for PhoneAccountHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.component, self.id)
    }
}

/// Capability bitset of a phone account
#[derive(Debug, Clone, Copy, Default, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capabilities(u32);

impl Capabilities {
    pub const NONE: Capabilities = Capabilities(0);
    pub const CONNECTION_MANAGER: Capabilities = Capabilities(0x1);
    pub const CALL_PROVIDER: Capabilities = Capabilities(0x2);
    pub const SIM_SUBSCRIPTION: Capabilities = Capabilities(0x4);
    pub const PLACE_EMERGENCY_CALLS: Capabilities = Capabilities(0x10);
    pub const EMERGENCY_PREFERRED: Capabilities = Capabilities(0x2000);

    const NAMED: [(&'static str, Capabilities); 5] = [
        ("CONNECTION_MANAGER", Self::CONNECTION_MANAGER),
        ("CALL_PROVIDER", Self::CALL_PROVIDER),
        ("SIM_SUBSCRIPTION", Self::SIM_SUBSCRIPTION),
        ("PLACE_EMERGENCY_CALLS", Self::PLACE_EMERGENCY_CALLS),
        ("EMERGENCY_PREFERRED", Self::EMERGENCY_PREFERRED),
    ];

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// True if every bit of `other` is set
    pub const fn contains(self, other: Capabilities) -> bool {
        self.0 & other.0 == other.0
    }

    /// Look up a single capability by its upper-case name
    pub fn from_name(name: &str) -> Option<Capabilities> {
        let wanted = name.trim().to_ascii_uppercase();
        Self::NAMED
            .iter()
            .find(|(n, _)| *n == wanted)
            .map(|(_, c)| *c)
    }
}

impl BitOr for Capabilities {
    type Output = Capabilities;

    fn bitor(self, rhs: Self) -> Self::Output {
        Capabilities(self.0 | rhs.0)
    }
}

impl BitOrAssign for Capabilities {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMED
            .iter()
            .filter(|(_, c)| self.contains(*c))
            .map(|(n, _)| *n)
            .collect();
        if names.is_empty() {
            write!(f, "NONE")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

/// Subscription identifier used by the slot resolver
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub i32);

/// SIM slot index; [`INVALID_SLOT_INDEX`] marks "no slot"
pub type SlotIndex = i32;

/// Sentinel slot index for accounts not tied to a present slot
pub const INVALID_SLOT_INDEX: SlotIndex = -1;

/// Registered connection-capability descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhoneAccount {
    pub handle: PhoneAccountHandle,
    pub label: String,
    pub capabilities: Capabilities,
    pub enabled: bool,
    pub subscription_id: Option<SubscriptionId>,
}

impl PhoneAccount {
    pub fn new(handle: PhoneAccountHandle, capabilities: Capabilities) -> Self {
        let label = handle.id.clone();
        Self {
            handle,
            label,
            capabilities,
            enabled: true,
            subscription_id: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_subscription(mut self, subscription_id: SubscriptionId) -> Self {
        self.subscription_id = Some(subscription_id);
        self
    }

    pub fn has_capabilities(&self, capabilities: Capabilities) -> bool {
        self.capabilities.contains(capabilities)
    }
}

/// Routing state of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallState {
    New,
    Routing,
    Connected,
    Failed,
}

/// Opaque reference to a bound connection service
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ServiceId(pub String);

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A call being routed
///
/// The engine reads the addressing fields and writes back the resolved
/// manager, target and bound service when an attempt succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub id: CallId,
    /// Dialled address, informational only
    pub handle: Option<String>,
    pub target_account: Option<PhoneAccountHandle>,
    pub connection_manager_account: Option<PhoneAccountHandle>,
    pub connection_service: Option<ServiceId>,
    pub is_emergency: bool,
    pub state: CallState,
}

impl Call {
    pub fn new(id: CallId) -> Self {
        Self {
            id,
            handle: None,
            target_account: None,
            connection_manager_account: None,
            connection_service: None,
            is_emergency: false,
            state: CallState::New,
        }
    }

    pub fn outgoing(handle: impl Into<String>) -> Self {
        let mut call = Self::new(CallId::new());
        call.handle = Some(handle.into());
        call
    }

    pub fn with_target(mut self, target: PhoneAccountHandle) -> Self {
        self.target_account = Some(target);
        self
    }

    pub fn with_emergency(mut self, is_emergency: bool) -> Self {
        self.is_emergency = is_emergency;
        self
    }

    /// Wrap the call in the per-session lock shared with the engine
    pub fn into_shared(self) -> SharedCall {
        Arc::new(Mutex::new(self))
    }
}

/// Call guarded by the session's mutual-exclusion scope
pub type SharedCall = Arc<Mutex<Call>>;

/// One attempt unit: which service to bind and which account it serves
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub connection_manager: PhoneAccountHandle,
    pub target: PhoneAccountHandle,
}

impl Candidate {
    pub fn new(connection_manager: PhoneAccountHandle, target: PhoneAccountHandle) -> Self {
        Self {
            connection_manager,
            target,
        }
    }

    /// Candidate that talks to the target's own service
    pub fn direct(target: PhoneAccountHandle) -> Self {
        Self {
            connection_manager: target.clone(),
            target,
        }
    }

    pub fn uses_connection_manager(&self) -> bool {
        self.connection_manager != self.target
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.uses_connection_manager() {
            write!(f, "{} via {}", self.target, self.connection_manager)
        } else {
            write!(f, "{}", self.target)
        }
    }
}

/// Telecom disconnect codes, passed through without reinterpretation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisconnectCode {
    Unknown,
    Error,
    Local,
    Remote,
    Canceled,
    Missed,
    Rejected,
    Busy,
    Restricted,
    Other,
    ConnectionManagerNotSupported,
    AnsweredElsewhere,
    CallPulled,
}

impl DisconnectCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectCode::Unknown => "UNKNOWN",
            DisconnectCode::Error => "ERROR",
            DisconnectCode::Local => "LOCAL",
            DisconnectCode::Remote => "REMOTE",
            DisconnectCode::Canceled => "CANCELED",
            DisconnectCode::Missed => "MISSED",
            DisconnectCode::Rejected => "REJECTED",
            DisconnectCode::Busy => "BUSY",
            DisconnectCode::Restricted => "RESTRICTED",
            DisconnectCode::Other => "OTHER",
            DisconnectCode::ConnectionManagerNotSupported => "CONNECTION_MANAGER_NOT_SUPPORTED",
            DisconnectCode::AnsweredElsewhere => "ANSWERED_ELSEWHERE",
            DisconnectCode::CallPulled => "CALL_PULLED",
        }
    }

    pub fn from_name(name: &str) -> Option<DisconnectCode> {
        let code = match name.trim().to_ascii_uppercase().as_str() {
            "UNKNOWN" => DisconnectCode::Unknown,
            "ERROR" => DisconnectCode::Error,
            "LOCAL" => DisconnectCode::Local,
            "REMOTE" => DisconnectCode::Remote,
            "CANCELED" => DisconnectCode::Canceled,
            "MISSED" => DisconnectCode::Missed,
            "REJECTED" => DisconnectCode::Rejected,
            "BUSY" => DisconnectCode::Busy,
            "RESTRICTED" => DisconnectCode::Restricted,
            "OTHER" => DisconnectCode::Other,
            "CONNECTION_MANAGER_NOT_SUPPORTED" => DisconnectCode::ConnectionManagerNotSupported,
            "ANSWERED_ELSEWHERE" => DisconnectCode::AnsweredElsewhere,
            "CALL_PULLED" => DisconnectCode::CallPulled,
            _ => return None,
        };
        Some(code)
    }
}

impl fmt::Display for DisconnectCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure reason delivered to the routing requester
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectCause {
    pub code: DisconnectCode,
    pub reason: Option<String>,
}

impl DisconnectCause {
    pub fn new(code: DisconnectCode) -> Self {
        Self { code, reason: None }
    }

    pub fn with_reason(code: DisconnectCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: Some(reason.into()),
        }
    }

    pub fn error() -> Self {
        Self::new(DisconnectCode::Error)
    }

    pub fn local() -> Self {
        Self::new(DisconnectCode::Local)
    }
}

impl From<DisconnectCode> for DisconnectCause {
    fn from(code: DisconnectCode) -> Self {
        Self::new(code)
    }
}

impl fmt::Display for DisconnectCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            Some(reason) => write!(f, "{} ({})", self.code, reason),
            None => write!(f, "{}", self.code),
        }
    }
}

/// Success payload a connection service hands back; forwarded unchanged
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedConnection {
    pub connection_id: String,
    pub address: Option<String>,
    #[serde(default)]
    pub extras: HashMap<String, String>,
}

impl CreatedConnection {
    pub fn new(connection_id: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            ..Default::default()
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extras.insert(key.into(), value.into());
        self
    }
}

/// Outcome of a single candidate attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptResult {
    Success(CreatedConnection),
    Failure(DisconnectCause),
}

/// Why a routing attempt produced no candidate at all
///
/// Every variant surfaces to the caller as [`DisconnectCode::Error`]; the
/// distinction is kept for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NoCandidateReason {
    /// Non-emergency call without a target account
    NoTargetAccount,
    /// Target account's service lacks the bind permission
    TargetNotPermitted,
    /// No enabled SIM account can place emergency calls
    NoEmergencyAccount,
    /// Emergency-capable accounts exist but none sits in a valid slot
    NoValidSlot,
}

impl NoCandidateReason {
    pub fn disconnect_cause(&self) -> DisconnectCause {
        DisconnectCause::with_reason(DisconnectCode::Error, self.to_string())
    }
}

impl fmt::Display for NoCandidateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            NoCandidateReason::NoTargetAccount => "no target phone account",
            NoCandidateReason::TargetNotPermitted => "target phone account lacks bind permission",
            NoCandidateReason::NoEmergencyAccount => "no emergency-capable phone account",
            NoCandidateReason::NoValidSlot => "no emergency-capable phone account in a valid slot",
        };
        f.write_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(id: &str) -> PhoneAccountHandle {
        PhoneAccountHandle::new(ComponentName::new("com.example.tel", "TelService"), id)
    }

    #[test]
    fn test_capability_names_round_trip_through_display() {
        let caps = Capabilities::SIM_SUBSCRIPTION | Capabilities::PLACE_EMERGENCY_CALLS;
        assert_eq!(caps.to_string(), "SIM_SUBSCRIPTION|PLACE_EMERGENCY_CALLS");
        assert_eq!(
            Capabilities::from_name("emergency_preferred"),
            Some(Capabilities::EMERGENCY_PREFERRED)
        );
        assert_eq!(Capabilities::from_name("VIDEO_CALLING"), None);
        assert_eq!(Capabilities::NONE.to_string(), "NONE");
    }

    #[test]
    fn test_contains_requires_all_bits() {
        let caps = Capabilities::SIM_SUBSCRIPTION;
        assert!(caps.contains(Capabilities::SIM_SUBSCRIPTION));
        assert!(!caps.contains(Capabilities::SIM_SUBSCRIPTION | Capabilities::PLACE_EMERGENCY_CALLS));
        assert!(caps.contains(Capabilities::NONE));
    }

    #[test]
    fn test_direct_candidate_has_no_manager() {
        let direct = Candidate::direct(handle("tel_acct"));
        assert!(!direct.uses_connection_manager());
        assert_eq!(direct.to_string(), "com.example.tel/TelService#tel_acct");

        let managed = Candidate::new(handle("cm_acct"), handle("tel_acct"));
        assert!(managed.uses_connection_manager());
    }

    #[test]
    fn test_disconnect_code_names() {
        assert_eq!(
            DisconnectCode::from_name("connection_manager_not_supported"),
            Some(DisconnectCode::ConnectionManagerNotSupported)
        );
        assert_eq!(DisconnectCode::from_name("nope"), None);
        let cause = DisconnectCause::with_reason(DisconnectCode::Error, "timeout");
        assert_eq!(cause.to_string(), "ERROR (timeout)");
    }
}
