//! Routing policy
//!
//! Pure decision logic consulted by the candidate builder. Nothing here
//! binds services or touches call state.

pub mod emergency;

pub use emergency::{
    is_emergency_capable, select_emergency_primary, EmergencyPolicyResolver, EmergencyPrimary,
    EmergencyRule, EMERGENCY_CAPABLE,
};
