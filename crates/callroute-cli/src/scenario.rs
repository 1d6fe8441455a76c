//! YAML scenario files for the simulator
//!
//! A scenario describes a whole routing environment: the registered
//! accounts, SIM slots, connection managers, which services misbehave, and
//! how each service answers. Account references use the account `id`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use callroute_core::collaborators::memory::{
    InMemoryBinder, InMemoryCatalog, ScriptedConnectionService, ScriptedResponse,
    StaticSlotResolver,
};
use callroute_core::types::{
    AttemptResult, Call, CallId, Capabilities, ComponentName, CreatedConnection, DisconnectCode,
    PhoneAccount, PhoneAccountHandle, SharedCall, SlotIndex, SubscriptionId, UserHandle,
};
use callroute_core::{Result, RoutingError};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    #[serde(default)]
    pub description: Option<String>,
    pub accounts: Vec<AccountEntry>,
    /// Subscription id to SIM slot index
    #[serde(default)]
    pub slots: HashMap<i32, SlotIndex>,
    pub call: CallEntry,
    #[serde(default)]
    pub connection_manager: Option<String>,
    #[serde(default)]
    pub default_connection_manager: Option<String>,
    #[serde(default)]
    pub default_outgoing: Option<String>,
    #[serde(default)]
    pub bind_permission_denied: Vec<String>,
    /// Components whose services cannot be bound, as `package/class`
    #[serde(default)]
    pub unbindable_components: Vec<String>,
    /// Ordered answers per component: `success` or a disconnect code name
    #[serde(default)]
    pub responses: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccountEntry {
    pub id: String,
    /// `package/class`
    pub component: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub subscription: Option<i32>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub user: u32,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CallEntry {
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub emergency: bool,
    #[serde(default)]
    pub handle: Option<String>,
}

/// Collaborators and call built from a scenario
pub struct Environment {
    pub catalog: Arc<InMemoryCatalog>,
    pub slots: Arc<StaticSlotResolver>,
    pub binder: Arc<InMemoryBinder>,
    pub services: HashMap<ComponentName, Arc<ScriptedConnectionService>>,
    pub call: SharedCall,
}

pub fn parse_component(text: &str) -> Result<ComponentName> {
    match text.split_once('/') {
        Some((package, class)) if !package.is_empty() && !class.is_empty() => {
            Ok(ComponentName::new(package, class))
        }
        _ => Err(RoutingError::scenario(format!(
            "component '{}' must be written as package/class",
            text
        ))),
    }
}

fn parse_capabilities(account: &str, names: &[String]) -> Result<Capabilities> {
    names.iter().try_fold(Capabilities::NONE, |caps, name| {
        Capabilities::from_name(name).map(|c| caps | c).ok_or_else(|| {
            RoutingError::scenario(format!("account '{}': unknown capability '{}'", account, name))
        })
    })
}

fn parse_response(component: &str, text: &str) -> Result<ScriptedResponse> {
    if text.trim().eq_ignore_ascii_case("success") {
        return Ok(ScriptedResponse::Respond(AttemptResult::Success(
            CreatedConnection::new(format!("{}-conn", component)),
        )));
    }
    DisconnectCode::from_name(text)
        .map(ScriptedResponse::failure)
        .ok_or_else(|| {
            RoutingError::scenario(format!(
                "component '{}': response '{}' is neither success nor a disconnect code",
                component, text
            ))
        })
}

impl Scenario {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&content)
    }

    /// Account handles by scenario id
    fn handles(&self) -> Result<HashMap<String, PhoneAccountHandle>> {
        let mut handles = HashMap::new();
        for account in &self.accounts {
            let handle = PhoneAccountHandle::new(parse_component(&account.component)?, account.id.clone())
                .with_user(UserHandle(account.user));
            if handles.insert(account.id.clone(), handle).is_some() {
                return Err(RoutingError::scenario(format!("duplicate account id '{}'", account.id)));
            }
        }
        Ok(handles)
    }

    pub fn build(&self) -> Result<Environment> {
        let handles = self.handles()?;
        let resolve = |id: &str| {
            handles
                .get(id)
                .cloned()
                .ok_or_else(|| RoutingError::scenario(format!("unknown account '{}'", id)))
        };
        let resolve_opt = |id: &Option<String>| id.as_deref().map(resolve).transpose();

        let catalog = Arc::new(InMemoryCatalog::new());
        let slots = Arc::new(StaticSlotResolver::new());
        for entry in &self.accounts {
            let handle = resolve(&entry.id)?;
            let mut account = PhoneAccount::new(handle, parse_capabilities(&entry.id, &entry.capabilities)?)
                .with_enabled(entry.enabled);
            if let Some(sub) = entry.subscription {
                account = account.with_subscription(SubscriptionId(sub));
            }
            if let Some(label) = &entry.label {
                account = account.with_label(label.clone());
            }
            catalog.register(account);
        }
        for (sub, slot) in &self.slots {
            slots.set_slot(SubscriptionId(*sub), *slot);
        }

        catalog.set_connection_manager(resolve_opt(&self.connection_manager)?);
        catalog.set_default_connection_manager(resolve_opt(&self.default_connection_manager)?);
        catalog.set_default_outgoing_account(resolve_opt(&self.default_outgoing)?);
        for id in &self.bind_permission_denied {
            catalog.deny_bind_permission(resolve(id)?);
        }

        let binder = Arc::new(InMemoryBinder::new());
        let mut services = HashMap::new();
        for handle in handles.values() {
            let component = handle.component.clone();
            if services.contains_key(&component) {
                continue;
            }
            let key = component.to_string();
            let script = self
                .responses
                .get(&key)
                .map(|answers| answers.iter().map(|a| parse_response(&key, a)).collect::<Result<Vec<_>>>())
                .transpose()?
                .unwrap_or_default();
            let service = Arc::new(ScriptedConnectionService::new(key.clone()).with_script(script));
            binder.register(component.clone(), service.clone());
            services.insert(component, service);
        }
        for key in self.responses.keys() {
            if !services.contains_key(&parse_component(key)?) {
                return Err(RoutingError::scenario(format!(
                    "responses given for '{}', which no account uses",
                    key
                )));
            }
        }
        for text in &self.unbindable_components {
            binder.mark_unavailable(parse_component(text)?, "marked unbindable by scenario");
        }

        let mut call = Call::new(CallId::new()).with_emergency(self.call.emergency);
        call.handle = self.call.handle.clone();
        call.target_account = resolve_opt(&self.call.target)?;
        debug!(call_id = %call.id, accounts = self.accounts.len(), services = services.len(), "Scenario environment built");

        Ok(Environment {
            catalog,
            slots,
            binder,
            services,
            call: call.into_shared(),
        })
    }
}
