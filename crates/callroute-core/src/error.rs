//! Error types for the callroute-core library
//!
//! Routing outcomes are never errors: a rejected or unroutable call is
//! reported through [`crate::collaborators::ResponseSink`] as a
//! [`crate::types::DisconnectCause`]. The types here cover the surrounding
//! plumbing (configuration, logging, binding, scenario loading).

use crate::types::{ComponentName, UserHandle};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RoutingError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Logging setup failed: {message}")]
    Logging { message: String },

    #[error("Invalid scenario: {message}")]
    InvalidScenario { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl RoutingError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a logging error
    pub fn logging(message: impl Into<String>) -> Self {
        Self::Logging {
            message: message.into(),
        }
    }

    /// Create a scenario error
    pub fn scenario(message: impl Into<String>) -> Self {
        Self::InvalidScenario {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RoutingError>;

/// Why a binder could not produce a connection service
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BindError {
    #[error("No connection service registered for {component} (user {user})")]
    ServiceNotFound {
        component: ComponentName,
        user: u32,
    },

    #[error("Binding to {component} not permitted")]
    PermissionDenied { component: ComponentName },

    #[error("Connection service {component} unavailable: {reason}")]
    Unavailable {
        component: ComponentName,
        reason: String,
    },
}

impl BindError {
    pub fn not_found(component: &ComponentName, user: &UserHandle) -> Self {
        Self::ServiceNotFound {
            component: component.clone(),
            user: user.0,
        }
    }
}
