use std::fmt::Display;

use thiserror::Error;
use warden_storage::WardenStorageError;

/// The kind of mutation that an identity attempted
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    /// Appending an entry to a log
    Append,
    /// Granting a capability
    Grant,
    /// Revoking a capability
    Revoke,
}

impl Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Append => write!(f, "append"),
            Action::Grant => write!(f, "grant"),
            Action::Revoke => write!(f, "revoke"),
        }
    }
}

/// The common error type used by this crate
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AccessError {
    /// A manifest or lookup named a controller type that is not registered.
    /// Fatal to opening the governed log: no default policy is substituted.
    #[error("Access controller type '{0}' is not supported")]
    UnsupportedType(String),

    /// A factory was registered without a usable type string
    #[error("Invalid access controller registration: {0}")]
    InvalidRegistration(String),

    /// A manifest or capability operation could not be decoded
    #[error("Failed to decode: {0}")]
    Decode(String),

    /// Content storage holds nothing at the given address
    #[error("Nothing found at '{0}'")]
    NotFound(String),

    /// Content storage failed
    #[error("Storage operation failed: {0}")]
    Storage(String),

    /// An identity lacks the capability required for the attempted action
    #[error("{}", denial(.identity, .action, .target, .capability))]
    NotAuthorized {
        /// The rejected identity
        identity: String,
        /// What the identity attempted
        action: Action,
        /// The log that was written to
        target: String,
        /// The capability that was being granted or revoked, if any
        capability: Option<String>,
    },

    /// A delegate mutation had no `from` option and no default account
    #[error("Cannot {0} without an authority: pass 'from' or configure a default account")]
    MissingAuthority(Action),

    /// Controller options were missing or malformed
    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    /// The controller does not implement the requested mutation
    #[error("Access controller '{controller_type}' does not support {action}")]
    Unsupported {
        /// The controller's type
        controller_type: String,
        /// The mutation that was requested
        action: Action,
    },

    /// An external system of record failed
    #[error("External authority failed: {0}")]
    Delegate(String),

    /// The controller has not been loaded yet
    #[error("Access controller has not been loaded")]
    NotLoaded,

    /// The controller or log has been closed
    #[error("Access controller has been closed")]
    Closed,
}

impl AccessError {
    /// A denied append by `identity` to the log at `target`
    pub fn denied(identity: impl Into<String>, action: Action, target: impl Into<String>) -> Self {
        AccessError::NotAuthorized {
            identity: identity.into(),
            action,
            target: target.into(),
            capability: None,
        }
    }

    /// Re-frame a denied append to a capability log as the grant or revoke
    /// that caused it. Other errors pass through unchanged.
    pub fn attempted(self, action: Action, capability: &str) -> Self {
        match self {
            AccessError::NotAuthorized {
                identity, target, ..
            } => AccessError::NotAuthorized {
                identity,
                action,
                target,
                capability: Some(capability.to_owned()),
            },
            other => other,
        }
    }
}

fn denial(identity: &str, action: &Action, target: &str, capability: &Option<String>) -> String {
    match capability {
        Some(capability) => format!(
            "Identity '{identity}' may not {action} '{capability}' on '{target}': it lacks the 'admin' capability"
        ),
        None => format!("Identity '{identity}' may not {action} to '{target}'"),
    }
}

impl From<WardenStorageError> for AccessError {
    fn from(value: WardenStorageError) -> Self {
        match value {
            WardenStorageError::DecodeFailed(message) => AccessError::Decode(message),
            WardenStorageError::InvalidAddress(address) => {
                AccessError::Decode(format!("'{address}' is not a content address"))
            }
            other => AccessError::Storage(format!("{other}")),
        }
    }
}
