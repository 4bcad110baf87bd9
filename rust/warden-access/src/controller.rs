use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::{AccessError, Action, Capabilities, Clock, Entry, IdentityVerifier, Params};

mod static_list;
pub use static_list::*;

mod legacy;
pub use legacy::*;

mod capability_log;
pub use capability_log::*;

mod contract;
pub use contract::*;

mod deposit;
pub use deposit::*;

mod identity_provider;
pub use identity_provider::*;

/// How many `updated` notifications may queue per subscriber before the
/// oldest are dropped. Subscribers that lag should re-read the snapshot.
pub const UPDATE_CHANNEL_CAPACITY: usize = 64;

/// An access policy that a log consults before accepting an entry.
///
/// Every controller kind is constructed by a
/// [`ControllerFactory`](crate::ControllerFactory), optionally `load`ed from
/// a published address, and `close`d when the log it governs closes.
#[async_trait]
pub trait AccessController: Send + Sync {
    /// The type string this controller is registered under
    fn controller_type(&self) -> &'static str;

    /// The address the controller is anchored to, once it has one
    fn address(&self) -> Option<String>;

    /// Which optional mutations this controller implements
    fn defined_capabilities(&self) -> DefinedCapabilities {
        DefinedCapabilities::default()
    }

    /// Whether `entry` may be appended. Never fails: any internal problem
    /// resolves to `false`.
    async fn can_append(&self, entry: &Entry, verifier: &dyn IdentityVerifier) -> bool;

    /// The locally known capabilities
    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    /// The identities holding one capability
    fn get(&self, capability: &str) -> BTreeSet<String> {
        self.capabilities()
            .get(capability)
            .cloned()
            .unwrap_or_default()
    }

    /// Grant `capability` to `identity`
    async fn grant(
        &self,
        _capability: &str,
        _identity: &str,
        _options: GrantOptions,
    ) -> Result<Outcome, AccessError> {
        Err(AccessError::Unsupported {
            controller_type: self.controller_type().to_owned(),
            action: Action::Grant,
        })
    }

    /// Revoke `capability` from `identity`
    async fn revoke(
        &self,
        _capability: &str,
        _identity: &str,
        _options: GrantOptions,
    ) -> Result<Outcome, AccessError> {
        Err(AccessError::Unsupported {
            controller_type: self.controller_type().to_owned(),
            action: Action::Revoke,
        })
    }

    /// Load previously published state from `address`
    async fn load(&self, address: &str) -> Result<(), AccessError>;

    /// Publish the controller's state and return its manifest params
    async fn save(&self) -> Result<Params, AccessError>;

    /// Release any resources held by the controller
    async fn close(&self) -> Result<(), AccessError> {
        Ok(())
    }

    /// Receive a notification whenever the local capability snapshot changes
    fn subscribe(&self) -> broadcast::Receiver<Updated>;
}

/// The optional mutations a controller implements, so that hosts can explain
/// a missing feature instead of attempting it
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefinedCapabilities {
    /// `grant` is implemented
    pub grant: bool,
    /// `revoke` is implemented
    pub revoke: bool,
}

impl DefinedCapabilities {
    /// Both grant and revoke are implemented
    pub fn mutable() -> Self {
        Self {
            grant: true,
            revoke: true,
        }
    }
}

/// Options for `grant` and `revoke`
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GrantOptions {
    /// The account that authorizes the mutation in an external system
    pub from: Option<String>,
    /// The operation is ordered after this clock reading
    pub after: Option<Clock>,
}

impl GrantOptions {
    /// Options that authorize a delegate mutation as `from`
    pub fn authorized_by(account: impl Into<String>) -> Self {
        Self {
            from: Some(account.into()),
            after: None,
        }
    }

    /// Options that order an operation after `clock`
    pub fn after(clock: Clock) -> Self {
        Self {
            from: None,
            after: Some(clock),
        }
    }
}

/// Receipt of a mutation submitted to an external system of record
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Identifier of the submitted transaction
    pub transaction: String,
}

/// The result of a `grant` or `revoke`
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    /// The operation was appended to a capability log
    Appended(Entry),
    /// The operation was submitted to an external system of record
    Submitted(Receipt),
    /// The operation was not applicable and nothing changed
    Skipped,
}

/// Notification that a controller's capability snapshot was rebuilt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Updated {
    /// Increases by one with every notification of a controller
    pub revision: u64,
}

/// Fan-out of [Updated] notifications. Delivery is at-least-once for
/// subscribers that keep up; a lagging subscriber sees
/// [`broadcast::error::RecvError::Lagged`] and should re-read the snapshot.
#[derive(Debug)]
pub struct Notifier {
    sender: broadcast::Sender<Updated>,
    revision: AtomicU64,
}

impl Default for Notifier {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            sender,
            revision: AtomicU64::new(0),
        }
    }
}

impl Notifier {
    /// Notify all current subscribers
    pub fn notify(&self) -> Updated {
        let updated = Updated {
            revision: self.revision.fetch_add(1, Ordering::SeqCst) + 1,
        };
        // No subscribers is not an error
        let _ = self.sender.send(updated);
        updated
    }

    /// Subscribe to future notifications
    pub fn subscribe(&self) -> broadcast::Receiver<Updated> {
        self.sender.subscribe()
    }
}
