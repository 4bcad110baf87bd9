//! The replicated log that controllers govern, and that the capability-log
//! controller keeps its own policy in.

use std::sync::Arc;

use async_trait::async_trait;
use ipld_core::ipld::Ipld;
use serde::{Deserialize, Serialize};

use crate::{AccessController, AccessError, Clock, Entry, Identity, Params};

mod memory;
pub use memory::*;

/// Something that happened to a log
#[derive(Clone, Copy, Debug)]
pub enum LogEvent<'a> {
    /// The log finished loading its persisted entries
    Ready,
    /// An entry was appended locally
    Write(&'a Entry),
    /// Entries were received from peers and accepted
    Replicated(&'a [Entry]),
}

/// Receives a log's events synchronously, together with the log's full
/// history in causal order as of the event.
pub trait LogObserver: Send + Sync {
    /// Handle one event. Must not block.
    fn on_event(&self, event: LogEvent<'_>, history: &[Entry]);
}

/// Handle to an open replica of a log
#[async_trait]
pub trait Log: Send + Sync {
    /// The log's address
    fn address(&self) -> &str;

    /// The identity that appends through this handle
    fn identity(&self) -> &Identity;

    /// The controller that gates this log
    fn access(&self) -> Arc<dyn AccessController>;

    /// All accepted entries in causal order
    fn entries(&self) -> Vec<Entry>;

    /// Deliver future events to `observer` until this handle closes
    fn subscribe(&self, observer: Arc<dyn LogObserver>);

    /// Load persisted entries and emit [`LogEvent::Ready`]
    async fn load(&self) -> Result<(), AccessError>;

    /// Append a payload, ordered after `after` if given. Observers have
    /// seen the [`LogEvent::Write`] by the time this returns.
    async fn append(&self, payload: Ipld, after: Option<&Clock>) -> Result<Entry, AccessError>;

    /// Close this handle
    async fn close(&self) -> Result<(), AccessError>;
}

/// Opens logs on behalf of one identity
#[async_trait]
pub trait LogHost: Send + Sync {
    /// The identity logs are opened as
    fn identity(&self) -> &Identity;

    /// Open (and optionally create) the log at `address`
    async fn open(&self, address: &str, options: OpenOptions) -> Result<Arc<dyn Log>, AccessError>;
}

/// How a log should be opened
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OpenOptions {
    /// Create the log if nothing is known about it yet
    pub create: bool,
    /// The controller that gates a newly created log
    pub access_controller: AccessControllerOptions,
}

/// The controller a newly created log should be gated by
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AccessControllerOptions {
    /// A registered controller type
    #[serde(rename = "type")]
    pub controller_type: String,
    /// Options for that controller's factory
    pub params: Params,
}

impl AccessControllerOptions {
    /// Options for a controller of `controller_type`
    pub fn new(controller_type: impl Into<String>, params: Params) -> Self {
        Self {
            controller_type: controller_type.into(),
            params,
        }
    }
}
