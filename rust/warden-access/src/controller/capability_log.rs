use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::{
    AccessController, AccessControllerOptions, AccessError, Action, BlockStore, Capabilities,
    CapabilityOperation, Clock, ControllerContext, ControllerFactory, DefinedCapabilities, Entry,
    GrantOptions, IdentityVerifier, Log, LogEvent, LogObserver, Notifier, OpenOptions, Outcome,
    Params, StaticListFactory, Updated, WRITE, aggregate,
};

/// Last path segment of every capability log address
pub const ACCESS_SUFFIX: &str = "_access";

/// The capability log that is loaded when neither an address nor a name is
/// given
pub const DEFAULT_ACCESS_ADDRESS: &str = "default-access-controller";

/// Force `<address>/_access` naming for a capability log
pub fn ensure_access_address(address: &str) -> String {
    if address.rsplit('/').next() == Some(ACCESS_SUFFIX) {
        address.to_owned()
    } else {
        format!("{}/{ACCESS_SUFFIX}", address.trim_end_matches('/'))
    }
}

/// Options accepted by the capability-log factory
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityLogOptions {
    /// Address of an existing capability log
    pub address: Option<String>,
    /// Name to derive a new capability log's address from
    pub name: Option<String>,
    /// Identities that may administer a newly created capability log.
    /// Defaults to the creating identity.
    pub admin: Option<Vec<String>>,
    /// Identities that are granted `write` when a new capability log is
    /// created
    pub write: Option<Vec<String>>,
}

/// The capability snapshot, rebuilt from the capability log on every event
#[derive(Default)]
struct CapabilityCache {
    snapshot: RwLock<Arc<Capabilities>>,
    writers: RwLock<BTreeSet<String>>,
    notifier: Notifier,
}

impl CapabilityCache {
    fn snapshot(&self) -> Arc<Capabilities> {
        self.snapshot.read().clone()
    }

    fn rebuild(&self, history: &[Entry]) {
        let operations = history.iter().filter_map(|entry| {
            match CapabilityOperation::from_payload(&entry.payload) {
                Ok(operation) => Some(operation),
                Err(error) => {
                    tracing::warn!(
                        entry = %entry.hash,
                        error = %error,
                        "Skipping malformed capability operation"
                    );
                    None
                }
            }
        });
        let writers = self.writers.read().clone();
        let capabilities = Arc::new(aggregate(operations, &writers));
        *self.snapshot.write() = capabilities;

        let updated = self.notifier.notify();
        tracing::debug!(
            operations = history.len(),
            revision = updated.revision,
            "Rebuilt capabilities"
        );
    }
}

impl LogObserver for CapabilityCache {
    fn on_event(&self, _event: LogEvent<'_>, history: &[Entry]) {
        self.rebuild(history);
    }
}

enum State {
    Unloaded,
    Ready(Arc<dyn Log>),
    Closed,
}

/// Keeps its policy in a log of its own: every grant and revoke is an entry
/// in a capability log, and the capabilities are the replay of that log in
/// causal order.
///
/// The capability log is gated by a static list of administrators, fixed
/// when it is created. Those administrators always hold `admin`.
pub struct CapabilityLogController<S>
where
    S: BlockStore,
{
    context: ControllerContext<S>,
    options: CapabilityLogOptions,
    state: RwLock<State>,
    cache: Arc<CapabilityCache>,
}

impl<S> CapabilityLogController<S>
where
    S: BlockStore,
{
    /// Type string of capability-log controllers
    pub const TYPE: &'static str = CapabilityLogFactory::TYPE;

    /// An unloaded controller
    pub fn new(context: ControllerContext<S>, options: CapabilityLogOptions) -> Self {
        Self {
            context,
            options,
            state: RwLock::new(State::Unloaded),
            cache: Arc::new(CapabilityCache::default()),
        }
    }

    /// The capability log, once loaded
    pub fn log(&self) -> Result<Arc<dyn Log>, AccessError> {
        match &*self.state.read() {
            State::Ready(log) => Ok(log.clone()),
            State::Unloaded => Err(AccessError::NotLoaded),
            State::Closed => Err(AccessError::Closed),
        }
    }

    fn gate(&self) -> AccessControllerOptions {
        let admin = self
            .options
            .admin
            .clone()
            .unwrap_or_else(|| vec![self.context.identity.id.clone()]);
        AccessControllerOptions::new(
            StaticListFactory::TYPE,
            Params::new().with_list(WRITE, admin),
        )
    }

    async fn append(
        &self,
        action: Action,
        operation: CapabilityOperation,
        options: GrantOptions,
    ) -> Result<Outcome, AccessError> {
        let log = self.log()?;
        if operation.capability.is_empty() {
            return Err(AccessError::InvalidOptions(format!(
                "cannot {action} an unnamed capability"
            )));
        }
        let payload = operation.to_payload()?;
        let entry = log
            .append(payload, options.after.as_ref())
            .await
            .map_err(|error| error.attempted(action, &operation.capability))?;
        Ok(Outcome::Appended(entry))
    }
}

#[async_trait]
impl<S> AccessController for CapabilityLogController<S>
where
    S: BlockStore,
{
    fn controller_type(&self) -> &'static str {
        Self::TYPE
    }

    fn address(&self) -> Option<String> {
        self.log().ok().map(|log| log.address().to_owned())
    }

    fn defined_capabilities(&self) -> DefinedCapabilities {
        DefinedCapabilities::mutable()
    }

    async fn can_append(&self, entry: &Entry, verifier: &dyn IdentityVerifier) -> bool {
        if matches!(*self.state.read(), State::Closed) {
            return false;
        }
        if !self.cache.snapshot().allows_append(&entry.identity.id) {
            return false;
        }
        verifier.verify(entry).await
    }

    fn capabilities(&self) -> Capabilities {
        self.cache.snapshot().as_ref().clone()
    }

    async fn grant(
        &self,
        capability: &str,
        identity: &str,
        options: GrantOptions,
    ) -> Result<Outcome, AccessError> {
        self.append(
            Action::Grant,
            CapabilityOperation::grant(capability, identity),
            options,
        )
        .await
    }

    async fn revoke(
        &self,
        capability: &str,
        identity: &str,
        options: GrantOptions,
    ) -> Result<Outcome, AccessError> {
        self.append(
            Action::Revoke,
            CapabilityOperation::revoke(capability, identity),
            options,
        )
        .await
    }

    async fn load(&self, address: &str) -> Result<(), AccessError> {
        let address = ensure_access_address(address);
        let previous = match &*self.state.read() {
            State::Closed => return Err(AccessError::Closed),
            State::Ready(log) if log.address() == address => return Ok(()),
            State::Ready(log) => Some(log.clone()),
            State::Unloaded => None,
        };
        if let Some(previous) = previous {
            if let Err(error) = previous.close().await {
                tracing::error!(
                    address = %previous.address(),
                    error = %error,
                    "Failed to close the previous capability log"
                );
            }
        }

        let log = self
            .context
            .host
            .open(
                &address,
                OpenOptions {
                    create: true,
                    access_controller: self.gate(),
                },
            )
            .await?;

        *self.cache.writers.write() = log.access().get(WRITE);
        let closed = {
            let mut state = self.state.write();
            match *state {
                State::Closed => true,
                _ => {
                    *state = State::Ready(log.clone());
                    false
                }
            }
        };
        if closed {
            log.close().await?;
            return Err(AccessError::Closed);
        }
        log.subscribe(self.cache.clone());
        log.load().await?;

        tracing::debug!(address = %address, "Loaded capability log");
        Ok(())
    }

    async fn save(&self) -> Result<Params, AccessError> {
        let log = self.log()?;
        Ok(Params::new().with_string(Params::ADDRESS, log.address()))
    }

    async fn close(&self) -> Result<(), AccessError> {
        let previous = std::mem::replace(&mut *self.state.write(), State::Closed);
        if let State::Ready(log) = previous {
            log.close().await?;
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<Updated> {
        self.cache.notifier.subscribe()
    }
}

/// Builds [CapabilityLogController]s
#[derive(Clone, Copy, Debug, Default)]
pub struct CapabilityLogFactory;

impl CapabilityLogFactory {
    /// Type string of capability-log controllers
    pub const TYPE: &'static str = "capability-log";
}

#[async_trait]
impl<S> ControllerFactory<S> for CapabilityLogFactory
where
    S: BlockStore,
{
    fn controller_type(&self) -> &str {
        Self::TYPE
    }

    async fn create(
        &self,
        context: &ControllerContext<S>,
        options: Params,
    ) -> Result<Arc<dyn AccessController>, AccessError> {
        let options: CapabilityLogOptions = options.decode()?;
        let address = options
            .address
            .clone()
            .or_else(|| options.name.clone())
            .unwrap_or_else(|| DEFAULT_ACCESS_ADDRESS.to_owned());
        let initial = match options.address {
            None => options.write.clone().unwrap_or_default(),
            Some(_) => Vec::new(),
        };

        let controller = CapabilityLogController::new(context.clone(), options);
        controller.load(&address).await?;

        let origin = Clock::new(context.identity.id.clone(), 0);
        for identity in initial {
            controller
                .grant(WRITE, &identity, GrantOptions::after(origin.clone()))
                .await?;
        }
        Ok(Arc::new(controller))
    }
}
