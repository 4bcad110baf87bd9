use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use warden_storage::ContentAddress;

use crate::{
    ANY, AccessController, AccessError, BlockStore, Capabilities, ControllerContext,
    ControllerFactory, Entry, IdentityVerifier, Notifier, Params, Updated, WRITE,
};

/// Options accepted by the static-list factory
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticListOptions {
    /// Identities allowed to append. Defaults to the creating identity.
    pub write: Option<Vec<String>>,
}

/// The shapes a published write list may take
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub(crate) enum WriteList {
    Keyed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        admin: Option<Vec<String>>,
        write: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        read: Option<Vec<String>>,
    },
    Bare(Vec<String>),
}

impl WriteList {
    pub(crate) fn into_write(self) -> Vec<String> {
        match self {
            WriteList::Keyed { write, .. } => write,
            WriteList::Bare(write) => write,
        }
    }
}

/// A fixed set of identities that may append, published once and never
/// changed. The identity `*` admits everyone.
pub struct StaticListController<S>
where
    S: BlockStore,
{
    store: S,
    write: RwLock<BTreeSet<String>>,
    address: RwLock<Option<String>>,
    notifier: Notifier,
}

impl<S> StaticListController<S>
where
    S: BlockStore,
{
    /// Type string of static-list controllers
    pub const TYPE: &'static str = StaticListFactory::TYPE;

    /// A controller over `write` that publishes to `store`
    pub fn new<I, T>(store: S, write: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            store,
            write: RwLock::new(write.into_iter().map(Into::into).collect()),
            address: RwLock::new(None),
            notifier: Notifier::default(),
        }
    }

    /// The identities that may append
    pub fn write(&self) -> BTreeSet<String> {
        self.write.read().clone()
    }

    pub(crate) fn allows(&self, identity: &str) -> bool {
        let write = self.write.read();
        write.contains(identity) || write.contains(ANY)
    }

    pub(crate) async fn publish(&self, list: &WriteList) -> Result<String, AccessError> {
        let mut store = self.store.clone();
        let address = store.write(list).await?.to_string();
        *self.address.write() = Some(address.clone());
        Ok(address)
    }

    pub(crate) async fn read_list(&self, address: &str) {
        let list = match self.fetch(address).await {
            Ok(list) => list,
            Err(error) => {
                tracing::warn!(
                    address = %address,
                    error = %error,
                    "Could not read write list; denying all appends"
                );
                Vec::new()
            }
        };
        *self.write.write() = list.into_iter().collect();
        *self.address.write() = Some(address.to_owned());
        self.notifier.notify();
    }

    async fn fetch(&self, address: &str) -> Result<Vec<String>, AccessError> {
        let hash = ContentAddress::from_str(address)?;
        let list: WriteList = self
            .store
            .read(&hash)
            .await?
            .ok_or_else(|| AccessError::NotFound(address.to_owned()))?;
        Ok(list.into_write())
    }
}

#[async_trait]
impl<S> AccessController for StaticListController<S>
where
    S: BlockStore,
{
    fn controller_type(&self) -> &'static str {
        Self::TYPE
    }

    fn address(&self) -> Option<String> {
        self.address.read().clone()
    }

    async fn can_append(&self, entry: &Entry, _verifier: &dyn IdentityVerifier) -> bool {
        self.allows(&entry.identity.id)
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::new().with(WRITE, self.write())
    }

    async fn load(&self, address: &str) -> Result<(), AccessError> {
        self.read_list(address).await;
        Ok(())
    }

    async fn save(&self) -> Result<Params, AccessError> {
        let list = WriteList::Keyed {
            admin: None,
            write: self.write().into_iter().collect(),
            read: None,
        };
        let address = self.publish(&list).await?;
        Ok(Params::new().with_string(Params::ADDRESS, address))
    }

    fn subscribe(&self) -> broadcast::Receiver<Updated> {
        self.notifier.subscribe()
    }
}

/// Builds [StaticListController]s
#[derive(Clone, Copy, Debug, Default)]
pub struct StaticListFactory;

impl StaticListFactory {
    /// Type string of static-list controllers
    pub const TYPE: &'static str = "static-list";
}

#[async_trait]
impl<S> ControllerFactory<S> for StaticListFactory
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
        let options: StaticListOptions = options.decode()?;
        let write = options
            .write
            .unwrap_or_else(|| vec![context.identity.id.clone()]);
        Ok(Arc::new(StaticListController::new(
            context.store.clone(),
            write,
        )))
    }
}
