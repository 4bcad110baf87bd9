use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::{
    AccessController, AccessError, BlockStore, Capabilities, ControllerContext, ControllerFactory,
    Entry, IdentityVerifier, LEGACY_TYPE, Params, StaticListController, StaticListOptions,
    Updated,
};

use super::static_list::WriteList;

/// A static write list in the pre-manifest format.
///
/// The published blob itself stands in for the manifest: saving returns the
/// blob's address together with `skip_manifest`, and resolving any blob
/// that lacks a `type` lands here.
pub struct LegacyListController<S>
where
    S: BlockStore,
{
    list: StaticListController<S>,
}

impl<S> LegacyListController<S>
where
    S: BlockStore,
{
    /// Type string of legacy list controllers
    pub const TYPE: &'static str = LEGACY_TYPE;

    /// A controller over `write` that publishes to `store`
    pub fn new<I, T>(store: S, write: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            list: StaticListController::new(store, write),
        }
    }
}

#[async_trait]
impl<S> AccessController for LegacyListController<S>
where
    S: BlockStore,
{
    fn controller_type(&self) -> &'static str {
        Self::TYPE
    }

    fn address(&self) -> Option<String> {
        self.list.address()
    }

    async fn can_append(&self, entry: &Entry, _verifier: &dyn IdentityVerifier) -> bool {
        self.list.allows(&entry.identity.id)
    }

    fn capabilities(&self) -> Capabilities {
        self.list.capabilities()
    }

    async fn load(&self, address: &str) -> Result<(), AccessError> {
        self.list.read_list(address).await;
        Ok(())
    }

    async fn save(&self) -> Result<Params, AccessError> {
        let list = WriteList::Keyed {
            admin: Some(Vec::new()),
            write: self.list.write().into_iter().collect(),
            read: Some(Vec::new()),
        };
        let address = self.list.publish(&list).await?;
        Ok(Params::new()
            .with_string(Params::ADDRESS, address)
            .with_flag(Params::SKIP_MANIFEST, true))
    }

    fn subscribe(&self) -> broadcast::Receiver<Updated> {
        self.list.subscribe()
    }
}

/// Builds [LegacyListController]s
#[derive(Clone, Copy, Debug, Default)]
pub struct LegacyListFactory;

impl LegacyListFactory {
    /// Type string of legacy list controllers
    pub const TYPE: &'static str = LEGACY_TYPE;
}

#[async_trait]
impl<S> ControllerFactory<S> for LegacyListFactory
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
        Ok(Arc::new(LegacyListController::new(
            context.store.clone(),
            write,
        )))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::str::FromStr;

    use anyhow::Result;
    use ipld_core::ipld::Ipld;
    use pretty_assertions::assert_eq;
    use warden_storage::{ContentAddress, ContentAddressedStorage, MemoryStorage};

    use super::LegacyListController;
    use crate::{AcceptAll, AccessController, Entry, Identity, Params};

    #[tokio::test]
    async fn it_publishes_the_full_legacy_shape_without_a_manifest() -> Result<()> {
        let store = MemoryStorage::default();
        let controller = LegacyListController::new(store.clone(), ["alice"]);

        let params = controller.save().await?;
        assert!(params.flag(Params::SKIP_MANIFEST));

        let address = params.address().expect("save returns an address");
        let blob: Option<Ipld> = store.read(&ContentAddress::from_str(address)?).await?;
        let Some(Ipld::Map(blob)) = blob else {
            panic!("expected a map at {address}");
        };
        assert_eq!(blob.get("admin"), Some(&Ipld::List(vec![])));
        assert_eq!(blob.get("read"), Some(&Ipld::List(vec![])));
        assert_eq!(
            blob.get("write"),
            Some(&Ipld::List(vec![Ipld::String("alice".into())]))
        );
        Ok(())
    }

    #[tokio::test]
    async fn it_reads_lists_published_by_a_static_list() -> Result<()> {
        let store = MemoryStorage::default();
        let published = crate::StaticListController::new(store.clone(), ["bob"]);
        let params = published.save().await?;

        let controller = LegacyListController::new(store, Vec::<String>::new());
        controller.load(params.address().expect("saved")).await?;

        assert_eq!(
            controller.get("write"),
            BTreeSet::from(["bob".to_string()])
        );
        assert!(
            controller
                .can_append(&Entry::probe(Identity::new("bob", "bob-key")), &AcceptAll)
                .await
        );
        Ok(())
    }
}
