use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::{
    AccessController, AccessError, BlockStore, CapabilityLogFactory, ControllerContext,
    LegacyListFactory, Params, StaticListFactory,
};

/// Constructs controllers of one type.
///
/// Factories are registered with a [Registry] under the string returned by
/// [`ControllerFactory::controller_type`], which must match the
/// [`AccessController::controller_type`] of what they build.
#[async_trait]
pub trait ControllerFactory<S>: Send + Sync
where
    S: BlockStore,
{
    /// The type string manifests use to name this kind of controller
    fn controller_type(&self) -> &str;

    /// Build a controller from merged options
    async fn create(
        &self,
        context: &ControllerContext<S>,
        options: Params,
    ) -> Result<Arc<dyn AccessController>, AccessError>;
}

/// Maps controller type strings to the factories that build them.
///
/// The default registry knows the static-list, legacy and capability-log
/// controllers. Delegate controllers need a client for their external system
/// and are registered by whoever owns that client.
pub struct Registry<S>
where
    S: BlockStore,
{
    factories: RwLock<HashMap<String, Arc<dyn ControllerFactory<S>>>>,
}

impl<S> Registry<S>
where
    S: BlockStore,
{
    /// A registry that knows no controller types
    pub fn empty() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// Whether `controller_type` has a registered factory
    pub fn is_supported(&self, controller_type: &str) -> bool {
        self.factories.read().contains_key(controller_type)
    }

    /// Register a factory, replacing any previous factory of the same type
    pub fn register(&self, factory: Arc<dyn ControllerFactory<S>>) -> Result<(), AccessError> {
        let controller_type = factory.controller_type().trim();
        if controller_type.is_empty() {
            return Err(AccessError::InvalidRegistration(
                "a controller factory must declare a non-empty type".into(),
            ));
        }
        let controller_type = controller_type.to_owned();
        self.factories.write().insert(controller_type, factory);
        Ok(())
    }

    /// Register several factories; stops at the first invalid one
    pub fn register_all<I>(&self, factories: I) -> Result<(), AccessError>
    where
        I: IntoIterator<Item = Arc<dyn ControllerFactory<S>>>,
    {
        for factory in factories {
            self.register(factory)?;
        }
        Ok(())
    }

    /// Remove a factory, returning it if it was registered
    pub fn unregister(&self, controller_type: &str) -> Option<Arc<dyn ControllerFactory<S>>> {
        self.factories.write().remove(controller_type)
    }

    /// The factory for `controller_type`
    pub fn lookup(
        &self,
        controller_type: &str,
    ) -> Result<Arc<dyn ControllerFactory<S>>, AccessError> {
        self.factories
            .read()
            .get(controller_type)
            .cloned()
            .ok_or_else(|| AccessError::UnsupportedType(controller_type.to_owned()))
    }

    /// All registered type strings, sorted
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.read().keys().cloned().collect();
        types.sort();
        types
    }
}

impl<S> Default for Registry<S>
where
    S: BlockStore,
{
    fn default() -> Self {
        let registry = Self::empty();
        {
            let mut factories = registry.factories.write();
            factories.insert(
                StaticListFactory::TYPE.to_owned(),
                Arc::new(StaticListFactory) as Arc<dyn ControllerFactory<S>>,
            );
            factories.insert(
                LegacyListFactory::TYPE.to_owned(),
                Arc::new(LegacyListFactory) as Arc<dyn ControllerFactory<S>>,
            );
            factories.insert(
                CapabilityLogFactory::TYPE.to_owned(),
                Arc::new(CapabilityLogFactory) as Arc<dyn ControllerFactory<S>>,
            );
        }
        registry
    }
}
