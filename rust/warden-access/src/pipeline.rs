use std::sync::Arc;

use crate::{
    AccessController, AccessError, BlockStore, Identity, IdentityVerifier, LogHost, Manifest,
    Params, Registry,
};

/// Everything a [`ControllerFactory`](crate::ControllerFactory) needs to
/// build a controller: where blobs live, which types exist, who is acting,
/// how identities are verified, and how to open logs.
pub struct ControllerContext<S>
where
    S: BlockStore,
{
    /// Content store for manifests and policy blobs
    pub store: S,
    /// Known controller types
    pub registry: Arc<Registry<S>>,
    /// The local identity
    pub identity: Identity,
    /// Verifies the identities of entries
    pub verifier: Arc<dyn IdentityVerifier>,
    /// Opens the logs that self-hosted controllers keep their policy in
    pub host: Arc<dyn LogHost>,
}

impl<S> Clone for ControllerContext<S>
where
    S: BlockStore,
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            registry: self.registry.clone(),
            identity: self.identity.clone(),
            verifier: self.verifier.clone(),
            host: self.host.clone(),
        }
    }
}

impl<S> ControllerContext<S>
where
    S: BlockStore,
{
    /// Reconstruct the controller published at `manifest_address`.
    ///
    /// `options` act as defaults: params recorded in the manifest win. An
    /// unregistered type fails with [`AccessError::UnsupportedType`]; no
    /// fallback policy is ever substituted.
    pub async fn resolve(
        &self,
        manifest_address: &str,
        options: &Params,
    ) -> Result<Arc<dyn AccessController>, AccessError> {
        let manifest = Manifest::resolve(&self.store, manifest_address, options).await?;
        let factory = self.registry.lookup(&manifest.controller_type)?;

        let params = manifest.params.over(options);
        let address = params.address().map(str::to_owned);
        let controller = factory.create(self, params).await?;

        if let Some(address) = address {
            controller.load(&address).await?;
        }

        tracing::debug!(
            manifest = %manifest_address,
            controller_type = %manifest.controller_type,
            "Resolved access controller"
        );
        Ok(controller)
    }

    /// Create a controller of `controller_type`, publish it, and return the
    /// address it can be resolved from.
    ///
    /// With the `legacy` option set, the controller's own address is
    /// returned instead of a manifest address.
    pub async fn create(
        &self,
        controller_type: &str,
        options: Params,
    ) -> Result<String, AccessError> {
        let factory = self.registry.lookup(controller_type)?;
        let legacy = options.flag(Params::LEGACY);

        let controller = factory.create(self, options).await?;
        let saved = controller.save().await;
        controller.close().await?;
        let params = saved?;

        let address = if legacy {
            params.address().map(str::to_owned).ok_or_else(|| {
                AccessError::InvalidOptions(format!(
                    "'{controller_type}' controller saved no address"
                ))
            })?
        } else {
            Manifest::create(&self.store, controller_type, params).await?
        };

        tracing::debug!(
            manifest = %address,
            controller_type = %controller_type,
            "Published access controller"
        );
        Ok(address)
    }
}
