use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use warden_storage::ContentAddress;

use crate::{
    AccessController, AccessError, Action, BlockStore, ControllerContext, ControllerFactory,
    DefinedCapabilities, Entry, GrantOptions, IdentityVerifier, Notifier, Outcome, Params,
    Receipt, Updated, WRITE,
};

/// An external user directory that appends are delegated to
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Connect to the directory described by `config`
    async fn initialize(&self, config: &Params) -> Result<(), AccessError>;

    /// The user currently signed in, if any
    async fn current_user(&self) -> Option<String>;

    /// Create an account for `user`
    async fn create_user(&self, user: &str) -> Result<Receipt, AccessError>;

    /// Delete the account of `user`
    async fn delete_user(&self, user: &str) -> Result<Receipt, AccessError>;
}

/// Options accepted by the identity-provider factory
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityProviderOptions {
    /// Connection settings handed to the provider
    pub config: Option<Params>,
    /// A previously published configuration
    pub address: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ProviderConfig {
    config: Params,
}

fn is_valid_user(identity: &str) -> bool {
    !identity.is_empty() && !identity.chars().any(char::is_whitespace)
}

/// Allows appends while someone is signed in to an external user directory
/// and the entry's identity verifies. Granting creates a directory account
/// and revoking deletes it.
pub struct IdentityProviderController<S>
where
    S: BlockStore,
{
    store: S,
    provider: Arc<dyn AuthProvider>,
    config: RwLock<Params>,
    /// Set while the last published config could not be read; every append
    /// is denied until a load succeeds
    unreadable: AtomicBool,
    address: RwLock<Option<String>>,
    notifier: Notifier,
}

impl<S> IdentityProviderController<S>
where
    S: BlockStore,
{
    /// Type string of identity-provider controllers
    pub const TYPE: &'static str = IdentityProviderFactory::TYPE;

    /// A controller over `provider`, configured with `config`
    pub fn new(store: S, provider: Arc<dyn AuthProvider>, config: Params) -> Self {
        Self {
            store,
            provider,
            config: RwLock::new(config),
            unreadable: AtomicBool::new(false),
            address: RwLock::new(None),
            notifier: Notifier::default(),
        }
    }

    /// The provider configuration
    pub fn config(&self) -> Params {
        self.config.read().clone()
    }

    async fn fetch(&self, address: &str) -> Result<Params, AccessError> {
        let hash = ContentAddress::from_str(address)?;
        let blob: ProviderConfig = self
            .store
            .read(&hash)
            .await?
            .ok_or_else(|| AccessError::NotFound(address.to_owned()))?;
        Ok(blob.config)
    }

    async fn mutate(
        &self,
        action: Action,
        capability: &str,
        identity: &str,
    ) -> Result<Outcome, AccessError> {
        if !is_valid_user(identity) {
            tracing::warn!(identity = %identity, action = %action, "Not a valid user name");
            return Ok(Outcome::Skipped);
        }
        if capability != WRITE {
            tracing::debug!(
                capability = %capability,
                action = %action,
                "Identity providers only track write"
            );
            return Ok(Outcome::Skipped);
        }
        let receipt = match action {
            Action::Revoke => self.provider.delete_user(identity).await?,
            _ => self.provider.create_user(identity).await?,
        };
        Ok(Outcome::Submitted(receipt))
    }
}

#[async_trait]
impl<S> AccessController for IdentityProviderController<S>
where
    S: BlockStore,
{
    fn controller_type(&self) -> &'static str {
        Self::TYPE
    }

    fn address(&self) -> Option<String> {
        self.address.read().clone()
    }

    fn defined_capabilities(&self) -> DefinedCapabilities {
        DefinedCapabilities::mutable()
    }

    async fn can_append(&self, entry: &Entry, verifier: &dyn IdentityVerifier) -> bool {
        if self.unreadable.load(Ordering::SeqCst) {
            return false;
        }
        if !is_valid_user(&entry.identity.id) {
            tracing::warn!(identity = %entry.identity.id, "Not a valid user name");
            return false;
        }
        if self.provider.current_user().await.is_none() {
            return false;
        }
        verifier.verify(entry).await
    }

    async fn grant(
        &self,
        capability: &str,
        identity: &str,
        _options: GrantOptions,
    ) -> Result<Outcome, AccessError> {
        self.mutate(Action::Grant, capability, identity).await
    }

    async fn revoke(
        &self,
        capability: &str,
        identity: &str,
        _options: GrantOptions,
    ) -> Result<Outcome, AccessError> {
        self.mutate(Action::Revoke, capability, identity).await
    }

    async fn load(&self, address: &str) -> Result<(), AccessError> {
        let (config, unreadable) = match self.fetch(address).await {
            Ok(config) => (config, false),
            Err(error) => {
                tracing::warn!(
                    address = %address,
                    error = %error,
                    "Could not read identity provider config; denying all appends"
                );
                (Params::new(), true)
            }
        };
        if !config.is_empty() {
            self.provider.initialize(&config).await?;
        }
        *self.config.write() = config;
        self.unreadable.store(unreadable, Ordering::SeqCst);
        *self.address.write() = Some(address.to_owned());
        self.notifier.notify();
        Ok(())
    }

    async fn save(&self) -> Result<Params, AccessError> {
        let mut store = self.store.clone();
        let address = store
            .write(&ProviderConfig {
                config: self.config(),
            })
            .await?
            .to_string();
        *self.address.write() = Some(address.clone());
        Ok(Params::new().with_string(Params::ADDRESS, address))
    }

    fn subscribe(&self) -> broadcast::Receiver<Updated> {
        self.notifier.subscribe()
    }
}

/// Builds [IdentityProviderController]s over one provider
#[derive(Clone)]
pub struct IdentityProviderFactory {
    provider: Arc<dyn AuthProvider>,
}

impl IdentityProviderFactory {
    /// Type string of identity-provider controllers
    pub const TYPE: &'static str = "identity-provider";

    /// A factory whose controllers consult `provider`
    pub fn new(provider: Arc<dyn AuthProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<S> ControllerFactory<S> for IdentityProviderFactory
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
        let options: IdentityProviderOptions = options.decode()?;
        let config = match (options.config, options.address) {
            (Some(config), _) => {
                self.provider.initialize(&config).await?;
                config
            }
            (None, Some(_)) => Params::new(),
            (None, None) => {
                return Err(AccessError::InvalidOptions(
                    "an identity provider needs a 'config'".into(),
                ));
            }
        };
        Ok(Arc::new(IdentityProviderController::new(
            context.store.clone(),
            self.provider.clone(),
            config,
        )))
    }
}
