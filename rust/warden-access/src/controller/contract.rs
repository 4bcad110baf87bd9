use std::sync::Arc;

use async_trait::async_trait;
use ipld_core::ipld::Ipld;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::{
    AccessController, AccessError, Action, BlockStore, ControllerContext, ControllerFactory,
    DefinedCapabilities, Entry, GrantOptions, IdentityVerifier, Notifier, Outcome, Params,
    Receipt, Updated, WRITE,
};

/// A deployed contract
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContractRef {
    /// Address the contract is deployed at
    pub address: String,
    /// The contract's interface description
    pub abi: Ipld,
}

/// Client for a chain that access decisions are delegated to
#[async_trait]
pub trait ContractClient: Send + Sync {
    /// Invoke a read-only contract method
    async fn call(
        &self,
        contract: &ContractRef,
        method: &str,
        args: Vec<Ipld>,
    ) -> Result<Ipld, AccessError>;

    /// Submit a state-changing transaction on behalf of `from`
    async fn send(
        &self,
        contract: &ContractRef,
        method: &str,
        args: Vec<Ipld>,
        from: &str,
    ) -> Result<Receipt, AccessError>;
}

/// Options accepted by the contract-backed factories
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContractOptions {
    /// Address of the deployed contract
    pub contract_address: Option<String>,
    /// The contract's interface description
    pub abi: Option<Ipld>,
    /// Account that authorizes mutations when no `from` is given
    pub default_account: Option<String>,
}

impl ContractOptions {
    pub(crate) fn into_parts(self) -> Result<(ContractRef, Option<String>), AccessError> {
        let address = self
            .contract_address
            .filter(|address| !address.is_empty())
            .ok_or_else(|| AccessError::InvalidOptions("no 'contract_address' given".into()))?;
        let abi = self
            .abi
            .filter(|abi| !matches!(abi, Ipld::Null))
            .ok_or_else(|| AccessError::InvalidOptions("no 'abi' given".into()))?;
        Ok((ContractRef { address, abi }, self.default_account))
    }
}

/// Whether `identity` looks like an account on the chain: `0x` followed by
/// 40 hex digits
pub fn is_valid_eth_address(identity: &str) -> bool {
    identity
        .strip_prefix("0x")
        .is_some_and(|hex| hex.len() == 40 && hex.chars().all(|c| c.is_ascii_hexdigit()))
}

/// State shared by the contract-backed controllers
pub(crate) struct Delegate {
    pub(crate) client: Arc<dyn ContractClient>,
    pub(crate) contract: ContractRef,
    pub(crate) default_account: Option<String>,
    pub(crate) notifier: Notifier,
}

impl Delegate {
    pub(crate) fn new(
        client: Arc<dyn ContractClient>,
        contract: ContractRef,
        default_account: Option<String>,
    ) -> Self {
        Self {
            client,
            contract,
            default_account,
            notifier: Notifier::default(),
        }
    }

    /// Whether the contract answers `true` to a read. Malformed identities
    /// and client failures are denials.
    pub(crate) async fn permits(&self, identity: &str, method: &str, args: Vec<Ipld>) -> bool {
        if !is_valid_eth_address(identity) {
            tracing::warn!(identity = %identity, "Not a valid eth address");
            return false;
        }
        match self.client.call(&self.contract, method, args).await {
            Ok(answer) => matches!(answer, Ipld::Bool(true)),
            Err(error) => {
                tracing::warn!(
                    contract = %self.contract.address,
                    method = %method,
                    error = %error,
                    "Contract call failed; denying append"
                );
                false
            }
        }
    }

    /// Submit a mutation for `identity`, or skip it when the identity is
    /// not an account
    pub(crate) async fn submit(
        &self,
        action: Action,
        identity: &str,
        method: &str,
        args: Vec<Ipld>,
        options: GrantOptions,
    ) -> Result<Outcome, AccessError> {
        if !is_valid_eth_address(identity) {
            tracing::warn!(identity = %identity, action = %action, "Not a valid eth address");
            return Ok(Outcome::Skipped);
        }
        let from = options
            .from
            .or_else(|| self.default_account.clone())
            .ok_or(AccessError::MissingAuthority(action))?;
        let receipt = self
            .client
            .send(&self.contract, method, args, &from)
            .await?;
        Ok(Outcome::Submitted(receipt))
    }

    pub(crate) fn save(&self) -> Params {
        Params::new()
            .with_string("contract_address", self.contract.address.clone())
            .with("abi", self.contract.abi.clone())
    }
}

/// Defers every decision to a contract that tracks capabilities per
/// account.
pub struct ContractController {
    delegate: Delegate,
}

impl ContractController {
    /// Type string of contract controllers
    pub const TYPE: &'static str = "eth-contract";

    /// A controller backed by `contract`
    pub fn new(
        client: Arc<dyn ContractClient>,
        contract: ContractRef,
        default_account: Option<String>,
    ) -> Self {
        Self {
            delegate: Delegate::new(client, contract, default_account),
        }
    }
}

#[async_trait]
impl AccessController for ContractController {
    fn controller_type(&self) -> &'static str {
        Self::TYPE
    }

    fn address(&self) -> Option<String> {
        Some(self.delegate.contract.address.clone())
    }

    fn defined_capabilities(&self) -> DefinedCapabilities {
        DefinedCapabilities::mutable()
    }

    async fn can_append(&self, entry: &Entry, _verifier: &dyn IdentityVerifier) -> bool {
        let id = &entry.identity.id;
        self.delegate
            .permits(
                id,
                "isPermitted",
                vec![Ipld::String(id.clone()), Ipld::String(WRITE.into())],
            )
            .await
    }

    async fn grant(
        &self,
        capability: &str,
        identity: &str,
        options: GrantOptions,
    ) -> Result<Outcome, AccessError> {
        self.delegate
            .submit(
                Action::Grant,
                identity,
                "grantCapability",
                vec![Ipld::String(identity.into()), Ipld::String(capability.into())],
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
        self.delegate
            .submit(
                Action::Revoke,
                identity,
                "revokeCapability",
                vec![Ipld::String(identity.into()), Ipld::String(capability.into())],
                options,
            )
            .await
    }

    async fn load(&self, _address: &str) -> Result<(), AccessError> {
        Ok(())
    }

    async fn save(&self) -> Result<Params, AccessError> {
        Ok(self.delegate.save())
    }

    fn subscribe(&self) -> broadcast::Receiver<Updated> {
        self.delegate.notifier.subscribe()
    }
}

/// Builds [ContractController]s that talk to the chain through `client`
#[derive(Clone)]
pub struct ContractFactory {
    client: Arc<dyn ContractClient>,
}

impl ContractFactory {
    /// Type string of contract controllers
    pub const TYPE: &'static str = ContractController::TYPE;

    /// A factory whose controllers use `client`
    pub fn new(client: Arc<dyn ContractClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<S> ControllerFactory<S> for ContractFactory
where
    S: BlockStore,
{
    fn controller_type(&self) -> &str {
        Self::TYPE
    }

    async fn create(
        &self,
        _context: &ControllerContext<S>,
        options: Params,
    ) -> Result<Arc<dyn AccessController>, AccessError> {
        let options: ContractOptions = options.decode()?;
        let (contract, default_account) = options.into_parts()?;
        Ok(Arc::new(ContractController::new(
            self.client.clone(),
            contract,
            default_account,
        )))
    }
}
