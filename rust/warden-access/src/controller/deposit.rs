use std::sync::Arc;

use async_trait::async_trait;
use ipld_core::ipld::Ipld;
use tokio::sync::broadcast;

use crate::{
    AccessController, AccessError, Action, BlockStore, ContractClient, ContractOptions,
    ContractRef, ControllerContext, ControllerFactory, DefinedCapabilities, Entry, GrantOptions,
    IdentityVerifier, Outcome, Params, Updated, WRITE,
};

use super::contract::Delegate;

/// Allows appends from accounts that have paid a deposit into a contract.
///
/// Granting `write` pays the deposit on the account's behalf and revoking it
/// expires the deposit. No other capability exists on chain, so mutations
/// of anything but `write` are skipped.
pub struct DepositContractController {
    delegate: Delegate,
}

impl DepositContractController {
    /// Type string of deposit contract controllers
    pub const TYPE: &'static str = "eth-contract/deposit-contract";

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

    async fn mutate(
        &self,
        action: Action,
        method: &str,
        capability: &str,
        identity: &str,
        options: GrantOptions,
    ) -> Result<Outcome, AccessError> {
        if capability != WRITE {
            tracing::debug!(
                capability = %capability,
                action = %action,
                "Deposit contracts only track write"
            );
            return Ok(Outcome::Skipped);
        }
        self.delegate
            .submit(
                action,
                identity,
                method,
                vec![Ipld::String(identity.into())],
                options,
            )
            .await
    }
}

#[async_trait]
impl AccessController for DepositContractController {
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
            .permits(id, "hasPaidDeposit", vec![Ipld::String(id.clone())])
            .await
    }

    async fn grant(
        &self,
        capability: &str,
        identity: &str,
        options: GrantOptions,
    ) -> Result<Outcome, AccessError> {
        self.mutate(Action::Grant, "payDeposit", capability, identity, options)
            .await
    }

    async fn revoke(
        &self,
        capability: &str,
        identity: &str,
        options: GrantOptions,
    ) -> Result<Outcome, AccessError> {
        self.mutate(Action::Revoke, "expireDeposit", capability, identity, options)
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

/// Builds [DepositContractController]s that talk to the chain through
/// `client`
#[derive(Clone)]
pub struct DepositContractFactory {
    client: Arc<dyn ContractClient>,
}

impl DepositContractFactory {
    /// Type string of deposit contract controllers
    pub const TYPE: &'static str = DepositContractController::TYPE;

    /// A factory whose controllers use `client`
    pub fn new(client: Arc<dyn ContractClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<S> ControllerFactory<S> for DepositContractFactory
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
        if default_account.is_none() {
            tracing::warn!(
                contract = %contract.address,
                "No default account set; deposits need an explicit authority"
            );
        }
        Ok(Arc::new(DepositContractController::new(
            self.client.clone(),
            contract,
            default_account,
        )))
    }
}
