use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use ipld_core::ipld::Ipld;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use warden_access::{
    AcceptAll, AccessController, AccessError, ContractClient, ContractFactory, ContractRef,
    ControllerFactory, Entry, GrantOptions, Identity, LEGACY_TYPE, LegacyListController, Manifest,
    MemoryNetwork, Outcome, Params, Receipt, Registry, StaticListController, WRITE,
};
use warden_storage::{ContentAddress, MemoryStorage, StorageBackend};

type Static = StaticListController<MemoryStorage>;

const ALICE: &str = "0x00000000000000000000000000000000000a11ce";
const BOB: &str = "0x0000000000000000000000000000000000000b0b";

fn identity(id: &str) -> Identity {
    Identity::new(id, format!("{id}-key"))
}

async fn allows(controller: &Arc<dyn AccessController>, id: &str) -> bool {
    controller
        .can_append(&Entry::probe(identity(id)), &AcceptAll)
        .await
}

fn ids(ids: &[&str]) -> BTreeSet<String> {
    ids.iter().map(|id| id.to_string()).collect()
}

/// Keeps the set of accounts holding `write`, the way a deployed access
/// contract would
#[derive(Default)]
struct Ledger {
    writers: Mutex<BTreeSet<String>>,
}

#[async_trait]
impl ContractClient for Ledger {
    async fn call(
        &self,
        _contract: &ContractRef,
        method: &str,
        args: Vec<Ipld>,
    ) -> Result<Ipld, AccessError> {
        match (method, args.first()) {
            ("isPermitted", Some(Ipld::String(account))) => {
                Ok(Ipld::Bool(self.writers.lock().contains(account)))
            }
            _ => Err(AccessError::Delegate(format!("unknown method '{method}'"))),
        }
    }

    async fn send(
        &self,
        _contract: &ContractRef,
        method: &str,
        args: Vec<Ipld>,
        _from: &str,
    ) -> Result<Receipt, AccessError> {
        let Some(Ipld::String(account)) = args.first() else {
            return Err(AccessError::Delegate("missing account".into()));
        };
        let mut writers = self.writers.lock();
        match method {
            "grantCapability" => writers.insert(account.clone()),
            "revokeCapability" => writers.remove(account),
            _ => return Err(AccessError::Delegate(format!("unknown method '{method}'"))),
        };
        Ok(Receipt {
            transaction: format!("0x{method}"),
        })
    }
}

#[tokio::test]
async fn it_resolves_a_published_static_list() -> Result<()> {
    let network = MemoryNetwork::new(MemoryStorage::default());
    let host = network.host(identity("alice"));

    let manifest = host
        .context()
        .create(Static::TYPE, Params::new().with_list("write", ["alice", "bob"]))
        .await?;
    let controller = host.context().resolve(&manifest, &Params::new()).await?;

    assert_eq!(controller.controller_type(), Static::TYPE);
    assert_eq!(controller.get(WRITE), ids(&["alice", "bob"]));
    assert!(allows(&controller, "bob").await);
    assert!(!allows(&controller, "mallory").await);

    let published = Manifest::resolve(network.store(), &manifest, &Params::new()).await?;
    assert_eq!(published.params.address(), controller.address().as_deref());
    Ok(())
}

#[tokio::test]
async fn it_defaults_a_static_list_to_its_creator() -> Result<()> {
    let network = MemoryNetwork::new(MemoryStorage::default());
    let host = network.host(identity("alice"));

    let manifest = host.context().create(Static::TYPE, Params::new()).await?;
    let controller = network
        .host(identity("bob"))
        .context()
        .resolve(&manifest, &Params::new())
        .await?;

    assert_eq!(controller.get(WRITE), ids(&["alice"]));
    Ok(())
}

#[tokio::test]
async fn it_lets_manifest_params_win_over_caller_options() -> Result<()> {
    let network = MemoryNetwork::new(MemoryStorage::default());
    let host = network.host(identity("alice"));
    let context = host.context();

    let ours = context
        .create(Static::TYPE, Params::new().with_list("write", ["alice"]))
        .await?;
    let theirs = context
        .create(Static::TYPE, Params::new().with_list("write", ["mallory"]))
        .await?;
    let theirs = context.resolve(&theirs, &Params::new()).await?;
    let theirs = theirs.address().unwrap_or_default();

    let controller = context
        .resolve(&ours, &Params::new().with_string(Params::ADDRESS, theirs))
        .await?;

    assert_eq!(controller.get(WRITE), ids(&["alice"]));
    Ok(())
}

#[tokio::test]
async fn it_publishes_legacy_lists_without_a_manifest() -> Result<()> {
    let network = MemoryNetwork::new(MemoryStorage::default());
    let host = network.host(identity("alice"));
    let context = host.context();

    let address = context
        .create(LEGACY_TYPE, Params::new().with_list("write", ["alice", "bob"]))
        .await?;
    let controller = context.resolve(&address, &Params::new()).await?;

    assert_eq!(controller.controller_type(), LegacyListController::<MemoryStorage>::TYPE);
    assert_eq!(controller.address().as_deref(), Some(address.as_str()));
    assert_eq!(controller.get(WRITE), ids(&["alice", "bob"]));
    Ok(())
}

#[tokio::test]
async fn it_returns_the_controller_address_for_legacy_publication() -> Result<()> {
    let network = MemoryNetwork::new(MemoryStorage::default());
    let host = network.host(identity("alice"));
    let context = host.context();

    let address = context
        .create(
            Static::TYPE,
            Params::new()
                .with_list("write", ["bob"])
                .with_flag(Params::LEGACY, true),
        )
        .await?;

    // The address holds the list itself, which untyped resolution reads as
    // a legacy list
    let manifest = Manifest::resolve(network.store(), &address, &Params::new()).await?;
    assert_eq!(manifest.controller_type, LEGACY_TYPE);

    let controller = context.resolve(&address, &Params::new()).await?;
    assert_eq!(controller.get(WRITE), ids(&["bob"]));
    Ok(())
}

#[tokio::test]
async fn it_refuses_unregistered_types() -> Result<()> {
    let network = MemoryNetwork::new(MemoryStorage::default());
    let host = network.host(identity("alice"));
    let context = host.context();

    assert_eq!(
        context.create("no-such-controller", Params::new()).await.err(),
        Some(AccessError::UnsupportedType("no-such-controller".into()))
    );

    let manifest = Manifest::create(network.store(), "no-such-controller", Params::new()).await?;
    assert_eq!(
        context.resolve(&manifest, &Params::new()).await.err(),
        Some(AccessError::UnsupportedType("no-such-controller".into()))
    );
    Ok(())
}

#[tokio::test]
async fn it_denies_everyone_when_a_static_list_cannot_be_read() -> Result<()> {
    let network = MemoryNetwork::new(MemoryStorage::default());
    let host = network.host(identity("alice"));
    let mut store = network.store().clone();
    let corrupt = vec![0xff, 0x00, 0xff];
    let address = ContentAddress::digest(&corrupt);
    store.set(address, corrupt).await?;

    let controller = host
        .context()
        .resolve(
            &address.to_string(),
            &Params::new()
                .with_flag(Params::SKIP_MANIFEST, true)
                .with_string(Params::TYPE, Static::TYPE),
        )
        .await?;

    assert!(controller.get(WRITE).is_empty());
    assert!(!allows(&controller, "alice").await);
    assert!(!allows(&controller, "*").await);

    // Without the type hint the same blob is not a manifest at all
    assert!(matches!(
        host.context()
            .resolve(&address.to_string(), &Params::new())
            .await,
        Err(AccessError::Decode(_))
    ));
    Ok(())
}

#[tokio::test]
async fn it_resolves_delegates_registered_at_runtime() -> Result<()> {
    let network = MemoryNetwork::new(MemoryStorage::default());
    let host = network.host(identity(ALICE));
    let context = host.context();
    let options = Params::new()
        .with_string("contract_address", "0x1234567890abcdef1234567890abcdef12345678")
        .with("abi", Ipld::List(vec![]))
        .with_string("default_account", ALICE);

    assert!(matches!(
        context.create(ContractFactory::TYPE, options.clone()).await,
        Err(AccessError::UnsupportedType(_))
    ));

    let ledger = Arc::new(Ledger::default());
    network
        .registry()
        .register(Arc::new(ContractFactory::new(ledger.clone())))?;
    let manifest = context.create(ContractFactory::TYPE, options.clone()).await?;

    // The default account is never published
    let published = Manifest::resolve(network.store(), &manifest, &Params::new()).await?;
    assert!(published.params.get("default_account").is_none());

    let controller = context.resolve(&manifest, &options).await?;
    assert_eq!(controller.controller_type(), ContractFactory::TYPE);
    assert!(!allows(&controller, BOB).await);

    let outcome = controller.grant(WRITE, BOB, GrantOptions::default()).await?;
    assert!(matches!(outcome, Outcome::Submitted(_)));
    assert!(allows(&controller, BOB).await);

    controller.revoke(WRITE, BOB, GrantOptions::default()).await?;
    assert!(!allows(&controller, BOB).await);

    network.registry().unregister(ContractFactory::TYPE);
    assert!(matches!(
        context.resolve(&manifest, &options).await,
        Err(AccessError::UnsupportedType(_))
    ));
    Ok(())
}

#[tokio::test]
async fn it_builds_from_an_explicit_registry() -> Result<()> {
    let registry = Arc::new(Registry::<MemoryStorage>::empty());
    registry.register(
        Arc::new(ContractFactory::new(Arc::new(Ledger::default())))
            as Arc<dyn ControllerFactory<MemoryStorage>>,
    )?;
    let network = MemoryNetwork::with_registry(MemoryStorage::default(), registry);

    assert_eq!(network.registry().types(), vec![ContractFactory::TYPE.to_owned()]);
    assert!(matches!(
        network
            .host(identity("alice"))
            .context()
            .create(Static::TYPE, Params::new())
            .await,
        Err(AccessError::UnsupportedType(_))
    ));
    Ok(())
}
