use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use ipld_core::ipld::Ipld;
use pretty_assertions::assert_eq;
use tokio::sync::broadcast::error::TryRecvError;
use warden_access::{
    ADMIN, AcceptAll, AccessController, AccessControllerOptions, AccessError, Action,
    CapabilityLogController, CapabilityLogFactory, CapabilityLogOptions, Entry, GrantOptions,
    Identity, Keyring, LogHost, MemoryHost, MemoryNetwork, OpenOptions, Outcome, Params, WRITE,
};
use warden_storage::MemoryStorage;

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

/// Publish a capability-log controller as `host` and resolve it back
async fn publish(
    host: &MemoryHost<MemoryStorage>,
    options: Params,
) -> Result<(String, Arc<dyn AccessController>)> {
    let context = host.context();
    let manifest = context.create(CapabilityLogFactory::TYPE, options).await?;
    let controller = context.resolve(&manifest, &Params::new()).await?;
    Ok((manifest, controller))
}

fn named(name: &str) -> Params {
    Params::new().with_string("name", name)
}

#[tokio::test]
async fn it_only_allows_the_creator_initially() -> Result<()> {
    let network = MemoryNetwork::new(MemoryStorage::default());
    let u1 = network.host(identity("u1"));

    let (_, controller) = publish(&u1, named("events")).await?;

    assert_eq!(controller.controller_type(), CapabilityLogFactory::TYPE);
    assert_eq!(controller.address().as_deref(), Some("events/_access"));
    assert!(allows(&controller, "u1").await);
    assert!(!allows(&controller, "u2").await);
    assert_eq!(controller.get(ADMIN), ids(&["u1"]));
    Ok(())
}

#[tokio::test]
async fn it_notifies_once_for_every_grant() -> Result<()> {
    let network = MemoryNetwork::new(MemoryStorage::default());
    let u1 = network.host(identity("u1"));
    let (_, controller) = publish(&u1, named("events")).await?;
    let mut updates = controller.subscribe();

    let outcome = controller
        .grant(WRITE, "u2", GrantOptions::default())
        .await?;

    assert!(matches!(outcome, Outcome::Appended(entry) if entry.identity.id == "u1"));
    assert!(allows(&controller, "u2").await);
    assert!(updates.try_recv().is_ok());
    assert_eq!(updates.try_recv(), Err(TryRecvError::Empty));

    controller
        .grant("read", "u3", GrantOptions::default())
        .await?;
    assert!(updates.try_recv().is_ok());
    assert_eq!(updates.try_recv(), Err(TryRecvError::Empty));
    Ok(())
}

#[tokio::test]
async fn it_lets_a_revoke_undo_a_grant() -> Result<()> {
    let network = MemoryNetwork::new(MemoryStorage::default());
    let u1 = network.host(identity("u1"));
    let (_, controller) = publish(&u1, named("events")).await?;

    controller.grant(WRITE, "u2", GrantOptions::default()).await?;
    controller.revoke(WRITE, "u2", GrantOptions::default()).await?;

    assert!(!allows(&controller, "u2").await);
    assert!(allows(&controller, "u1").await);
    assert_eq!(controller.get(WRITE), BTreeSet::new());

    // Revoking what was never granted changes nothing
    let before = controller.capabilities();
    controller.revoke(WRITE, "u9", GrantOptions::default()).await?;
    assert_eq!(controller.capabilities(), before);
    Ok(())
}

#[tokio::test]
async fn it_refuses_grants_from_identities_without_admin() -> Result<()> {
    let network = MemoryNetwork::new(MemoryStorage::default());
    let u1 = network.host(identity("u1"));
    let u2 = network.host(identity("u2"));
    let (manifest, _) = publish(&u1, named("events")).await?;

    let theirs = u2.context().resolve(&manifest, &Params::new()).await?;
    let before = theirs.capabilities();

    assert_eq!(
        theirs.grant(WRITE, "u2", GrantOptions::default()).await,
        Err(AccessError::NotAuthorized {
            identity: "u2".into(),
            action: Action::Grant,
            target: "events/_access".into(),
            capability: Some(WRITE.into()),
        })
    );
    assert_eq!(theirs.capabilities(), before);
    assert!(!allows(&theirs, "u2").await);
    Ok(())
}

#[tokio::test]
async fn it_keeps_the_creator_an_admin_after_revoking_admin() -> Result<()> {
    let network = MemoryNetwork::new(MemoryStorage::default());
    let u1 = network.host(identity("u1"));
    let (_, controller) = publish(&u1, named("events")).await?;

    controller.grant(ADMIN, "u1", GrantOptions::default()).await?;
    controller.revoke(ADMIN, "u1", GrantOptions::default()).await?;

    assert!(controller.get(ADMIN).contains("u1"));
    assert!(allows(&controller, "u1").await);
    Ok(())
}

#[tokio::test]
async fn it_records_granted_admins_without_opening_the_capability_log_to_them() -> Result<()> {
    let network = MemoryNetwork::new(MemoryStorage::default());
    let u1 = network.host(identity("u1"));
    let u2 = network.host(identity("u2"));
    let (manifest, ours) = publish(&u1, named("events")).await?;

    ours.grant(ADMIN, "u2", GrantOptions::default()).await?;
    network.sync("events/_access").await;
    let theirs = u2.context().resolve(&manifest, &Params::new()).await?;
    network.sync("events/_access").await;

    assert!(allows(&theirs, "u2").await);
    assert!(matches!(
        theirs.grant(WRITE, "u3", GrantOptions::default()).await,
        Err(AccessError::NotAuthorized { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn it_grants_initial_write_access_to_new_capability_logs() -> Result<()> {
    let network = MemoryNetwork::new(MemoryStorage::default());
    let u1 = network.host(identity("u1"));

    let (_, controller) = publish(
        &u1,
        named("events").with_list("write", ["u2", "u3"]),
    )
    .await?;

    assert_eq!(controller.get(WRITE), ids(&["u2", "u3"]));
    assert!(allows(&controller, "u3").await);
    Ok(())
}

#[tokio::test]
async fn it_lets_admins_other_than_the_creator_administer() -> Result<()> {
    let network = MemoryNetwork::new(MemoryStorage::default());
    let u1 = network.host(identity("u1"));
    let u2 = network.host(identity("u2"));

    let (manifest, ours) = publish(&u1, named("events").with_list("admin", ["u2"])).await?;
    assert!(!allows(&ours, "u1").await);
    assert!(matches!(
        ours.grant(WRITE, "u1", GrantOptions::default()).await,
        Err(AccessError::NotAuthorized { .. })
    ));

    let theirs = u2.context().resolve(&manifest, &Params::new()).await?;
    theirs.grant(WRITE, "u1", GrantOptions::default()).await?;
    assert!(allows(&theirs, "u1").await);
    Ok(())
}

#[tokio::test]
async fn it_converges_after_replication() -> Result<()> {
    let network = MemoryNetwork::new(MemoryStorage::default());
    let u1 = network.host(identity("u1"));
    let u2 = network.host(identity("u2"));
    let (manifest, ours) = publish(&u1, named("events")).await?;
    let theirs = u2.context().resolve(&manifest, &Params::new()).await?;
    let mut updates = theirs.subscribe();

    ours.grant(WRITE, "u2", GrantOptions::default()).await?;
    ours.grant("read", "u3", GrantOptions::default()).await?;
    assert!(!allows(&theirs, "u2").await);

    network.sync("events/_access").await;

    assert!(updates.try_recv().is_ok());
    assert!(allows(&theirs, "u2").await);
    assert_eq!(theirs.capabilities(), ours.capabilities());
    assert_eq!(theirs.get("read"), ids(&["u3"]));
    Ok(())
}

#[tokio::test]
async fn it_orders_operations_after_the_given_clock() -> Result<()> {
    let network = MemoryNetwork::new(MemoryStorage::default());
    let u1 = network.host(identity("u1"));
    let (_, controller) = publish(&u1, named("events")).await?;

    let Outcome::Appended(grant) = controller
        .grant(WRITE, "u2", GrantOptions::default())
        .await?
    else {
        panic!("a capability log appends its operations");
    };
    let Outcome::Appended(revoke) = controller
        .revoke(WRITE, "u2", GrantOptions::after(grant.clock.clone()))
        .await?
    else {
        panic!("a capability log appends its operations");
    };

    assert!(revoke.clock > grant.clock);
    assert!(!allows(&controller, "u2").await);
    Ok(())
}

#[tokio::test]
async fn it_consults_the_identity_verifier() -> Result<()> {
    let network = MemoryNetwork::new(MemoryStorage::default());
    let u1 = network.host(identity("u1"));
    let (_, controller) = publish(&u1, named("events")).await?;
    controller.grant(WRITE, "u2", GrantOptions::default()).await?;

    let keyring = Keyring::default().with(&identity("u2"));
    let genuine = Entry::probe(identity("u2"));
    let forged = Entry::probe(Identity::new("u2", "forged-key"));

    assert!(controller.can_append(&genuine, &keyring).await);
    assert!(!controller.can_append(&forged, &keyring).await);
    Ok(())
}

#[tokio::test]
async fn it_stops_working_once_closed() -> Result<()> {
    let network = MemoryNetwork::new(MemoryStorage::default());
    let u1 = network.host(identity("u1"));
    let (_, controller) = publish(&u1, named("events")).await?;

    controller.close().await?;

    assert!(!allows(&controller, "u1").await);
    assert_eq!(
        controller.grant(WRITE, "u2", GrantOptions::default()).await,
        Err(AccessError::Closed)
    );
    assert_eq!(controller.load("events").await, Err(AccessError::Closed));
    assert!(matches!(controller.save().await, Err(AccessError::Closed)));
    assert_eq!(controller.close().await, Ok(()));
    Ok(())
}

#[tokio::test]
async fn it_refuses_mutations_before_loading() -> Result<()> {
    let network = MemoryNetwork::new(MemoryStorage::default());
    let u1 = network.host(identity("u1"));
    let controller =
        CapabilityLogController::new(u1.context(), CapabilityLogOptions::default());

    assert_eq!(
        controller.grant(WRITE, "u2", GrantOptions::default()).await,
        Err(AccessError::NotLoaded)
    );
    assert!(
        !controller
            .can_append(&Entry::probe(identity("u1")), &AcceptAll)
            .await
    );

    controller.load("events").await?;
    assert!(matches!(
        controller.grant("", "u2", GrantOptions::default()).await,
        Err(AccessError::InvalidOptions(_))
    ));
    Ok(())
}

#[tokio::test]
async fn it_switches_capability_logs_on_reload() -> Result<()> {
    let network = MemoryNetwork::new(MemoryStorage::default());
    let u1 = network.host(identity("u1"));
    let controller =
        CapabilityLogController::new(u1.context(), CapabilityLogOptions::default());

    controller.load("events").await?;
    controller.grant(WRITE, "u2", GrantOptions::default()).await?;
    controller.load("events/_access").await?;
    assert!(controller.get(WRITE).contains("u2"));

    controller.load("other").await?;
    assert_eq!(controller.address().as_deref(), Some("other/_access"));
    assert!(controller.get(WRITE).is_empty());
    Ok(())
}

#[tokio::test]
async fn it_gates_a_data_log_end_to_end() -> Result<()> {
    let network = MemoryNetwork::new(MemoryStorage::default());
    let alice = network.host(identity("alice"));
    let bob = network.host(identity("bob"));
    let options = OpenOptions {
        create: true,
        access_controller: AccessControllerOptions::new(CapabilityLogFactory::TYPE, Params::new()),
    };

    let ours = alice.open("events", options.clone()).await?;
    ours.append(Ipld::String("from alice".into()), None).await?;

    let theirs = bob.open("events", options).await?;
    assert_eq!(
        theirs.append(Ipld::String("from bob".into()), None).await,
        Err(AccessError::denied("bob", Action::Append, "events"))
    );

    ours.access()
        .grant(WRITE, "bob", GrantOptions::default())
        .await?;
    network.sync("events/_access").await;
    theirs.append(Ipld::String("from bob".into()), None).await?;

    network.sync("events").await;
    assert_eq!(ours.entries().len(), 2);
    assert_eq!(ours.entries(), theirs.entries());
    Ok(())
}

#[tokio::test]
async fn it_rejects_replicated_entries_from_revoked_writers() -> Result<()> {
    let network = MemoryNetwork::new(MemoryStorage::default());
    let alice = network.host(identity("alice"));
    let bob = network.host(identity("bob"));
    let options = OpenOptions {
        create: true,
        access_controller: AccessControllerOptions::new(CapabilityLogFactory::TYPE, Params::new()),
    };

    let ours = alice.open("events", options.clone()).await?;
    let theirs = bob.open("events", options).await?;
    ours.access()
        .grant(WRITE, "bob", GrantOptions::default())
        .await?;
    network.sync("events/_access").await;

    // Bob writes before learning that his access was revoked
    ours.access()
        .revoke(WRITE, "bob", GrantOptions::default())
        .await?;
    theirs.append(Ipld::String("too late".into()), None).await?;

    network.sync("events").await;
    assert!(ours.entries().is_empty());
    assert_eq!(theirs.entries().len(), 1);
    Ok(())
}
