//! An in-memory replicated log, for embedding and tests.
//!
//! A [MemoryNetwork] is a set of peers sharing one content store and one
//! directory of logs. Each [MemoryHost] is a peer with its own identity and
//! its own replicas; replicas only learn about each other's entries when the
//! network is explicitly [synced](MemoryNetwork::sync), and every replica
//! checks incoming entries against its own gate.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use ipld_core::ipld::Ipld;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::{
    AcceptAll, AccessController, AccessError, Action, BlockStore, Clock, ControllerContext, Entry,
    Identity, IdentityVerifier, Log, LogEvent, LogHost, LogObserver, OpenOptions, Params,
    Registry,
};

struct NetworkState<S>
where
    S: BlockStore,
{
    store: S,
    registry: Arc<Registry<S>>,
    directory: RwLock<HashMap<String, String>>,
    replicas: RwLock<HashMap<String, Vec<Weak<Replica>>>>,
}

/// Peers that share a content store and a directory of logs
pub struct MemoryNetwork<S>
where
    S: BlockStore,
{
    state: Arc<NetworkState<S>>,
}

impl<S> Clone for MemoryNetwork<S>
where
    S: BlockStore,
{
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<S> MemoryNetwork<S>
where
    S: BlockStore,
{
    /// A network whose hosts know the default controller types
    pub fn new(store: S) -> Self {
        Self::with_registry(store, Arc::new(Registry::default()))
    }

    /// A network whose hosts resolve controllers through `registry`
    pub fn with_registry(store: S, registry: Arc<Registry<S>>) -> Self {
        Self {
            state: Arc::new(NetworkState {
                store,
                registry,
                directory: RwLock::new(HashMap::new()),
                replicas: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// The shared content store
    pub fn store(&self) -> &S {
        &self.state.store
    }

    /// The shared controller registry
    pub fn registry(&self) -> Arc<Registry<S>> {
        self.state.registry.clone()
    }

    /// The gate manifest of the log at `address`, if it was ever created
    pub fn manifest(&self, address: &str) -> Option<String> {
        self.state.directory.read().get(address).cloned()
    }

    /// A peer that trusts every claimed identity
    pub fn host(&self, identity: Identity) -> MemoryHost<S> {
        self.host_with_verifier(identity, Arc::new(AcceptAll))
    }

    /// A peer that verifies identities with `verifier`
    pub fn host_with_verifier(
        &self,
        identity: Identity,
        verifier: Arc<dyn IdentityVerifier>,
    ) -> MemoryHost<S> {
        MemoryHost {
            network: self.clone(),
            identity,
            verifier,
            state: Arc::new(HostState::default()),
        }
    }

    /// Exchange entries between all open replicas of the log at `address`
    pub async fn sync(&self, address: &str) {
        let replicas: Vec<Arc<Replica>> = {
            let mut all = self.state.replicas.write();
            let Some(replicas) = all.get_mut(address) else {
                return;
            };
            replicas.retain(|replica| replica.strong_count() > 0);
            replicas
                .iter()
                .filter_map(Weak::upgrade)
                .filter(|replica| replica.is_open())
                .collect()
        };

        let mut pool = BTreeMap::new();
        for replica in replicas.iter() {
            for entry in replica.entries() {
                pool.entry(entry.hash.clone()).or_insert(entry);
            }
        }
        let pool: Vec<Entry> = pool.into_values().collect();

        for replica in replicas.iter() {
            replica.receive(&pool).await;
        }
    }

    fn publish(&self, address: &str, manifest: String) -> String {
        self.state
            .directory
            .write()
            .entry(address.to_owned())
            .or_insert(manifest)
            .clone()
    }

    fn join(&self, replica: &Arc<Replica>) {
        self.state
            .replicas
            .write()
            .entry(replica.address.clone())
            .or_default()
            .push(Arc::downgrade(replica));
    }
}

#[derive(Default)]
struct HostState {
    open: Mutex<HashMap<String, Weak<Replica>>>,
    persisted: Mutex<HashMap<String, Vec<Entry>>>,
}

/// One peer of a [MemoryNetwork]
pub struct MemoryHost<S>
where
    S: BlockStore,
{
    network: MemoryNetwork<S>,
    identity: Identity,
    verifier: Arc<dyn IdentityVerifier>,
    state: Arc<HostState>,
}

impl<S> Clone for MemoryHost<S>
where
    S: BlockStore,
{
    fn clone(&self) -> Self {
        Self {
            network: self.network.clone(),
            identity: self.identity.clone(),
            verifier: self.verifier.clone(),
            state: self.state.clone(),
        }
    }
}

impl<S> MemoryHost<S>
where
    S: BlockStore,
{
    /// What controllers opened by this peer are built with
    pub fn context(&self) -> ControllerContext<S> {
        ControllerContext {
            store: self.network.store().clone(),
            registry: self.network.registry(),
            identity: self.identity.clone(),
            verifier: self.verifier.clone(),
            host: Arc::new(self.clone()),
        }
    }

    /// The network this peer belongs to
    pub fn network(&self) -> &MemoryNetwork<S> {
        &self.network
    }

    async fn replica(
        &self,
        address: &str,
        options: OpenOptions,
    ) -> Result<Arc<Replica>, AccessError> {
        let open = self.state.open.lock().get(address).and_then(Weak::upgrade);
        if let Some(replica) = open.filter(|replica| replica.is_open()) {
            return Ok(replica);
        }

        let context = self.context();
        let manifest = match self.network.manifest(address) {
            Some(manifest) => manifest,
            None if options.create => {
                let gate = options.access_controller;
                let params = gate
                    .params
                    .over(&Params::new().with_string("name", address));
                let manifest = context.create(&gate.controller_type, params).await?;
                self.network.publish(address, manifest)
            }
            None => return Err(AccessError::NotFound(address.to_owned())),
        };
        let gate = context.resolve(&manifest, &Params::new()).await?;

        let entries = self
            .state
            .persisted
            .lock()
            .get(address)
            .cloned()
            .unwrap_or_default();
        let replica = Arc::new(Replica {
            address: address.to_owned(),
            entries: RwLock::new(entries),
            observers: RwLock::new(Vec::new()),
            publishing: Mutex::new(()),
            gate,
            verifier: self.verifier.clone(),
            handles: AtomicU64::new(0),
            open: AtomicUsize::new(0),
        });
        self.state
            .open
            .lock()
            .insert(address.to_owned(), Arc::downgrade(&replica));
        self.network.join(&replica);

        tracing::debug!(
            address = %address,
            identity = %self.identity.id,
            "Opened replica"
        );
        Ok(replica)
    }
}

#[async_trait]
impl<S> LogHost for MemoryHost<S>
where
    S: BlockStore,
{
    fn identity(&self) -> &Identity {
        &self.identity
    }

    async fn open(&self, address: &str, options: OpenOptions) -> Result<Arc<dyn Log>, AccessError> {
        let replica = self.replica(address, options).await?;
        replica.open.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MemoryLog {
            store: self.network.store().clone(),
            identity: self.identity.clone(),
            handle: replica.handles.fetch_add(1, Ordering::SeqCst),
            replica,
            host: self.state.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

/// A peer's copy of one log, shared by all of that peer's handles to it
struct Replica {
    address: String,
    entries: RwLock<Vec<Entry>>,
    observers: RwLock<Vec<(u64, Arc<dyn LogObserver>)>>,
    /// Held while entries are inserted and observers notified, so observers
    /// see the history grow in order
    publishing: Mutex<()>,
    gate: Arc<dyn AccessController>,
    verifier: Arc<dyn IdentityVerifier>,
    handles: AtomicU64,
    open: AtomicUsize,
}

impl Replica {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) > 0
    }

    fn entries(&self) -> Vec<Entry> {
        self.entries.read().clone()
    }

    /// Insert the entries of `accepted` that are not yet known and notify
    /// observers of them. Returns whether anything was inserted.
    fn commit(&self, accepted: &[Entry], origin: Origin) -> bool {
        let _publishing = self.publishing.lock();
        let (fresh, history) = {
            let mut entries = self.entries.write();
            let fresh: Vec<Entry> = {
                let mut known: HashSet<&str> =
                    entries.iter().map(|entry| entry.hash.as_str()).collect();
                accepted
                    .iter()
                    .filter(|entry| known.insert(entry.hash.as_str()))
                    .cloned()
                    .collect()
            };
            entries.extend(fresh.iter().cloned());
            entries.sort_by(Entry::causal_cmp);
            (fresh, entries.clone())
        };
        if fresh.is_empty() {
            return false;
        }

        let event = match (origin, fresh.as_slice()) {
            (Origin::Local, [entry]) => LogEvent::Write(entry),
            _ => LogEvent::Replicated(&fresh),
        };
        self.notify(event, &history);
        true
    }

    fn announce(&self) {
        let _publishing = self.publishing.lock();
        let history = self.entries();
        self.notify(LogEvent::Ready, &history);
    }

    fn notify(&self, event: LogEvent<'_>, history: &[Entry]) {
        let observers: Vec<Arc<dyn LogObserver>> = self
            .observers
            .read()
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();
        for observer in observers {
            observer.on_event(event, history);
        }
    }

    async fn receive(&self, incoming: &[Entry]) {
        let mut known: HashSet<String> = self
            .entries
            .read()
            .iter()
            .map(|entry| entry.hash.clone())
            .collect();

        let mut accepted = Vec::new();
        for entry in incoming {
            if !known.insert(entry.hash.clone()) {
                continue;
            }
            if self.gate.can_append(entry, self.verifier.as_ref()).await {
                accepted.push(entry.clone());
            } else {
                tracing::warn!(
                    address = %self.address,
                    entry = %entry.hash,
                    identity = %entry.identity.id,
                    "Rejected replicated entry"
                );
            }
        }
        if !accepted.is_empty() {
            self.commit(&accepted, Origin::Remote);
        }
    }
}

#[derive(Clone, Copy)]
enum Origin {
    Local,
    Remote,
}

#[derive(Debug, Serialize)]
struct EntryBlock<'a> {
    identity: &'a Identity,
    clock: &'a Clock,
    payload: &'a Ipld,
}

/// A handle to a [MemoryHost]'s replica of a log
pub struct MemoryLog<S>
where
    S: BlockStore,
{
    store: S,
    identity: Identity,
    handle: u64,
    replica: Arc<Replica>,
    host: Arc<HostState>,
    closed: AtomicBool,
}

#[async_trait]
impl<S> Log for MemoryLog<S>
where
    S: BlockStore,
{
    fn address(&self) -> &str {
        &self.replica.address
    }

    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn access(&self) -> Arc<dyn AccessController> {
        self.replica.gate.clone()
    }

    fn entries(&self) -> Vec<Entry> {
        self.replica.entries()
    }

    fn subscribe(&self, observer: Arc<dyn LogObserver>) {
        self.replica.observers.write().push((self.handle, observer));
    }

    async fn load(&self) -> Result<(), AccessError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AccessError::Closed);
        }
        self.replica.announce();
        Ok(())
    }

    async fn append(&self, payload: Ipld, after: Option<&Clock>) -> Result<Entry, AccessError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AccessError::Closed);
        }

        let latest = self
            .replica
            .entries
            .read()
            .iter()
            .map(|entry| entry.clock.time)
            .max()
            .unwrap_or(0);
        let time = latest.max(after.map_or(0, |clock| clock.time)) + 1;
        let clock = Clock::new(self.identity.id.clone(), time);

        // Denied entries are never written to the store
        let mut entry = Entry {
            hash: String::new(),
            identity: self.identity.clone(),
            clock,
            payload,
        };
        let gate = self.replica.gate.clone();
        if !gate.can_append(&entry, self.replica.verifier.as_ref()).await {
            return Err(AccessError::denied(
                self.identity.id.clone(),
                Action::Append,
                self.replica.address.clone(),
            ));
        }

        let mut store = self.store.clone();
        entry.hash = store
            .write(&EntryBlock {
                identity: &entry.identity,
                clock: &entry.clock,
                payload: &entry.payload,
            })
            .await?
            .to_string();

        self.replica.commit(std::slice::from_ref(&entry), Origin::Local);
        Ok(entry)
    }

    async fn close(&self) -> Result<(), AccessError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.replica
            .observers
            .write()
            .retain(|(handle, _)| *handle != self.handle);

        if self.replica.open.fetch_sub(1, Ordering::SeqCst) > 1 {
            return Ok(());
        }

        let address = &self.replica.address;
        self.host
            .persisted
            .lock()
            .insert(address.clone(), self.replica.entries());
        {
            let mut open = self.host.open.lock();
            let current = open
                .get(address)
                .is_some_and(|replica| std::ptr::eq(replica.as_ptr(), Arc::as_ptr(&self.replica)));
            if current {
                open.remove(address);
            }
        }
        self.replica.gate.close().await
    }
}
