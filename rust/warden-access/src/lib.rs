#![warn(missing_docs)]

//! Pluggable access controllers for replicated append-only logs.
//!
//! A log that is opened with access control consults an [AccessController]
//! before accepting any entry, whether written locally or received from a
//! peer. Controllers are published as small content-addressed [Manifest]s
//! naming a controller type and its params, and are reconstructed by
//! resolving such a manifest through a [Registry] of [ControllerFactory]s:
//!
//! ```rust
//! # async fn example() -> Result<(), warden_access::AccessError> {
//! use warden_access::{AccessController, Identity, MemoryNetwork, Params, StaticListController};
//! use warden_storage::MemoryStorage;
//!
//! let network = MemoryNetwork::new(MemoryStorage::default());
//! let host = network.host(Identity::new("alice", "alice-key"));
//!
//! let manifest = host
//!     .context()
//!     .create(
//!         StaticListController::<MemoryStorage>::TYPE,
//!         Params::new().with_list("write", ["alice"]),
//!     )
//!     .await?;
//! let controller = host.context().resolve(&manifest, &Params::new()).await?;
//!
//! assert!(controller.get("write").contains("alice"));
//! # Ok(())
//! # }
//! ```
//!
//! The most capable controller is the [CapabilityLogController], whose
//! policy is itself an access-controlled log of grant and revoke operations.

use warden_storage::{ContentAddress, ContentAddressedStorage, WardenStorageError};

mod error;
pub use error::*;

mod identity;
pub use identity::*;

mod entry;
pub use entry::*;

mod params;
pub use params::*;

mod capability;
pub use capability::*;

mod controller;
pub use controller::*;

mod registry;
pub use registry::*;

mod manifest;
pub use manifest::*;

mod pipeline;
pub use pipeline::*;

mod log;
pub use log::*;

/// Content addressed storage that controllers publish manifests and policy
/// blobs to. Clones must share their blocks.
pub trait BlockStore:
    ContentAddressedStorage<Hash = ContentAddress, Error = WardenStorageError>
    + Clone
    + Send
    + Sync
    + 'static
{
}

impl<S> BlockStore for S where
    S: ContentAddressedStorage<Hash = ContentAddress, Error = WardenStorageError>
        + Clone
        + Send
        + Sync
        + 'static
{
}
