#![warn(missing_docs)]

//! This crate contains the content addressed block storage that access
//! controllers use to publish and retrieve their manifests and policy blobs.
//!
//! A [Storage] pairs an [Encoder] with a [StorageBackend]:
//!
//! ```rust
//! use warden_storage::{CborEncoder, ContentAddress, MemoryStorageBackend, Storage};
//!
//! let storage = Storage {
//!     encoder: CborEncoder,
//!     backend: MemoryStorageBackend::<ContentAddress, Vec<u8>>::default(),
//! };
//! ```
//!
//! The prepared `storage` automatically implements [ContentAddressedStorage],
//! so blocks written to it are addressed by the BLAKE3 hash of their encoding.

mod encoder;
pub use encoder::*;

mod error;
pub use error::*;

mod storage;
pub use storage::*;

mod hash;
pub use hash::*;
