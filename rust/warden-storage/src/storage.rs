use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};

mod backend;
pub use backend::*;

mod content_addressed;
pub use content_addressed::*;

use crate::{CborEncoder, ContentAddress};

/// A universal envelope for all compatible combinations of [Encoder] and
/// [StorageBackend] implementations. See the crate documentation for
/// a practical example of usage.
#[derive(Clone, Default)]
pub struct Storage<E, B>
where
    E: crate::Encoder,
    B: StorageBackend,
{
    /// The [Encoder] used by the [Storage]
    pub encoder: E,
    /// The [StorageBackend] used by the [Storage]
    pub backend: B,
}

/// Volatile, CBOR-encoded block storage. Clones share the same blocks.
pub type MemoryStorage = Storage<CborEncoder, MemoryStorageBackend<ContentAddress, Vec<u8>>>;

#[async_trait]
impl<E, B> crate::Encoder for Storage<E, B>
where
    E: crate::Encoder + Send + Sync,
    B: StorageBackend + Send + Sync,
{
    type Bytes = E::Bytes;
    type Hash = E::Hash;
    type Error = E::Error;

    async fn encode<T>(&self, block: &T) -> Result<(Self::Hash, Self::Bytes), Self::Error>
    where
        T: Serialize + Sync + std::fmt::Debug,
    {
        self.encoder.encode(block).await
    }

    async fn decode<T>(&self, bytes: &[u8]) -> Result<T, Self::Error>
    where
        T: DeserializeOwned + Send,
    {
        self.encoder.decode(bytes).await
    }
}

#[async_trait]
impl<E, B> StorageBackend for Storage<E, B>
where
    E: crate::Encoder + Send + Sync,
    B: StorageBackend + Send + Sync,
{
    type Key = B::Key;
    type Value = B::Value;
    type Error = B::Error;

    async fn set(&mut self, key: Self::Key, value: Self::Value) -> Result<(), Self::Error> {
        self.backend.set(key, value).await
    }

    async fn get(&self, key: &Self::Key) -> Result<Option<Self::Value>, Self::Error> {
        self.backend.get(key).await
    }
}
