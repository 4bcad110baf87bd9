use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};

use crate::{Encoder, HashType, StorageBackend, WardenStorageError};

/// Stores blocks (manifests, write lists, log entries) under the hash of
/// their encoding, so that any peer holding the same bytes derives the same
/// address.
///
/// Every pairing of an [Encoder] with a [StorageBackend] keyed by that
/// encoder's hash gets this trait for free.
#[async_trait]
pub trait ContentAddressedStorage: Send + Sync + 'static {
    /// Address of a block
    type Hash: HashType;
    /// Failure to read or write a block
    type Error: Into<WardenStorageError>;

    /// Fetch and decode the block at `hash`; `None` when nothing is stored
    /// there
    async fn read<T>(&self, hash: &Self::Hash) -> Result<Option<T>, Self::Error>
    where
        T: DeserializeOwned + Send;

    /// Encode and store `block`, returning its address
    async fn write<T>(&mut self, block: &T) -> Result<Self::Hash, Self::Error>
    where
        T: Serialize + Sync + std::fmt::Debug;
}

#[async_trait]
impl<Bytes, Hash, EncoderError, BackendError, U> ContentAddressedStorage for U
where
    Hash: HashType,
    Bytes: AsRef<[u8]> + 'static + Send + Sync,
    EncoderError: Into<WardenStorageError>,
    BackendError: Into<WardenStorageError>,
    U: Encoder<Bytes = Bytes, Hash = Hash, Error = EncoderError>
        + StorageBackend<Key = Hash, Value = Bytes, Error = BackendError>
        + Send
        + Sync
        + 'static,
{
    type Hash = Hash;
    type Error = WardenStorageError;

    async fn read<T>(&self, hash: &Self::Hash) -> Result<Option<T>, Self::Error>
    where
        T: DeserializeOwned + Send,
    {
        match self.get(hash).await.map_err(Into::into)? {
            Some(bytes) => Ok(Some(self.decode(bytes.as_ref()).await.map_err(Into::into)?)),
            None => Ok(None),
        }
    }

    async fn write<T>(&mut self, block: &T) -> Result<Self::Hash, Self::Error>
    where
        T: Serialize + Sync + std::fmt::Debug,
    {
        let (hash, bytes) = self.encode(block).await.map_err(Into::into)?;
        self.set(hash.clone(), bytes).await.map_err(Into::into)?;
        Ok(hash)
    }
}
