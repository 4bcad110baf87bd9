use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};

use crate::{HashType, WardenStorageError};

mod cbor;
pub use cbor::*;

/// Turns blocks into bytes and derives their address from those bytes.
#[async_trait]
pub trait Encoder: Clone {
    /// Encoded form of a block
    type Bytes: AsRef<[u8]> + 'static + Send + Sync;
    /// Address derived from the encoded form
    type Hash: HashType;
    /// Failure to encode or decode
    type Error: Into<WardenStorageError>;

    /// Encode `block`, returning its address along with its bytes
    async fn encode<T>(&self, block: &T) -> Result<(Self::Hash, Self::Bytes), Self::Error>
    where
        T: Serialize + Sync + std::fmt::Debug;

    /// Decode `bytes` into a `T`
    async fn decode<T>(&self, bytes: &[u8]) -> Result<T, Self::Error>
    where
        T: DeserializeOwned + Send;
}
