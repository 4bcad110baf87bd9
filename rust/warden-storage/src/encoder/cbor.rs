use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};

use super::Encoder;
use crate::{ContentAddress, WardenStorageError};

/// A basic [`Encoder`] implementation that encodes data as IPLD-compatible
/// CBOR and addresses it by the BLAKE3 hash of the encoded bytes
#[derive(Clone, Copy, Debug, Default)]
pub struct CborEncoder;

#[async_trait]
impl Encoder for CborEncoder {
    type Bytes = Vec<u8>;
    type Hash = ContentAddress;
    type Error = WardenStorageError;

    async fn encode<T>(&self, block: &T) -> Result<(Self::Hash, Self::Bytes), Self::Error>
    where
        T: Serialize + Sync + std::fmt::Debug,
    {
        let bytes = serde_ipld_dagcbor::to_vec(block)
            .map_err(|error| WardenStorageError::EncodeFailed(format!("{error}")))?;

        Ok((ContentAddress::digest(&bytes), bytes))
    }

    async fn decode<T>(&self, bytes: &[u8]) -> Result<T, Self::Error>
    where
        T: DeserializeOwned + Send,
    {
        serde_ipld_dagcbor::from_slice::<T>(bytes)
            .map_err(|error| WardenStorageError::DecodeFailed(format!("{error}")))
    }
}
