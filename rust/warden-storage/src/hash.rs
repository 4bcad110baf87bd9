use std::{fmt::Display, str::FromStr};

use base58::{FromBase58, ToBase58};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::WardenStorageError;

/// The representation of a common hash type (BLAKE3, in this case) that
/// backs every [`ContentAddress`].
pub type Blake3Hash = [u8; 32];

/// A trait that can be implemented for types that represent a hash. A blanket
/// implementation is provided for any type that matches the bounds.
pub trait HashType:
    Clone + AsRef<[u8]> + Send + Sync + Serialize + DeserializeOwned + std::fmt::Debug + PartialEq
{
    /// Format the hash as a short display string, suitable for logs
    fn display(&self) -> String {
        let bytes = self.as_ref();
        format!("#{}...", bytes[0..6.min(bytes.len())].to_base58())
    }
}

impl<T> HashType for T where
    T: Clone
        + AsRef<[u8]>
        + Send
        + Sync
        + Serialize
        + DeserializeOwned
        + std::fmt::Debug
        + PartialEq
        + Eq
{
}

/// The address of a block in content addressed storage.
///
/// Its textual form is the base58 encoding of the BLAKE3 hash. When parsing,
/// an optional [`ContentAddress::PREFIX`] is accepted and stripped, so both
/// `/blob/<hash>` and `<hash>` name the same block.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentAddress(Blake3Hash);

impl ContentAddress {
    /// Path-style prefix that may precede the base58 hash
    pub const PREFIX: &'static str = "/blob/";

    /// Address some bytes by their BLAKE3 hash
    pub fn digest(bytes: &[u8]) -> Self {
        Self(*blake3::hash(bytes).as_bytes())
    }

    /// The raw hash bytes
    pub fn bytes(&self) -> &Blake3Hash {
        &self.0
    }
}

impl From<Blake3Hash> for ContentAddress {
    fn from(value: Blake3Hash) -> Self {
        Self(value)
    }
}

impl AsRef<[u8]> for ContentAddress {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Display for ContentAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_base58())
    }
}

impl std::fmt::Debug for ContentAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ContentAddress").field(&self.display()).finish()
    }
}

impl FromStr for ContentAddress {
    type Err = WardenStorageError;

    fn from_str(address: &str) -> Result<Self, Self::Err> {
        let encoded = address.strip_prefix(Self::PREFIX).unwrap_or(address);
        let bytes = encoded
            .from_base58()
            .map_err(|_| WardenStorageError::InvalidAddress(address.to_owned()))?;
        let hash: Blake3Hash = bytes
            .try_into()
            .map_err(|_| WardenStorageError::InvalidAddress(address.to_owned()))?;

        Ok(Self(hash))
    }
}
