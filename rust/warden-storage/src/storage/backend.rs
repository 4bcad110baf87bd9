use async_trait::async_trait;

use crate::WardenStorageError;

mod memory;
pub use memory::*;

/// Raw key-value persistence underneath a [Storage](crate::Storage).
///
/// Backends know nothing about encodings; keys are whatever the paired
/// encoder addresses blocks by.
#[async_trait]
pub trait StorageBackend: Clone {
    /// Key that values are stored under
    type Key: Send + Sync;
    /// Stored value
    type Value: Send;
    /// Failure of the substrate
    type Error: Into<WardenStorageError>;

    /// Put `value` at `key`, replacing whatever was there
    async fn set(&mut self, key: Self::Key, value: Self::Value) -> Result<(), Self::Error>;

    /// The value at `key`, if any
    async fn get(&self, key: &Self::Key) -> Result<Option<Self::Value>, Self::Error>;
}
