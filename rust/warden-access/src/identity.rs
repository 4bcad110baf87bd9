use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Entry;

/// The identity that signed a log entry. Only `id` is consulted by access
/// checks; `public_key` is carried for verifiers.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity {
    /// Stable identifier that capabilities are granted to
    pub id: String,
    /// Public key (or account address) backing the identifier
    pub public_key: String,
}

impl Identity {
    /// Create an identity
    pub fn new(id: impl Into<String>, public_key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            public_key: public_key.into(),
        }
    }
}

/// Checks that an entry was really produced by the identity it claims.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Whether the entry's identity verifies
    async fn verify(&self, entry: &Entry) -> bool;
}

/// An [IdentityVerifier] that trusts every claimed identity
#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptAll;

#[async_trait]
impl IdentityVerifier for AcceptAll {
    async fn verify(&self, _entry: &Entry) -> bool {
        true
    }
}

/// An [IdentityVerifier] that accepts an entry only when its identity's
/// public key matches the one registered for that id.
#[derive(Clone, Debug, Default)]
pub struct Keyring {
    keys: HashMap<String, String>,
}

impl Keyring {
    /// Register the public key of an identity
    pub fn with(mut self, identity: &Identity) -> Self {
        self.keys
            .insert(identity.id.clone(), identity.public_key.clone());
        self
    }
}

#[async_trait]
impl IdentityVerifier for Keyring {
    async fn verify(&self, entry: &Entry) -> bool {
        self.keys
            .get(&entry.identity.id)
            .is_some_and(|key| key == &entry.identity.public_key)
    }
}
