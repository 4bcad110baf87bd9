use std::collections::{BTreeMap, BTreeSet};

use ipld_core::ipld::Ipld;
use serde::{Deserialize, Serialize};

use crate::AccessError;

/// Capability that allows appending to the governed log
pub const WRITE: &str = "write";
/// Capability that allows appending and administering the policy
pub const ADMIN: &str = "admin";
/// Identities holding this capability may append as well
pub const ANY: &str = "*";

/// Mapping from capability name to the identities that hold it.
///
/// Names are open-ended: only [WRITE], [ADMIN] and [ANY] are consulted when
/// deciding appends, everything else is stored for applications to read.
/// A capability whose last holder is removed disappears from the map.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capabilities(BTreeMap<String, BTreeSet<String>>);

impl Capabilities {
    /// No capabilities at all
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style grant of a capability to several identities
    pub fn with<I, T>(mut self, capability: &str, identities: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        for identity in identities {
            self.insert(capability, identity);
        }
        self
    }

    /// The identities holding a capability
    pub fn get(&self, capability: &str) -> Option<&BTreeSet<String>> {
        self.0.get(capability)
    }

    /// Whether `identity` holds `capability`
    pub fn contains(&self, capability: &str, identity: &str) -> bool {
        self.0
            .get(capability)
            .is_some_and(|holders| holders.contains(identity))
    }

    /// Whether `identity` may append to the governed log
    pub fn allows_append(&self, identity: &str) -> bool {
        [WRITE, ADMIN, ANY]
            .into_iter()
            .any(|capability| self.contains(capability, identity))
    }

    /// Add a holder. Returns false if it already held the capability.
    pub fn insert(&mut self, capability: &str, identity: impl Into<String>) -> bool {
        self.0
            .entry(capability.to_owned())
            .or_default()
            .insert(identity.into())
    }

    /// Remove a holder. Removing a non-holder is a no-op that returns false.
    pub fn remove(&mut self, capability: &str, identity: &str) -> bool {
        let Some(holders) = self.0.get_mut(capability) else {
            return false;
        };
        let removed = holders.remove(identity);
        if holders.is_empty() {
            self.0.remove(capability);
        }
        removed
    }

    /// Apply one replayed operation
    pub fn apply(&mut self, operation: &CapabilityOperation) {
        match operation.kind {
            OperationKind::Grant => {
                self.insert(&operation.capability, operation.identity.clone());
            }
            OperationKind::Revoke => {
                self.remove(&operation.capability, &operation.identity);
            }
        }
    }

    /// Names of all capabilities with at least one holder
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Whether no capability has any holder
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Replay `operations` in order over an empty set, then make every identity
/// in `writers` an admin.
///
/// `writers` is the write-set of the capability log's own gate. Its members
/// are admins no matter what the operations say, so revoking `admin` from
/// one of them has no lasting effect.
pub fn aggregate<I>(operations: I, writers: &BTreeSet<String>) -> Capabilities
where
    I: IntoIterator<Item = CapabilityOperation>,
{
    let mut capabilities = Capabilities::new();
    for operation in operations {
        capabilities.apply(&operation);
    }
    for writer in writers {
        capabilities.insert(ADMIN, writer.clone());
    }
    capabilities
}

/// Whether an operation adds or removes a holder
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    /// Add the identity to the capability
    Grant,
    /// Remove the identity from the capability
    Revoke,
}

/// The payload of one entry in a capability log
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityOperation {
    /// Grant or revoke
    pub kind: OperationKind,
    /// Capability name
    pub capability: String,
    /// Identity id the capability is granted to or revoked from
    pub identity: String,
}

impl CapabilityOperation {
    /// A grant operation
    pub fn grant(capability: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            kind: OperationKind::Grant,
            capability: capability.into(),
            identity: identity.into(),
        }
    }

    /// A revoke operation
    pub fn revoke(capability: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            kind: OperationKind::Revoke,
            capability: capability.into(),
            identity: identity.into(),
        }
    }

    /// Encode as a log entry payload
    pub fn to_payload(&self) -> Result<Ipld, AccessError> {
        ipld_core::serde::to_ipld(self).map_err(|error| AccessError::Decode(format!("{error}")))
    }

    /// Decode from a log entry payload
    pub fn from_payload(payload: &Ipld) -> Result<Self, AccessError> {
        let operation: CapabilityOperation = ipld_core::serde::from_ipld(payload.clone())
            .map_err(|error| AccessError::Decode(format!("{error}")))?;
        if operation.capability.is_empty() {
            return Err(AccessError::Decode(
                "capability operation names no capability".into(),
            ));
        }
        Ok(operation)
    }
}
