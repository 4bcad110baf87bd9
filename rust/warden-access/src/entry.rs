use std::cmp::Ordering;

use ipld_core::ipld::Ipld;
use serde::{Deserialize, Serialize};

use crate::Identity;

/// A Lamport clock stamped on every entry by its author
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Clock {
    /// The author's identity id
    pub id: String,
    /// Logical time
    pub time: u64,
}

impl Clock {
    /// Create a clock reading
    pub fn new(id: impl Into<String>, time: u64) -> Self {
        Self {
            id: id.into(),
            time,
        }
    }
}

impl Ord for Clock {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .cmp(&other.time)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for Clock {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// An entry of a replicated log, as presented to access controllers
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// Content address of the entry
    pub hash: String,
    /// The identity that claims authorship
    pub identity: Identity,
    /// Causal position
    pub clock: Clock,
    /// Application payload
    pub payload: Ipld,
}

impl Entry {
    /// An unpublished entry carrying nothing but an identity. Useful for
    /// asking a controller whether an identity could append.
    pub fn probe(identity: Identity) -> Self {
        let clock = Clock::new(identity.id.clone(), 0);
        Self {
            hash: String::new(),
            identity,
            clock,
            payload: Ipld::Null,
        }
    }

    /// Total causal order used when replaying a log: by clock, then by hash
    pub fn causal_cmp(&self, other: &Entry) -> Ordering {
        self.clock
            .cmp(&other.clock)
            .then_with(|| self.hash.cmp(&other.hash))
    }
}
