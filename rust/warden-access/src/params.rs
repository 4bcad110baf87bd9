//! Controller configuration.
//!
//! Options flow through the system as [`Params`], an IPLD map. Callers pass
//! options when creating or resolving a controller, published manifests carry
//! params, and the two are layered with [`Params::over`] so that published
//! state always wins over caller defaults. Each controller decodes the merged
//! map into its own typed options struct with [`Params::decode`].

use std::collections::BTreeMap;

use ipld_core::ipld::Ipld;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::AccessError;

/// Policy-specific parameters of a manifest, or options for a factory
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(BTreeMap<String, Ipld>);

impl Params {
    /// The address a controller should be loaded from
    pub const ADDRESS: &'static str = "address";
    /// Marker that asks the manifest codec to publish nothing
    pub const SKIP_MANIFEST: &'static str = "skip_manifest";
    /// Names the controller type when resolution skips the manifest
    pub const TYPE: &'static str = "type";
    /// Asks the pipeline to return the raw controller address
    pub const LEGACY: &'static str = "legacy";

    /// Empty parameters
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion of an arbitrary value
    pub fn with(mut self, key: impl Into<String>, value: Ipld) -> Self {
        self.0.insert(key.into(), value);
        self
    }

    /// Builder-style insertion of a string
    pub fn with_string(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.with(key, Ipld::String(value.into()))
    }

    /// Builder-style insertion of a list of strings
    pub fn with_list<I, T>(self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let values = values
            .into_iter()
            .map(|value| Ipld::String(value.into()))
            .collect();
        self.with(key, Ipld::List(values))
    }

    /// Builder-style insertion of a boolean flag
    pub fn with_flag(self, key: impl Into<String>, value: bool) -> Self {
        self.with(key, Ipld::Bool(value))
    }

    /// Insert a value, returning the one it replaced
    pub fn insert(&mut self, key: impl Into<String>, value: Ipld) -> Option<Ipld> {
        self.0.insert(key.into(), value)
    }

    /// Look up a value
    pub fn get(&self, key: &str) -> Option<&Ipld> {
        self.0.get(key)
    }

    /// Look up a string value
    pub fn string(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(Ipld::String(value)) => Some(value),
            _ => None,
        }
    }

    /// Whether a boolean flag is present and set
    pub fn flag(&self, key: &str) -> bool {
        matches!(self.0.get(key), Some(Ipld::Bool(true)))
    }

    /// The `address` parameter, if any
    pub fn address(&self) -> Option<&str> {
        self.string(Self::ADDRESS)
    }

    /// Layer these params over `defaults`: keys present here win
    pub fn over(mut self, defaults: &Params) -> Params {
        for (key, value) in defaults.0.iter() {
            self.0.entry(key.clone()).or_insert_with(|| value.clone());
        }
        self
    }

    /// Decode into a typed options struct
    pub fn decode<T>(&self) -> Result<T, AccessError>
    where
        T: DeserializeOwned,
    {
        ipld_core::serde::from_ipld(Ipld::Map(self.0.clone()))
            .map_err(|error| AccessError::InvalidOptions(format!("{error}")))
    }

    /// Encode a typed options struct
    pub fn encode<T>(options: &T) -> Result<Params, AccessError>
    where
        T: Serialize,
    {
        match ipld_core::serde::to_ipld(options) {
            Ok(Ipld::Map(map)) => Ok(Params(map)),
            Ok(other) => Err(AccessError::InvalidOptions(format!(
                "expected a map of options, found {other:?}"
            ))),
            Err(error) => Err(AccessError::InvalidOptions(format!("{error}"))),
        }
    }

    /// Whether no parameters are set
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over all parameters in key order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Ipld)> {
        self.0.iter()
    }
}

impl From<BTreeMap<String, Ipld>> for Params {
    fn from(value: BTreeMap<String, Ipld>) -> Self {
        Self(value)
    }
}

impl From<Params> for Ipld {
    fn from(value: Params) -> Self {
        Ipld::Map(value.0)
    }
}
