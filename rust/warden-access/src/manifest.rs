use std::str::FromStr;

use ipld_core::ipld::Ipld;
use serde::{Deserialize, Serialize};
use warden_storage::ContentAddress;

use crate::{AccessError, BlockStore, Params};

/// The type that blobs without a `type` field are resolved as
pub const LEGACY_TYPE: &str = "legacy";

/// A published descriptor naming a controller type and its parameters.
///
/// Manifests are immutable; a changed policy is a new manifest at a new
/// address.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// A registered controller type
    #[serde(rename = "type")]
    pub controller_type: String,
    /// Parameters for that controller's factory
    #[serde(default)]
    pub params: Params,
}

impl Manifest {
    /// A manifest for `controller_type`
    pub fn new(controller_type: impl Into<String>, params: Params) -> Self {
        Self {
            controller_type: controller_type.into(),
            params,
        }
    }

    /// Publish a manifest and return its address.
    ///
    /// When `params` sets `skip_manifest`, nothing is written and the
    /// `address` param is returned as-is, so that a controller's own address
    /// doubles as its manifest address.
    pub async fn create<S>(
        store: &S,
        controller_type: &str,
        params: Params,
    ) -> Result<String, AccessError>
    where
        S: BlockStore,
    {
        if params.flag(Params::SKIP_MANIFEST) {
            return params.address().map(str::to_owned).ok_or_else(|| {
                AccessError::InvalidOptions(
                    "skip_manifest requires the controller's address".into(),
                )
            });
        }

        let manifest = Manifest::new(controller_type, params);
        let mut store = store.clone();
        let address = store.write(&manifest).await?;
        Ok(address.to_string())
    }

    /// Read the manifest published at `address`.
    ///
    /// A blob that is a map without a string `type` predates manifests and
    /// is resolved as a [LEGACY_TYPE] controller stored at `address`. When
    /// `options` sets both `skip_manifest` and `type`, nothing is read.
    pub async fn resolve<S>(
        store: &S,
        address: &str,
        options: &Params,
    ) -> Result<Manifest, AccessError>
    where
        S: BlockStore,
    {
        if options.flag(Params::SKIP_MANIFEST) {
            if let Some(controller_type) = options.string(Params::TYPE) {
                return Ok(Manifest::new(
                    controller_type,
                    Params::new().with_string(Params::ADDRESS, address),
                ));
            }
        }

        let hash = ContentAddress::from_str(address)?;
        let blob: Ipld = store
            .read(&hash)
            .await?
            .ok_or_else(|| AccessError::NotFound(address.to_owned()))?;

        let Ipld::Map(mut fields) = blob else {
            return Err(AccessError::Decode(format!(
                "'{address}' does not hold an access controller manifest"
            )));
        };

        match fields.remove("type") {
            Some(Ipld::String(controller_type)) => {
                let params = match fields.remove("params") {
                    None | Some(Ipld::Null) => Params::new(),
                    Some(Ipld::Map(params)) => Params::from(params),
                    Some(_) => {
                        return Err(AccessError::Decode(format!(
                            "manifest at '{address}' has malformed params"
                        )));
                    }
                };
                Ok(Manifest::new(controller_type, params))
            }
            _ => Ok(Manifest::new(
                LEGACY_TYPE,
                Params::new().with_string(Params::ADDRESS, hash.to_string()),
            )),
        }
    }
}
