use crate::validation::Error;
use crate::{Extras, Path, Root};
use serde_derive::{Deserialize, Serialize};
use ufg_derive::Validate;

/// Metadata about the glTF asset.
#[derive(Clone, Debug, Deserialize, Serialize, Validate)]
#[gltf(validate_hook = "asset_validate_hook")]
pub struct Asset {
    /// A copyright message suitable for display to credit the content creator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub copyright: Option<String>,

    /// Tool that generated this glTF model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generator: Option<String>,

    /// The minimum glTF version that this asset targets.
    #[serde(rename = "minVersion")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_version: Option<String>,

    /// The glTF version of this asset.
    pub version: String,

    /// Extension specific data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<crate::extensions::asset::Asset>,

    /// Optional application specific data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extras: Extras,
}

impl Default for Asset {
    fn default() -> Self {
        Self {
            copyright: None,
            extensions: None,
            extras: Default::default(),
            generator: None,
            min_version: None,
            version: "2.0".to_string(),
        }
    }
}

// The version must be interpretable before any other field; anything outside
// the 2.x family is unsupported.
fn asset_validate_hook<P, R>(asset: &Asset, _root: &Root, path: P, report: &mut R)
where
    P: Fn() -> Path + Clone,
    R: FnMut(&dyn Fn() -> Path, Error),
{
    if asset.version != "2" && !asset.version.starts_with("2.") {
        report(&|| path().field("version"), Error::Unsupported);
    }
}
