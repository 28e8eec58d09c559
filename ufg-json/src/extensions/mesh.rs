use crate::mesh::Semantic;
use crate::validation::Checked;
use crate::{buffer, Index};
use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeMap;
use ufg_derive::Validate;

/// The Draco mesh compression extension name.
pub const KHR_DRACO_MESH_COMPRESSION: &str = "KHR_draco_mesh_compression";

/// Extensions recognized on `Primitive`.
#[derive(Clone, Debug, Default, Deserialize, Serialize, Validate)]
pub struct Primitive {
    /// Draco-compressed storage for the primitive's indices and a subset of
    /// its vertex attributes.
    #[serde(
        default,
        rename = "KHR_draco_mesh_compression",
        skip_serializing_if = "Option::is_none"
    )]
    pub draco: Option<DracoMeshCompression>,

    /// Extension data the loader does not interpret.
    #[serde(flatten)]
    pub others: super::Unrecognized,
}

/// `KHR_draco_mesh_compression` payload.
#[derive(Clone, Debug, Deserialize, Serialize, Validate)]
pub struct DracoMeshCompression {
    /// The buffer view holding the compressed payload.
    #[serde(rename = "bufferView")]
    pub buffer_view: Index<buffer::View>,

    /// Maps attribute semantics to Draco unique attribute identifiers.
    ///
    /// Values are Draco attribute ids, not accessor indices.
    pub attributes: BTreeMap<Checked<Semantic>, u32>,
}
