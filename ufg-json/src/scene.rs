use crate::validation::Error;
use crate::{camera, extensions, mesh, skin, Extras, Index, Path, Root};
use serde_derive::{Deserialize, Serialize};
use ufg_derive::Validate;

/// A node in the node hierarchy.
///
/// A node may carry either a 4x4 `matrix` or the decomposed
/// `translation`/`rotation`/`scale` triple, never both. When a node contains
/// a `skin`, it also contains a `mesh` whose primitives carry `JOINTS_0` and
/// `WEIGHTS_0` attributes.
#[derive(Clone, Debug, Default, Deserialize, Serialize, Validate)]
#[gltf(validate_hook = "node_validate_hook")]
pub struct Node {
    /// The index of the camera referenced by this node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera: Option<Index<camera::Camera>>,

    /// The indices of this node's children.
    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Index<Node>>,

    /// 4x4 column-major transformation matrix.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matrix: Option<[f32; 16]>,

    /// The index of the mesh in this node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mesh: Option<Index<mesh::Mesh>>,

    /// Optional user-defined name for this object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// The node's unit quaternion rotation in the order `[x, y, z, w]`,
    /// where `w` is the scalar.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation: Option<UnitQuaternion>,

    /// The node's non-uniform scale.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<[f32; 3]>,

    /// The node's translation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translation: Option<[f32; 3]>,

    /// The index of the skin referenced by this node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skin: Option<Index<skin::Skin>>,

    /// The weights of the instantiated morph target.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weights: Option<Vec<f32>>,

    /// Extension specific data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<extensions::Unrecognized>,

    /// Optional application specific data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extras: Extras,
}

fn node_validate_hook<P, R>(node: &Node, _root: &Root, path: P, report: &mut R)
where
    P: Fn() -> Path + Clone,
    R: FnMut(&dyn Fn() -> Path, Error),
{
    // The matrix and SRT forms are mutually exclusive.
    if node.matrix.is_some()
        && (node.translation.is_some() || node.rotation.is_some() || node.scale.is_some())
    {
        report(&|| path().field("matrix"), Error::Invalid);
    }

    // A skin is meaningless without a mesh to deform.
    if node.skin.is_some() && node.mesh.is_none() {
        report(&|| path().field("skin"), Error::Missing);
    }
}

/// The root nodes of a scene.
#[derive(Clone, Debug, Default, Deserialize, Serialize, Validate)]
pub struct Scene {
    /// Optional user-defined name for this object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// The indices of each root node.
    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<Index<Node>>,

    /// Extension specific data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<extensions::Unrecognized>,

    /// Optional application specific data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extras: Extras,
}

/// Unit quaternion rotation in the order `[x, y, z, w]`, where `w` is the
/// scalar.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, Validate)]
pub struct UnitQuaternion(pub [f32; 4]);

impl Default for UnitQuaternion {
    fn default() -> Self {
        UnitQuaternion([0.0, 0.0, 0.0, 1.0])
    }
}
