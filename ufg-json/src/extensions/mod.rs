use std::collections::BTreeMap;

/// Contains extensions for `Material`.
pub mod material;

/// Contains extensions for `Primitive`.
pub mod mesh;

/// Contains extensions for `texture::Info`.
pub mod texture;

/// Names of extensions recognized by the loader.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    material::KHR_MATERIALS_UNLIT,
    material::KHR_MATERIALS_PBR_SPECULAR_GLOSSINESS,
    texture::KHR_TEXTURE_TRANSFORM,
    mesh::KHR_DRACO_MESH_COMPRESSION,
];

/// Extension data the loader does not interpret.
///
/// Keys are preserved so the converter can report unrecognized extensions,
/// honoring any configured prefix suppressions.
pub type Unrecognized = BTreeMap<String, serde_json::Value>;

/// Contains extensions for `Asset`.
pub mod asset {
    /// No asset-level extensions are interpreted.
    pub type Asset = super::Unrecognized;
}

/// Contains extensions for `Root`.
pub mod root {
    /// No root-level extensions are interpreted.
    pub type Root = super::Unrecognized;
}
