use crate::material::{PbrBaseColorFactor, StrengthFactor};
use crate::{texture, Extras};
use serde_derive::{Deserialize, Serialize};
use ufg_derive::Validate;

/// The unlit material extension name.
pub const KHR_MATERIALS_UNLIT: &str = "KHR_materials_unlit";

/// The specular-glossiness PBR extension name.
pub const KHR_MATERIALS_PBR_SPECULAR_GLOSSINESS: &str = "KHR_materials_pbrSpecularGlossiness";

/// Extensions recognized on `Material`.
#[derive(Clone, Debug, Default, Deserialize, Serialize, Validate)]
pub struct Material {
    /// Declares the material as unlit.
    #[serde(
        default,
        rename = "KHR_materials_unlit",
        skip_serializing_if = "Option::is_none"
    )]
    pub unlit: Option<Unlit>,

    /// Specular-glossiness PBR parameters, converted to metallic-roughness
    /// at emission time.
    #[serde(
        default,
        rename = "KHR_materials_pbrSpecularGlossiness",
        skip_serializing_if = "Option::is_none"
    )]
    pub pbr_specular_glossiness: Option<PbrSpecularGlossiness>,

    /// Extension data the loader does not interpret.
    #[serde(flatten)]
    pub others: super::Unrecognized,
}

/// Empty marker struct for `KHR_materials_unlit`.
#[derive(Clone, Debug, Default, Deserialize, Serialize, Validate)]
pub struct Unlit {}

/// A set of parameter values that are used to define the
/// specular-glossiness material model from Physically-Based Rendering (PBR)
/// methodology.
#[derive(Clone, Debug, Default, Deserialize, Serialize, Validate)]
pub struct PbrSpecularGlossiness {
    /// The material's diffuse factor.
    #[serde(default, rename = "diffuseFactor")]
    pub diffuse_factor: PbrBaseColorFactor,

    /// The diffuse texture.
    #[serde(rename = "diffuseTexture")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diffuse_texture: Option<texture::Info>,

    /// The material's specular factor.
    #[serde(default, rename = "specularFactor")]
    pub specular_factor: PbrSpecularFactor,

    /// The glossiness of the material surface (0 = rough, 1 = smooth).
    #[serde(default, rename = "glossinessFactor")]
    pub glossiness_factor: StrengthFactor,

    /// The specular-glossiness texture.
    ///
    /// RGB carries specular, A carries glossiness.
    #[serde(rename = "specularGlossinessTexture")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specular_glossiness_texture: Option<texture::Info>,

    /// Optional application specific data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extras: Extras,
}

/// The material's specular factor.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, Validate)]
pub struct PbrSpecularFactor(pub [f32; 3]);

impl Default for PbrSpecularFactor {
    fn default() -> Self {
        PbrSpecularFactor([1.0, 1.0, 1.0])
    }
}
