use serde_derive::{Deserialize, Serialize};
use ufg_derive::Validate;

/// The texture transform extension name.
pub const KHR_TEXTURE_TRANSFORM: &str = "KHR_texture_transform";

/// Extensions recognized on `texture::Info`.
#[derive(Clone, Debug, Default, Deserialize, Serialize, Validate)]
pub struct Info {
    /// UV offset/rotation/scale applied before sampling.
    #[serde(
        default,
        rename = "KHR_texture_transform",
        skip_serializing_if = "Option::is_none"
    )]
    pub texture_transform: Option<TextureTransform>,

    /// Extension data the loader does not interpret.
    #[serde(flatten)]
    pub others: super::Unrecognized,
}

/// `KHR_texture_transform` payload.
#[derive(Clone, Debug, Deserialize, Serialize, Validate)]
pub struct TextureTransform {
    /// UV offset.
    #[serde(default)]
    pub offset: [f32; 2],

    /// UV rotation in radians, counter-clockwise around the origin.
    #[serde(default)]
    pub rotation: f32,

    /// UV scale.
    #[serde(default = "texture_transform_scale_default")]
    pub scale: [f32; 2],

    /// Overrides the texture coordinate set of the parent `texture::Info`.
    #[serde(rename = "texCoord")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tex_coord: Option<u32>,
}

fn texture_transform_scale_default() -> [f32; 2] {
    [1.0, 1.0]
}

impl TextureTransform {
    /// True when applying the transform would leave UVs unchanged.
    pub fn is_identity(&self) -> bool {
        self.offset == [0.0, 0.0] && self.rotation == 0.0 && self.scale == [1.0, 1.0]
    }
}
