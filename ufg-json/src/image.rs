use crate::validation::Error;
use crate::{buffer, extensions, Extras, Index, Path, Root};
use serde::{de, ser};
use serde_derive::{Deserialize, Serialize};
use std::fmt;
use ufg_derive::Validate;

/// All valid MIME types.
pub const VALID_MIME_TYPES: &[&str] = &["image/jpeg", "image/png"];

/// Image data used to create a texture.
///
/// An image carries exactly one source form: a URI (path or data URI), or a
/// buffer view plus a MIME type.
#[derive(Clone, Debug, Deserialize, Serialize, Validate)]
#[gltf(validate_hook = "image_validate_hook")]
pub struct Image {
    /// The parent buffer view containing the encoded image data.
    #[serde(rename = "bufferView")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buffer_view: Option<Index<buffer::View>>,

    /// The image's MIME type. Required when `buffer_view` is set.
    #[serde(rename = "mimeType")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<MimeType>,

    /// Optional user-defined name for this object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// The uri of the image. Relative paths are relative to the .gltf file.
    /// May be a `data:` URI.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,

    /// Extension specific data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<extensions::Unrecognized>,

    /// Optional application specific data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extras: Extras,
}

fn image_validate_hook<P, R>(image: &Image, _root: &Root, path: P, report: &mut R)
where
    P: Fn() -> Path + Clone,
    R: FnMut(&dyn Fn() -> Path, Error),
{
    match (image.uri.as_ref(), image.buffer_view.as_ref()) {
        (Some(_), Some(_)) => report(&|| path().field("bufferView"), Error::Invalid),
        (None, None) => report(&|| path().field("uri"), Error::Missing),
        (None, Some(_)) if image.mime_type.is_none() => {
            report(&|| path().field("mimeType"), Error::Missing)
        }
        _ => {}
    }
}

/// An image MIME type.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MimeType(pub String);

impl<'de> de::Deserialize<'de> for MimeType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        struct Visitor;
        impl<'de> de::Visitor<'de> for Visitor {
            type Value = MimeType;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "a MIME type string")
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(MimeType(value.to_string()))
            }
        }
        deserializer.deserialize_str(Visitor)
    }
}

impl ser::Serialize for MimeType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: ser::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl crate::validation::Validate for MimeType {}
