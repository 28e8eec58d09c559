use crate::validation::{Checked, Error, Validate};
use crate::{accessor, extensions, scene, Extras, Index, Path, Root};
use serde::{de, ser};
use serde_derive::{Deserialize, Serialize};
use std::fmt;
use ufg_derive::Validate;

/// All valid animation interpolation algorithms.
pub const VALID_INTERPOLATIONS: &[&str] = &["LINEAR", "STEP", "CUBICSPLINE"];

/// All valid animation property names.
pub const VALID_PROPERTIES: &[&str] = &["translation", "rotation", "scale", "weights"];

/// Specifies an interpolation algorithm.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Interpolation {
    /// Linear interpolation.
    ///
    /// The animated values are linearly interpolated between keyframes.
    /// When targeting a rotation, spherical linear interpolation (slerp)
    /// should be used to interpolate quaternions.
    Linear = 1,

    /// Step interpolation.
    ///
    /// The animated values remain constant to the output of the first
    /// keyframe, until the next keyframe.
    Step,

    /// Cubic spline interpolation.
    ///
    /// The keyframe's in-tangent, point, and out-tangent form the control
    /// values of a cubic Hermite spline; the output element count is three
    /// times the input count.
    CubicSpline,
}

impl Default for Interpolation {
    fn default() -> Self {
        Interpolation::Linear
    }
}

/// Specifies a property to animate.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Property {
    /// XYZ translation vector.
    Translation = 1,
    /// XYZW rotation quaternion.
    Rotation,
    /// XYZ scale vector.
    Scale,
    /// Weights of morph targets.
    MorphTargetWeights,
}

/// A keyframe animation.
#[derive(Clone, Debug, Deserialize, Serialize, Validate)]
#[gltf(validate_hook = "animation_validate_hook")]
pub struct Animation {
    /// An array of channels, each of which targets an animation's sampler at
    /// a node's property.
    ///
    /// Different channels of the same animation must not have equal targets.
    pub channels: Vec<Channel>,

    /// Optional user-defined name for this object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// An array of samplers that combine input and output accessors with an
    /// interpolation algorithm to define a keyframe graph (but not its
    /// target).
    pub samplers: Vec<Sampler>,

    /// Extension specific data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<extensions::Unrecognized>,

    /// Optional application specific data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extras: Extras,
}

// Channel samplers index into the animation's own sampler table, which the
// per-field walk cannot see, so the bounds check lives here.
fn animation_validate_hook<P, R>(animation: &Animation, _root: &Root, path: P, report: &mut R)
where
    P: Fn() -> Path + Clone,
    R: FnMut(&dyn Fn() -> Path, Error),
{
    for (index, channel) in animation.channels.iter().enumerate() {
        if channel.sampler.value() >= animation.samplers.len() {
            report(
                &|| path().field("channels").index(index).field("sampler"),
                Error::IndexOutOfBounds,
            );
        }
    }
}

/// Targets an animation's sampler at a node's property.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Channel {
    /// The index of a sampler in this animation used to compute the value
    /// for the target.
    pub sampler: Index<Sampler>,

    /// The index of the node and TRS property to target.
    pub target: Target,

    /// Extension specific data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<extensions::Unrecognized>,

    /// Optional application specific data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extras: Extras,
}

impl Validate for Channel {
    fn validate<P, R>(&self, root: &Root, path: P, report: &mut R)
    where
        P: Fn() -> Path + Clone,
        R: FnMut(&dyn Fn() -> Path, Error),
    {
        // The sampler index is checked by the parent animation's hook.
        self.target.validate(root, || path().field("target"), report);
    }
}

/// The index of the node and TRS property that an animation channel targets.
#[derive(Clone, Debug, Deserialize, Serialize, Validate)]
pub struct Target {
    /// The index of the node to target.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<Index<scene::Node>>,

    /// The name of the node's property to modify or the `weights` of the
    /// morph targets it instantiates.
    pub path: Checked<Property>,

    /// Extension specific data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<extensions::Unrecognized>,

    /// Optional application specific data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extras: Extras,
}

/// Defines a keyframe graph (but not its target).
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Sampler {
    /// The index of an accessor containing keyframe input values, e.g.,
    /// time. Times are scalar floats, non-negative and strictly increasing.
    pub input: Index<accessor::Accessor>,

    /// The interpolation algorithm.
    #[serde(default)]
    pub interpolation: Checked<Interpolation>,

    /// The index of an accessor containing keyframe output values.
    pub output: Index<accessor::Accessor>,

    /// Extension specific data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<extensions::Unrecognized>,

    /// Optional application specific data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extras: Extras,
}

impl Validate for Sampler {
    fn validate<P, R>(&self, root: &Root, path: P, report: &mut R)
    where
        P: Fn() -> Path + Clone,
        R: FnMut(&dyn Fn() -> Path, Error),
    {
        self.input.validate(root, || path().field("input"), report);
        self.interpolation
            .validate(root, || path().field("interpolation"), report);
        self.output.validate(root, || path().field("output"), report);
    }
}

impl<'de> de::Deserialize<'de> for Checked<Interpolation> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        struct Visitor;
        impl<'de> de::Visitor<'de> for Visitor {
            type Value = Checked<Interpolation>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "any of: {:?}", VALID_INTERPOLATIONS)
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                use self::Interpolation::*;
                use crate::validation::Checked::*;
                Ok(match value {
                    "LINEAR" => Valid(Linear),
                    "STEP" => Valid(Step),
                    "CUBICSPLINE" => Valid(CubicSpline),
                    _ => Invalid,
                })
            }
        }
        deserializer.deserialize_str(Visitor)
    }
}

impl ser::Serialize for Interpolation {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: ser::Serializer,
    {
        serializer.serialize_str(match *self {
            Interpolation::Linear => "LINEAR",
            Interpolation::Step => "STEP",
            Interpolation::CubicSpline => "CUBICSPLINE",
        })
    }
}

impl<'de> de::Deserialize<'de> for Checked<Property> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        struct Visitor;
        impl<'de> de::Visitor<'de> for Visitor {
            type Value = Checked<Property>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "any of: {:?}", VALID_PROPERTIES)
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                use self::Property::*;
                use crate::validation::Checked::*;
                Ok(match value {
                    "translation" => Valid(Translation),
                    "rotation" => Valid(Rotation),
                    "scale" => Valid(Scale),
                    "weights" => Valid(MorphTargetWeights),
                    _ => Invalid,
                })
            }
        }
        deserializer.deserialize_str(Visitor)
    }
}

impl ser::Serialize for Property {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: ser::Serializer,
    {
        serializer.serialize_str(match *self {
            Property::Translation => "translation",
            Property::Rotation => "rotation",
            Property::Scale => "scale",
            Property::MorphTargetWeights => "weights",
        })
    }
}
