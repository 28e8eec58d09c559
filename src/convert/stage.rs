//! The USD stage-writing surface.
//!
//! Stage authoring itself is an external collaborator; the converter only
//! needs the narrow surface below. A [`RecordingStage`] is provided for
//! tests and dry runs.

use std::collections::BTreeMap;

use glam::{DMat4, Quat, Vec2, Vec3, Vec4};

/// Schema type of a defined prim.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PrimType {
    /// `UsdGeomXform`.
    Xform,
    /// `UsdGeomScope`.
    Scope,
    /// `UsdGeomMesh`.
    Mesh,
    /// `UsdSkelSkeleton`.
    Skeleton,
    /// `UsdSkelAnimation`.
    SkelAnimation,
    /// `UsdShadeMaterial`.
    Material,
    /// `UsdShadeShader`.
    Shader,
}

/// Attribute and metadata values the converter authors.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i32),
    /// Single float.
    Float(f32),
    /// Double, used for stage metadata like `metersPerUnit`.
    Double(f64),
    /// Token (interned string).
    Token(String),
    /// Plain string.
    String(String),
    /// Two-component float vector.
    Float2(Vec2),
    /// Three-component float vector.
    Float3(Vec3),
    /// Four-component float vector.
    Float4(Vec4),
    /// Quaternion.
    Quat(Quat),
    /// 4x4 double matrix.
    Matrix4d(DMat4),
    /// Integer array.
    IntArray(Vec<i32>),
    /// Float array.
    FloatArray(Vec<f32>),
    /// Float2 array (UVs).
    Float2Array(Vec<Vec2>),
    /// Float3 array (points, normals, colors).
    Float3Array(Vec<Vec3>),
    /// Float4 array.
    Float4Array(Vec<Vec4>),
    /// Quaternion array (joint rotations).
    QuatArray(Vec<Quat>),
    /// Matrix array (bind/rest transforms).
    Matrix4dArray(Vec<DMat4>),
    /// Token array (joint names).
    TokenArray(Vec<String>),
}

/// One `(time, value)` sample.
pub type TimeSample = (f32, Value);

/// Everything the converter needs from the USD layer.
///
/// Paths are absolute prim paths (`/Root/Meshes/n3`). Implementations are
/// expected to create ancestor prims implicitly defined by `define_prim`
/// calls in order.
pub trait Stage {
    /// Defines a prim of the given schema type.
    fn define_prim(&mut self, path: &str, prim_type: PrimType);

    /// Sets stage-level metadata (`defaultPrim`, `metersPerUnit`,
    /// `upAxis`).
    fn set_stage_metadata(&mut self, key: &str, value: Value);

    /// Sets prim-level metadata (`kind`).
    fn set_prim_metadata(&mut self, path: &str, key: &str, value: Value);

    /// Sets a static attribute value.
    fn set_attribute(&mut self, path: &str, name: &str, value: Value);

    /// Sets time samples on an attribute.
    fn set_attribute_time_samples(&mut self, path: &str, name: &str, samples: &[TimeSample]);

    /// Adds a relationship target (material binding, skeleton binding,
    /// animation source).
    fn add_relationship(&mut self, path: &str, name: &str, target: &str);
}

/// A prim recorded by [`RecordingStage`].
#[derive(Clone, Debug)]
pub struct RecordedPrim {
    /// Schema type.
    pub prim_type: PrimType,
    /// Static attributes by name.
    pub attributes: BTreeMap<String, Value>,
    /// Sampled attributes by name.
    pub time_samples: BTreeMap<String, Vec<TimeSample>>,
    /// Relationships by name.
    pub relationships: BTreeMap<String, Vec<String>>,
    /// Prim metadata by key.
    pub metadata: BTreeMap<String, Value>,
}

/// In-memory stage for tests: records every call for inspection.
#[derive(Debug, Default)]
pub struct RecordingStage {
    /// Prims in definition order.
    pub prims: Vec<(String, RecordedPrim)>,
    /// Stage metadata.
    pub metadata: BTreeMap<String, Value>,
}

impl RecordingStage {
    /// Creates an empty stage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Finds a recorded prim by absolute path.
    pub fn prim(&self, path: &str) -> Option<&RecordedPrim> {
        self.prims
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, prim)| prim)
    }

    /// All prim paths of the given type, in definition order.
    pub fn paths_of_type(&self, prim_type: PrimType) -> Vec<&str> {
        self.prims
            .iter()
            .filter(|(_, prim)| prim.prim_type == prim_type)
            .map(|(path, _)| path.as_str())
            .collect()
    }

    fn prim_mut(&mut self, path: &str) -> &mut RecordedPrim {
        if let Some(index) = self.prims.iter().position(|(p, _)| p == path) {
            return &mut self.prims[index].1;
        }
        // Attribute writes against undefined prims record as Scopes so
        // tests can still see them.
        self.prims.push((
            path.to_string(),
            RecordedPrim {
                prim_type: PrimType::Scope,
                attributes: BTreeMap::new(),
                time_samples: BTreeMap::new(),
                relationships: BTreeMap::new(),
                metadata: BTreeMap::new(),
            },
        ));
        &mut self.prims.last_mut().unwrap().1
    }
}

impl Stage for RecordingStage {
    fn define_prim(&mut self, path: &str, prim_type: PrimType) {
        if let Some(index) = self.prims.iter().position(|(p, _)| p == path) {
            self.prims[index].1.prim_type = prim_type;
            return;
        }
        self.prims.push((
            path.to_string(),
            RecordedPrim {
                prim_type,
                attributes: BTreeMap::new(),
                time_samples: BTreeMap::new(),
                relationships: BTreeMap::new(),
                metadata: BTreeMap::new(),
            },
        ));
    }

    fn set_stage_metadata(&mut self, key: &str, value: Value) {
        self.metadata.insert(key.to_string(), value);
    }

    fn set_prim_metadata(&mut self, path: &str, key: &str, value: Value) {
        self.prim_mut(path).metadata.insert(key.to_string(), value);
    }

    fn set_attribute(&mut self, path: &str, name: &str, value: Value) {
        self.prim_mut(path).attributes.insert(name.to_string(), value);
    }

    fn set_attribute_time_samples(&mut self, path: &str, name: &str, samples: &[TimeSample]) {
        self.prim_mut(path)
            .time_samples
            .insert(name.to_string(), samples.to_vec());
    }

    fn add_relationship(&mut self, path: &str, name: &str, target: &str) {
        self.prim_mut(path)
            .relationships
            .entry(name.to_string())
            .or_default()
            .push(target.to_string());
    }
}
