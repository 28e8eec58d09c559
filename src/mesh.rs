//! Mesh assembly.
//!
//! Turns each glTF primitive into compacted vertex arrays plus a triangle
//! index list in the compacted index space. Unreferenced vertices are
//! dropped, strips and fans are expanded, UV sets are V-flipped, and Draco
//! payloads are decoded through an external decoder.

use std::collections::{BTreeMap, HashMap};

use glam::{Vec2, Vec3, Vec4};

use crate::cache::AccessorCache;
use crate::json;
use crate::json::mesh::{Mode, Semantic};
use crate::json::validation::Checked;
use crate::math;
use crate::message::{Logger, Message, OnceLogger, Severity};

/// Maximum influences per vertex.
pub const INFLUENCE_MAX: usize = 4;

/// Decoded Draco attribute: a value table plus the point-to-value mapping.
#[derive(Clone, Debug, Default)]
pub struct DracoAttribute {
    /// Scalars per value.
    pub component_count: usize,
    /// Maps point index to value index.
    pub value_map: Vec<u32>,
    /// Dense values, `component_count` scalars each.
    pub values: Vec<f32>,
}

impl DracoAttribute {
    fn value(&self, point: usize, component: usize) -> Option<f32> {
        let value_index = *self.value_map.get(point)? as usize;
        self.values
            .get(value_index * self.component_count + component)
            .copied()
    }
}

/// A decoded Draco mesh. Always a triangle list.
#[derive(Clone, Debug, Default)]
pub struct DracoMesh {
    /// Number of points the attributes map from.
    pub point_count: usize,
    /// Triangle list indices, three per face.
    pub indices: Vec<u32>,
    /// Attributes keyed by Draco unique attribute id.
    pub attributes: HashMap<u32, DracoAttribute>,
}

/// External Draco decode collaborator.
pub trait DracoDecoder {
    /// Decodes a compressed payload into a triangle mesh.
    ///
    /// Non-triangular Draco geometry is an error.
    fn decode(&self, data: &[u8]) -> Result<DracoMesh, crate::Error>;
}

/// Compacted per-primitive data in the output vertex space.
#[derive(Clone, Debug, Default)]
pub struct PrimInfo {
    /// Face vertex counts; always 3.
    pub tri_vert_counts: Vec<i32>,
    /// Face vertex indices into the compacted arrays.
    pub tri_vert_indices: Vec<i32>,
    /// Compacted positions.
    pub pos: Vec<Vec3>,
    /// Compacted normals, empty when the source has none.
    pub norm: Vec<Vec3>,
    /// Compacted UV sets keyed by TEXCOORD set number, V already flipped.
    pub uvs: BTreeMap<u32, Vec<Vec2>>,
    /// 0 (no colors), 3, or 4.
    pub color_stride: u8,
    /// RGB colors when `color_stride == 3`.
    pub color3: Vec<Vec3>,
    /// RGBA colors when `color_stride == 4`.
    pub color4: Vec<Vec4>,
    /// Influences per vertex in `skin_indices`, 0 when unskinned.
    pub skin_index_stride: u8,
    /// Influences per vertex in `skin_weights`, 0 when unskinned.
    pub skin_weight_stride: u8,
    /// Raw joint indices, `skin_index_stride` per vertex.
    pub skin_indices: Vec<i32>,
    /// Raw weights, `skin_weight_stride` per vertex.
    pub skin_weights: Vec<f32>,
    /// Material table index, when assigned.
    pub material: Option<usize>,
}

/// All surviving primitives of one mesh, table-aligned with the source.
#[derive(Clone, Debug, Default)]
pub struct MeshInfo {
    /// One entry per source primitive; dropped primitives are left empty.
    pub prims: Vec<PrimInfo>,
}

/// Expands triangle strips and fans into triangle lists in place.
///
/// Strip winding alternates forward then reversed; fans pivot on the first
/// vertex.
pub fn convert_to_triangles(mode: Mode, indices: &mut Vec<u32>) {
    debug_assert!(mode.has_triangles());
    if mode == Mode::Triangles || indices.len() < 3 {
        return;
    }
    let src = std::mem::take(indices);
    let tri_count = src.len() - 2;
    let mut dst = Vec::with_capacity(3 * tri_count);
    match mode {
        Mode::TriangleStrip => {
            for (i, window) in src.windows(3).enumerate() {
                if i % 2 == 0 {
                    dst.extend_from_slice(&[window[0], window[1], window[2]]);
                } else {
                    dst.extend_from_slice(&[window[0], window[2], window[1]]);
                }
            }
        }
        Mode::TriangleFan => {
            let pivot = src[0];
            for window in src[1..].windows(2) {
                dst.extend_from_slice(&[pivot, window[0], window[1]]);
            }
        }
        _ => unreachable!("mode has no triangles"),
    }
    *indices = dst;
}

/// Marks the vertices referenced by `indices` and returns the used count.
pub fn used_points(pos_count: usize, indices: &[u32], out_used: &mut Vec<bool>) -> usize {
    out_used.clear();
    out_used.resize(pos_count, false);
    let mut count = 0;
    for &index in indices {
        let index = index as usize;
        if index < pos_count && !out_used[index] {
            out_used[index] = true;
            count += 1;
        }
    }
    count
}

fn orig_to_used_map(used: &[bool]) -> Vec<u32> {
    const NO_INDEX: u32 = u32::MAX;
    let mut map = vec![NO_INDEX; used.len()];
    let mut next = 0;
    for (orig, &is_used) in used.iter().enumerate() {
        if is_used {
            map[orig] = next;
            next += 1;
        }
    }
    map
}

fn reverse_tri_winding(indices: &mut [i32]) {
    for tri in indices.chunks_exact_mut(3) {
        tri.swap(1, 2);
    }
}

/// Compacts scalars of one accessor into the used vertex space.
///
/// Returns the component stride, or 0 when the attribute is absent.
fn copy_accessor_scalars<T: crate::cache::Scalar>(
    cache: &AccessorCache,
    attributes: &BTreeMap<Checked<Semantic>, json::Index<json::Accessor>>,
    semantic: &Semantic,
    used: &[bool],
    used_count: usize,
    out: &mut Vec<T>,
) -> usize {
    let Some(&accessor_index) = attributes.get(&Checked::Valid(semantic.clone())) else {
        return 0;
    };
    let Some(data) = cache.access::<T>(accessor_index.value()) else {
        return 0;
    };
    if data.vec_count < used.len() {
        return 0;
    }
    let stride = data.component_count;
    out.clear();
    out.reserve(used_count * stride);
    let scalars = data.as_slice();
    for (orig, &is_used) in used.iter().enumerate() {
        if is_used {
            out.extend_from_slice(&scalars[orig * stride..(orig + 1) * stride]);
        }
    }
    stride
}

fn scalars_to_vec3(scalars: &[f32]) -> Vec<Vec3> {
    scalars
        .chunks_exact(3)
        .map(|c| Vec3::new(c[0], c[1], c[2]))
        .collect()
}

fn scalars_to_vec2(scalars: &[f32]) -> Vec<Vec2> {
    scalars.chunks_exact(2).map(|c| Vec2::new(c[0], c[1])).collect()
}

fn scalars_to_vec4(scalars: &[f32]) -> Vec<Vec4> {
    scalars
        .chunks_exact(4)
        .map(|c| Vec4::new(c[0], c[1], c[2], c[3]))
        .collect()
}

// All channels within 1/255 of white carry no information; suppress them
// with a one-shot diagnostic.
fn colors_are_white(color_stride: usize, scalars: &[f32]) -> bool {
    const WHITE_TOL: f32 = 1.0 / 255.0;
    scalars.chunks_exact(color_stride).all(|c| {
        c.iter()
            .take(3)
            .all(|&v| math::nearly_equal(v, 1.0, WHITE_TOL))
            && (color_stride == 3 || math::nearly_equal(c[3], 1.0, WHITE_TOL))
    })
}

struct PrimSources<'a> {
    root: &'a json::Root,
    mesh_index: usize,
    mesh_name: String,
}

/// Builds the compacted info for every primitive of a mesh.
pub fn mesh_info(
    root: &json::Root,
    mesh_index: usize,
    cache: &AccessorCache,
    draco_decoder: Option<&dyn DracoDecoder>,
    logger: &dyn Logger,
    once: &OnceLogger,
) -> MeshInfo {
    let mesh = &root.meshes[mesh_index];
    let sources = PrimSources {
        root,
        mesh_index,
        mesh_name: mesh.name.clone().unwrap_or_default(),
    };
    let mut info = MeshInfo {
        prims: vec![PrimInfo::default(); mesh.primitives.len()],
    };
    for (prim_index, prim) in mesh.primitives.iter().enumerate() {
        if let Some(prim_info) =
            prim_info(&sources, prim, prim_index, cache, draco_decoder, logger, once)
        {
            info.prims[prim_index] = prim_info;
        }
    }
    info
}

fn prim_info(
    sources: &PrimSources,
    prim: &json::mesh::Primitive,
    prim_index: usize,
    cache: &AccessorCache,
    draco_decoder: Option<&dyn DracoDecoder>,
    logger: &dyn Logger,
    once: &OnceLogger,
) -> Option<PrimInfo> {
    let root = sources.root;
    let mode = match prim.mode {
        Checked::Valid(mode) => mode,
        Checked::Invalid => return None,
    };
    if !mode.has_triangles() {
        logger.add(Message::new(
            "NON_TRIANGLES",
            Severity::Warning,
            format!(
                "mesh {} primitive {} has non-triangular mode and was dropped",
                sources.mesh_index, prim_index
            ),
        ));
        return None;
    }

    if prim.targets.as_ref().map_or(false, |t| !t.is_empty()) {
        once.add(
            &sources.mesh_name,
            Message::new(
                "MORPH_TARGETS_UNSUPPORTED",
                Severity::Warning,
                "morph targets are not converted",
            ),
        );
    }

    let mut out = PrimInfo {
        material: prim.material.map(|m| m.value()),
        ..Default::default()
    };

    // The Draco payload (when present) carries the indices and a subset of
    // attributes; anything it lacks still loads from the inline accessors.
    let mut indices: Vec<u32>;
    let mut used: Vec<bool> = Vec::new();
    let used_count;
    let draco = prim.extensions.as_ref().and_then(|e| e.draco.as_ref());
    if let Some(draco) = draco {
        let Some(decoder) = draco_decoder else {
            logger.add(Message::new(
                "DRACO_UNAVAILABLE",
                Severity::Error,
                format!(
                    "mesh {} primitive {} is Draco compressed but no decoder is configured",
                    sources.mesh_index, prim_index
                ),
            ));
            return None;
        };
        let Some(payload) = cache.view_data(draco.buffer_view.value()) else {
            logger.add(Message::new(
                "DRACO_LOAD",
                Severity::Error,
                format!(
                    "failed to load Draco data for mesh {} primitive {}",
                    sources.mesh_index, prim_index
                ),
            ));
            return None;
        };
        let mesh = match decoder.decode(payload) {
            Ok(mesh) => mesh,
            Err(err) => {
                logger.add(Message::new(
                    "DRACO_DECODE",
                    Severity::Error,
                    format!(
                        "failed to decode Draco mesh {} primitive {}: {}",
                        sources.mesh_index, prim_index, err
                    ),
                ));
                return None;
            }
        };
        indices = mesh.indices.clone();
        used_count = used_points(mesh.point_count, &indices, &mut used);
        if used_count == 0 {
            return None;
        }
        copy_draco_attributes(&mesh, draco, &used, used_count, &mut out);
    } else {
        let pos_index = prim
            .attributes
            .get(&Checked::Valid(Semantic::Positions))?
            .value();
        let pos_count = root.accessors.get(pos_index)?.count.value();
        if pos_count == 0 {
            // Boundary rule: an empty accessor is not an error, but the
            // primitive emits nothing.
            return None;
        }
        indices = match prim.indices {
            Some(accessor_index) => {
                let data = cache.access::<u32>(accessor_index.value())?;
                data.as_slice().to_vec()
            }
            None => (0..pos_count as u32).collect(),
        };
        convert_to_triangles(mode, &mut indices);
        used_count = used_points(pos_count, &indices, &mut used);
        if used_count == 0 {
            return None;
        }
    }

    // Triangle faces remapped into the compacted vertex space.
    let remap = orig_to_used_map(&used);
    out.tri_vert_counts = vec![3; indices.len() / 3];
    out.tri_vert_indices = indices
        .iter()
        .map(|&orig| remap[orig as usize] as i32)
        .collect();

    copy_inline_attributes(prim, cache, &used, used_count, &mut out, once, &sources.mesh_name);

    if out.pos.len() != used_count {
        // POSITION failed to load; nothing to emit.
        return None;
    }
    Some(out)
}

fn copy_draco_attributes(
    mesh: &DracoMesh,
    draco: &json::extensions::mesh::DracoMeshCompression,
    used: &[bool],
    used_count: usize,
    out: &mut PrimInfo,
) {
    let compact = |attr: &DracoAttribute| -> Vec<f32> {
        let mut scalars = Vec::with_capacity(used_count * attr.component_count);
        for (point, &is_used) in used.iter().enumerate() {
            if !is_used {
                continue;
            }
            for component in 0..attr.component_count {
                scalars.push(attr.value(point, component).unwrap_or(0.0));
            }
        }
        scalars
    };
    let find = |semantic: &Semantic| -> Option<&DracoAttribute> {
        draco
            .attributes
            .get(&Checked::Valid(semantic.clone()))
            .and_then(|id| mesh.attributes.get(id))
    };

    if let Some(attr) = find(&Semantic::Positions).filter(|a| a.component_count == 3) {
        out.pos = scalars_to_vec3(&compact(attr));
    }
    if let Some(attr) = find(&Semantic::Normals).filter(|a| a.component_count == 3) {
        out.norm = scalars_to_vec3(&compact(attr));
    }
    for set in 0..8u32 {
        if let Some(attr) = find(&Semantic::TexCoords(set)).filter(|a| a.component_count == 2) {
            let mut uvs = scalars_to_vec2(&compact(attr));
            math::flip_vs(&mut uvs);
            out.uvs.insert(set, uvs);
        }
    }
    if let Some(attr) = find(&Semantic::Colors(0)) {
        let scalars = compact(attr);
        match attr.component_count {
            3 => {
                out.color_stride = 3;
                out.color3 = scalars_to_vec3(&scalars);
            }
            4 => {
                out.color_stride = 4;
                out.color4 = scalars_to_vec4(&scalars);
            }
            _ => {}
        }
    }
    if let (Some(joints), Some(weights)) = (find(&Semantic::Joints(0)), find(&Semantic::Weights(0)))
    {
        let index_stride = joints.component_count.min(INFLUENCE_MAX);
        let weight_stride = weights.component_count.min(INFLUENCE_MAX);
        if index_stride > 0 && weight_stride > 0 {
            out.skin_index_stride = index_stride as u8;
            out.skin_weight_stride = weight_stride as u8;
            out.skin_indices = compact(joints).iter().map(|&v| v as i32).collect();
            out.skin_weights = compact(weights);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn copy_inline_attributes(
    prim: &json::mesh::Primitive,
    cache: &AccessorCache,
    used: &[bool],
    used_count: usize,
    out: &mut PrimInfo,
    once: &OnceLogger,
    mesh_name: &str,
) {
    let attrs = &prim.attributes;
    let mut scalars: Vec<f32> = Vec::new();

    if out.pos.is_empty()
        && copy_accessor_scalars::<f32>(cache, attrs, &Semantic::Positions, used, used_count, &mut scalars)
            == 3
    {
        out.pos = scalars_to_vec3(&scalars);
    }
    if out.norm.is_empty()
        && copy_accessor_scalars::<f32>(cache, attrs, &Semantic::Normals, used, used_count, &mut scalars)
            == 3
    {
        out.norm = scalars_to_vec3(&scalars);
    }

    // Every UV set not already supplied by Draco.
    for semantic in attrs.keys() {
        let Some(Semantic::TexCoords(set)) = valid_semantic(semantic) else {
            continue;
        };
        if out.uvs.contains_key(&set) {
            continue;
        }
        if copy_accessor_scalars::<f32>(
            cache,
            attrs,
            &Semantic::TexCoords(set),
            used,
            used_count,
            &mut scalars,
        ) == 2
        {
            let mut uvs = scalars_to_vec2(&scalars);
            math::flip_vs(&mut uvs);
            out.uvs.insert(set, uvs);
        }
    }

    if out.color_stride == 0 {
        let stride = copy_accessor_scalars::<f32>(
            cache,
            attrs,
            &Semantic::Colors(0),
            used,
            used_count,
            &mut scalars,
        );
        if stride == 3 || stride == 4 {
            if colors_are_white(stride, &scalars) {
                once.add(
                    mesh_name,
                    Message::new(
                        "VERTEX_COLOR_WHITE",
                        Severity::Info,
                        "vertex colors are uniformly white and were dropped",
                    ),
                );
            } else if stride == 3 {
                out.color_stride = 3;
                out.color3 = scalars_to_vec3(&scalars);
            } else {
                out.color_stride = 4;
                out.color4 = scalars_to_vec4(&scalars);
            }
        }
    }

    if out.skin_index_stride == 0 {
        let mut indices: Vec<i32> = Vec::new();
        let index_stride = copy_accessor_scalars::<i32>(
            cache,
            attrs,
            &Semantic::Joints(0),
            used,
            used_count,
            &mut indices,
        );
        let weight_stride = copy_accessor_scalars::<f32>(
            cache,
            attrs,
            &Semantic::Weights(0),
            used,
            used_count,
            &mut scalars,
        );
        if index_stride != 0 && weight_stride != 0 {
            out.skin_index_stride = index_stride.min(INFLUENCE_MAX) as u8;
            out.skin_weight_stride = weight_stride.min(INFLUENCE_MAX) as u8;
            out.skin_indices = indices;
            out.skin_weights = std::mem::take(&mut scalars);
        }
    }
}

fn valid_semantic(checked: &Checked<Semantic>) -> Option<Semantic> {
    match checked {
        Checked::Valid(semantic) => Some(semantic.clone()),
        Checked::Invalid => None,
    }
}

/// Duplicates geometry so single-sided renderers show both faces.
///
/// The back half reuses every attribute with normals flipped, and its
/// triangles rewound as `[a, c, b]` with indices offset by the original
/// vertex count.
pub fn emulate_double_sided(info: &mut PrimInfo) {
    let vert_count = info.pos.len() as i32;
    let front_indices = info.tri_vert_indices.clone();

    let mut back: Vec<i32> = front_indices.iter().map(|&i| i + vert_count).collect();
    reverse_tri_winding(&mut back);
    info.tri_vert_indices.extend_from_slice(&back);
    info.tri_vert_counts
        .extend(std::iter::repeat(3).take(back.len() / 3));

    info.pos.extend_from_slice(&info.pos.clone());
    if !info.norm.is_empty() {
        let flipped: Vec<Vec3> = info.norm.iter().map(|&n| -n).collect();
        info.norm.extend_from_slice(&flipped);
    }
    for uvs in info.uvs.values_mut() {
        uvs.extend_from_slice(&uvs.clone());
    }
    if !info.color3.is_empty() {
        info.color3.extend_from_slice(&info.color3.clone());
    }
    if !info.color4.is_empty() {
        info.color4.extend_from_slice(&info.color4.clone());
    }
    if info.skin_index_stride != 0 {
        info.skin_indices.extend_from_slice(&info.skin_indices.clone());
        info.skin_weights.extend_from_slice(&info.skin_weights.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_expansion_alternates_winding() {
        let mut indices = vec![0, 1, 2, 3, 4];
        convert_to_triangles(Mode::TriangleStrip, &mut indices);
        assert_eq!(indices, vec![0, 1, 2, 3, 2, 1, 2, 3, 4]);
    }

    #[test]
    fn fan_expansion_pivots_on_first() {
        let mut indices = vec![0, 1, 2, 3, 4];
        convert_to_triangles(Mode::TriangleFan, &mut indices);
        assert_eq!(indices, vec![0, 1, 2, 0, 2, 3, 0, 3, 4]);
    }

    #[test]
    fn used_point_compaction() {
        let mut used = Vec::new();
        let count = used_points(5, &[0, 2, 2, 4], &mut used);
        assert_eq!(count, 3);
        assert_eq!(used, vec![true, false, true, false, true]);
        let map = orig_to_used_map(&used);
        assert_eq!(map[0], 0);
        assert_eq!(map[2], 1);
        assert_eq!(map[4], 2);
    }

    #[test]
    fn double_sided_duplicates_and_rewinds() {
        let mut info = PrimInfo {
            tri_vert_counts: vec![3],
            tri_vert_indices: vec![0, 1, 2],
            pos: vec![Vec3::ZERO, Vec3::X, Vec3::Y],
            norm: vec![Vec3::Z, Vec3::Z, Vec3::Z],
            ..Default::default()
        };
        emulate_double_sided(&mut info);
        assert_eq!(info.pos.len(), 6);
        assert_eq!(info.tri_vert_counts, vec![3, 3]);
        assert_eq!(info.tri_vert_indices, vec![0, 1, 2, 3, 5, 4]);
        assert_eq!(info.norm[3], -Vec3::Z);
    }

    #[test]
    fn white_color_detection() {
        assert!(colors_are_white(3, &[1.0, 1.0, 1.0, 0.999, 1.0, 1.0]));
        assert!(!colors_are_white(3, &[1.0, 0.5, 1.0]));
        assert!(!colors_are_white(4, &[1.0, 1.0, 1.0, 0.5]));
    }
}
