//! Skin assembly.
//!
//! Builds, per used skin, the joint ordering and matrices the skeleton
//! emitter needs: a tree-ordered joint list anchored at a derived root,
//! slash-separated joint names, bind and rest matrices, and the remap from
//! glTF joint indices to output joint indices. Also normalizes per-vertex
//! influences and detects effectively rigid skins.

use glam::{DMat4, Mat3, Quat, Vec3};

use crate::cache::AccessorCache;
use crate::json;
use crate::math::{Srt, SKIN_WEIGHT_ZERO_TOL};
use crate::mesh::{MeshInfo, INFLUENCE_MAX};
use crate::scene;

/// Sentinel for an unused joint slot.
pub const UNUSED_JOINT: u16 = u16::MAX;

/// One joint influence on a vertex.
#[derive(Clone, Copy, Debug)]
pub struct SkinInfluence {
    /// Output joint index, or [`UNUSED_JOINT`].
    pub index: u16,
    /// Blend weight.
    pub weight: f32,
}

impl Default for SkinInfluence {
    fn default() -> Self {
        Self {
            index: UNUSED_JOINT,
            weight: 0.0,
        }
    }
}

/// Up to four influences for one vertex, sorted by descending weight.
#[derive(Clone, Copy, Debug, Default)]
pub struct SkinBinding {
    /// The influence slots; unused slots carry [`UNUSED_JOINT`].
    pub influences: [SkinInfluence; INFLUENCE_MAX],
}

impl SkinBinding {
    /// Sorts weights greatest-to-least with a fixed sorting network.
    pub fn sort_influences_by_weight(&mut self) {
        let inf = &mut self.influences;
        if inf[0].weight < inf[1].weight {
            inf.swap(0, 1);
        }
        if inf[2].weight < inf[3].weight {
            inf.swap(2, 3);
        }
        if inf[0].weight < inf[2].weight {
            inf.swap(0, 2);
        }
        if inf[1].weight < inf[3].weight {
            inf.swap(1, 3);
        }
        if inf[1].weight < inf[2].weight {
            inf.swap(1, 2);
        }
    }

    /// Drops zero or out-of-range influences, sorts, and rescales the rest
    /// so they sum to 1.
    pub fn normalize(&mut self, joint_count: usize) {
        let mut weight_total = 0.0;
        for influence in &mut self.influences {
            if influence.weight <= SKIN_WEIGHT_ZERO_TOL || influence.index as usize >= joint_count
            {
                influence.index = UNUSED_JOINT;
                influence.weight = 0.0;
            } else {
                weight_total += influence.weight;
            }
        }
        self.sort_influences_by_weight();
        let weight_scale = if weight_total == 0.0 {
            1.0
        } else {
            1.0 / weight_total
        };
        for influence in &mut self.influences {
            if influence.index != UNUSED_JOINT {
                influence.weight *= weight_scale;
            }
        }
    }

    /// Fills the binding from raw per-vertex index/weight strides.
    pub fn assign(&mut self, indices: &[i32], weights: &[f32], joint_count: usize) {
        for i in 0..INFLUENCE_MAX {
            let influence = &mut self.influences[i];
            influence.index = match indices.get(i) {
                Some(&index) if index >= 0 && (index as usize) < u16::MAX as usize => index as u16,
                Some(_) => UNUSED_JOINT,
                None => UNUSED_JOINT,
            };
            influence.weight = weights.get(i).copied().unwrap_or(0.0);
        }
        self.normalize(joint_count);
    }

    /// Number of live influence slots.
    pub fn count_used(&self) -> usize {
        self.influences
            .iter()
            .filter(|influence| influence.index != UNUSED_JOINT)
            .count()
    }
}

/// Everything the skeleton emitter needs for one output skin.
#[derive(Clone, Debug, Default)]
pub struct SkinInfo {
    /// Skin name carried through from the source.
    pub name: Option<String>,
    /// Skeleton root node; the skeleton is anchored under this node's
    /// transform. `None` when joints span multiple scene roots.
    pub root_node: Option<usize>,
    /// Output joint index to node index, in tree order.
    pub ujoint_to_node: Vec<usize>,
    /// Fully qualified joint names (`n3/n7/n9`), aligned to the ordering.
    pub ujoint_names: Vec<String>,
    /// Rest (local) matrices per output joint.
    pub rest_mats: Vec<DMat4>,
    /// Bind (world) matrices per output joint.
    pub bind_mats: Vec<DMat4>,
}

/// Per-source-skin record pointing into the used-skin table.
#[derive(Clone, Debug, Default)]
pub struct SkinSrc {
    /// Index into the used skin infos, `None` for unreferenced skins.
    pub used_skin_index: Option<usize>,
    /// glTF joint index to output joint index.
    pub gjoint_to_ujoint: Vec<u16>,
}

/// Joint names encode hierarchy, so they are qualified up to (excluding)
/// the skeleton root. The short `n<i>` segments keep usda joint listings
/// legible.
fn joint_name(parents: &[Option<usize>], root_node: Option<usize>, node: usize) -> String {
    let mut segments = Vec::new();
    let mut current = Some(node);
    while let Some(index) = current {
        if Some(index) == root_node {
            break;
        }
        segments.push(format!("n{}", index));
        current = parents[index];
        if current.is_none() {
            break;
        }
    }
    segments.reverse();
    segments.join("/")
}

// A joint is used when any vertex weighted onto this skin references it
// with a weight above the zero tolerance.
fn joints_used(mesh_infos: &[MeshInfo], mesh_index: usize, joint_count: usize) -> Vec<bool> {
    let mut used = vec![false; joint_count];
    let Some(mesh_info) = mesh_infos.get(mesh_index) else {
        return used;
    };
    for prim in &mesh_info.prims {
        let vert_count = prim.pos.len();
        let index_stride = prim.skin_index_stride as usize;
        if vert_count == 0 || index_stride == 0 {
            continue;
        }
        let weight_stride = prim.skin_weight_stride as usize;
        let influence_count = index_stride.min(weight_stride);
        for vi in 0..vert_count {
            let indices = &prim.skin_indices[vi * index_stride..];
            let weights = &prim.skin_weights[vi * weight_stride..];
            for i in 0..influence_count {
                let joint = indices[i];
                if joint >= 0 && (joint as usize) < joint_count && weights[i] > SKIN_WEIGHT_ZERO_TOL
                {
                    used[joint as usize] = true;
                }
            }
        }
    }
    used
}

// Mark the set of skins referenced at or under the given nodes.
fn mark_skins_used(
    node_indices: &[usize],
    nodes: &[json::Node],
    skins_used: &mut [bool],
) -> usize {
    let mut total = 0;
    for &node_index in node_indices {
        let node = &nodes[node_index];
        if let Some(skin) = node.skin {
            let skin_index = skin.value();
            if skin_index < skins_used.len() && !skins_used[skin_index] {
                skins_used[skin_index] = true;
                total += 1;
            }
        }
        let children: Vec<usize> = node.children.iter().map(|c| c.value()).collect();
        total += mark_skins_used(&children, nodes, skins_used);
    }
    total
}

/// Builds the skin info for one skin and the glTF→output joint remap.
#[allow(clippy::too_many_arguments)]
pub fn skin_info(
    root: &json::Root,
    mesh_infos: &[MeshInfo],
    skin_index: usize,
    node_parents: &[Option<usize>],
    scene_nodes: &[usize],
    force_nodes_used: Option<&[bool]>,
    cache: &AccessorCache,
) -> (SkinInfo, Vec<u16>) {
    let skin = &root.skins[skin_index];
    let gjoint_count = skin.joints.len();
    let node_count = root.nodes.len();

    // Which glTF joints does any mesh bound to this skin actually weight?
    let mut gjoints_used = vec![false; gjoint_count];
    for &node_index in scene_nodes {
        let node = &root.nodes[node_index];
        if node.skin.map(|s| s.value()) == Some(skin_index) {
            if let Some(mesh) = node.mesh {
                let mesh_used = joints_used(mesh_infos, mesh.value(), gjoint_count);
                for (flag, used) in gjoints_used.iter_mut().zip(mesh_used) {
                    *flag |= used;
                }
            }
        }
    }

    // Animated joints can be force-included so renderers that rigidly
    // attach unweighted nodes still track them.
    if let Some(force) = force_nodes_used {
        for (gjoint, joint_node) in skin.joints.iter().enumerate() {
            if force.get(joint_node.value()).copied().unwrap_or(false) {
                gjoints_used[gjoint] = true;
            }
        }
    }

    let mut node_to_gjoint = vec![UNUSED_JOINT; node_count];
    for (gjoint, joint_node) in skin.joints.iter().enumerate() {
        if joint_node.value() < node_count {
            node_to_gjoint[joint_node.value()] = gjoint as u16;
        }
    }

    // Skeleton root: the lowest common ancestor of the used joints. The
    // skin's own `skeleton` hint is unreliable in the wild.
    let mut nodes_used = vec![false; node_count];
    let mut root_node: Option<usize> = None;
    let mut any_used = false;
    for (gjoint, joint_node) in skin.joints.iter().enumerate() {
        let node_index = joint_node.value();
        if gjoints_used[gjoint] && node_index < node_count && !nodes_used[node_index] {
            nodes_used[node_index] = true;
            root_node = if any_used {
                root_node.and_then(|r| scene::common_ancestor(node_parents, r, node_index))
            } else {
                Some(node_index)
            };
            any_used = true;
        }
    }

    // If the common ancestor is itself a used joint, lift the root one
    // level so the skeleton anchors under a non-joint transform and the
    // root joint's own transform is not applied twice.
    if let Some(root_index) = root_node {
        let gjoint = node_to_gjoint[root_index];
        if gjoint != UNUSED_JOINT && gjoints_used[gjoint as usize] {
            root_node = node_parents[root_index];
        }
    }

    // Fill hierarchy gaps: every ancestor of a used joint up to the root
    // becomes part of the joint set.
    for node_index in 0..node_count {
        if !nodes_used[node_index] {
            continue;
        }
        let mut current = Some(node_index);
        while current != root_node {
            let Some(index) = current else {
                break;
            };
            nodes_used[index] = true;
            current = node_parents[index];
        }
    }

    let mut ujoint_to_node: Vec<usize> =
        (0..node_count).filter(|&n| nodes_used[n]).collect();
    // glTF joint arrays are in no particular order; consumers require
    // parent < child.
    scene::sort_tree_order(node_parents, &mut ujoint_to_node);
    let ujoint_count = ujoint_to_node.len();

    let mut node_to_ujoint = vec![UNUSED_JOINT; node_count];
    for (ujoint, &node_index) in ujoint_to_node.iter().enumerate() {
        node_to_ujoint[node_index] = ujoint as u16;
    }

    let mut gjoint_to_ujoint = vec![UNUSED_JOINT; gjoint_count];
    let mut ujoint_to_gjoint = vec![UNUSED_JOINT; ujoint_count];
    for (gjoint, joint_node) in skin.joints.iter().enumerate() {
        let ujoint = node_to_ujoint[joint_node.value()];
        gjoint_to_ujoint[gjoint] = ujoint;
        if ujoint != UNUSED_JOINT {
            ujoint_to_gjoint[ujoint as usize] = gjoint as u16;
        }
    }

    let ujoint_names: Vec<String> = ujoint_to_node
        .iter()
        .map(|&node| joint_name(node_parents, root_node, node))
        .collect();

    let rest_mats: Vec<DMat4> = ujoint_to_node
        .iter()
        .map(|&node| scene::node_local_matrix(&root.nodes[node]).as_dmat4())
        .collect();

    // Bind matrices invert the inverse-bind accessor per mapped joint;
    // hierarchy-only joints use identity because their flattened transform
    // is never needed for rendering.
    let gjoint_inv_binds: Vec<DMat4> = match skin.inverse_bind_matrices {
        Some(ibm) => cache
            .access::<f32>(ibm.value())
            .filter(|data| data.component_count == 16 && data.vec_count >= gjoint_count)
            .map(|data| {
                data.as_slice()
                    .chunks_exact(16)
                    .take(gjoint_count)
                    .map(|chunk| {
                        let mut cols = [0.0f32; 16];
                        cols.copy_from_slice(chunk);
                        glam::Mat4::from_cols_array(&cols).as_dmat4()
                    })
                    .collect()
            })
            .unwrap_or_else(|| vec![DMat4::IDENTITY; gjoint_count]),
        None => vec![DMat4::IDENTITY; gjoint_count],
    };
    let bind_mats: Vec<DMat4> = ujoint_to_gjoint
        .iter()
        .map(|&gjoint| {
            if gjoint == UNUSED_JOINT {
                DMat4::IDENTITY
            } else {
                gjoint_inv_binds[gjoint as usize].inverse()
            }
        })
        .collect();

    (
        SkinInfo {
            name: skin.name.clone(),
            root_node,
            ujoint_to_node,
            ujoint_names,
            rest_mats,
            bind_mats,
        },
        gjoint_to_ujoint,
    )
}

// Coalesce all used skins into a single skeleton spanning the union of
// their joints.
fn merge_skin_infos(
    root: &json::Root,
    node_parents: &[Option<usize>],
    used_skin_infos: &[SkinInfo],
    gltf_skin_srcs: &mut [SkinSrc],
) -> SkinInfo {
    let mut root_node = used_skin_infos[0].root_node;
    for info in &used_skin_infos[1..] {
        root_node = match (root_node, info.root_node) {
            (Some(a), Some(b)) => scene::common_ancestor(node_parents, a, b),
            _ => None,
        };
    }

    let node_count = root.nodes.len();
    let mut nodes_used = vec![false; node_count];
    for info in used_skin_infos {
        for &node in &info.ujoint_to_node {
            nodes_used[node] = true;
        }
    }

    let mut ujoint_to_node: Vec<usize> = (0..node_count).filter(|&n| nodes_used[n]).collect();
    scene::sort_tree_order(node_parents, &mut ujoint_to_node);
    let ujoint_count = ujoint_to_node.len();
    let mut node_to_ujoint = vec![UNUSED_JOINT; node_count];
    for (ujoint, &node) in ujoint_to_node.iter().enumerate() {
        node_to_ujoint[node] = ujoint as u16;
    }

    // Joint parameters merge across skins; names resolve against the
    // merged root.
    let mut inited = vec![false; ujoint_count];
    let mut ujoint_names = vec![String::new(); ujoint_count];
    let mut rest_mats = vec![DMat4::IDENTITY; ujoint_count];
    let mut bind_mats = vec![DMat4::IDENTITY; ujoint_count];
    for info in used_skin_infos {
        for (src_ujoint, &node) in info.ujoint_to_node.iter().enumerate() {
            let merged = node_to_ujoint[node] as usize;
            if inited[merged] {
                continue;
            }
            inited[merged] = true;
            ujoint_names[merged] = joint_name(node_parents, root_node, node);
            rest_mats[merged] = info.rest_mats[src_ujoint];
            bind_mats[merged] = info.bind_mats[src_ujoint];
        }
    }

    // Remap every source skin's joint table into the merged ordering.
    for src in gltf_skin_srcs.iter_mut() {
        let Some(used_index) = src.used_skin_index else {
            continue;
        };
        let info = &used_skin_infos[used_index];
        src.used_skin_index = Some(0);
        for mapped in src.gjoint_to_ujoint.iter_mut() {
            if *mapped == UNUSED_JOINT {
                continue;
            }
            let node = info.ujoint_to_node[*mapped as usize];
            *mapped = node_to_ujoint[node];
        }
    }

    SkinInfo {
        name: used_skin_infos[0].name.clone(),
        root_node,
        ujoint_to_node,
        ujoint_names,
        rest_mats,
        bind_mats,
    }
}

/// Builds the used-skin table for the scene, merging when requested.
pub fn used_skin_infos(
    root: &json::Root,
    mesh_infos: &[MeshInfo],
    node_parents: &[Option<usize>],
    scene_nodes: &[usize],
    force_nodes_used: Option<&[bool]>,
    merge: bool,
    cache: &AccessorCache,
) -> (Vec<SkinInfo>, Vec<SkinSrc>) {
    let gltf_skin_count = root.skins.len();
    let mut skins_used = vec![false; gltf_skin_count];
    let scene_roots: Vec<usize> = scene_nodes
        .iter()
        .copied()
        .filter(|&n| node_parents[n].is_none())
        .collect();
    let used_count = mark_skins_used(&scene_roots, &root.nodes, &mut skins_used);

    let mut srcs = vec![SkinSrc::default(); gltf_skin_count];
    let mut infos = Vec::with_capacity(used_count);
    for gskin in 0..gltf_skin_count {
        if !skins_used[gskin] {
            continue;
        }
        let (info, gjoint_to_ujoint) = skin_info(
            root,
            mesh_infos,
            gskin,
            node_parents,
            scene_nodes,
            force_nodes_used,
            cache,
        );
        srcs[gskin] = SkinSrc {
            used_skin_index: Some(infos.len()),
            gjoint_to_ujoint,
        };
        infos.push(info);
    }

    if merge && infos.len() > 1 {
        let merged = merge_skin_infos(root, node_parents, &infos, &mut srcs);
        infos = vec![merged];
    }

    (infos, srcs)
}

/// Vertex bindings remapped to output joints.
#[derive(Clone, Debug, Default)]
pub struct SkinData {
    /// Largest live influence count across vertices.
    pub influence_count: u8,
    /// True when every vertex binds a single shared joint.
    pub is_rigid: bool,
    /// One binding per vertex.
    pub bindings: Vec<SkinBinding>,
}

/// Normalizes raw per-vertex influences and remaps them to output joints.
pub fn skin_data(
    indices: &[i32],
    index_stride: usize,
    weights: &[f32],
    weight_stride: usize,
    vert_count: usize,
    gjoint_to_ujoint: &[u16],
) -> Option<SkinData> {
    if index_stride == 0
        || index_stride > INFLUENCE_MAX
        || weight_stride == 0
        || weight_stride > INFLUENCE_MAX
    {
        return None;
    }
    let gjoint_count = gjoint_to_ujoint.len();

    let mut bindings = vec![SkinBinding::default(); vert_count];
    let mut influence_count = 0;
    for (vi, binding) in bindings.iter_mut().enumerate() {
        binding.assign(
            &indices[vi * index_stride..(vi + 1) * index_stride],
            &weights[vi * weight_stride..(vi + 1) * weight_stride],
            gjoint_count,
        );
        influence_count = influence_count.max(binding.count_used());
    }

    // Remap to output joints and detect the effectively rigid case.
    let mut first_index = UNUSED_JOINT;
    let mut is_rigid = true;
    for binding in &mut bindings {
        for influence in &mut binding.influences {
            if influence.index == UNUSED_JOINT {
                continue;
            }
            let mapped = gjoint_to_ujoint[influence.index as usize];
            if mapped == UNUSED_JOINT {
                influence.index = UNUSED_JOINT;
                influence.weight = 0.0;
                continue;
            }
            influence.index = mapped;
            if first_index == UNUSED_JOINT {
                first_index = mapped;
            } else if mapped != first_index {
                is_rigid = false;
            }
        }
    }

    Some(SkinData {
        influence_count: influence_count as u8,
        is_rigid,
        bindings,
    })
}

/// Computes per-joint matrices that move normals from bind-pose space to
/// object space for the given joint rotations and scales.
///
/// The output is inverse-transposed so it applies to normal vectors.
pub fn skin_joint_matrices_for_normals(
    skin_info: &SkinInfo,
    node_parents: &[Option<usize>],
    rots: Option<&[Quat]>,
    scales: Option<&[Vec3]>,
) -> Vec<Mat3> {
    let node_count = node_parents.len();
    let ujoint_count = skin_info.ujoint_to_node.len();
    let mut node_to_ujoint = vec![UNUSED_JOINT; node_count];
    for (ujoint, &node) in skin_info.ujoint_to_node.iter().enumerate() {
        node_to_ujoint[node] = ujoint as u16;
    }
    let ujoint_parents: Vec<u16> = skin_info
        .ujoint_to_node
        .iter()
        .map(|&node| match node_parents[node] {
            Some(parent) => node_to_ujoint[parent],
            None => UNUSED_JOINT,
        })
        .collect();

    let mat3_of = |mat: &DMat4| Mat3::from_mat4(mat.as_mat4());

    // Flattened joint matrices, translation omitted since it cannot affect
    // normals. Tree order guarantees parents are computed first.
    let mut flat = vec![Mat3::IDENTITY; ujoint_count];
    for ujoint in 0..ujoint_count {
        let bind = mat3_of(&skin_info.bind_mats[ujoint]);
        let inv_bind = bind.inverse();
        let rot = rots.map(|r| r[ujoint]).unwrap_or(Quat::IDENTITY);
        let scale = scales.map(|s| s[ujoint]).unwrap_or(Vec3::ONE);
        let anim = Mat3::from_quat(rot) * Mat3::from_diagonal(scale);

        // Vertices start in bind-pose space; bring them to joint space
        // before animating.
        let mut mat = anim * inv_bind;

        let parent = ujoint_parents[ujoint];
        if parent != UNUSED_JOINT {
            debug_assert!((parent as usize) < ujoint);
            let parent_bind = mat3_of(&skin_info.bind_mats[parent as usize]);
            // The accumulated parent matrix maps from bind space, so
            // re-apply the parent bind first.
            mat = flat[parent as usize] * parent_bind * mat;
        }
        flat[ujoint] = mat;
    }

    // Normal vectors transform by the inverse-transpose.
    flat.iter()
        .map(|mat| mat.inverse().transpose())
        .collect()
}

/// Applies per-joint normal matrices to vertex normals.
pub fn skin_normals(
    norm_joint_mats: &[Mat3],
    norms: &[Vec3],
    bindings: &[SkinBinding],
) -> Vec<Vec3> {
    norms
        .iter()
        .zip(bindings)
        .map(|(&norm, binding)| {
            let mut out = Vec3::ZERO;
            for influence in &binding.influences {
                if influence.index == UNUSED_JOINT {
                    break;
                }
                let transformed = norm_joint_mats[influence.index as usize] * norm;
                out += transformed.normalize_or_zero() * influence.weight;
            }
            out.try_normalize().unwrap_or(norm)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn binding_normalizes_and_sorts() {
        let mut binding = SkinBinding::default();
        binding.assign(&[0, 1, 2, 3], &[0.1, 0.4, 0.0, 0.3], 4);
        // The zero weight drops; the rest sort descending and sum to 1.
        assert_eq!(binding.count_used(), 3);
        assert_eq!(binding.influences[0].index, 1);
        assert_eq!(binding.influences[1].index, 3);
        assert_eq!(binding.influences[2].index, 0);
        let total: f32 = binding
            .influences
            .iter()
            .filter(|i| i.index != UNUSED_JOINT)
            .map(|i| i.weight)
            .sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn binding_drops_out_of_range_joints() {
        let mut binding = SkinBinding::default();
        binding.assign(&[0, 9], &[0.5, 0.5], 2);
        assert_eq!(binding.count_used(), 1);
        assert_eq!(binding.influences[0].index, 0);
        assert_relative_eq!(binding.influences[0].weight, 1.0);
    }

    #[test]
    fn rigid_skin_detection() {
        let data = skin_data(&[2, 2, 2], 1, &[1.0, 1.0, 1.0], 1, 3, &[5, 6, 7]).unwrap();
        assert!(data.is_rigid);
        assert_eq!(data.bindings[0].influences[0].index, 7);

        let data = skin_data(&[0, 1, 0], 1, &[1.0, 1.0, 1.0], 1, 3, &[5, 6]).unwrap();
        assert!(!data.is_rigid);
    }

    #[test]
    fn joint_names_qualify_to_root() {
        // 0 → 1 → 2, root at 0: names are relative to just below the root.
        let parents = vec![None, Some(0), Some(1)];
        assert_eq!(joint_name(&parents, Some(0), 2), "n1/n2");
        assert_eq!(joint_name(&parents, None, 2), "n0/n1/n2");
    }
}
