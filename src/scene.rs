//! Node hierarchy utilities.
//!
//! The node graph is a forest addressed by table index. Parent links are
//! derived once per conversion and passed around as a slice.

use glam::{Mat4, Quat, Vec3};

use crate::json;
use crate::math::Srt;

/// Derives the parent index of every node, `None` for roots.
pub fn node_parents(nodes: &[json::Node]) -> Vec<Option<usize>> {
    let mut parents = vec![None; nodes.len()];
    for (parent_index, node) in nodes.iter().enumerate() {
        for child in &node.children {
            if let Some(slot) = parents.get_mut(child.value()) {
                *slot = Some(parent_index);
            }
        }
    }
    parents
}

/// Number of nodes on the path from the root down to `node`, inclusive.
pub fn depth(parents: &[Option<usize>], node: usize) -> usize {
    let mut depth = 0;
    let mut current = Some(node);
    while let Some(index) = current {
        depth += 1;
        current = parents[index];
    }
    depth
}

/// True when `node` equals `ancestor` or sits somewhere beneath it.
pub fn is_equal_or_under(parents: &[Option<usize>], ancestor: usize, node: usize) -> bool {
    let mut current = Some(node);
    while let Some(index) = current {
        if index == ancestor {
            return true;
        }
        current = parents[index];
    }
    false
}

/// Lowest common ancestor of two nodes, `None` when they share no root.
pub fn common_ancestor(parents: &[Option<usize>], a: usize, b: usize) -> Option<usize> {
    let mut a = Some(a);
    let mut b = Some(b);
    let mut depth_a = a.map(|n| depth(parents, n)).unwrap_or(0);
    let mut depth_b = b.map(|n| depth(parents, n)).unwrap_or(0);
    while depth_a > depth_b {
        a = parents[a.unwrap()];
        depth_a -= 1;
    }
    while depth_b > depth_a {
        b = parents[b.unwrap()];
        depth_b -= 1;
    }
    while a != b {
        a = a.and_then(|n| parents[n]);
        b = b.and_then(|n| parents[n]);
    }
    a
}

/// The path of node indices from the root down to `node`, inclusive.
pub fn node_path(parents: &[Option<usize>], node: usize) -> Vec<usize> {
    let mut path = Vec::new();
    let mut current = Some(node);
    while let Some(index) = current {
        path.push(index);
        current = parents[index];
    }
    path.reverse();
    path
}

/// Sorts node indices into tree order.
///
/// Nodes are compared by their root-to-node paths, which yields a stable
/// pre-order-like sequence where every ancestor sorts before its
/// descendants. Consumers of joint arrays require parent < child.
pub fn sort_tree_order(parents: &[Option<usize>], nodes: &mut [usize]) {
    nodes.sort_by(|&a, &b| node_path(parents, a).cmp(&node_path(parents, b)));
}

/// Marks `node` and every descendant in `affected`.
pub fn mark_affected_nodes(nodes: &[json::Node], node: usize, affected: &mut [bool]) {
    if affected[node] {
        return;
    }
    affected[node] = true;
    for child in &nodes[node].children {
        mark_affected_nodes(nodes, child.value(), affected);
    }
}

/// Extracts the local transform of a node as an SRT triple.
///
/// Matrix-form nodes are factored; TRS-form nodes read their fields with
/// glTF defaults for the absent ones.
pub fn node_srt(node: &json::Node) -> Srt {
    if let Some(matrix) = node.matrix.as_ref() {
        let mat = Mat4::from_cols_array(matrix);
        return Srt::from_mat4(&mat);
    }
    Srt {
        scale: node
            .scale
            .map(Vec3::from_array)
            .unwrap_or(Vec3::ONE),
        rotation: node
            .rotation
            .map(|q| Quat::from_xyzw(q.0[0], q.0[1], q.0[2], q.0[3]).normalize())
            .unwrap_or(Quat::IDENTITY),
        translation: node
            .translation
            .map(Vec3::from_array)
            .unwrap_or(Vec3::ZERO),
    }
}

/// The local transform of a node as a matrix.
pub fn node_local_matrix(node: &json::Node) -> Mat4 {
    if let Some(matrix) = node.matrix.as_ref() {
        Mat4::from_cols_array(matrix)
    } else {
        node_srt(node).to_mat4()
    }
}

fn node_removed(node: &json::Node, remove_prefixes: &[String]) -> bool {
    match node.name.as_deref() {
        Some(name) => remove_prefixes.iter().any(|prefix| name.starts_with(prefix)),
        None => false,
    }
}

/// Chooses the scene to export and returns its root node indices.
///
/// Order of preference: the explicitly selected scene, the asset's default
/// scene, scene 0, then every parentless node when the asset has no scenes
/// at all. Nodes whose names match a removal prefix are dropped along with
/// their subtrees.
pub fn scene_root_nodes(
    root: &json::Root,
    scene_index: Option<usize>,
    remove_prefixes: &[String],
) -> Vec<usize> {
    let scene = scene_index
        .filter(|&index| index < root.scenes.len())
        .or_else(|| root.scene.map(|s| s.value()))
        .filter(|&index| index < root.scenes.len())
        .or(if root.scenes.is_empty() { None } else { Some(0) });
    let mut roots: Vec<usize> = match scene {
        Some(scene) => root.scenes[scene].nodes.iter().map(|n| n.value()).collect(),
        None => {
            let parents = node_parents(&root.nodes);
            (0..root.nodes.len())
                .filter(|&n| parents[n].is_none())
                .collect()
        }
    };
    roots.retain(|&n| !node_removed(&root.nodes[n], remove_prefixes));
    roots
}

/// Flattens the subtrees of `roots` into one list, pruning removed names.
pub fn nodes_under_roots(
    nodes: &[json::Node],
    roots: &[usize],
    remove_prefixes: &[String],
) -> Vec<usize> {
    let mut out = Vec::new();
    let mut stack: Vec<usize> = roots.to_vec();
    let mut seen = vec![false; nodes.len()];
    while let Some(index) = stack.pop() {
        if seen[index] || node_removed(&nodes[index], remove_prefixes) {
            continue;
        }
        seen[index] = true;
        out.push(index);
        for child in &nodes[index].children {
            stack.push(child.value());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forest() -> Vec<json::Node> {
        // 0 ── 1 ── 2
        //      └── 3
        // 4 (second root)
        let json_text = r#"{
            "asset": {"version": "2.0"},
            "nodes": [
                {"children": [1]},
                {"children": [2, 3]},
                {},
                {},
                {}
            ]
        }"#;
        json::Root::from_str(json_text).unwrap().nodes
    }

    #[test]
    fn parents_and_depths() {
        let nodes = forest();
        let parents = node_parents(&nodes);
        assert_eq!(parents, vec![None, Some(0), Some(1), Some(1), None]);
        assert_eq!(depth(&parents, 0), 1);
        assert_eq!(depth(&parents, 2), 3);
    }

    #[test]
    fn lowest_common_ancestor() {
        let nodes = forest();
        let parents = node_parents(&nodes);
        assert_eq!(common_ancestor(&parents, 2, 3), Some(1));
        assert_eq!(common_ancestor(&parents, 2, 1), Some(1));
        assert_eq!(common_ancestor(&parents, 2, 4), None);
    }

    #[test]
    fn ancestry_queries() {
        let nodes = forest();
        let parents = node_parents(&nodes);
        assert!(is_equal_or_under(&parents, 0, 2));
        assert!(is_equal_or_under(&parents, 2, 2));
        assert!(!is_equal_or_under(&parents, 2, 0));
        assert!(!is_equal_or_under(&parents, 0, 4));
    }

    #[test]
    fn tree_order_puts_ancestors_first() {
        let nodes = forest();
        let parents = node_parents(&nodes);
        let mut order = vec![3, 2, 0, 1];
        sort_tree_order(&parents, &mut order);
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[test]
    fn srt_defaults() {
        let nodes = forest();
        let srt = node_srt(&nodes[0]);
        assert_eq!(srt.scale, Vec3::ONE);
        assert_eq!(srt.translation, Vec3::ZERO);
    }

    #[test]
    fn subtree_marking() {
        let nodes = forest();
        let mut affected = vec![false; nodes.len()];
        mark_affected_nodes(&nodes, 1, &mut affected);
        assert_eq!(affected, vec![false, true, true, true, false]);
    }
}
