//! Post-load semantic validation.
//!
//! The schema layer already guarantees shape and in-range cross references;
//! this pass re-walks the tree for the semantic rules that span objects:
//! accessor extents, attribute pairing, primitive mode compatibility, skin
//! and animation consistency, graph acyclicity, and resource existence.
//! All issues are gathered into one report; only the caller decides whether
//! the error count aborts the job.

use std::collections::HashSet;

use crate::import::Source;
use crate::json;
use crate::json::accessor::{ComponentType, Type};
use crate::json::mesh::{Mode, Semantic};
use crate::json::validation::Checked;
use crate::json::Path;
use crate::message::{Logger, Message, Severity};

fn valid<T: Copy>(checked: &Checked<T>) -> Option<T> {
    match checked {
        Checked::Valid(value) => Some(*value),
        Checked::Invalid => None,
    }
}

/// Validates the whole asset, logging every issue found.
///
/// Returns the number of error-severity issues contributed.
pub fn validate_all(root: &json::Root, source: &dyn Source, logger: &dyn Logger) -> usize {
    let errors_before = logger.error_count();

    // Referential and shape errors from the schema walk.
    for (path, error) in root.validate_tree() {
        logger.add(
            Message::new("JSON_INVALID", Severity::Error, error.to_string()).at(path.to_string()),
        );
    }

    check_accessors(root, logger);
    check_meshes(root, logger);
    check_skins(root, logger);
    check_animations(root, logger);
    check_node_graph(root, logger);
    check_resources(root, source, logger);

    logger.error_count() - errors_before
}

fn accessor_byte_extent(root: &json::Root, accessor: &json::Accessor) -> Option<(usize, usize)> {
    let view = root.buffer_views.get(accessor.buffer_view?.value())?;
    let component_type = valid(&accessor.component_type)?.0;
    let type_ = valid(&accessor.type_)?;
    let elem_size = component_type.size() * type_.multiplicity();
    let stride = view.byte_stride.map(|s| s.0).filter(|&s| s != 0).unwrap_or(elem_size);
    let count = accessor.count.value();
    let offset = accessor.byte_offset.map(|o| o.value()).unwrap_or(0);
    let needed = if count == 0 {
        0
    } else {
        offset + stride * (count - 1) + elem_size
    };
    Some((needed, elem_size))
}

// (b) component size x count x stride fits the view; a view that
// under-declares but whose buffer still covers the read is recoverable.
fn check_accessors(root: &json::Root, logger: &dyn Logger) {
    for (index, accessor) in root.accessors.iter().enumerate() {
        let path = || Path::new().field("accessors").index(index);
        let Some(view_index) = accessor.buffer_view.map(|v| v.value()) else {
            continue;
        };
        let Some(view) = root.buffer_views.get(view_index) else {
            continue; // already reported by the schema walk
        };
        let Some((needed, _)) = accessor_byte_extent(root, accessor) else {
            continue;
        };
        let view_length = view.byte_length.value();
        if needed > view_length {
            let buffer_length = root
                .buffers
                .get(view.buffer.value())
                .map(|b| b.byte_length.value())
                .unwrap_or(0);
            let view_offset = view.byte_offset.map(|o| o.value()).unwrap_or(0);
            if view_offset + needed <= buffer_length {
                logger.add(
                    Message::new(
                        "ACCESSOR_EXCEEDS_VIEW",
                        Severity::Warning,
                        format!(
                            "accessor needs {} bytes but view {} declares {}; backing buffer still covers the read",
                            needed, view_index, view_length
                        ),
                    )
                    .at(path().to_string()),
                );
            } else {
                logger.add(
                    Message::new(
                        "ACCESSOR_TOO_LONG",
                        Severity::Error,
                        format!(
                            "accessor needs {} bytes but view {} declares {}",
                            needed, view_index, view_length
                        ),
                    )
                    .at(path().to_string()),
                );
            }
        }
    }

    // Views themselves must sit inside their buffers.
    for (index, view) in root.buffer_views.iter().enumerate() {
        let Some(buffer) = root.buffers.get(view.buffer.value()) else {
            continue;
        };
        let offset = view.byte_offset.map(|o| o.value()).unwrap_or(0);
        if offset + view.byte_length.value() > buffer.byte_length.value() {
            logger.add(
                Message::new(
                    "VIEW_TOO_LONG",
                    Severity::Error,
                    format!(
                        "view extent {}..{} exceeds buffer length {}",
                        offset,
                        offset + view.byte_length.value(),
                        buffer.byte_length.value()
                    ),
                )
                .at(Path::new().field("bufferViews").index(index).to_string()),
            );
        }
    }
}

fn accessor_count(root: &json::Root, index: json::Index<json::Accessor>) -> Option<usize> {
    root.accessors.get(index.value()).map(|a| a.count.value())
}

// (c)-(g): per-primitive attribute and mode rules.
fn check_meshes(root: &json::Root, logger: &dyn Logger) {
    for (mesh_index, mesh) in root.meshes.iter().enumerate() {
        for (prim_index, prim) in mesh.primitives.iter().enumerate() {
            let path = || {
                Path::new()
                    .field("meshes")
                    .index(mesh_index)
                    .field("primitives")
                    .index(prim_index)
            };

            let draco = prim.extensions.as_ref().and_then(|e| e.draco.as_ref());

            // (c) every attribute count equals the POSITION count.
            let position_count = prim
                .attributes
                .get(&Checked::Valid(Semantic::Positions))
                .and_then(|&index| accessor_count(root, index));
            if let Some(position_count) = position_count {
                for (semantic, &attr_index) in &prim.attributes {
                    let Some(count) = accessor_count(root, attr_index) else {
                        continue;
                    };
                    if count == position_count {
                        continue;
                    }
                    // Length-zero accessors are demoted to support malformed
                    // but recoverable assets; the primitive is dropped later.
                    let severity = if count == 0 {
                        Severity::Warning
                    } else {
                        Severity::Error
                    };
                    logger.add(
                        Message::new(
                            "ATTRIBUTE_COUNT_MISMATCH",
                            severity,
                            format!(
                                "attribute {} has {} elements but POSITION has {}",
                                semantic, count, position_count
                            ),
                        )
                        .at(path().field("attributes").to_string()),
                    );
                }
            }

            // (d) JOINTS_n and WEIGHTS_n pair up, across the inline and
            // Draco attribute sets together.
            let mut joint_sets: HashSet<u32> = HashSet::new();
            let mut weight_sets: HashSet<u32> = HashSet::new();
            for semantic in prim.attributes.keys() {
                match valid_semantic(semantic) {
                    Some(Semantic::Joints(set)) => {
                        joint_sets.insert(set);
                    }
                    Some(Semantic::Weights(set)) => {
                        weight_sets.insert(set);
                    }
                    _ => {}
                }
            }
            if let Some(draco) = draco {
                for semantic in draco.attributes.keys() {
                    match valid_semantic(semantic) {
                        Some(Semantic::Joints(set)) => {
                            joint_sets.insert(set);
                        }
                        Some(Semantic::Weights(set)) => {
                            weight_sets.insert(set);
                        }
                        _ => {}
                    }
                }
            }
            for set in joint_sets.symmetric_difference(&weight_sets) {
                logger.add(
                    Message::new(
                        "JOINT_WEIGHT_UNPAIRED",
                        Severity::Error,
                        format!("JOINTS_{set} and WEIGHTS_{set} must both be present"),
                    )
                    .at(path().field("attributes").to_string()),
                );
            }

            // (e) joint indices use an unsigned integer component type.
            for (semantic, &attr_index) in &prim.attributes {
                if !matches!(valid_semantic(semantic), Some(Semantic::Joints(_))) {
                    continue;
                }
                let Some(accessor) = root.accessors.get(attr_index.value()) else {
                    continue;
                };
                let component = valid(&accessor.component_type).map(|c| c.0);
                if !matches!(component, Some(c) if c.is_unsigned_integer()) {
                    logger.add(
                        Message::new(
                            "JOINTS_NOT_UNSIGNED",
                            Severity::Error,
                            format!("{} must use an unsigned integer component type", semantic),
                        )
                        .at(path().field("attributes").to_string()),
                    );
                }
            }

            // (f) index count compatible with the primitive mode.
            let index_count = prim
                .indices
                .and_then(|index| accessor_count(root, index))
                .or(position_count);
            if let (Some(mode), Some(count)) = (valid(&prim.mode), index_count) {
                let compatible = match mode {
                    Mode::Points => count >= 1,
                    Mode::Lines => count >= 2 && count % 2 == 0,
                    Mode::LineLoop | Mode::LineStrip => count >= 2,
                    Mode::Triangles => count >= 3 && count % 3 == 0,
                    Mode::TriangleStrip | Mode::TriangleFan => count >= 3,
                };
                // A count of zero is the recoverable empty-primitive case.
                if !compatible && count != 0 {
                    logger.add(
                        Message::new(
                            "INDEX_COUNT_INCOMPATIBLE",
                            Severity::Error,
                            format!("index count {} is incompatible with the primitive mode", count),
                        )
                        .at(path().to_string()),
                    );
                }
            }

            // (g) morph target count matches the mesh weights array.
            if let (Some(weights), Some(targets)) = (mesh.weights.as_ref(), prim.targets.as_ref())
            {
                if weights.len() != targets.len() {
                    logger.add(
                        Message::new(
                            "MORPH_WEIGHT_COUNT",
                            Severity::Error,
                            format!(
                                "{} morph targets but {} mesh weights",
                                targets.len(),
                                weights.len()
                            ),
                        )
                        .at(path().field("targets").to_string()),
                    );
                }
            }
        }
    }
}

fn valid_semantic(checked: &Checked<Semantic>) -> Option<Semantic> {
    match checked {
        Checked::Valid(semantic) => Some(semantic.clone()),
        Checked::Invalid => None,
    }
}

// (h) inverse-bind matrices are float Mat4, one per joint.
fn check_skins(root: &json::Root, logger: &dyn Logger) {
    for (index, skin) in root.skins.iter().enumerate() {
        let path = || Path::new().field("skins").index(index);
        let Some(ibm_index) = skin.inverse_bind_matrices else {
            continue;
        };
        let Some(accessor) = root.accessors.get(ibm_index.value()) else {
            continue;
        };
        let is_float_mat4 = valid(&accessor.component_type).map(|c| c.0) == Some(ComponentType::F32)
            && valid(&accessor.type_) == Some(Type::Mat4);
        if !is_float_mat4 {
            logger.add(
                Message::new(
                    "IBM_NOT_FLOAT_MAT4",
                    Severity::Error,
                    "inverseBindMatrices must be a float MAT4 accessor",
                )
                .at(path().field("inverseBindMatrices").to_string()),
            );
        }
        if accessor.count.value() != skin.joints.len() {
            logger.add(
                Message::new(
                    "IBM_COUNT_MISMATCH",
                    Severity::Error,
                    format!(
                        "{} inverse-bind matrices for {} joints",
                        accessor.count.value(),
                        skin.joints.len()
                    ),
                )
                .at(path().field("inverseBindMatrices").to_string()),
            );
        }
    }
}

// (i), (j): channel target uniqueness and weights-channel requirements,
// plus sampler input/output consistency.
fn check_animations(root: &json::Root, logger: &dyn Logger) {
    use json::animation::{Interpolation, Property};
    for (anim_index, animation) in root.animations.iter().enumerate() {
        let path = || Path::new().field("animations").index(anim_index);

        let mut targets: HashSet<(Option<usize>, u8)> = HashSet::new();
        for (channel_index, channel) in animation.channels.iter().enumerate() {
            let channel_path =
                || path().field("channels").index(channel_index);
            let Some(property) = valid(&channel.target.path) else {
                continue;
            };
            let node = channel.target.node.map(|n| n.value());
            if !targets.insert((node, property as u8)) {
                logger.add(
                    Message::new(
                        "CHANNEL_TARGET_DUPLICATE",
                        Severity::Error,
                        "duplicate (node, path) target within one animation",
                    )
                    .at(channel_path().field("target").to_string()),
                );
            }

            let Some(sampler) = animation.samplers.get(channel.sampler.value()) else {
                continue;
            };
            let Some(output) = root.accessors.get(sampler.output.value()) else {
                continue;
            };
            let Some(input) = root.accessors.get(sampler.input.value()) else {
                continue;
            };

            // Input is scalar float time.
            let input_ok = valid(&input.component_type).map(|c| c.0) == Some(ComponentType::F32)
                && valid(&input.type_) == Some(Type::Scalar);
            if !input_ok {
                logger.add(
                    Message::new(
                        "SAMPLER_INPUT_TYPE",
                        Severity::Error,
                        "sampler input must be scalar float times",
                    )
                    .at(channel_path().to_string()),
                );
                continue;
            }

            // Output count matches input count, tripled for cubic splines
            // and multiplied by the morph weight count for weight channels.
            let cubic_factor = match valid(&sampler.interpolation) {
                Some(Interpolation::CubicSpline) => 3,
                _ => 1,
            };
            let weight_factor = if property == Property::MorphTargetWeights {
                let target_count = node
                    .and_then(|n| root.nodes.get(n))
                    .and_then(|n| n.mesh)
                    .and_then(|m| root.meshes.get(m.value()))
                    .and_then(|m| m.primitives.first())
                    .and_then(|p| p.targets.as_ref())
                    .map(|t| t.len())
                    .unwrap_or(0);
                if target_count == 0 {
                    logger.add(
                        Message::new(
                            "WEIGHTS_WITHOUT_TARGETS",
                            Severity::Error,
                            "weights channel targets a node without morph targets",
                        )
                        .at(channel_path().field("target").to_string()),
                    );
                    continue;
                }
                let output_float_scalar =
                    valid(&output.component_type).map(|c| c.0) == Some(ComponentType::F32)
                        && valid(&output.type_) == Some(Type::Scalar);
                if !output_float_scalar {
                    logger.add(
                        Message::new(
                            "WEIGHTS_OUTPUT_TYPE",
                            Severity::Error,
                            "weights channel output must be float scalars",
                        )
                        .at(channel_path().to_string()),
                    );
                    continue;
                }
                target_count
            } else {
                1
            };
            let expected = input.count.value() * cubic_factor * weight_factor;
            if output.count.value() != expected {
                logger.add(
                    Message::new(
                        "SAMPLER_COUNT_MISMATCH",
                        Severity::Error,
                        format!(
                            "sampler output has {} elements, expected {}",
                            output.count.value(),
                            expected
                        ),
                    )
                    .at(channel_path().to_string()),
                );
            }
        }
    }
}

// (k) the node graph is acyclic. The visited mark records the last
// visiting root, so reuse across roots stays O(N) overall.
fn check_node_graph(root: &json::Root, logger: &dyn Logger) {
    const UNVISITED: usize = usize::MAX;
    let node_count = root.nodes.len();
    let mut last_root = vec![UNVISITED; node_count];
    let mut on_path = vec![false; node_count];
    for start in 0..node_count {
        if last_root[start] != UNVISITED {
            continue;
        }
        last_root[start] = start;
        // (node, child cursor) frames of the current DFS path.
        let mut path_stack: Vec<(usize, usize)> = vec![(start, 0)];
        on_path[start] = true;
        while let Some(&(node, cursor)) = path_stack.last() {
            let children = &root.nodes[node].children;
            if cursor >= children.len() {
                on_path[node] = false;
                path_stack.pop();
                continue;
            }
            path_stack.last_mut().unwrap().1 += 1;
            let child = children[cursor].value();
            if child >= node_count {
                continue; // out-of-range already reported
            }
            if on_path[child] {
                logger.add(
                    Message::new(
                        "NODE_CYCLE",
                        Severity::Error,
                        format!("node {} participates in a hierarchy cycle", child),
                    )
                    .at(Path::new().field("nodes").index(child).to_string()),
                );
                continue;
            }
            if last_root[child] == start {
                continue; // already visited from this root
            }
            last_root[child] = start;
            on_path[child] = true;
            path_stack.push((child, 0));
        }
    }
}

// Every buffer and image must actually exist (file present, or embedded
// bytes non-empty).
fn check_resources(root: &json::Root, source: &dyn Source, logger: &dyn Logger) {
    for index in 0..root.buffers.len() {
        if !source.buffer_exists(root, index) {
            logger.add(
                Message::new(
                    "BUFFER_MISSING",
                    Severity::Error,
                    format!("buffer {} data is missing", index),
                )
                .at(Path::new().field("buffers").index(index).to_string()),
            );
        }
    }
    for index in 0..root.images.len() {
        if !source.image_exists(root, index) {
            logger.add(
                Message::new(
                    "IMAGE_MISSING",
                    Severity::Error,
                    format!("image {} data is missing", index),
                )
                .at(Path::new().field("images").index(index).to_string()),
            );
        }
    }
}

/// Cross-checks `extensionsUsed` declarations against actual references,
/// and reports unrecognized extension keys.
///
/// * An extension referenced anywhere but missing from `extensionsUsed`
///   warns.
/// * A declared but unreferenced extension warns.
/// * Unknown keys under any `extensions` object warn unless a configured
///   prefix suppresses them.
pub fn check_extension_usage(root: &json::Root, ignored_prefixes: &[String], logger: &dyn Logger) {
    use json::extensions::material::{
        KHR_MATERIALS_PBR_SPECULAR_GLOSSINESS, KHR_MATERIALS_UNLIT,
    };
    use json::extensions::mesh::KHR_DRACO_MESH_COMPRESSION;
    use json::extensions::texture::KHR_TEXTURE_TRANSFORM;

    let mut referenced: HashSet<&'static str> = HashSet::new();
    let mut unknown: Vec<(String, String)> = Vec::new(); // (key, path)

    fn texture_info(
        info: &json::texture::Info,
        path: Path,
        referenced: &mut HashSet<&'static str>,
        unknown: &mut Vec<(String, String)>,
    ) {
        if let Some(ext) = info.extensions.as_ref() {
            if ext.texture_transform.is_some() {
                referenced.insert(json::extensions::texture::KHR_TEXTURE_TRANSFORM);
            }
            for key in ext.others.keys() {
                unknown.push((key.clone(), path.field("extensions").to_string()));
            }
        }
    }

    for (index, material) in root.materials.iter().enumerate() {
        let path = Path::new().field("materials").index(index);
        if let Some(ext) = material.extensions.as_ref() {
            if ext.unlit.is_some() {
                referenced.insert(KHR_MATERIALS_UNLIT);
            }
            if ext.pbr_specular_glossiness.is_some() {
                referenced.insert(KHR_MATERIALS_PBR_SPECULAR_GLOSSINESS);
            }
            for key in ext.others.keys() {
                unknown.push((key.clone(), path.field("extensions").to_string()));
            }
            if let Some(sg) = ext.pbr_specular_glossiness.as_ref() {
                if let Some(info) = sg.diffuse_texture.as_ref() {
                    texture_info(info, path.field("diffuseTexture"), &mut referenced, &mut unknown);
                }
                if let Some(info) = sg.specular_glossiness_texture.as_ref() {
                    texture_info(
                        info,
                        path.field("specularGlossinessTexture"),
                        &mut referenced,
                        &mut unknown,
                    );
                }
            }
        }
        let pbr = &material.pbr_metallic_roughness;
        if let Some(info) = pbr.base_color_texture.as_ref() {
            texture_info(info, path.field("baseColorTexture"), &mut referenced, &mut unknown);
        }
        if let Some(info) = pbr.metallic_roughness_texture.as_ref() {
            texture_info(
                info,
                path.field("metallicRoughnessTexture"),
                &mut referenced,
                &mut unknown,
            );
        }
        if let Some(info) = material.emissive_texture.as_ref() {
            texture_info(info, path.field("emissiveTexture"), &mut referenced, &mut unknown);
        }
        if let Some(normal) = material.normal_texture.as_ref() {
            if let Some(ext) = normal.extensions.as_ref() {
                if ext.texture_transform.is_some() {
                    referenced.insert(KHR_TEXTURE_TRANSFORM);
                }
            }
        }
        if let Some(occlusion) = material.occlusion_texture.as_ref() {
            if let Some(ext) = occlusion.extensions.as_ref() {
                if ext.texture_transform.is_some() {
                    referenced.insert(KHR_TEXTURE_TRANSFORM);
                }
            }
        }
    }

    for (mesh_index, mesh) in root.meshes.iter().enumerate() {
        for (prim_index, prim) in mesh.primitives.iter().enumerate() {
            if let Some(ext) = prim.extensions.as_ref() {
                let path = Path::new()
                    .field("meshes")
                    .index(mesh_index)
                    .field("primitives")
                    .index(prim_index)
                    .field("extensions");
                if ext.draco.is_some() {
                    referenced.insert(KHR_DRACO_MESH_COMPRESSION);
                }
                for key in ext.others.keys() {
                    unknown.push((key.clone(), path.to_string()));
                }
            }
        }
    }

    let declared: HashSet<&str> = root.extensions_used.iter().map(String::as_str).collect();
    for name in &referenced {
        if !declared.contains(name) {
            logger.add(Message::new(
                "EXTENSION_UNDECLARED",
                Severity::Warning,
                format!("extension {} is referenced but not listed in extensionsUsed", name),
            ));
        }
    }
    for name in &declared {
        let known_and_used = referenced.iter().any(|r| r == name);
        let recognized = json::extensions::SUPPORTED_EXTENSIONS.contains(name);
        if recognized && !known_and_used {
            logger.add(Message::new(
                "EXTENSION_UNREFERENCED",
                Severity::Warning,
                format!("extension {} is listed in extensionsUsed but never referenced", name),
            ));
        }
    }
    for (key, path) in unknown {
        if ignored_prefixes.iter().any(|prefix| key.starts_with(prefix)) {
            continue;
        }
        logger.add(
            Message::new(
                "EXTENSION_UNKNOWN",
                Severity::Warning,
                format!("unrecognized extension {}", key),
            )
            .at(path),
        );
    }
}

/// Reports the children of every `extras` object as informationals.
pub fn report_extras(root: &json::Root, logger: &dyn Logger) {
    let report = |extras: &json::Extras, path: Path| {
        let Some(raw) = extras.as_ref() else {
            return;
        };
        let Ok(value) = serde_json::from_str::<serde_json::Value>(raw.get()) else {
            return;
        };
        match value {
            serde_json::Value::Object(map) => {
                for key in map.keys() {
                    logger.add(
                        Message::new(
                            "EXTRAS",
                            Severity::Info,
                            format!("application-specific data: {}", key),
                        )
                        .at(path.field("extras").to_string()),
                    );
                }
            }
            _ => logger.add(
                Message::new("EXTRAS", Severity::Info, "application-specific data")
                    .at(path.field("extras").to_string()),
            ),
        }
    };

    report(&root.extras, Path::new());
    report(&root.asset.extras, Path::new().field("asset"));
    for (index, node) in root.nodes.iter().enumerate() {
        report(&node.extras, Path::new().field("nodes").index(index));
    }
    for (index, mesh) in root.meshes.iter().enumerate() {
        let path = Path::new().field("meshes").index(index);
        report(&mesh.extras, path.clone());
        for (prim_index, prim) in mesh.primitives.iter().enumerate() {
            report(&prim.extras, path.field("primitives").index(prim_index));
        }
    }
    for (index, material) in root.materials.iter().enumerate() {
        report(&material.extras, Path::new().field("materials").index(index));
    }
    for (index, skin) in root.skins.iter().enumerate() {
        report(&skin.extras, Path::new().field("skins").index(index));
    }
    for (index, animation) in root.animations.iter().enumerate() {
        report(&animation.extras, Path::new().field("animations").index(index));
    }
    for (index, scene) in root.scenes.iter().enumerate() {
        report(&scene.extras, Path::new().field("scenes").index(index));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::VecLogger;

    struct NullSource;

    impl Source for NullSource {
        fn read_gltf(&self) -> Result<Vec<u8>, crate::Error> {
            Ok(Vec::new())
        }
        fn read_buffer(
            &self,
            _root: &json::Root,
            _index: usize,
            _start: usize,
            _limit: usize,
        ) -> Result<Vec<u8>, crate::Error> {
            Err(crate::Error::MissingData)
        }
        fn read_image(
            &self,
            _root: &json::Root,
            _index: usize,
        ) -> Result<(Vec<u8>, crate::import::MimeType), crate::Error> {
            Err(crate::Error::MissingData)
        }
        fn image_attributes(
            &self,
            _root: &json::Root,
            _index: usize,
        ) -> crate::import::ImageAttributes {
            Default::default()
        }
        fn buffer_exists(&self, _root: &json::Root, _index: usize) -> bool {
            true
        }
        fn image_exists(&self, _root: &json::Root, _index: usize) -> bool {
            true
        }
        fn is_source_path(&self, _path: &std::path::Path) -> bool {
            false
        }
        fn write_binary(
            &self,
            _dst_path: &std::path::Path,
            _data: &[u8],
        ) -> Result<(), crate::Error> {
            Ok(())
        }
    }

    #[test]
    fn detects_node_cycle() {
        let root = json::Root::from_str(
            r#"{
                "asset": {"version": "2.0"},
                "nodes": [
                    {"children": [1]},
                    {"children": [0]}
                ]
            }"#,
        )
        .unwrap();
        let logger = VecLogger::new();
        validate_all(&root, &NullSource, &logger);
        assert!(logger.has_id("NODE_CYCLE"));
    }

    #[test]
    fn accepts_shared_subtrees_across_roots() {
        // Diamond: two scene roots share one child. Legal, not a cycle.
        let root = json::Root::from_str(
            r#"{
                "asset": {"version": "2.0"},
                "nodes": [
                    {"children": [2]},
                    {"children": [2]},
                    {}
                ]
            }"#,
        )
        .unwrap();
        let logger = VecLogger::new();
        validate_all(&root, &NullSource, &logger);
        assert!(!logger.has_id("NODE_CYCLE"));
    }

    #[test]
    fn detects_duplicate_channel_targets() {
        let root = json::Root::from_str(
            r#"{
                "asset": {"version": "2.0"},
                "nodes": [{}],
                "buffers": [{"byteLength": 40}],
                "bufferViews": [{"buffer": 0, "byteLength": 40}],
                "accessors": [
                    {"bufferView": 0, "componentType": 5126, "count": 2, "type": "SCALAR"},
                    {"bufferView": 0, "byteOffset": 8, "componentType": 5126, "count": 2, "type": "VEC3"}
                ],
                "animations": [{
                    "channels": [
                        {"sampler": 0, "target": {"node": 0, "path": "translation"}},
                        {"sampler": 0, "target": {"node": 0, "path": "translation"}}
                    ],
                    "samplers": [
                        {"input": 0, "output": 1}
                    ]
                }]
            }"#,
        )
        .unwrap();
        let logger = VecLogger::new();
        validate_all(&root, &NullSource, &logger);
        assert!(logger.has_id("CHANNEL_TARGET_DUPLICATE"));
    }

    #[test]
    fn flags_unpaired_joints() {
        let root = json::Root::from_str(
            r#"{
                "asset": {"version": "2.0"},
                "buffers": [{"byteLength": 1000}],
                "bufferViews": [{"buffer": 0, "byteLength": 1000}],
                "accessors": [
                    {"bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3"},
                    {"bufferView": 0, "componentType": 5121, "count": 3, "type": "VEC4"}
                ],
                "meshes": [{
                    "primitives": [{
                        "attributes": {"POSITION": 0, "JOINTS_0": 1}
                    }]
                }]
            }"#,
        )
        .unwrap();
        let logger = VecLogger::new();
        validate_all(&root, &NullSource, &logger);
        assert!(logger.has_id("JOINT_WEIGHT_UNPAIRED"));
    }

    #[test]
    fn demotes_zero_count_attribute_to_warning() {
        let root = json::Root::from_str(
            r#"{
                "asset": {"version": "2.0"},
                "buffers": [{"byteLength": 1000}],
                "bufferViews": [{"buffer": 0, "byteLength": 1000}],
                "accessors": [
                    {"bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3"},
                    {"bufferView": 0, "componentType": 5126, "count": 0, "type": "VEC3"}
                ],
                "meshes": [{
                    "primitives": [{
                        "attributes": {"POSITION": 0, "NORMAL": 1}
                    }]
                }]
            }"#,
        )
        .unwrap();
        let logger = VecLogger::new();
        validate_all(&root, &NullSource, &logger);
        let messages = logger.messages();
        let msg = messages
            .iter()
            .find(|m| m.id == "ATTRIBUTE_COUNT_MISMATCH")
            .unwrap();
        assert_eq!(msg.severity, Severity::Warning);
    }

    #[test]
    fn view_length_leniency_is_a_warning() {
        // The view declares 8 bytes but the accessor needs 12; the backing
        // buffer is big enough, so this demotes to a warning.
        let root = json::Root::from_str(
            r#"{
                "asset": {"version": "2.0"},
                "buffers": [{"byteLength": 100}],
                "bufferViews": [{"buffer": 0, "byteLength": 8}],
                "accessors": [
                    {"bufferView": 0, "componentType": 5126, "count": 1, "type": "VEC3"}
                ]
            }"#,
        )
        .unwrap();
        let logger = VecLogger::new();
        validate_all(&root, &NullSource, &logger);
        assert!(logger.has_id("ACCESSOR_EXCEEDS_VIEW"));
        assert_eq!(logger.error_count(), 0);
    }
}
