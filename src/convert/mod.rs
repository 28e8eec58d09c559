//! Conversion orchestration.
//!
//! Walks the scene twice. The rigid pass emits nested transforms and
//! static meshes at their original hierarchy positions. The skinned pass
//! re-anchors skinned meshes under their skeleton root (glTF skinned
//! meshes ignore their own node transforms; USD applies them), emitting
//! one skeleton and animation per used skin.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use glam::{DMat4, Mat4, Quat, Vec3};

/// Material and texture emission.
pub mod materializer;
/// Conversion options.
pub mod settings;
/// The USD stage-writing surface.
pub mod stage;

pub use materializer::{ImageCodec, Materializer};
pub use settings::ConvertSettings;
pub use stage::{PrimType, Stage, Value};

use crate::animation::{
    self, anim_info, generate_skin_keys, load_node_animations, prune_animation_keys,
    JointKeyStream, NodeInfo, Pass, QuatMetric, ScaleMetric, SeparateStream, TranslationMetric,
};
use crate::cache::AccessorCache;
use crate::euler::convert_rotation_keys;
use crate::import::Source;
use crate::json;
use crate::json::validation::Checked;
use crate::math;
use crate::mesh::{self, DracoDecoder, MeshInfo, PrimInfo};
use crate::message::{Logger, Message, OnceLogger, Severity};
use crate::scene;
use crate::scheduler::Scheduler;
use crate::skin::{self, SkinData, SkinInfo, SkinSrc, UNUSED_JOINT};
use crate::validate;

const RAD_TO_DEG: f32 = 180.0 / std::f32::consts::PI;

/// Everything a single conversion job needs.
pub struct Converter<'a> {
    root: &'a json::Root,
    settings: &'a ConvertSettings,
    logger: &'a dyn Logger,
    cache: &'a AccessorCache<'a>,
    node_parents: Vec<Option<usize>>,
    scene_nodes: Vec<usize>,
    mesh_infos: Vec<MeshInfo>,
    node_infos: Vec<NodeInfo>,
    anim: animation::AnimInfo,
    skin_infos: Vec<SkinInfo>,
    skin_srcs: Vec<SkinSrc>,
    prim_names: HashMap<String, usize>,
}

/// Converts one asset onto a stage.
///
/// `codec` and `draco` are the external collaborators; both are optional
/// and their absence only degrades the features that need them.
#[allow(clippy::too_many_arguments)]
pub fn convert(
    root: &json::Root,
    source: &dyn Source,
    settings: &ConvertSettings,
    stage: &mut dyn Stage,
    logger: &dyn Logger,
    codec: Option<Arc<dyn ImageCodec>>,
    draco: Option<&dyn DracoDecoder>,
    texture_dir: &Path,
) -> Result<(), crate::Error> {
    let start_time = std::time::Instant::now();

    let errors = validate::validate_all(root, source, logger);
    if errors != 0 {
        return Err(crate::Error::Validation(errors));
    }
    validate::check_extension_usage(root, &settings.ignored_extension_prefixes, logger);
    validate::report_extras(root, logger);

    let cache = AccessorCache::new(root, source);
    let mut converter = Converter::new(root, settings, logger, &cache, draco);

    let mut scheduler = Scheduler::new();
    if settings.job_count != 0 {
        scheduler.start(settings.job_count);
    }

    let root_path = format!("/{}", materializer::sanitize_prim_name(&settings.root_name));
    let mut mats = Materializer::new(root, settings, codec, &root_path);
    mats.plan_image_sizes(&cache);

    converter.emit(stage, &mut mats, &scheduler, &root_path);

    mats.finish(&scheduler, source, texture_dir, logger);
    scheduler.stop();

    if settings.print_timing {
        logger.add(Message::new(
            "TIMING",
            Severity::Info,
            format!("conversion took {:.3}s", start_time.elapsed().as_secs_f64()),
        ));
    }

    if logger.error_count() != 0 {
        return Err(crate::Error::Conversion);
    }
    Ok(())
}

impl<'a> Converter<'a> {
    fn new(
        root: &'a json::Root,
        settings: &'a ConvertSettings,
        logger: &'a dyn Logger,
        cache: &'a AccessorCache<'a>,
        draco: Option<&dyn DracoDecoder>,
    ) -> Self {
        let node_parents = scene::node_parents(&root.nodes);
        let scene_roots =
            scene::scene_root_nodes(root, settings.scene_index, &settings.remove_node_prefixes);
        let scene_nodes =
            scene::nodes_under_roots(&root.nodes, &scene_roots, &settings.remove_node_prefixes);

        // Assemble every mesh referenced by the scene.
        let once = OnceLogger::new(logger);
        let mut mesh_infos = vec![MeshInfo::default(); root.meshes.len()];
        for &node_index in &scene_nodes {
            if let Some(mesh_index) = root.nodes[node_index].mesh.map(|m| m.value()) {
                if mesh_infos[mesh_index].prims.is_empty() && !root.meshes[mesh_index].primitives.is_empty() {
                    mesh_infos[mesh_index] =
                        mesh::mesh_info(root, mesh_index, cache, draco, logger, &once);
                }
            }
        }

        // Per-node animation state: static SRT first, then the selected
        // animation's channels layered on top.
        let mut node_infos: Vec<NodeInfo> = root
            .nodes
            .iter()
            .map(|node| {
                let mut info = NodeInfo::default();
                info.set_static(&scene::node_srt(node));
                info
            })
            .collect();

        let anim_index = settings
            .anim_index
            .filter(|&index| index < root.animations.len())
            .or(if root.animations.is_empty() { None } else { Some(0) });
        let anim = match anim_index {
            Some(index) => {
                load_node_animations(root, index, cache, &mut node_infos, logger, &once);
                anim_info(root, index, cache)
            }
            None => animation::AnimInfo {
                nodes_animated: vec![false; root.nodes.len()],
                ..Default::default()
            },
        };
        once.flush();

        // Skins used by the scene, with animated joints force-included
        // when normals need the workaround.
        let force_nodes_used = if settings.fix_skinned_normals {
            Some(anim.nodes_animated.as_slice())
        } else {
            None
        };
        let (skin_infos, skin_srcs) = skin::used_skin_infos(
            root,
            &mesh_infos,
            &node_parents,
            &scene_nodes,
            force_nodes_used,
            settings.merge_skeletons,
            cache,
        );

        let mut converter = Self {
            root,
            settings,
            logger,
            cache,
            node_parents,
            scene_nodes,
            mesh_infos,
            node_infos,
            anim,
            skin_infos,
            skin_srcs,
            prim_names: HashMap::new(),
        };
        converter.mark_passes();
        converter
    }

    // Decide which pass emits each node, then bubble the flags up so
    // ancestors of used nodes are emitted too.
    fn mark_passes(&mut self) {
        let once = OnceLogger::new(self.logger);
        for &node_index in &self.scene_nodes {
            let node = &self.root.nodes[node_index];
            if node.camera.is_some() {
                once.add(
                    &format!("n{}", node_index),
                    Message::new(
                        "CAMERAS_UNSUPPORTED",
                        Severity::Warning,
                        "cameras are not converted",
                    ),
                );
            }
            match (node.mesh, node.skin) {
                (Some(_), None) => {
                    self.node_infos[node_index].passes_used[Pass::Rigid as usize] = true;
                }
                (Some(_), Some(skin_index)) => {
                    // Skinned meshes re-anchor at their skeleton root.
                    if let Some(used_index) = self.skin_srcs[skin_index.value()].used_skin_index {
                        let info = &self.skin_infos[used_index];
                        if let Some(root_node) = info.root_node {
                            self.node_infos[root_node].passes_used[Pass::Skinned as usize] = true;
                            self.node_infos[root_node].root_skin = Some(used_index);
                            self.node_infos[root_node].skinned_nodes.push(node_index);
                        } else {
                            // Root-less skeleton: anchor directly under the
                            // skinned container.
                            self.node_infos[node_index].passes_used[Pass::Skinned as usize] =
                                true;
                            self.node_infos[node_index].root_skin = Some(used_index);
                            self.node_infos[node_index].skinned_nodes.push(node_index);
                        }
                    }
                }
                _ => {}
            }
        }
        once.flush();
        let roots: Vec<usize> = self
            .scene_nodes
            .iter()
            .copied()
            .filter(|&n| self.node_parents[n].is_none())
            .collect();
        for root_index in roots {
            animation::propagate_passes_used(root_index, &self.root.nodes, &mut self.node_infos);
        }
    }

    fn unique_prim_name(&mut self, parent: &str, base: &str) -> String {
        let base = materializer::sanitize_prim_name(base);
        let key = format!("{}/{}", parent, base);
        let counter = self.prim_names.entry(key).or_insert(0);
        *counter += 1;
        if *counter == 1 {
            base
        } else {
            format!("{}_{}", base, *counter - 1)
        }
    }

    fn node_prim_name(&mut self, parent_path: &str, node_index: usize) -> String {
        let base = match self.root.nodes[node_index].name.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("n{}", node_index),
        };
        self.unique_prim_name(parent_path, &base)
    }

    fn emit(
        &mut self,
        stage: &mut dyn Stage,
        mats: &mut Materializer,
        scheduler: &Scheduler,
        root_path: &str,
    ) {
        stage.define_prim(root_path, PrimType::Xform);
        stage.set_prim_metadata(root_path, "kind", Value::Token("component".into()));
        stage.set_stage_metadata(
            "defaultPrim",
            Value::Token(root_path.trim_start_matches('/').into()),
        );
        stage.set_stage_metadata("metersPerUnit", Value::Double(0.01));
        stage.set_stage_metadata("upAxis", Value::Token("Y".into()));

        let scene_roots: Vec<usize> = self
            .scene_nodes
            .clone()
            .into_iter()
            .filter(|&n| self.node_parents[n].is_none())
            .collect();

        // Rigid pass.
        let any_rigid = scene_roots
            .iter()
            .any(|&n| self.node_infos[n].passes_used[Pass::Rigid as usize]);
        if any_rigid {
            let meshes_path = format!("{}/Meshes", root_path);
            stage.define_prim(&meshes_path, PrimType::Xform);
            self.set_root_scale(stage, &meshes_path);
            for &root_index in &scene_roots {
                self.create_node_hierarchy(
                    root_index,
                    &meshes_path,
                    DMat4::IDENTITY,
                    Pass::Rigid,
                    stage,
                    mats,
                    scheduler,
                );
            }
        }

        // Skinned pass.
        let any_skinned = scene_roots
            .iter()
            .any(|&n| self.node_infos[n].passes_used[Pass::Skinned as usize]);
        if any_skinned {
            let skinned_path = format!("{}/SkinnedMeshes", root_path);
            stage.define_prim(&skinned_path, PrimType::Xform);
            self.set_root_scale(stage, &skinned_path);
            for &root_index in &scene_roots {
                self.create_node_hierarchy(
                    root_index,
                    &skinned_path,
                    DMat4::IDENTITY,
                    Pass::Skinned,
                    stage,
                    mats,
                    scheduler,
                );
            }
        }
    }

    fn set_root_scale(&self, stage: &mut dyn Stage, path: &str) {
        let scale = self.settings.root_scale;
        if scale != 1.0 {
            stage.set_attribute(path, "xformOp:scale", Value::Float3(Vec3::splat(scale)));
            stage.set_attribute(
                path,
                "xformOpOrder",
                Value::TokenArray(vec!["xformOp:scale".into()]),
            );
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn create_node_hierarchy(
        &mut self,
        node_index: usize,
        parent_path: &str,
        parent_world: DMat4,
        pass: Pass,
        stage: &mut dyn Stage,
        mats: &mut Materializer,
        scheduler: &Scheduler,
    ) {
        if !self.node_infos[node_index].passes_used[pass as usize] {
            return;
        }
        let name = self.node_prim_name(parent_path, node_index);
        let path = format!("{}/{}", parent_path, name);
        stage.define_prim(&path, PrimType::Xform);

        let local = scene::node_local_matrix(&self.root.nodes[node_index]).as_dmat4();
        let world = parent_world * local;
        self.author_node_transform(node_index, &path, stage);

        if pass == Pass::Rigid {
            let node = &self.root.nodes[node_index];
            if let (Some(mesh_index), None) = (node.mesh, node.skin) {
                self.create_mesh_prims(
                    mesh_index.value(),
                    None,
                    &path,
                    world,
                    stage,
                    mats,
                    scheduler,
                );
            }
        }

        if pass == Pass::Skinned {
            if let Some(used_skin) = self.node_infos[node_index].root_skin {
                self.create_skinned_prims(node_index, used_skin, &path, world, stage, mats, scheduler);
            }
        }

        let children: Vec<usize> = self.root.nodes[node_index]
            .children
            .iter()
            .map(|c| c.value())
            .collect();
        for child in children {
            self.create_node_hierarchy(child, &path, world, pass, stage, mats, scheduler);
        }
    }

    // Static transforms fold into a single matrix op; animated ones emit
    // separate translate / rotateXYZ / scale ops with reduced keys.
    fn author_node_transform(&mut self, node_index: usize, path: &str, stage: &mut dyn Stage) {
        let animated =
            self.node_infos[node_index].is_animated && self.anim.nodes_animated[node_index];
        if !animated {
            let local = scene::node_local_matrix(&self.root.nodes[node_index]);
            if local != Mat4::IDENTITY {
                stage.set_attribute(
                    path,
                    "xformOp:transform",
                    Value::Matrix4d(local.as_dmat4()),
                );
                stage.set_attribute(
                    path,
                    "xformOpOrder",
                    Value::TokenArray(vec!["xformOp:transform".into()]),
                );
            }
            return;
        }

        let info = &self.node_infos[node_index];
        let mut op_order = Vec::new();

        // Translation.
        {
            let mut stream = SeparateStream::<Vec3, TranslationMetric>::new(
                &info.translation_times,
                &info.translation_points,
            );
            prune_animation_keys(info.translation_times.len(), &mut stream);
            op_order.push("xformOp:translate".to_string());
            if stream.is_pruned_constant() {
                let value = stream
                    .points
                    .first()
                    .copied()
                    .unwrap_or(info.translation_points[0]);
                stage.set_attribute(path, "xformOp:translate", Value::Float3(value));
            } else {
                let samples: Vec<(f32, Value)> = stream
                    .times
                    .iter()
                    .zip(&stream.points)
                    .map(|(&t, &p)| (t, Value::Float3(p)))
                    .collect();
                stage.set_attribute_time_samples(path, "xformOp:translate", &samples);
            }
        }

        // Rotation: pruned in quaternion space, then resampled to Euler.
        {
            let mut stream = SeparateStream::<Quat, QuatMetric>::new(
                &info.rotation_times,
                &info.rotation_points,
            );
            prune_animation_keys(info.rotation_times.len(), &mut stream);
            op_order.push("xformOp:rotateXYZ".to_string());
            if stream.is_pruned_constant() {
                let value = stream
                    .points
                    .first()
                    .copied()
                    .unwrap_or(info.rotation_points[0]);
                let (_, eulers) = convert_rotation_keys(&[0.0], &[value]);
                stage.set_attribute(
                    path,
                    "xformOp:rotateXYZ",
                    Value::Float3(eulers[0] * RAD_TO_DEG),
                );
            } else {
                let (times, eulers) = convert_rotation_keys(&stream.times, &stream.points);
                let samples: Vec<(f32, Value)> = times
                    .iter()
                    .zip(&eulers)
                    .map(|(&t, &e)| (t, Value::Float3(e * RAD_TO_DEG)))
                    .collect();
                stage.set_attribute_time_samples(path, "xformOp:rotateXYZ", &samples);
            }
        }

        // Scale.
        {
            let mut stream =
                SeparateStream::<Vec3, ScaleMetric>::new(&info.scale_times, &info.scale_points);
            prune_animation_keys(info.scale_times.len(), &mut stream);
            op_order.push("xformOp:scale".to_string());
            if stream.is_pruned_constant() {
                let value = stream
                    .points
                    .first()
                    .copied()
                    .unwrap_or(info.scale_points[0]);
                stage.set_attribute(path, "xformOp:scale", Value::Float3(value));
            } else {
                let samples: Vec<(f32, Value)> = stream
                    .times
                    .iter()
                    .zip(&stream.points)
                    .map(|(&t, &p)| (t, Value::Float3(p)))
                    .collect();
                stage.set_attribute_time_samples(path, "xformOp:scale", &samples);
            }
        }

        stage.set_attribute(
            path,
            "xformOpOrder",
            Value::TokenArray(op_order),
        );
    }

    // Mesh prims for every surviving primitive of a mesh.
    #[allow(clippy::too_many_arguments)]
    fn create_mesh_prims(
        &mut self,
        mesh_index: usize,
        skin_binding: Option<(&SkinData, &str)>,
        parent_path: &str,
        world: DMat4,
        stage: &mut dyn Stage,
        mats: &mut Materializer,
        scheduler: &Scheduler,
    ) {
        let prim_count = self.mesh_infos[mesh_index].prims.len();
        for prim_index in 0..prim_count {
            if self.mesh_infos[mesh_index].prims[prim_index].pos.is_empty() {
                continue;
            }
            let material_index = self.mesh_infos[mesh_index].prims[prim_index].material;
            if self.settings.remove_invisible && self.material_is_invisible(material_index) {
                self.logger.add(Message::new(
                    "INVISIBLE_REMOVED",
                    Severity::Info,
                    format!("mesh {} primitive {} is invisible and was removed", mesh_index, prim_index),
                ));
                continue;
            }

            let mesh_name = match self.root.meshes[mesh_index].name.as_deref() {
                Some(name) if !name.is_empty() => name.to_string(),
                _ => format!("Mesh_{}", mesh_index),
            };
            let base = if prim_count == 1 {
                mesh_name
            } else {
                format!("{}_{}", mesh_name, prim_index)
            };
            let name = self.unique_prim_name(parent_path, &base);
            let path = format!("{}/{}", parent_path, name);

            let mut prim = self.mesh_infos[mesh_index].prims[prim_index].clone();
            self.prepare_prim(&mut prim, material_index, world);
            self.author_mesh_prim(&path, &prim, material_index, skin_binding, stage, mats, scheduler);
        }
    }

    fn material_is_invisible(&self, material_index: Option<usize>) -> bool {
        let Some(material) = material_index.and_then(|index| self.root.materials.get(index))
        else {
            return false;
        };
        material.alpha_mode == Checked::Valid(json::material::AlphaMode::Blend)
            && material.pbr_metallic_roughness.base_color_factor.0[3] == 0.0
            && material.pbr_metallic_roughness.base_color_texture.is_none()
    }

    fn prepare_prim(&self, prim: &mut PrimInfo, material_index: Option<usize>, world: DMat4) {
        if self.settings.normalize_normals {
            for norm in &mut prim.norm {
                *norm = norm.try_normalize().unwrap_or(*norm);
            }
        }

        // A texture transform on the primary texture bakes into the UVs.
        if let Some(material) = material_index.and_then(|index| self.root.materials.get(index)) {
            let info = material
                .extensions
                .as_ref()
                .and_then(|e| e.pbr_specular_glossiness.as_ref())
                .and_then(|sg| sg.diffuse_texture.as_ref())
                .or(material.pbr_metallic_roughness.base_color_texture.as_ref());
            if let Some(info) = info {
                if let Some(transform) = info
                    .extensions
                    .as_ref()
                    .and_then(|e| e.texture_transform.as_ref())
                {
                    let set = transform.tex_coord.unwrap_or(info.tex_coord);
                    if let Some(uvs) = prim.uvs.get_mut(&set) {
                        math::transform_uvs(transform, uvs);
                    }
                }
            }
        }

        // Negative-determinant ancestors flip the facing; restore it by
        // rewinding triangles.
        if self.settings.reverse_culling_on_inverse_scale && world.determinant() < 0.0 {
            for tri in prim.tri_vert_indices.chunks_exact_mut(3) {
                tri.swap(1, 2);
            }
        }

        let double_sided = material_index
            .and_then(|index| self.root.materials.get(index))
            .map(|m| m.double_sided)
            .unwrap_or(false);
        if double_sided && self.settings.emulate_double_sided {
            mesh::emulate_double_sided(prim);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn author_mesh_prim(
        &mut self,
        path: &str,
        prim: &PrimInfo,
        material_index: Option<usize>,
        skin_binding: Option<(&SkinData, &str)>,
        stage: &mut dyn Stage,
        mats: &mut Materializer,
        scheduler: &Scheduler,
    ) {
        stage.define_prim(path, PrimType::Mesh);
        stage.set_attribute(path, "subdivisionScheme", Value::Token("none".into()));
        stage.set_attribute(path, "points", Value::Float3Array(prim.pos.clone()));
        stage.set_attribute(
            path,
            "faceVertexCounts",
            Value::IntArray(prim.tri_vert_counts.clone()),
        );
        stage.set_attribute(
            path,
            "faceVertexIndices",
            Value::IntArray(prim.tri_vert_indices.clone()),
        );

        // Extent, for bounds computation by downstream viewers.
        let mut lo = Vec3::splat(f32::MAX);
        let mut hi = Vec3::splat(f32::MIN);
        for &p in &prim.pos {
            lo = lo.min(p);
            hi = hi.max(p);
        }
        stage.set_attribute(path, "extent", Value::Float3Array(vec![lo, hi]));
        if let Some(limit) = self.settings.bounds_limit {
            let size = (hi - lo).max_element() * self.settings.root_scale;
            if size > limit {
                self.logger.add(Message::new(
                    "BOUNDS_EXCEEDED",
                    Severity::Warning,
                    format!("mesh extent {} exceeds the bounds limit {}", size, limit),
                ));
            }
        }

        if !prim.norm.is_empty() {
            stage.set_attribute(path, "normals", Value::Float3Array(prim.norm.clone()));
            stage.set_attribute(path, "normals:interpolation", Value::Token("vertex".into()));
        }

        let double_sided = material_index
            .and_then(|index| self.root.materials.get(index))
            .map(|m| m.double_sided)
            .unwrap_or(false);
        if double_sided && !self.settings.emulate_double_sided {
            stage.set_attribute(path, "doubleSided", Value::Bool(true));
        }

        for (&set, uvs) in &prim.uvs {
            if self.settings.disable_multiple_uvsets && set != 0 {
                continue;
            }
            let name = if set == 0 {
                "primvars:st".to_string()
            } else {
                format!("primvars:st{}", set)
            };
            stage.set_attribute(path, &name, Value::Float2Array(uvs.clone()));
            stage.set_attribute(
                path,
                &format!("{}:interpolation", name),
                Value::Token("vertex".into()),
            );
        }

        match prim.color_stride {
            3 => {
                stage.set_attribute(
                    path,
                    "primvars:displayColor",
                    Value::Float3Array(prim.color3.clone()),
                );
                stage.set_attribute(
                    path,
                    "primvars:displayColor:interpolation",
                    Value::Token("vertex".into()),
                );
            }
            4 => {
                let colors: Vec<Vec3> = prim.color4.iter().map(|c| c.truncate()).collect();
                let opacity: Vec<f32> = prim.color4.iter().map(|c| c.w).collect();
                stage.set_attribute(path, "primvars:displayColor", Value::Float3Array(colors));
                stage.set_attribute(
                    path,
                    "primvars:displayColor:interpolation",
                    Value::Token("vertex".into()),
                );
                stage.set_attribute(path, "primvars:displayOpacity", Value::FloatArray(opacity));
            }
            _ => {}
        }

        if let Some((skin_data, skeleton_path)) = skin_binding {
            self.author_skin_primvars(path, prim, skin_data, skeleton_path, stage);
        }

        let material_path =
            mats.material_path(material_index, stage, self.cache, scheduler, self.logger);
        stage.add_relationship(path, "material:binding", &material_path);
    }

    fn author_skin_primvars(
        &self,
        path: &str,
        prim: &PrimInfo,
        skin_data: &SkinData,
        skeleton_path: &str,
        stage: &mut dyn Stage,
    ) {
        let vert_count = prim.pos.len();
        if skin_data.is_rigid {
            // Constant interpolation with a single shared influence.
            let joint = skin_data
                .bindings
                .first()
                .map(|b| b.influences[0].index)
                .unwrap_or(0);
            stage.set_attribute(
                path,
                "primvars:skel:jointIndices",
                Value::IntArray(vec![joint as i32]),
            );
            stage.set_attribute(
                path,
                "primvars:skel:jointWeights",
                Value::FloatArray(vec![1.0]),
            );
            stage.set_attribute(
                path,
                "primvars:skel:jointIndices:interpolation",
                Value::Token("constant".into()),
            );
            stage.set_attribute(
                path,
                "primvars:skel:jointIndices:elementSize",
                Value::Int(1),
            );
        } else {
            let element_size = skin_data.influence_count.max(1) as usize;
            let mut indices = Vec::with_capacity(vert_count * element_size);
            let mut weights = Vec::with_capacity(vert_count * element_size);
            for binding in skin_data.bindings.iter().take(vert_count) {
                for influence in binding.influences.iter().take(element_size) {
                    if influence.index == UNUSED_JOINT {
                        indices.push(0);
                        weights.push(0.0);
                    } else {
                        indices.push(influence.index as i32);
                        weights.push(influence.weight);
                    }
                }
            }
            stage.set_attribute(path, "primvars:skel:jointIndices", Value::IntArray(indices));
            stage.set_attribute(
                path,
                "primvars:skel:jointWeights",
                Value::FloatArray(weights),
            );
            stage.set_attribute(
                path,
                "primvars:skel:jointIndices:interpolation",
                Value::Token("vertex".into()),
            );
            stage.set_attribute(
                path,
                "primvars:skel:jointIndices:elementSize",
                Value::Int(element_size as i32),
            );
        }
        stage.add_relationship(path, "skel:skeleton", skeleton_path);
    }

    // Skeleton, animation, and re-anchored meshes for one used skin.
    #[allow(clippy::too_many_arguments)]
    fn create_skinned_prims(
        &mut self,
        root_node: usize,
        used_skin: usize,
        parent_path: &str,
        world: DMat4,
        stage: &mut dyn Stage,
        mats: &mut Materializer,
        scheduler: &Scheduler,
    ) {
        let skin_info = self.skin_infos[used_skin].clone();

        let skeleton_path = format!("{}/Skel", parent_path);
        stage.define_prim(&skeleton_path, PrimType::Skeleton);
        stage.set_attribute(
            &skeleton_path,
            "joints",
            Value::TokenArray(skin_info.ujoint_names.clone()),
        );
        stage.set_attribute(
            &skeleton_path,
            "bindTransforms",
            Value::Matrix4dArray(skin_info.bind_mats.clone()),
        );
        stage.set_attribute(
            &skeleton_path,
            "restTransforms",
            Value::Matrix4dArray(skin_info.rest_mats.clone()),
        );

        if self.anim.index.is_some() {
            let anim_path = format!("{}/Anim", parent_path);
            self.create_skel_anim(&anim_path, &skin_info, parent_path, stage);
            stage.add_relationship(&skeleton_path, "skel:animationSource", &anim_path);
        }

        // Re-anchored skinned meshes: children of the skeleton root,
        // decoupled from their original mesh-hierarchy transforms.
        let skinned_nodes: Vec<usize> = self.node_infos[root_node].skinned_nodes.clone();
        for node_index in skinned_nodes {
            let node = &self.root.nodes[node_index];
            let (Some(mesh_index), Some(skin_index)) = (node.mesh, node.skin) else {
                continue;
            };
            let mesh_index = mesh_index.value();
            let src = &self.skin_srcs[skin_index.value()];
            let gjoint_to_ujoint = src.gjoint_to_ujoint.clone();

            let prim_count = self.mesh_infos[mesh_index].prims.len();
            for prim_index in 0..prim_count {
                let prim = &self.mesh_infos[mesh_index].prims[prim_index];
                if prim.pos.is_empty() || prim.skin_index_stride == 0 {
                    continue;
                }
                let Some(skin_data) = skin::skin_data(
                    &prim.skin_indices,
                    prim.skin_index_stride as usize,
                    &prim.skin_weights,
                    prim.skin_weight_stride as usize,
                    prim.pos.len(),
                    &gjoint_to_ujoint,
                ) else {
                    continue;
                };

                let material_index = prim.material;
                let mut prim = prim.clone();
                if self.settings.bake_skin_normals && !prim.norm.is_empty() {
                    // Pre-skin normals to the first frame's pose.
                    let rots: Vec<Quat> = skin_info
                        .ujoint_to_node
                        .iter()
                        .map(|&n| self.node_infos[n].rotation_points[0])
                        .collect();
                    let scales: Vec<Vec3> = skin_info
                        .ujoint_to_node
                        .iter()
                        .map(|&n| self.node_infos[n].scale_points[0])
                        .collect();
                    let norm_mats = skin::skin_joint_matrices_for_normals(
                        &skin_info,
                        &self.node_parents,
                        Some(&rots),
                        Some(&scales),
                    );
                    prim.norm = skin::skin_normals(&norm_mats, &prim.norm, &skin_data.bindings);
                }
                self.prepare_prim(&mut prim, material_index, world);

                let mesh_name = match self.root.meshes[mesh_index].name.as_deref() {
                    Some(name) if !name.is_empty() => name.to_string(),
                    _ => format!("Mesh_{}", mesh_index),
                };
                let base = if prim_count == 1 {
                    mesh_name
                } else {
                    format!("{}_{}", mesh_name, prim_index)
                };
                let name = self.unique_prim_name(parent_path, &base);
                let path = format!("{}/{}", parent_path, name);
                self.author_mesh_prim(
                    &path,
                    &prim,
                    material_index,
                    Some((&skin_data, &skeleton_path)),
                    stage,
                    mats,
                    scheduler,
                );
            }
        }
    }

    // Per-frame multi-joint keys for translation, rotation, and scale.
    fn create_skel_anim(
        &self,
        path: &str,
        skin_info: &SkinInfo,
        skin_container_path: &str,
        stage: &mut dyn Stage,
    ) {
        stage.define_prim(path, PrimType::SkelAnimation);
        stage.set_attribute(
            path,
            "joints",
            Value::TokenArray(skin_info.ujoint_names.clone()),
        );

        let joint_count = skin_info.ujoint_to_node.len();
        if joint_count == 0 {
            return;
        }

        // Translations.
        {
            let channels: Vec<(&[f32], &[Vec3])> = skin_info
                .ujoint_to_node
                .iter()
                .map(|&node| {
                    let info = &self.node_infos[node];
                    (
                        info.translation_times.as_slice(),
                        info.translation_points.as_slice(),
                    )
                })
                .collect();
            let keys = generate_skin_keys::<Vec3>(&channels);
            let mut stream = JointKeyStream::<Vec3, TranslationMetric>::new(&keys);
            prune_animation_keys(keys.len(), &mut stream);
            if stream.is_pruned_constant() {
                let points = stream
                    .keys
                    .first()
                    .map(|k| k.p.clone())
                    .unwrap_or_else(|| channels.iter().map(|(_, p)| p[0]).collect());
                stage.set_attribute(path, "translations", Value::Float3Array(points));
            } else {
                let samples: Vec<(f32, Value)> = stream
                    .keys
                    .iter()
                    .map(|k| (k.t, Value::Float3Array(k.p.clone())))
                    .collect();
                stage.set_attribute_time_samples(path, "translations", &samples);
            }
        }

        // Rotations, kept in quaternion space for skels.
        {
            let channels: Vec<(&[f32], &[Quat])> = skin_info
                .ujoint_to_node
                .iter()
                .map(|&node| {
                    let info = &self.node_infos[node];
                    (info.rotation_times.as_slice(), info.rotation_points.as_slice())
                })
                .collect();
            let keys = generate_skin_keys::<Quat>(&channels);
            let mut stream = JointKeyStream::<Quat, QuatMetric>::new(&keys);
            prune_animation_keys(keys.len(), &mut stream);
            if stream.is_pruned_constant() {
                let points = stream
                    .keys
                    .first()
                    .map(|k| k.p.clone())
                    .unwrap_or_else(|| channels.iter().map(|(_, p)| p[0]).collect());
                stage.set_attribute(path, "rotations", Value::QuatArray(points));
            } else {
                let samples: Vec<(f32, Value)> = stream
                    .keys
                    .iter()
                    .map(|k| (k.t, Value::QuatArray(k.p.clone())))
                    .collect();
                stage.set_attribute_time_samples(path, "rotations", &samples);
            }
        }

        // Scales, optionally normalized so frame 0 is 1 and autoframing
        // viewers get a stable bound.
        {
            let channels: Vec<(&[f32], &[Vec3])> = skin_info
                .ujoint_to_node
                .iter()
                .map(|&node| {
                    let info = &self.node_infos[node];
                    (info.scale_times.as_slice(), info.scale_points.as_slice())
                })
                .collect();
            let mut keys = generate_skin_keys::<Vec3>(&channels);
            if self.settings.normalize_skin_scale && !keys.is_empty() {
                let first = keys[0].p[0];
                let normalized = Vec3::new(
                    normalized_scale(first.x),
                    normalized_scale(first.y),
                    normalized_scale(first.z),
                );
                if !math::nearly_equal_vec3(normalized, Vec3::ONE, math::PRUNE_SCALE_COMPONENT) {
                    let recip = Vec3::ONE / normalized;
                    for key in &mut keys {
                        key.p[0] *= recip;
                    }
                    stage.set_attribute(
                        skin_container_path,
                        "xformOp:scale",
                        Value::Float3(normalized),
                    );
                    stage.set_attribute(
                        skin_container_path,
                        "xformOpOrder",
                        Value::TokenArray(vec!["xformOp:scale".into()]),
                    );
                }
            }
            let mut stream = JointKeyStream::<Vec3, ScaleMetric>::new(&keys);
            prune_animation_keys(keys.len(), &mut stream);
            if stream.is_pruned_constant() {
                let points = stream
                    .keys
                    .first()
                    .map(|k| k.p.clone())
                    .unwrap_or_else(|| channels.iter().map(|(_, p)| p[0]).collect());
                stage.set_attribute(path, "scales", Value::Float3Array(points));
            } else {
                let samples: Vec<(f32, Value)> = stream
                    .keys
                    .iter()
                    .map(|k| (k.t, Value::Float3Array(k.p.clone())))
                    .collect();
                stage.set_attribute_time_samples(path, "scales", &samples);
            }
        }
    }
}

// Zero scales cannot be normalized away.
fn normalized_scale(scale: f32) -> f32 {
    if math::nearly_equal(scale, 0.0, math::PRUNE_SCALE_COMPONENT) {
        1.0
    } else {
        scale
    }
}
