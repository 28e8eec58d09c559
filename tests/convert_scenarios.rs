//! End-to-end conversion scenarios through a recording stage.

mod common;

use std::path::Path;

use common::{pack_f32, pack_u16, pack_u8, FixtureSource};
use ufg::convert::stage::{PrimType, RecordingStage, Value};
use ufg::convert::{convert, ConvertSettings};
use ufg::json;
use ufg::message::VecLogger;

fn run(
    json_text: &str,
    buffers: Vec<Vec<u8>>,
    settings: &ConvertSettings,
) -> (RecordingStage, VecLogger) {
    let root = json::Root::from_str(json_text).unwrap();
    let source = FixtureSource::new(buffers);
    let logger = VecLogger::new();
    let mut stage = RecordingStage::new();
    convert(
        &root,
        &source,
        settings,
        &mut stage,
        &logger,
        None,
        None,
        Path::new("."),
    )
    .unwrap_or_else(|err| {
        for message in logger.messages() {
            eprintln!("{}", message.to_display_string());
        }
        panic!("conversion failed: {}", err);
    });
    (stage, logger)
}

// A unit cube with per-face normals: 24 vertices, 12 triangles.
fn cube_fixture() -> (String, Vec<Vec<u8>>) {
    let mut positions: Vec<f32> = Vec::new();
    let mut normals: Vec<f32> = Vec::new();
    let mut indices: Vec<u16> = Vec::new();
    let faces: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
        ([1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]),
        ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
        ([0.0, 1.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0, 0.0]),
        ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
        ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ([0.0, 0.0, -1.0], [0.0, 1.0, 0.0], [1.0, 0.0, 0.0]),
    ];
    for (face, (normal, u, v)) in faces.iter().enumerate() {
        let base = (face * 4) as u16;
        for (su, sv) in [(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)] {
            for c in 0..3 {
                positions.push(normal[c] * 0.5 + u[c] * su + v[c] * sv);
                normals.push(normal[c]);
            }
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    let pos_bytes = pack_f32(&positions);
    let norm_bytes = pack_f32(&normals);
    let index_bytes = pack_u16(&indices);
    let mut buffer = pos_bytes.clone();
    buffer.extend_from_slice(&norm_bytes);
    buffer.extend_from_slice(&index_bytes);

    let json_text = format!(
        r#"{{
            "asset": {{"version": "2.0"}},
            "scene": 0,
            "scenes": [{{"nodes": [0]}}],
            "nodes": [{{"mesh": 0, "name": "Cube"}}],
            "materials": [{{
                "name": "White",
                "pbrMetallicRoughness": {{"baseColorFactor": [1, 1, 1, 1]}}
            }}],
            "meshes": [{{
                "name": "CubeMesh",
                "primitives": [{{
                    "attributes": {{"POSITION": 0, "NORMAL": 1}},
                    "indices": 2,
                    "material": 0
                }}]
            }}],
            "buffers": [{{"byteLength": {total}}}],
            "bufferViews": [
                {{"buffer": 0, "byteLength": {pos_len}}},
                {{"buffer": 0, "byteOffset": {pos_len}, "byteLength": {norm_len}}},
                {{"buffer": 0, "byteOffset": {no_off}, "byteLength": {index_len}}}
            ],
            "accessors": [
                {{"bufferView": 0, "componentType": 5126, "count": 24, "type": "VEC3",
                  "min": [-0.5, -0.5, -0.5], "max": [0.5, 0.5, 0.5]}},
                {{"bufferView": 1, "componentType": 5126, "count": 24, "type": "VEC3"}},
                {{"bufferView": 2, "componentType": 5123, "count": 36, "type": "SCALAR"}}
            ]
        }}"#,
        total = buffer.len(),
        pos_len = pos_bytes.len(),
        norm_len = norm_bytes.len(),
        no_off = pos_bytes.len() + norm_bytes.len(),
        index_len = index_bytes.len(),
    );
    (json_text, vec![buffer])
}

#[test]
fn static_cube_emits_one_mesh() {
    let (json_text, buffers) = cube_fixture();
    let (stage, _) = run(&json_text, buffers, &ConvertSettings::default());

    let mesh_paths = stage.paths_of_type(PrimType::Mesh);
    assert_eq!(mesh_paths.len(), 1);
    let mesh = stage.prim(mesh_paths[0]).unwrap();

    match mesh.attributes.get("points") {
        Some(Value::Float3Array(points)) => assert_eq!(points.len(), 24),
        other => panic!("unexpected points: {:?}", other),
    }
    match mesh.attributes.get("faceVertexCounts") {
        Some(Value::IntArray(counts)) => {
            assert_eq!(counts.len(), 12);
            assert!(counts.iter().all(|&c| c == 3));
        }
        other => panic!("unexpected counts: {:?}", other),
    }
    match mesh.attributes.get("faceVertexIndices") {
        Some(Value::IntArray(indices)) => {
            assert_eq!(indices.len(), 36);
            assert!(indices.iter().all(|&i| (0..24).contains(&i)));
        }
        other => panic!("unexpected indices: {:?}", other),
    }
    match mesh.attributes.get("normals") {
        Some(Value::Float3Array(normals)) => assert_eq!(normals.len(), 24),
        other => panic!("unexpected normals: {:?}", other),
    }
    assert_eq!(
        mesh.attributes.get("subdivisionScheme"),
        Some(&Value::Token("none".into()))
    );

    // No skeleton, no animation.
    assert!(stage.paths_of_type(PrimType::Skeleton).is_empty());
    assert!(stage.paths_of_type(PrimType::SkelAnimation).is_empty());

    // One material bound to the mesh.
    let materials = stage.paths_of_type(PrimType::Material);
    assert_eq!(materials.len(), 1);
    assert_eq!(
        mesh.relationships.get("material:binding"),
        Some(&vec![materials[0].to_string()])
    );
}

#[test]
fn conversion_is_deterministic() {
    let (json_text, buffers) = cube_fixture();
    let (stage_a, _) = run(&json_text, buffers.clone(), &ConvertSettings::default());
    let (stage_b, _) = run(&json_text, buffers, &ConvertSettings::default());
    assert_eq!(format!("{:?}", stage_a.prims), format!("{:?}", stage_b.prims));
    assert_eq!(format!("{:?}", stage_a.metadata), format!("{:?}", stage_b.metadata));
}

#[test]
fn stage_layout_and_metadata() {
    let (json_text, buffers) = cube_fixture();
    let (stage, _) = run(&json_text, buffers, &ConvertSettings::default());

    assert_eq!(stage.metadata.get("upAxis"), Some(&Value::Token("Y".into())));
    assert_eq!(stage.metadata.get("metersPerUnit"), Some(&Value::Double(0.01)));
    assert_eq!(
        stage.metadata.get("defaultPrim"),
        Some(&Value::Token("Model".into()))
    );

    let root = stage.prim("/Model").unwrap();
    assert_eq!(root.prim_type, PrimType::Xform);
    assert_eq!(
        root.metadata.get("kind"),
        Some(&Value::Token("component".into()))
    );

    // The rigid pass root carries the root scale.
    let meshes = stage.prim("/Model/Meshes").unwrap();
    match meshes.attributes.get("xformOp:scale") {
        Some(Value::Float3(scale)) => assert_eq!(scale.x, 100.0),
        other => panic!("unexpected root scale: {:?}", other),
    }
}

#[test]
fn glb_buffer_round_trip() {
    // A single triangle whose positions live in the BIN chunk.
    let positions = pack_f32(&[0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
    let json_text = format!(
        r#"{{
            "asset": {{"version": "2.0"}},
            "scenes": [{{"nodes": [0]}}],
            "nodes": [{{"mesh": 0}}],
            "meshes": [{{"primitives": [{{"attributes": {{"POSITION": 0}}}}]}}],
            "buffers": [{{"byteLength": {len}}}],
            "bufferViews": [{{"buffer": 0, "byteLength": {len}}}],
            "accessors": [{{
                "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
                "min": [0, 0, 0], "max": [1, 1, 0]
            }}]
        }}"#,
        len = positions.len()
    );

    // Frame it as a GLB by hand.
    let mut json_chunk = json_text.clone().into_bytes();
    while json_chunk.len() % 4 != 0 {
        json_chunk.push(b' ');
    }
    let mut bin_chunk = positions.clone();
    while bin_chunk.len() % 4 != 0 {
        bin_chunk.push(0);
    }
    let total = 12 + 8 + json_chunk.len() + 8 + bin_chunk.len();
    let mut glb = Vec::new();
    glb.extend_from_slice(b"glTF");
    glb.extend_from_slice(&2u32.to_le_bytes());
    glb.extend_from_slice(&(total as u32).to_le_bytes());
    glb.extend_from_slice(&(json_chunk.len() as u32).to_le_bytes());
    glb.extend_from_slice(&0x4E4F_534Au32.to_le_bytes());
    glb.extend_from_slice(&json_chunk);
    glb.extend_from_slice(&(bin_chunk.len() as u32).to_le_bytes());
    glb.extend_from_slice(&0x004E_4942u32.to_le_bytes());
    glb.extend_from_slice(&bin_chunk);

    let source = ufg::import::GlbSource::from_slice(
        &glb,
        ufg::import::FromPath::new("fixture.glb"),
    )
    .unwrap();
    let (root, source) = ufg::load_from_source(Box::new(source)).unwrap();

    // The JSON chunk round-trips byte-identically modulo padding.
    assert_eq!(root.meshes.len(), 1);

    let cache = ufg::cache::AccessorCache::new(&root, source.as_ref());
    let data = cache.access::<f32>(0).unwrap();
    assert_eq!(data.vec_count, 3);
    assert_eq!(
        data.as_slice(),
        &[0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0]
    );
}

#[test]
fn step_animation_emits_epsilon_bridge() {
    let times = pack_f32(&[0.0, 1.0]);
    let values = pack_f32(&[0.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
    let positions = pack_f32(&[0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
    let mut buffer = times.clone();
    buffer.extend_from_slice(&values);
    buffer.extend_from_slice(&positions);

    let json_text = format!(
        r#"{{
            "asset": {{"version": "2.0"}},
            "scenes": [{{"nodes": [0]}}],
            "nodes": [{{"mesh": 0, "name": "Mover"}}],
            "meshes": [{{"primitives": [{{"attributes": {{"POSITION": 2}}}}]}}],
            "animations": [{{
                "channels": [{{"sampler": 0, "target": {{"node": 0, "path": "translation"}}}}],
                "samplers": [{{"input": 0, "interpolation": "STEP", "output": 1}}]
            }}],
            "buffers": [{{"byteLength": {total}}}],
            "bufferViews": [
                {{"buffer": 0, "byteLength": 8}},
                {{"buffer": 0, "byteOffset": 8, "byteLength": 24}},
                {{"buffer": 0, "byteOffset": 32, "byteLength": 36}}
            ],
            "accessors": [
                {{"bufferView": 0, "componentType": 5126, "count": 2, "type": "SCALAR"}},
                {{"bufferView": 1, "componentType": 5126, "count": 2, "type": "VEC3"}},
                {{"bufferView": 2, "componentType": 5126, "count": 3, "type": "VEC3",
                  "min": [0, 0, 0], "max": [1, 1, 0]}}
            ]
        }}"#,
        total = buffer.len()
    );
    let (stage, _) = run(&json_text, vec![buffer], &ConvertSettings::default());

    let node = stage
        .prims
        .iter()
        .find(|(path, _)| path.ends_with("/Mover"))
        .map(|(_, prim)| prim)
        .unwrap();
    let samples = node.time_samples.get("xformOp:translate").unwrap();
    assert_eq!(samples.len(), 3);
    assert_eq!(samples[0].0, 0.0);
    let eps = samples[1].0;
    assert!(eps > 0.0 && eps <= 0.001, "epsilon {} out of range", eps);
    assert_eq!(samples[2].0, 1.0);
    match (&samples[0].1, &samples[1].1, &samples[2].1) {
        (Value::Float3(a), Value::Float3(b), Value::Float3(c)) => {
            assert_eq!(a.x, 0.0);
            assert_eq!(b.x, 1.0);
            assert_eq!(c.x, 1.0);
        }
        other => panic!("unexpected samples: {:?}", other),
    }
}

#[test]
fn skinned_mesh_with_disjoint_joints() {
    // R (node 0) parents joints A (node 1) and B (node 2); node 3 carries
    // the skinned mesh. Vertices weight A, B, and an even blend.
    let positions = pack_f32(&[0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
    let joints = pack_u8(&[0, 0, 0, 0, 1, 0, 0, 0, 0, 1, 0, 0]);
    let weights = pack_f32(&[
        1.0, 0.0, 0.0, 0.0, //
        1.0, 0.0, 0.0, 0.0, //
        0.5, 0.5, 0.0, 0.0,
    ]);
    let mut ibm = Vec::new();
    for _ in 0..2 {
        for col in 0..4 {
            for row in 0..4 {
                ibm.extend_from_slice(&(if col == row { 1.0f32 } else { 0.0 }).to_le_bytes());
            }
        }
    }
    let mut buffer = positions.clone();
    buffer.extend_from_slice(&joints);
    buffer.extend_from_slice(&weights);
    buffer.extend_from_slice(&ibm);

    let json_text = format!(
        r#"{{
            "asset": {{"version": "2.0"}},
            "scenes": [{{"nodes": [0, 3]}}],
            "nodes": [
                {{"children": [1, 2], "name": "R"}},
                {{"name": "A", "translation": [1, 0, 0]}},
                {{"name": "B", "translation": [-1, 0, 0]}},
                {{"mesh": 0, "skin": 0, "name": "Skinned"}}
            ],
            "skins": [{{"inverseBindMatrices": 3, "joints": [1, 2]}}],
            "meshes": [{{"primitives": [{{
                "attributes": {{"POSITION": 0, "JOINTS_0": 1, "WEIGHTS_0": 2}}
            }}]}}],
            "buffers": [{{"byteLength": {total}}}],
            "bufferViews": [
                {{"buffer": 0, "byteLength": 36}},
                {{"buffer": 0, "byteOffset": 36, "byteLength": 12}},
                {{"buffer": 0, "byteOffset": 48, "byteLength": 48}},
                {{"buffer": 0, "byteOffset": 96, "byteLength": 128}}
            ],
            "accessors": [
                {{"bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
                  "min": [0, 0, 0], "max": [1, 1, 0]}},
                {{"bufferView": 1, "componentType": 5121, "count": 3, "type": "VEC4"}},
                {{"bufferView": 2, "componentType": 5126, "count": 3, "type": "VEC4"}},
                {{"bufferView": 3, "componentType": 5126, "count": 2, "type": "MAT4"}}
            ]
        }}"#,
        total = buffer.len()
    );
    let (stage, _) = run(&json_text, vec![buffer], &ConvertSettings::default());

    // The skeleton anchors at R, not at either joint.
    let skeletons = stage.paths_of_type(PrimType::Skeleton);
    assert_eq!(skeletons.len(), 1);
    assert!(skeletons[0].contains("/SkinnedMeshes/"));
    assert!(skeletons[0].contains("/R/"));

    let skeleton = stage.prim(skeletons[0]).unwrap();
    match skeleton.attributes.get("joints") {
        Some(Value::TokenArray(joints)) => {
            assert_eq!(joints, &vec!["n1".to_string(), "n2".to_string()]);
        }
        other => panic!("unexpected joints: {:?}", other),
    }
    // Bind matrices invert the (identity) inverse-bind matrices.
    match skeleton.attributes.get("bindTransforms") {
        Some(Value::Matrix4dArray(mats)) => {
            assert_eq!(mats.len(), 2);
            assert!(mats.iter().all(|m| *m == glam::DMat4::IDENTITY));
        }
        other => panic!("unexpected binds: {:?}", other),
    }

    // The mesh re-anchors under the skeleton root with remapped weights.
    let meshes = stage.paths_of_type(PrimType::Mesh);
    assert_eq!(meshes.len(), 1);
    assert!(meshes[0].contains("/SkinnedMeshes/"));
    let mesh = stage.prim(meshes[0]).unwrap();
    match (
        mesh.attributes.get("primvars:skel:jointIndices"),
        mesh.attributes.get("primvars:skel:jointWeights"),
    ) {
        (Some(Value::IntArray(indices)), Some(Value::FloatArray(weights))) => {
            let element_size = indices.len() / 3;
            assert_eq!(indices.len(), weights.len());
            // glTF joint 0 (A, node 1) maps to output joint 0.
            assert_eq!(indices[0], 0);
            // Per-vertex weights sum to 1.
            for vertex in weights.chunks(element_size) {
                let total: f32 = vertex.iter().sum();
                assert!((total - 1.0).abs() < 1e-5);
            }
        }
        other => panic!("unexpected skin primvars: {:?}", other),
    }
    assert_eq!(
        mesh.relationships.get("skel:skeleton"),
        Some(&vec![skeletons[0].to_string()])
    );
}

#[test]
fn sparse_accessor_reads_through_pipeline() {
    // Base view absent: zero-filled, then overridden at indices 1 and 3.
    let mut buffer = pack_u16(&[1, 3]);
    buffer.extend_from_slice(&pack_f32(&[7.0, 9.0]));
    let json_text = format!(
        r#"{{
            "asset": {{"version": "2.0"}},
            "buffers": [{{"byteLength": {total}}}],
            "bufferViews": [
                {{"buffer": 0, "byteLength": 4}},
                {{"buffer": 0, "byteOffset": 4, "byteLength": 8}}
            ],
            "accessors": [{{
                "componentType": 5126, "count": 4, "type": "SCALAR",
                "sparse": {{
                    "count": 2,
                    "indices": {{"bufferView": 0, "componentType": 5123}},
                    "values": {{"bufferView": 1}}
                }}
            }}]
        }}"#,
        total = buffer.len()
    );
    let root = json::Root::from_str(&json_text).unwrap();
    let source = FixtureSource::new(vec![buffer]);
    let cache = ufg::cache::AccessorCache::new(&root, &source);
    let data = cache.access::<f32>(0).unwrap();
    assert_eq!(data.as_slice(), &[0.0, 7.0, 0.0, 9.0]);
}
