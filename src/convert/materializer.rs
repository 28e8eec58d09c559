//! Material and texture emission.
//!
//! Deduplicates materials, emits `UsdPreviewSurface` shader networks, and
//! drives texture re-processing (transcodes, scale/bias baking, and the
//! specular-glossiness to metallic-roughness remap) through an external
//! image codec, fanning the pixel work out on the scheduler.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use glam::Vec3;

use crate::cache::AccessorCache;
use crate::convert::settings::ConvertSettings;
use crate::convert::stage::{PrimType, Stage, Value};
use crate::import::{MimeType, Source};
use crate::json;
use crate::json::validation::Checked;
use crate::message::{Logger, Message, Severity};
use crate::scheduler::Scheduler;

/// Decoded pixels handed to and from the codec.
#[derive(Clone, Debug, Default)]
pub struct ImageData {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Channels per pixel (1, 3, or 4).
    pub channel_count: u8,
    /// Row-major interleaved 8-bit samples.
    pub pixels: Vec<u8>,
}

/// External image decode/encode collaborator.
pub trait ImageCodec: Send + Sync {
    /// Decodes compressed bytes.
    fn decode(&self, bytes: &[u8], mime: MimeType) -> Result<ImageData, crate::Error>;

    /// Resamples to the given dimensions.
    fn resize(&self, image: &ImageData, width: u32, height: u32)
        -> Result<ImageData, crate::Error>;

    /// Encodes to PNG at the given compression level.
    fn encode_png(&self, image: &ImageData, level: u8) -> Result<Vec<u8>, crate::Error>;

    /// Encodes to JPEG at the given quality and chroma subsampling.
    fn encode_jpg(&self, image: &ImageData, quality: u8, subsample: u8)
        -> Result<Vec<u8>, crate::Error>;
}

fn round_to_power_of_2(value: u32) -> u32 {
    if value <= 1 {
        return 1;
    }
    let down = 1u32 << (31 - value.leading_zeros());
    let up = down << 1;
    // Round to the nearer power, favoring down on ties.
    if value - down <= up - value {
        down
    } else {
        up
    }
}

/// Applies the resize constraints to one image's dimensions.
pub fn plan_target_size(
    resize: &crate::convert::settings::ImageResize,
    extra_scale: f32,
    width: u32,
    height: u32,
) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (width, height);
    }
    let scale = resize.scale * extra_scale;
    let mut w = ((width as f32 * scale).round() as u32).max(1);
    let mut h = ((height as f32 * scale).round() as u32).max(1);
    let longest = w.max(h);
    let clamped = longest.clamp(resize.size_min.max(1), resize.size_max.max(1));
    if clamped != longest {
        let ratio = clamped as f32 / longest as f32;
        w = ((w as f32 * ratio).round() as u32).max(1);
        h = ((h as f32 * ratio).round() as u32).max(1);
    }
    if resize.force_power_of_2 {
        w = round_to_power_of_2(w);
        h = round_to_power_of_2(h);
    }
    (w, h)
}

/// Bakes `v * scale + bias` into every sample of one channel.
pub fn bake_scale_bias(image: &mut ImageData, channel: usize, scale: f32, bias: f32) {
    let stride = image.channel_count as usize;
    if channel >= stride {
        return;
    }
    for pixel in image.pixels.chunks_exact_mut(stride) {
        let v = pixel[channel] as f32 / 255.0;
        pixel[channel] = ((v * scale + bias).clamp(0.0, 1.0) * 255.0 + 0.5) as u8;
    }
}

const DIELECTRIC_SPECULAR: f32 = 0.04;

// Khronos reference solve: the metallic value that reproduces the given
// diffuse/specular pair under the metallic-roughness model.
fn solve_metallic(diffuse: f32, specular: f32, one_minus_specular_strength: f32) -> f32 {
    if specular < DIELECTRIC_SPECULAR {
        return 0.0;
    }
    let a = DIELECTRIC_SPECULAR;
    let b = diffuse * one_minus_specular_strength / (1.0 - DIELECTRIC_SPECULAR) + specular
        - 2.0 * DIELECTRIC_SPECULAR;
    let c = DIELECTRIC_SPECULAR - specular;
    let d = (b * b - 4.0 * a * c).max(0.0);
    ((-b + d.sqrt()) / (2.0 * a)).clamp(0.0, 1.0)
}

fn luminance(rgb: [f32; 3]) -> f32 {
    0.2126 * rgb[0] + 0.7152 * rgb[1] + 0.0722 * rgb[2]
}

/// Converts spec-gloss factors to metallic-roughness factors.
///
/// Returns `(base_color, metallic, roughness)`.
pub fn spec_gloss_to_metal_rough_factors(
    diffuse: [f32; 4],
    specular: [f32; 3],
    glossiness: f32,
) -> ([f32; 4], f32, f32) {
    let one_minus_specular_strength = 1.0 - specular.iter().cloned().fold(0.0f32, f32::max);
    let metallic = solve_metallic(
        luminance([diffuse[0], diffuse[1], diffuse[2]]),
        luminance(specular),
        one_minus_specular_strength,
    );

    let base_from_diffuse = Vec3::new(diffuse[0], diffuse[1], diffuse[2])
        * (one_minus_specular_strength / (1.0 - DIELECTRIC_SPECULAR) / (1.0 - metallic).max(1e-4));
    let base_from_specular = (Vec3::new(specular[0], specular[1], specular[2])
        - Vec3::splat(DIELECTRIC_SPECULAR) * (1.0 - metallic))
        * (1.0 / metallic.max(1e-4));
    let base = base_from_diffuse
        .lerp(base_from_specular, metallic * metallic)
        .clamp(Vec3::ZERO, Vec3::ONE);

    ([base.x, base.y, base.z, diffuse[3]], metallic, 1.0 - glossiness)
}

/// Per-pixel spec-gloss to metal-rough remap.
///
/// `diffuse` is RGBA, `spec_gloss` RGB+A(gloss); both must share
/// dimensions. Returns `(base_color_rgba, metal_rough_rgb)` where the
/// output roughness sits in G and metallic in B per the glTF convention.
pub fn spec_gloss_to_metal_rough_pixels(
    diffuse: &ImageData,
    spec_gloss: &ImageData,
) -> Option<(ImageData, ImageData)> {
    if diffuse.width != spec_gloss.width || diffuse.height != spec_gloss.height {
        return None;
    }
    let pixel_count = (diffuse.width * diffuse.height) as usize;
    let d_stride = diffuse.channel_count as usize;
    let s_stride = spec_gloss.channel_count as usize;
    if d_stride < 3 || s_stride < 3 {
        return None;
    }

    let mut base = ImageData {
        width: diffuse.width,
        height: diffuse.height,
        channel_count: 4,
        pixels: vec![0; pixel_count * 4],
    };
    let mut metal_rough = ImageData {
        width: diffuse.width,
        height: diffuse.height,
        channel_count: 3,
        pixels: vec![0; pixel_count * 3],
    };

    for i in 0..pixel_count {
        let d = &diffuse.pixels[i * d_stride..];
        let s = &spec_gloss.pixels[i * s_stride..];
        let diffuse_rgba = [
            d[0] as f32 / 255.0,
            d[1] as f32 / 255.0,
            d[2] as f32 / 255.0,
            if d_stride > 3 { d[3] as f32 / 255.0 } else { 1.0 },
        ];
        let specular = [
            s[0] as f32 / 255.0,
            s[1] as f32 / 255.0,
            s[2] as f32 / 255.0,
        ];
        let gloss = if s_stride > 3 { s[3] as f32 / 255.0 } else { 1.0 };
        let (base_rgba, metallic, roughness) =
            spec_gloss_to_metal_rough_factors(diffuse_rgba, specular, gloss);
        let to_u8 = |v: f32| (v.clamp(0.0, 1.0) * 255.0 + 0.5) as u8;
        base.pixels[i * 4] = to_u8(base_rgba[0]);
        base.pixels[i * 4 + 1] = to_u8(base_rgba[1]);
        base.pixels[i * 4 + 2] = to_u8(base_rgba[2]);
        base.pixels[i * 4 + 3] = to_u8(base_rgba[3]);
        metal_rough.pixels[i * 3 + 1] = to_u8(roughness);
        metal_rough.pixels[i * 3 + 2] = to_u8(metallic);
    }
    Some((base, metal_rough))
}

struct TextureOutput {
    file_name: String,
    bytes: Result<Vec<u8>, crate::Error>,
}

/// Emits materials and schedules texture processing.
pub struct Materializer<'a> {
    root: &'a json::Root,
    settings: &'a ConvertSettings,
    codec: Option<Arc<dyn ImageCodec>>,
    materials_path: String,
    /// Material table index → emitted prim path.
    emitted: HashMap<Option<usize>, String>,
    /// Content key → emitted prim path, for identical-material merging.
    dedup: HashMap<String, String>,
    /// Image table index → emitted texture file name.
    textures: HashMap<usize, String>,
    /// Image table index → planned output dimensions.
    target_sizes: HashMap<usize, (u32, u32)>,
    /// Finished texture bytes awaiting write-out.
    outputs: Arc<Mutex<Vec<TextureOutput>>>,
    used_names: HashMap<String, usize>,
}

impl<'a> Materializer<'a> {
    /// Creates a materializer rooted at `<root_path>/Materials`.
    pub fn new(
        root: &'a json::Root,
        settings: &'a ConvertSettings,
        codec: Option<Arc<dyn ImageCodec>>,
        root_path: &str,
    ) -> Self {
        Self {
            root,
            settings,
            codec,
            materials_path: format!("{}/Materials", root_path),
            emitted: HashMap::new(),
            dedup: HashMap::new(),
            textures: HashMap::new(),
            target_sizes: HashMap::new(),
            outputs: Arc::new(Mutex::new(Vec::new())),
            used_names: HashMap::new(),
        }
    }

    /// Plans output dimensions for every image, shrinking the whole set in
    /// steps until the decompressed total fits the budget.
    pub fn plan_image_sizes(&mut self, cache: &AccessorCache) {
        let image_count = self.root.images.len();
        let mut dims = Vec::with_capacity(image_count);
        for index in 0..image_count {
            let attrs = cache.image_attributes(index);
            dims.push((attrs.width, attrs.height));
        }

        let mut extra_scale = 1.0f32;
        loop {
            let mut total = 0usize;
            let mut targets = HashMap::new();
            for (index, &(w, h)) in dims.iter().enumerate() {
                let target = plan_target_size(&self.settings.image_resize, extra_scale, w, h);
                total += target.0 as usize * target.1 as usize * 4;
                targets.insert(index, target);
            }
            if self.settings.image_budget == 0
                || total <= self.settings.image_budget
                || extra_scale < 1.0 / 64.0
            {
                self.target_sizes = targets;
                return;
            }
            extra_scale *= 1.0 - self.settings.image_budget_step.clamp(0.01, 0.9);
        }
    }

    fn unique_name(&mut self, base: &str) -> String {
        let base = sanitize_prim_name(base);
        let counter = self.used_names.entry(base.clone()).or_insert(0);
        *counter += 1;
        if *counter == 1 {
            base
        } else {
            format!("{}_{}", base, *counter - 1)
        }
    }

    /// Returns the prim path of the material for a primitive, emitting it
    /// on first use. `None` material emits a shared default material.
    pub fn material_path(
        &mut self,
        material_index: Option<usize>,
        stage: &mut dyn Stage,
        cache: &AccessorCache,
        scheduler: &Scheduler,
        logger: &dyn Logger,
    ) -> String {
        if let Some(path) = self.emitted.get(&material_index) {
            return path.clone();
        }

        // Identical materials collapse onto one prim when merging.
        let content_key = material_index
            .and_then(|index| self.root.materials.get(index))
            .and_then(|material| serde_json::to_string(material).ok());
        if self.settings.merge_identical_materials {
            if let Some(key) = content_key.as_ref() {
                if let Some(path) = self.dedup.get(key) {
                    let path = path.clone();
                    self.emitted.insert(material_index, path.clone());
                    return path;
                }
            }
        }

        let material = material_index.and_then(|index| self.root.materials.get(index));
        let name = material
            .and_then(|m| m.name.clone())
            .unwrap_or_else(|| match material_index {
                Some(index) => format!("Material_{}", index),
                None => "DefaultMaterial".to_string(),
            });
        let name = self.unique_name(&name);
        let path = format!("{}/{}", self.materials_path, name);
        self.emit_material(&path, material, stage, cache, scheduler, logger);

        self.emitted.insert(material_index, path.clone());
        if self.settings.merge_identical_materials {
            if let Some(key) = content_key {
                self.dedup.insert(key, path.clone());
            }
        }
        path
    }

    fn emit_material(
        &mut self,
        path: &str,
        material: Option<&'a json::Material>,
        stage: &mut dyn Stage,
        cache: &AccessorCache,
        scheduler: &Scheduler,
        logger: &dyn Logger,
    ) {
        stage.define_prim(path, PrimType::Material);
        let surface = format!("{}/PreviewSurface", path);
        stage.define_prim(&surface, PrimType::Shader);
        stage.set_attribute(&surface, "info:id", Value::Token("UsdPreviewSurface".into()));
        stage.add_relationship(path, "outputs:surface", &format!("{}.outputs:surface", surface));

        let Some(material) = material else {
            stage.set_attribute(
                &surface,
                "inputs:diffuseColor",
                Value::Float3(Vec3::ONE),
            );
            stage.set_attribute(&surface, "inputs:roughness", Value::Float(1.0));
            stage.set_attribute(&surface, "inputs:metallic", Value::Float(0.0));
            return;
        };

        let unlit = material
            .extensions
            .as_ref()
            .map(|e| e.unlit.is_some())
            .unwrap_or(false);
        let spec_gloss = material
            .extensions
            .as_ref()
            .and_then(|e| e.pbr_specular_glossiness.as_ref());

        // Factors. Spec-gloss sources either convert to metal-rough or
        // emit the specular workflow directly, per settings.
        let pbr = &material.pbr_metallic_roughness;
        let (base_color, metallic, roughness);
        let mut use_specular_workflow = false;
        let mut specular_color = [0.0f32; 3];
        if let Some(sg) = spec_gloss {
            if self.settings.emulate_specular_workflow {
                use_specular_workflow = true;
                base_color = sg.diffuse_factor.0;
                specular_color = sg.specular_factor.0;
                metallic = 0.0;
                roughness = 1.0 - sg.glossiness_factor.0;
            } else {
                let (base, m, r) = spec_gloss_to_metal_rough_factors(
                    sg.diffuse_factor.0,
                    sg.specular_factor.0,
                    sg.glossiness_factor.0,
                );
                base_color = base;
                metallic = m;
                roughness = r;
            }
        } else {
            base_color = pbr.base_color_factor.0;
            metallic = pbr.metallic_factor.0;
            roughness = pbr.roughness_factor.map(|r| r.0).unwrap_or(1.0);
        }

        stage.set_attribute(
            &surface,
            "inputs:useSpecularWorkflow",
            Value::Int(use_specular_workflow as i32),
        );
        if use_specular_workflow {
            stage.set_attribute(
                &surface,
                "inputs:specularColor",
                Value::Float3(Vec3::from_array(specular_color)),
            );
        }
        stage.set_attribute(&surface, "inputs:metallic", Value::Float(metallic));
        stage.set_attribute(&surface, "inputs:roughness", Value::Float(roughness));
        stage.set_attribute(
            &surface,
            "inputs:emissiveColor",
            Value::Float3(Vec3::from_array(material.emissive_factor.0)),
        );

        // Alpha mode.
        match material.alpha_mode {
            Checked::Valid(json::material::AlphaMode::Mask) => {
                let cutoff = material.alpha_cutoff.map(|c| c.0).unwrap_or(0.5);
                stage.set_attribute(&surface, "inputs:opacity", Value::Float(base_color[3]));
                if !self.settings.bake_alpha_cutoff {
                    stage.set_attribute(&surface, "inputs:opacityThreshold", Value::Float(cutoff));
                }
            }
            Checked::Valid(json::material::AlphaMode::Blend) => {
                stage.set_attribute(&surface, "inputs:opacity", Value::Float(base_color[3]));
            }
            _ => {}
        }

        if unlit {
            // UsdPreviewSurface has no unlit mode; the nearest match is a
            // purely emissive surface.
            stage.set_attribute(
                &surface,
                "inputs:emissiveColor",
                Value::Float3(Vec3::new(base_color[0], base_color[1], base_color[2])),
            );
            stage.set_attribute(&surface, "inputs:diffuseColor", Value::Float3(Vec3::ZERO));
        } else {
            stage.set_attribute(
                &surface,
                "inputs:diffuseColor",
                Value::Float3(Vec3::new(base_color[0], base_color[1], base_color[2])),
            );
        }

        // Textured inputs.
        let diffuse_texture = spec_gloss
            .and_then(|sg| sg.diffuse_texture.as_ref())
            .or(pbr.base_color_texture.as_ref());
        if let Some(info) = diffuse_texture {
            self.emit_texture_input(
                path,
                &surface,
                "diffuseColor",
                "rgb",
                info,
                stage,
                cache,
                scheduler,
                logger,
            );
        }
        if let Some(info) = pbr.metallic_roughness_texture.as_ref() {
            // Roughness samples G, metallic samples B.
            self.emit_texture_input(path, &surface, "roughness", "g", info, stage, cache, scheduler, logger);
            self.emit_texture_input(path, &surface, "metallic", "b", info, stage, cache, scheduler, logger);
        }
        if let Some(normal) = material.normal_texture.as_ref() {
            let info = json::texture::Info {
                index: normal.index,
                tex_coord: normal.tex_coord,
                extensions: normal.extensions.clone(),
                extras: None,
            };
            self.emit_texture_input(path, &surface, "normal", "rgb", &info, stage, cache, scheduler, logger);
        }
        if let Some(occlusion) = material.occlusion_texture.as_ref() {
            let info = json::texture::Info {
                index: occlusion.index,
                tex_coord: occlusion.tex_coord,
                extensions: occlusion.extensions.clone(),
                extras: None,
            };
            self.emit_texture_input(path, &surface, "occlusion", "r", &info, stage, cache, scheduler, logger);
        }
        if let Some(info) = material.emissive_texture.as_ref() {
            self.emit_texture_input(path, &surface, "emissiveColor", "rgb", info, stage, cache, scheduler, logger);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_texture_input(
        &mut self,
        material_path: &str,
        surface_path: &str,
        input: &str,
        channels: &str,
        info: &json::texture::Info,
        stage: &mut dyn Stage,
        cache: &AccessorCache,
        scheduler: &Scheduler,
        logger: &dyn Logger,
    ) {
        let Some(texture) = self.root.textures.get(info.index.value()) else {
            return;
        };
        let image_index = texture.source.value();
        let Some(file_name) = self.prepare_texture(image_index, cache, scheduler, logger) else {
            return;
        };

        let uv_set = if self.settings.disable_multiple_uvsets {
            0
        } else {
            info.extensions
                .as_ref()
                .and_then(|e| e.texture_transform.as_ref())
                .and_then(|t| t.tex_coord)
                .unwrap_or(info.tex_coord)
        };
        let primvar = if uv_set == 0 {
            "st".to_string()
        } else {
            format!("st{}", uv_set)
        };

        let reader_path = format!("{}/TexCoordReader_{}", material_path, primvar);
        stage.define_prim(&reader_path, PrimType::Shader);
        stage.set_attribute(
            &reader_path,
            "info:id",
            Value::Token("UsdPrimvarReader_float2".into()),
        );
        stage.set_attribute(&reader_path, "inputs:varname", Value::Token(primvar));

        let sampler_path = format!("{}/Texture_{}", material_path, input);
        stage.define_prim(&sampler_path, PrimType::Shader);
        stage.set_attribute(&sampler_path, "info:id", Value::Token("UsdUVTexture".into()));
        stage.set_attribute(&sampler_path, "inputs:file", Value::String(file_name));
        stage.add_relationship(
            &sampler_path,
            "inputs:st",
            &format!("{}.outputs:result", reader_path),
        );
        stage.add_relationship(
            surface_path,
            &format!("inputs:{}", input),
            &format!("{}.outputs:{}", sampler_path, channels),
        );
    }

    // Extracts an image to a file name, transcoding through the codec
    // when the format needs it. Pixel jobs run on the scheduler; outputs
    // are written by `finish`.
    fn prepare_texture(
        &mut self,
        image_index: usize,
        cache: &AccessorCache,
        scheduler: &Scheduler,
        logger: &dyn Logger,
    ) -> Option<String> {
        if let Some(name) = self.textures.get(&image_index) {
            return Some(name.clone());
        }
        let (bytes, mime) = cache.image_data(image_index)?;
        let needs_transcode = !matches!(mime, MimeType::Jpeg | MimeType::Png);
        let attrs = cache.image_attributes(image_index);
        let resize_to = self
            .target_sizes
            .get(&image_index)
            .copied()
            .filter(|&(w, h)| w != 0 && h != 0 && (w, h) != (attrs.width, attrs.height));
        let needs_processing = needs_transcode || resize_to.is_some();

        let extension = if needs_processing {
            if self.settings.prefer_jpeg {
                "jpg"
            } else {
                "png"
            }
        } else if mime == MimeType::Jpeg {
            "jpg"
        } else {
            "png"
        };
        let file_name = format!("texgen_{}.{}", image_index, extension);

        if needs_processing {
            let Some(codec) = self.codec.clone() else {
                if needs_transcode {
                    logger.add(Message::new(
                        "TEXTURE_FORMAT",
                        Severity::Warning,
                        format!(
                            "image {} needs transcoding but no codec is configured; skipped",
                            image_index
                        ),
                    ));
                    return None;
                }
                // Resize-only work degrades to a plain copy without a codec.
                logger.add(Message::new(
                    "TEXTURE_RESIZE",
                    Severity::Warning,
                    format!(
                        "image {} cannot be resized without a codec; kept at source size",
                        image_index
                    ),
                ));
                let file_name =
                    format!("texgen_{}.{}", image_index, if mime == MimeType::Jpeg { "jpg" } else { "png" });
                self.outputs.lock().unwrap().push(TextureOutput {
                    file_name: file_name.clone(),
                    bytes: Ok(bytes.to_vec()),
                });
                self.textures.insert(image_index, file_name.clone());
                return Some(file_name);
            };
            let bytes = bytes.to_vec();
            let outputs = Arc::clone(&self.outputs);
            let out_name = file_name.clone();
            let prefer_jpeg = self.settings.prefer_jpeg;
            let jpg_quality = self.settings.jpg_quality;
            let jpg_subsample = self.settings.jpg_subsample as u8;
            let png_level = self.settings.png_level;
            scheduler.schedule(move || {
                let result = codec
                    .decode(&bytes, mime)
                    .and_then(|image| match resize_to {
                        Some((w, h)) => codec.resize(&image, w, h),
                        None => Ok(image),
                    })
                    .and_then(|image| {
                        if prefer_jpeg {
                            codec.encode_jpg(&image, jpg_quality, jpg_subsample)
                        } else {
                            codec.encode_png(&image, png_level)
                        }
                    });
                outputs.lock().unwrap().push(TextureOutput {
                    file_name: out_name,
                    bytes: result,
                });
            });
        } else {
            self.outputs.lock().unwrap().push(TextureOutput {
                file_name: file_name.clone(),
                bytes: Ok(bytes.to_vec()),
            });
        }

        self.textures.insert(image_index, file_name.clone());
        Some(file_name)
    }

    /// Waits for texture jobs and writes every output next to the stage.
    pub fn finish(
        &mut self,
        scheduler: &Scheduler,
        source: &dyn Source,
        texture_dir: &Path,
        logger: &dyn Logger,
    ) {
        scheduler.wait_for_all_complete();
        let outputs = std::mem::take(&mut *self.outputs.lock().unwrap());
        for output in outputs {
            match output.bytes {
                Ok(bytes) => {
                    let dst = texture_dir.join(&output.file_name);
                    if source.is_source_path(&dst) {
                        logger.add(Message::new(
                            "TEXTURE_OVERWRITE",
                            Severity::Warning,
                            format!("refusing to overwrite input {}", dst.display()),
                        ));
                        continue;
                    }
                    if let Err(err) = source.write_binary(&dst, &bytes) {
                        logger.add(Message::new(
                            "TEXTURE_WRITE",
                            Severity::Error,
                            format!("failed to write {}: {}", dst.display(), err),
                        ));
                    }
                }
                Err(err) => {
                    logger.add(Message::new(
                        "TEXTURE_PROCESS",
                        Severity::Error,
                        format!("texture {} failed to process: {}", output.file_name, err),
                    ));
                }
            }
        }
    }
}

/// Replaces characters invalid in USD prim names.
pub fn sanitize_prim_name(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.is_empty() || out.chars().next().unwrap().is_ascii_digit() {
        out.insert(0, '_');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn prim_name_sanitization() {
        assert_eq!(sanitize_prim_name("Material 1!"), "Material_1_");
        assert_eq!(sanitize_prim_name("2sided"), "_2sided");
        assert_eq!(sanitize_prim_name(""), "_");
    }

    #[test]
    fn metallic_solve_endpoints() {
        // Pure dielectric: white diffuse, dielectric specular.
        let (_, metallic, roughness) =
            spec_gloss_to_metal_rough_factors([1.0, 1.0, 1.0, 1.0], [0.04, 0.04, 0.04], 0.3);
        assert_relative_eq!(metallic, 0.0, epsilon = 1e-3);
        assert_relative_eq!(roughness, 0.7, epsilon = 1e-6);

        // Pure metal: black diffuse, strong colored specular.
        let (base, metallic, _) =
            spec_gloss_to_metal_rough_factors([0.0, 0.0, 0.0, 1.0], [1.0, 0.8, 0.6], 0.9);
        assert!(metallic > 0.9);
        assert!(base[0] > 0.9);
    }

    #[test]
    fn target_size_planning() {
        use crate::convert::settings::ImageResize;
        let resize = ImageResize {
            force_power_of_2: true,
            scale: 0.5,
            size_min: 1,
            size_max: 256,
        };
        // 1000x500, halved to 500x250, clamped to 256 on the long edge
        // (128 short), then rounded to powers of two.
        let (w, h) = plan_target_size(&resize, 1.0, 1000, 500);
        assert_eq!((w, h), (256, 128));

        // Identity settings leave dimensions alone.
        let (w, h) = plan_target_size(&ImageResize::default(), 1.0, 640, 480);
        assert_eq!((w, h), (640, 480));
    }

    #[test]
    fn scale_bias_bake() {
        let mut image = ImageData {
            width: 2,
            height: 1,
            channel_count: 1,
            pixels: vec![0, 255],
        };
        bake_scale_bias(&mut image, 0, 0.5, 0.25);
        assert_eq!(image.pixels[0], 64);
        assert_eq!(image.pixels[1], 191);
    }

    #[test]
    fn spec_gloss_pixel_remap_shapes() {
        let diffuse = ImageData {
            width: 1,
            height: 1,
            channel_count: 4,
            pixels: vec![200, 100, 50, 255],
        };
        let spec_gloss = ImageData {
            width: 1,
            height: 1,
            channel_count: 4,
            pixels: vec![10, 10, 10, 128],
        };
        let (base, mr) = spec_gloss_to_metal_rough_pixels(&diffuse, &spec_gloss).unwrap();
        assert_eq!(base.channel_count, 4);
        assert_eq!(mr.channel_count, 3);
        // Gloss 128/255 → roughness ≈ 0.5 in G.
        assert!((mr.pixels[1] as i32 - 127).abs() <= 2);
    }
}
