//! Conversion settings.
//!
//! One field per command-line flag; the front-end maps arguments onto this
//! struct and the library never reads the process environment.

/// JPEG chroma subsampling choices.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChromaSubsample {
    /// 4:4:4 (no subsampling).
    None = 0,
    /// 4:2:2.
    Half = 1,
    /// 4:2:0.
    Quarter = 2,
}

/// Image resize behavior applied during texture processing.
#[derive(Clone, Copy, Debug)]
pub struct ImageResize {
    /// Round dimensions to powers of two.
    pub force_power_of_2: bool,
    /// Global scale applied to every texture.
    pub scale: f32,
    /// Lower bound on the longest edge, in pixels.
    pub size_min: u32,
    /// Upper bound on the longest edge, in pixels.
    pub size_max: u32,
}

impl Default for ImageResize {
    fn default() -> Self {
        Self {
            force_power_of_2: false,
            scale: 1.0,
            size_min: 1,
            size_max: 4096,
        }
    }
}

/// All conversion options.
#[derive(Clone, Debug)]
pub struct ConvertSettings {
    /// Name for the root prim, usually the sanitized output filename.
    pub root_name: String,
    /// Scene to convert; defaults to the asset's default scene.
    pub scene_index: Option<usize>,
    /// Animation to convert; defaults to the first.
    pub anim_index: Option<usize>,
    /// Scale applied at the `/Meshes` and `/SkinnedMeshes` roots.
    pub root_scale: f32,
    /// When set, warn if the model bound exceeds this many scene units.
    pub bounds_limit: Option<f32>,

    /// JPEG encode quality, 1-100.
    pub jpg_quality: u8,
    /// JPEG chroma subsampling.
    pub jpg_subsample: ChromaSubsample,
    /// PNG compression level, 0-9.
    pub png_level: u8,
    /// Texture resize constraints.
    pub image_resize: ImageResize,
    /// Total decompressed image budget in bytes; textures shrink in steps
    /// until they fit. Zero disables the budget.
    pub image_budget: usize,
    /// Fraction each budget step shrinks the working set by.
    pub image_budget_step: f32,

    /// Duplicate geometry instead of relying on double-sided rendering.
    pub emulate_double_sided: bool,
    /// Emit the specular workflow rather than converting to
    /// metallic-roughness.
    pub emulate_specular_workflow: bool,
    /// Bake MASK-mode alpha cutoff into the opacity texture.
    pub bake_alpha_cutoff: bool,
    /// Pre-skin normals to frame 0 for renderers without normal skinning.
    pub bake_skin_normals: bool,
    /// Re-normalize normals after import.
    pub normalize_normals: bool,
    /// Normalize animated skin scales to 1 at the first frame.
    pub normalize_skin_scale: bool,
    /// Coalesce all used skins into one skeleton.
    pub merge_skeletons: bool,
    /// Deduplicate materials with identical content.
    pub merge_identical_materials: bool,
    /// Emit only TEXCOORD_0.
    pub disable_multiple_uvsets: bool,
    /// Drop geometry whose material makes it invisible.
    pub remove_invisible: bool,
    /// Reverse triangle winding under negative-determinant transforms.
    pub reverse_culling_on_inverse_scale: bool,
    /// Force-include animated joints so un-skinned renderers track them.
    pub fix_skinned_normals: bool,
    /// Prefer JPEG over PNG when transcoding opaque textures.
    pub prefer_jpeg: bool,
    /// Delete generated intermediate files after packaging.
    pub delete_generated: bool,
    /// Print phase timing to stdout.
    pub print_timing: bool,

    /// Drop nodes (and subtrees) whose names start with any of these.
    pub remove_node_prefixes: Vec<String>,
    /// Suppress unknown-extension warnings for these prefixes.
    pub ignored_extension_prefixes: Vec<String>,
    /// Worker threads for texture processing; 0 runs inline.
    pub job_count: usize,
}

impl Default for ConvertSettings {
    fn default() -> Self {
        Self {
            root_name: "Model".to_string(),
            scene_index: None,
            anim_index: None,
            root_scale: 100.0,
            bounds_limit: None,
            jpg_quality: 85,
            jpg_subsample: ChromaSubsample::Half,
            png_level: 7,
            image_resize: ImageResize::default(),
            image_budget: 0,
            image_budget_step: 0.125,
            emulate_double_sided: false,
            emulate_specular_workflow: false,
            bake_alpha_cutoff: false,
            bake_skin_normals: false,
            normalize_normals: true,
            normalize_skin_scale: true,
            merge_skeletons: false,
            merge_identical_materials: true,
            disable_multiple_uvsets: false,
            remove_invisible: false,
            reverse_culling_on_inverse_scale: true,
            fix_skinned_normals: false,
            prefer_jpeg: false,
            delete_generated: true,
            print_timing: false,
            remove_node_prefixes: Vec::new(),
            ignored_extension_prefixes: Vec::new(),
            job_count: 0,
        }
    }
}
