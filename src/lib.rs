//! Converts glTF 2.0 assets into USD scene description.
//!
//! The crate loads glTF (plain or GLB), validates it, and drives the
//! conversion of meshes, skins, materials, and animations onto an external
//! USD stage writer. See [`convert::convert`] for the one-call surface.
//!
//! ```no_run
//! use std::path::Path;
//! use ufg::convert::stage::RecordingStage;
//!
//! let logger = ufg::message::PrintLogger::default();
//! let (root, source) = ufg::load("model.glb", &logger).unwrap();
//! let mut stage = RecordingStage::new();
//! let settings = ufg::ConvertSettings::default();
//! ufg::convert::convert(
//!     &root,
//!     source.as_ref(),
//!     &settings,
//!     &mut stage,
//!     &logger,
//!     None,
//!     None,
//!     Path::new("."),
//! )
//! .unwrap();
//! ```

use std::fmt;
use std::path::Path;

/// Re-export of the JSON schema crate.
pub use ufg_json as json;

/// Animation key extraction and reduction.
pub mod animation;
/// GLB container framing.
pub mod binary;
/// Buffer/image loading and typed accessor reads.
pub mod cache;
/// Conversion orchestration, settings, and the stage interface.
pub mod convert;
/// Quaternion to Euler resampling.
pub mod euler;
/// Header-only image inspection.
pub mod image;
/// Data sources: disk, GLB, data URIs.
pub mod import;
/// Math helpers and tolerance constants.
pub mod math;
/// Mesh assembly.
pub mod mesh;
/// User-facing diagnostics.
pub mod message;
/// Node hierarchy utilities.
pub mod scene;
/// Worker pool for texture processing.
pub mod scheduler;
/// Skin assembly.
pub mod skin;
/// Post-load semantic validation.
pub mod validate;

pub use convert::{ConvertSettings, Stage};
pub use import::Source;

/// Represents a runtime error.
#[derive(Debug)]
pub enum Error {
    /// Base 64 decoding error.
    Base64(base64::DecodeError),
    /// GLB parsing error.
    Binary(binary::Error),
    /// Conversion ended with error diagnostics; see the logger for them.
    Conversion,
    /// JSON deserialization error.
    Deserialize(serde_json::Error),
    /// Image header parsing error.
    Image(image::Error),
    /// Standard I/O error.
    Io(std::io::Error),
    /// Referenced data was absent.
    MissingData,
    /// The asset version is not in the 2.x family.
    UnsupportedVersion(String),
    /// Validation reported this many errors; see the logger for them.
    Validation(usize),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Base64(e) => write!(f, "base64 decoding failed: {}", e),
            Error::Binary(e) => write!(f, "GLB parsing failed: {}", e),
            Error::Conversion => f.write_str("conversion failed"),
            Error::Deserialize(e) => write!(f, "malformed glTF JSON: {}", e),
            Error::Image(e) => write!(f, "image parsing failed: {}", e),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::MissingData => f.write_str("referenced data is missing"),
            Error::UnsupportedVersion(v) => write!(f, "unsupported glTF version {}", v),
            Error::Validation(count) => write!(f, "validation failed with {} errors", count),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Base64(e) => Some(e),
            Error::Binary(e) => Some(e),
            Error::Deserialize(e) => Some(e),
            Error::Image(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Deserialize(err)
    }
}

/// Opens a .gltf or .glb file and parses its JSON tree.
///
/// The version field is interpreted before anything else; assets outside
/// the 2.x family are rejected here.
pub fn load<P: AsRef<Path>>(
    path: P,
    logger: &dyn message::Logger,
) -> Result<(json::Root, Box<dyn Source>), Error> {
    let source = import::open(path, logger)?;
    load_from_source(source)
}

/// Parses the JSON tree out of an already-opened source.
pub fn load_from_source(source: Box<dyn Source>) -> Result<(json::Root, Box<dyn Source>), Error> {
    let text = source.read_gltf()?;
    let root = json::Root::from_slice(&text).map_err(Error::Deserialize)?;
    let version = &root.asset.version;
    if version != "2" && !version.starts_with("2.") {
        return Err(Error::UnsupportedVersion(version.clone()));
    }
    log::debug!(
        "loaded glTF {} ({} nodes, {} meshes, {} animations)",
        version,
        root.nodes.len(),
        root.meshes.len(),
        root.animations.len()
    );
    Ok((root, source))
}
