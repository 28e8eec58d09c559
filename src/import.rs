//! Data sources for glTF JSON, buffers, and images.
//!
//! The converter reads everything through the [`Source`] capability trait so
//! the downstream writer and tests can substitute their own providers. Two
//! concrete providers are supplied: plain on-disk glTF plus resources, and
//! GLB wrapping either disk or memory.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::binary::{ChunkNote, Glb};
use crate::image;
use crate::message::{Logger, Message, Severity};
use crate::json;

/// Recognized MIME tokens.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum MimeType {
    /// Not specified anywhere.
    #[default]
    Unset,
    /// `image/jpeg`.
    Jpeg,
    /// `image/png`.
    Png,
    /// `image/bmp`.
    Bmp,
    /// `image/gif`.
    Gif,
    /// `application/octet-stream` or `application/gltf-buffer`.
    Binary,
    /// Any other `image/*` token.
    ImageOther,
}

lazy_static::lazy_static! {
    static ref MIME_TOKENS: std::collections::HashMap<&'static str, MimeType> = {
        let mut map = std::collections::HashMap::new();
        map.insert("image/jpeg", MimeType::Jpeg);
        map.insert("image/png", MimeType::Png);
        map.insert("image/bmp", MimeType::Bmp);
        map.insert("image/gif", MimeType::Gif);
        map.insert("application/octet-stream", MimeType::Binary);
        map.insert("application/gltf-buffer", MimeType::Binary);
        map
    };
}

impl MimeType {
    /// Maps a MIME token onto the enum.
    ///
    /// Unrecognized `image/*` tokens fall into [`MimeType::ImageOther`];
    /// anything else is `None`.
    pub fn parse(token: &str) -> Option<Self> {
        match MIME_TOKENS.get(token) {
            Some(&mime) => Some(mime),
            None if token.starts_with("image/") => Some(MimeType::ImageOther),
            None => None,
        }
    }

    /// The image format equivalent, when there is one.
    pub fn image_format(self) -> Option<image::Format> {
        match self {
            MimeType::Jpeg => Some(image::Format::Jpeg),
            MimeType::Png => Some(image::Format::Png),
            MimeType::Bmp => Some(image::Format::Bmp),
            MimeType::Gif => Some(image::Format::Gif),
            _ => None,
        }
    }

    /// Maps an image format back onto the enum.
    pub fn from_image_format(format: image::Format) -> Self {
        match format {
            image::Format::Jpeg => MimeType::Jpeg,
            image::Format::Png => MimeType::Png,
            image::Format::Bmp => MimeType::Bmp,
            image::Format::Gif => MimeType::Gif,
        }
    }
}

/// A parsed `data:` URI.
#[derive(Clone, Debug)]
pub struct DataUri<'a> {
    /// The MIME token between `data:` and `;base64`.
    pub mime_type: &'a str,
    /// The base64 payload.
    pub payload: &'a str,
}

/// Splits a `data:<mime>;base64,<content>` URI, without decoding.
pub fn parse_data_uri(uri: &str) -> Option<DataUri<'_>> {
    let rest = uri.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let mime_type = header.strip_suffix(";base64")?;
    Some(DataUri { mime_type, payload })
}

/// Decodes the base64 payload of a data URI.
///
/// The alphabet is `A-Za-z0-9+/` with optional `=` padding; any other byte
/// is an error.
pub fn decode_base64(payload: &str) -> Result<Vec<u8>, crate::Error> {
    base64::decode(payload).map_err(crate::Error::Base64)
}

/// Replaces characters reserved on common filesystems with `_`.
///
/// The sanitized form is retried when the original path is not found; the
/// unsanitized form is still what diagnostics report.
pub fn sanitize_path(path: &str) -> String {
    path.chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '|' | '?' | '*' => '_',
            other => other,
        })
        .collect()
}

/// Everything known about an image without decoding it.
#[derive(Clone, Debug, Default)]
pub struct ImageAttributes {
    /// True if the image data actually exists.
    pub exists: bool,
    /// The type indicated by the file name or glTF MIME field.
    pub declared_mime_type: MimeType,
    /// The real type indicated by the header bytes. A mismatch with
    /// `declared_mime_type` is non-compliant but tolerated.
    pub real_mime_type: MimeType,
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    /// Byte size of the compressed source image.
    pub file_size: usize,
    /// Relative path, for path-based images only.
    pub path: Option<PathBuf>,
    /// Set to the original path when sanitization was needed to locate it.
    pub unsanitized_path: Option<PathBuf>,
}

/// Capability surface for reading one glTF asset's data.
pub trait Source {
    /// Reads the glTF JSON text.
    fn read_gltf(&self) -> Result<Vec<u8>, crate::Error>;

    /// Reads `limit` bytes (0 = to the end) of a buffer starting at `start`.
    fn read_buffer(
        &self,
        root: &json::Root,
        index: usize,
        start: usize,
        limit: usize,
    ) -> Result<Vec<u8>, crate::Error>;

    /// Reads a URI-based image's bytes and its MIME type.
    fn read_image(&self, root: &json::Root, index: usize)
        -> Result<(Vec<u8>, MimeType), crate::Error>;

    /// Inspects an image header without decoding.
    fn image_attributes(&self, root: &json::Root, index: usize) -> ImageAttributes;

    /// True when the buffer's backing data exists and is large enough.
    fn buffer_exists(&self, root: &json::Root, index: usize) -> bool;

    /// True when the image's backing data exists and is non-empty.
    fn image_exists(&self, root: &json::Root, index: usize) -> bool;

    /// True when `path` is one of this asset's input files. The writer uses
    /// this to avoid overwriting inputs.
    fn is_source_path(&self, path: &Path) -> bool;

    /// Writes raw bytes for extracted or transcoded images.
    fn write_binary(&self, dst_path: &Path, data: &[u8]) -> Result<(), crate::Error>;
}

fn read_file(path: &Path) -> Result<Vec<u8>, crate::Error> {
    let mut data = Vec::new();
    fs::File::open(path)
        .map_err(crate::Error::Io)?
        .read_to_end(&mut data)
        .map_err(crate::Error::Io)?;
    Ok(data)
}

/// Resolves a (possibly percent-encoded) relative URI against a directory,
/// falling back to the sanitized form when the original does not exist.
///
/// Returns the resolved path and, when sanitization was required, the
/// original unsanitized path.
fn resolve_uri(dir: &Path, uri: &str) -> (PathBuf, Option<PathBuf>) {
    let decoded = urlencoding::decode(uri)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| uri.to_string());
    let direct = dir.join(&decoded);
    if direct.exists() {
        return (direct, None);
    }
    let sanitized = dir.join(sanitize_path(&decoded));
    if sanitized.exists() && sanitized != direct {
        (sanitized, Some(direct))
    } else {
        (direct, None)
    }
}

/// A data source reading a .gltf file and its resources from disk.
#[derive(Clone, Debug)]
pub struct FromPath {
    /// Path to the .gltf file.
    gltf_path: PathBuf,
    /// Directory resource URIs resolve against.
    resource_dir: PathBuf,
}

impl FromPath {
    /// Constructs a disk source for the given .gltf path.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let gltf_path = path.as_ref().to_path_buf();
        let resource_dir = gltf_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            gltf_path,
            resource_dir,
        }
    }

    fn uri_data(&self, uri: &str) -> Result<(Vec<u8>, Option<MimeType>), crate::Error> {
        if let Some(data_uri) = parse_data_uri(uri) {
            let mime = MimeType::parse(data_uri.mime_type);
            return Ok((decode_base64(data_uri.payload)?, mime));
        }
        let (path, _) = resolve_uri(&self.resource_dir, uri);
        Ok((read_file(&path)?, None))
    }
}

impl Source for FromPath {
    fn read_gltf(&self) -> Result<Vec<u8>, crate::Error> {
        read_file(&self.gltf_path)
    }

    fn read_buffer(
        &self,
        root: &json::Root,
        index: usize,
        start: usize,
        limit: usize,
    ) -> Result<Vec<u8>, crate::Error> {
        let buffer = root.buffers.get(index).ok_or(crate::Error::MissingData)?;
        let uri = buffer.uri.as_deref().ok_or(crate::Error::MissingData)?;
        let (mut data, _) = self.uri_data(uri)?;
        if start != 0 || limit != 0 {
            let end = if limit == 0 {
                data.len()
            } else {
                data.len().min(start + limit)
            };
            let start = start.min(data.len());
            data = data[start..end].to_vec();
        }
        Ok(data)
    }

    fn read_image(
        &self,
        root: &json::Root,
        index: usize,
    ) -> Result<(Vec<u8>, MimeType), crate::Error> {
        let image = root.images.get(index).ok_or(crate::Error::MissingData)?;
        let uri = image.uri.as_deref().ok_or(crate::Error::MissingData)?;
        let (data, data_uri_mime) = self.uri_data(uri)?;
        let declared = image
            .mime_type
            .as_ref()
            .and_then(|m| MimeType::parse(&m.0))
            .or(data_uri_mime)
            .unwrap_or_default();
        Ok((data, declared))
    }

    fn image_attributes(&self, root: &json::Root, index: usize) -> ImageAttributes {
        let mut attrs = ImageAttributes::default();
        let Some(img) = root.images.get(index) else {
            return attrs;
        };
        if let Some(view_index) = img.buffer_view {
            // View-backed image; read through the buffer.
            let Some(view) = root.buffer_views.get(view_index.value()) else {
                return attrs;
            };
            let offset = view.byte_offset.map(|o| o.value()).unwrap_or(0);
            let length = view.byte_length.value();
            let Ok(data) = self.read_buffer(root, view.buffer.value(), offset, length) else {
                return attrs;
            };
            attrs.exists = !data.is_empty();
            attrs.file_size = length;
            attrs.declared_mime_type = img
                .mime_type
                .as_ref()
                .and_then(|m| MimeType::parse(&m.0))
                .unwrap_or_default();
            if let Ok(info) = image::parse_header(&data) {
                attrs.real_mime_type = MimeType::from_image_format(info.format);
                attrs.width = info.width;
                attrs.height = info.height;
            }
            return attrs;
        }
        let Some(uri) = img.uri.as_deref() else {
            return attrs;
        };
        if let Some(data_uri) = parse_data_uri(uri) {
            attrs.declared_mime_type = MimeType::parse(data_uri.mime_type).unwrap_or_default();
            if let Ok(data) = decode_base64(data_uri.payload) {
                attrs.exists = !data.is_empty();
                attrs.file_size = data.len();
                if let Ok(info) = image::parse_header(&data) {
                    attrs.real_mime_type = MimeType::from_image_format(info.format);
                    attrs.width = info.width;
                    attrs.height = info.height;
                }
            }
            return attrs;
        }
        let decoded = urlencoding::decode(uri)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| uri.to_string());
        let (path, unsanitized) = resolve_uri(&self.resource_dir, uri);
        attrs.path = Some(PathBuf::from(decoded));
        attrs.unsanitized_path = unsanitized;
        attrs.declared_mime_type = declared_mime_from_path(&path);
        if let Ok(data) = read_file(&path) {
            attrs.exists = !data.is_empty();
            attrs.file_size = data.len();
            if let Ok(info) = image::parse_header(&data) {
                attrs.real_mime_type = MimeType::from_image_format(info.format);
                attrs.width = info.width;
                attrs.height = info.height;
            }
        }
        attrs
    }

    fn buffer_exists(&self, root: &json::Root, index: usize) -> bool {
        let Some(buffer) = root.buffers.get(index) else {
            return false;
        };
        let Some(uri) = buffer.uri.as_deref() else {
            // URI-less buffers only exist inside a GLB.
            return false;
        };
        if let Some(data_uri) = parse_data_uri(uri) {
            return !data_uri.payload.is_empty();
        }
        resolve_uri(&self.resource_dir, uri).0.exists()
    }

    fn image_exists(&self, root: &json::Root, index: usize) -> bool {
        let Some(img) = root.images.get(index) else {
            return false;
        };
        if let Some(view_index) = img.buffer_view {
            if img.mime_type.is_none() {
                return false;
            }
            return root
                .buffer_views
                .get(view_index.value())
                .map(|view| self.buffer_exists(root, view.buffer.value()))
                .unwrap_or(false);
        }
        let Some(uri) = img.uri.as_deref() else {
            return false;
        };
        if let Some(data_uri) = parse_data_uri(uri) {
            return !data_uri.payload.is_empty();
        }
        resolve_uri(&self.resource_dir, uri).0.exists()
    }

    fn is_source_path(&self, path: &Path) -> bool {
        same_file(path, &self.gltf_path) || path.starts_with(&self.resource_dir)
    }

    fn write_binary(&self, dst_path: &Path, data: &[u8]) -> Result<(), crate::Error> {
        fs::write(dst_path, data).map_err(crate::Error::Io)
    }
}

fn declared_mime_from_path(path: &Path) -> MimeType {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => MimeType::Jpeg,
        Some("png") => MimeType::Png,
        Some("bmp") => MimeType::Bmp,
        Some("gif") => MimeType::Gif,
        _ => MimeType::Unset,
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// A data source for binary glTF, wrapping a disk or memory provider for
/// any URI-based resources.
pub struct GlbSource {
    /// The JSON chunk text.
    json: Vec<u8>,
    /// BIN chunk payloads; chunk `i` backs buffer `i` when its URI is
    /// absent.
    bin: Vec<Vec<u8>>,
    /// Chunk observations to report once.
    notes: Vec<ChunkNote>,
    /// Provider for URI-based buffers and images.
    inner: FromPath,
}

impl GlbSource {
    /// Parses GLB framing from a file on disk.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, crate::Error> {
        let data = read_file(path.as_ref())?;
        Self::from_slice(&data, FromPath::new(path.as_ref()))
    }

    /// Parses GLB framing from bytes in memory.
    pub fn from_slice(data: &[u8], inner: FromPath) -> Result<Self, crate::Error> {
        let glb = Glb::from_slice(data)?;
        Ok(Self {
            json: glb.json.into_owned(),
            bin: glb.bin.into_iter().map(|b| b.into_owned()).collect(),
            notes: glb.notes,
            inner,
        })
    }

    /// Reports the chunk observations collected while opening.
    pub fn log_notes(&self, logger: &dyn Logger) {
        for note in &self.notes {
            match note {
                ChunkNote::ExtraJson { index } => logger.add(Message::new(
                    "GLB_EXTRA_CHUNK",
                    Severity::Warning,
                    format!("extra JSON chunk {} ignored", index),
                )),
                ChunkNote::Unknown { index, type_ } => logger.add(Message::new(
                    "GLB_UNKNOWN_CHUNK",
                    Severity::Info,
                    format!("unknown chunk {} of type {:#010x} skipped", index, type_),
                )),
            }
        }
    }

    fn bin_chunk(&self, root: &json::Root, buffer_index: usize) -> Option<&[u8]> {
        // BIN chunks back URI-less buffers in table order.
        let mut chunk = 0;
        for (index, buffer) in root.buffers.iter().enumerate() {
            if buffer.uri.is_none() {
                if index == buffer_index {
                    return self.bin.get(chunk).map(Vec::as_slice);
                }
                chunk += 1;
            }
        }
        None
    }
}

impl Source for GlbSource {
    fn read_gltf(&self) -> Result<Vec<u8>, crate::Error> {
        Ok(self.json.clone())
    }

    fn read_buffer(
        &self,
        root: &json::Root,
        index: usize,
        start: usize,
        limit: usize,
    ) -> Result<Vec<u8>, crate::Error> {
        let buffer = root.buffers.get(index).ok_or(crate::Error::MissingData)?;
        if buffer.uri.is_some() {
            return self.inner.read_buffer(root, index, start, limit);
        }
        let chunk = self.bin_chunk(root, index).ok_or(crate::Error::MissingData)?;
        let start = start.min(chunk.len());
        let end = if limit == 0 {
            chunk.len()
        } else {
            chunk.len().min(start + limit)
        };
        Ok(chunk[start..end].to_vec())
    }

    fn read_image(
        &self,
        root: &json::Root,
        index: usize,
    ) -> Result<(Vec<u8>, MimeType), crate::Error> {
        // Only ever called for URI-based images; view-backed images load
        // through the buffer.
        self.inner.read_image(root, index)
    }

    fn image_attributes(&self, root: &json::Root, index: usize) -> ImageAttributes {
        let Some(img) = root.images.get(index) else {
            return ImageAttributes::default();
        };
        if img.buffer_view.is_none() {
            return self.inner.image_attributes(root, index);
        }
        let mut attrs = ImageAttributes::default();
        let Some(view) = img
            .buffer_view
            .and_then(|v| root.buffer_views.get(v.value()))
        else {
            return attrs;
        };
        let offset = view.byte_offset.map(|o| o.value()).unwrap_or(0);
        let length = view.byte_length.value();
        let Ok(data) = self.read_buffer(root, view.buffer.value(), offset, length) else {
            return attrs;
        };
        attrs.exists = !data.is_empty();
        attrs.file_size = length;
        attrs.declared_mime_type = img
            .mime_type
            .as_ref()
            .and_then(|m| MimeType::parse(&m.0))
            .unwrap_or_default();
        if let Ok(info) = image::parse_header(&data) {
            attrs.real_mime_type = MimeType::from_image_format(info.format);
            attrs.width = info.width;
            attrs.height = info.height;
        }
        attrs
    }

    fn buffer_exists(&self, root: &json::Root, index: usize) -> bool {
        let Some(buffer) = root.buffers.get(index) else {
            return false;
        };
        if buffer.uri.is_some() {
            return self.inner.buffer_exists(root, index);
        }
        match self.bin_chunk(root, index) {
            Some(chunk) => chunk.len() >= buffer.byte_length.value(),
            None => false,
        }
    }

    fn image_exists(&self, root: &json::Root, index: usize) -> bool {
        let Some(img) = root.images.get(index) else {
            return false;
        };
        match img.buffer_view {
            Some(view_index) => {
                if img.mime_type.is_none() {
                    return false;
                }
                root.buffer_views
                    .get(view_index.value())
                    .map(|view| self.buffer_exists(root, view.buffer.value()))
                    .unwrap_or(false)
            }
            None => self.inner.image_exists(root, index),
        }
    }

    fn is_source_path(&self, path: &Path) -> bool {
        self.inner.is_source_path(path)
    }

    fn write_binary(&self, dst_path: &Path, data: &[u8]) -> Result<(), crate::Error> {
        self.inner.write_binary(dst_path, data)
    }
}

/// Opens the right source for a path by sniffing the GLB magic.
pub fn open<P: AsRef<Path>>(path: P, logger: &dyn Logger) -> Result<Box<dyn Source>, crate::Error> {
    let data = read_file(path.as_ref())?;
    if data.starts_with(b"glTF") {
        let source = GlbSource::from_slice(&data, FromPath::new(path.as_ref()))?;
        source.log_notes(logger);
        Ok(Box::new(source))
    } else {
        Ok(Box::new(FromPath::new(path.as_ref())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_data_uri() {
        let uri = "data:application/octet-stream;base64,Zm9v";
        let parsed = parse_data_uri(uri).unwrap();
        assert_eq!(parsed.mime_type, "application/octet-stream");
        assert_eq!(decode_base64(parsed.payload).unwrap(), b"foo");
    }

    #[test]
    fn rejects_non_base64_uri() {
        assert!(parse_data_uri("data:image/png,rawbytes").is_none());
        assert!(parse_data_uri("file.bin").is_none());
    }

    #[test]
    fn base64_boundary_cases() {
        assert_eq!(decode_base64("Zg==").unwrap(), vec![0x66]);
        assert_eq!(decode_base64("Zm8=").unwrap(), b"fo".to_vec());
        assert_eq!(decode_base64("Zm9v").unwrap(), b"foo".to_vec());
        assert!(decode_base64("Zm9@").is_err());
    }

    #[test]
    fn sanitizes_reserved_characters() {
        assert_eq!(sanitize_path("tex<1>:a?.png"), "tex_1__a_.png");
        assert_eq!(sanitize_path("plain.png"), "plain.png");
    }

    #[test]
    fn mime_tokens() {
        assert_eq!(MimeType::parse("image/jpeg"), Some(MimeType::Jpeg));
        assert_eq!(MimeType::parse("image/webp"), Some(MimeType::ImageOther));
        assert_eq!(MimeType::parse("text/plain"), None);
    }
}
