//! Lazily loads buffers and images, and decodes typed accessor data.
//!
//! `access::<T>` hands back a dense scalar array for any accessor: a
//! zero-copy borrow into the owning buffer when the stored layout already
//! matches `T`, otherwise a reformatted copy. Reformatting handles
//! integer/float conversion, the `normalized` flag, interleaved strides,
//! and sparse overrides.

use std::borrow::Cow;
use std::cell::OnceCell;

use crate::import::{MimeType, Source};
use crate::json;
use crate::json::accessor::ComponentType;

/// Scalar types an accessor can be read as.
pub trait Scalar: bytemuck::Pod + Copy + Default {
    /// True when values stored as `component_type` can be referenced
    /// in place as `Self`.
    fn is_direct(component_type: ComponentType) -> bool;

    /// Converts one raw component (widened to f64) to `Self`.
    fn from_raw(value: f64) -> Self;

    /// Converts one raw component with glTF normalization applied.
    ///
    /// Meaningful only for float destinations; integer destinations ignore
    /// the `normalized` flag entirely.
    fn from_raw_normalized(component_type: ComponentType, value: f64) -> Self {
        let _ = component_type;
        Self::from_raw(value)
    }
}

macro_rules! impl_int_scalar {
    ($ty:ty, $($direct:pat_param)|+) => {
        impl Scalar for $ty {
            fn is_direct(component_type: ComponentType) -> bool {
                matches!(component_type, $($direct)|+)
            }

            fn from_raw(value: f64) -> Self {
                value as $ty
            }
        }
    };
}

impl_int_scalar!(i8, ComponentType::I8 | ComponentType::U8);
impl_int_scalar!(u8, ComponentType::I8 | ComponentType::U8);
impl_int_scalar!(i16, ComponentType::I16 | ComponentType::U16);
impl_int_scalar!(u16, ComponentType::I16 | ComponentType::U16);
impl_int_scalar!(i32, ComponentType::U32);
impl_int_scalar!(u32, ComponentType::U32);

impl Scalar for f32 {
    fn is_direct(component_type: ComponentType) -> bool {
        component_type == ComponentType::F32
    }

    fn from_raw(value: f64) -> Self {
        value as f32
    }

    fn from_raw_normalized(component_type: ComponentType, value: f64) -> Self {
        // Signed formulas preserve the zero point exactly.
        match component_type {
            ComponentType::I8 => (value * (2.0 / 255.0) + (1.0 / 255.0)) as f32,
            ComponentType::U8 => (value * (1.0 / 255.0)) as f32,
            ComponentType::I16 => (value * (2.0 / 65535.0) + (1.0 / 65535.0)) as f32,
            ComponentType::U16 => (value * (1.0 / 65535.0)) as f32,
            ComponentType::U32 => (value * (1.0 / 4294967295.0)) as f32,
            ComponentType::F32 => value as f32,
        }
    }
}

/// Dense scalar view of one accessor.
pub struct AccessorData<'a, T: Scalar> {
    /// `vec_count * component_count` scalars.
    pub data: Cow<'a, [T]>,
    /// Number of elements (vectors).
    pub vec_count: usize,
    /// Scalars per element.
    pub component_count: usize,
}

impl<T: Scalar> AccessorData<'_, T> {
    /// The backing scalar slice.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }
}

fn read_raw(component_type: ComponentType, bytes: &[u8]) -> f64 {
    match component_type {
        ComponentType::I8 => bytes[0] as i8 as f64,
        ComponentType::U8 => bytes[0] as f64,
        ComponentType::I16 => i16::from_le_bytes([bytes[0], bytes[1]]) as f64,
        ComponentType::U16 => u16::from_le_bytes([bytes[0], bytes[1]]) as f64,
        ComponentType::U32 => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
        ComponentType::F32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
    }
}

/// Loads and caches buffer/image bytes, and serves typed accessor reads.
///
/// Buffers and images are loaded at most once for the cache's lifetime.
pub struct AccessorCache<'a> {
    root: &'a json::Root,
    source: &'a dyn Source,
    buffers: Vec<OnceCell<Vec<u8>>>,
    images: Vec<OnceCell<(Vec<u8>, MimeType)>>,
}

impl<'a> AccessorCache<'a> {
    /// Creates a cache over the asset's tables.
    pub fn new(root: &'a json::Root, source: &'a dyn Source) -> Self {
        Self {
            root,
            source,
            buffers: (0..root.buffers.len()).map(|_| OnceCell::new()).collect(),
            images: (0..root.images.len()).map(|_| OnceCell::new()).collect(),
        }
    }

    /// The asset this cache reads from.
    pub fn root(&self) -> &'a json::Root {
        self.root
    }

    /// Raw bytes of a buffer, loading on first use.
    pub fn buffer_data(&self, index: usize) -> Option<&[u8]> {
        let cell = self.buffers.get(index)?;
        if cell.get().is_none() {
            let data = self
                .source
                .read_buffer(self.root, index, 0, 0)
                .unwrap_or_default();
            let _ = cell.set(data);
        }
        let data = cell.get().unwrap();
        if data.is_empty() {
            None
        } else {
            Some(data.as_slice())
        }
    }

    /// Raw bytes of a buffer view.
    pub fn view_data(&self, view_index: usize) -> Option<&[u8]> {
        let view = self.root.buffer_views.get(view_index)?;
        let data = self.buffer_data(view.buffer.value())?;
        let offset = view.byte_offset.map(|o| o.value()).unwrap_or(0);
        let length = view.byte_length.value();
        if offset > data.len() {
            return None;
        }
        let end = data.len().min(offset + length);
        Some(&data[offset..end])
    }

    /// Bytes and MIME type of an image, loading on first use.
    pub fn image_data(&self, index: usize) -> Option<(&[u8], MimeType)> {
        let img = self.root.images.get(index)?;
        if let Some(view_index) = img.buffer_view {
            // View-backed; the MIME field is mandatory here.
            let mime = MimeType::parse(&img.mime_type.as_ref()?.0)?;
            let data = self.view_data(view_index.value())?;
            return Some((data, mime));
        }
        let cell = self.images.get(index)?;
        if cell.get().is_none() {
            let loaded = self
                .source
                .read_image(self.root, index)
                .unwrap_or_else(|_| (Vec::new(), MimeType::Unset));
            let _ = cell.set(loaded);
        }
        let (data, mime) = cell.get().unwrap();
        if data.is_empty() {
            None
        } else {
            Some((data.as_slice(), *mime))
        }
    }

    /// Reads an accessor as a dense array of `T` scalars.
    ///
    /// Returns `None` when the backing data is absent or undersized; the
    /// validator reports those conditions, this just refuses to read.
    pub fn access<T: Scalar>(&self, accessor_index: usize) -> Option<AccessorData<'_, T>> {
        let accessor = self.root.accessors.get(accessor_index)?;
        let component_type = match accessor.component_type.as_ref() {
            json::validation::Checked::Valid(t) => t.0,
            json::validation::Checked::Invalid => return None,
        };
        let type_ = match accessor.type_.as_ref() {
            json::validation::Checked::Valid(t) => *t,
            json::validation::Checked::Invalid => return None,
        };
        let component_count = type_.multiplicity();
        let vec_count = accessor.count.value();
        let sparse = accessor.sparse.as_ref();

        let base = self.view_content::<T>(
            accessor.buffer_view.map(|v| v.value()),
            accessor.byte_offset.map(|o| o.value()).unwrap_or(0),
            component_type,
            vec_count,
            component_count,
            accessor.normalized,
            sparse.is_some(),
        );

        let data = if let Some(sparse) = sparse {
            let sparse_count = sparse.count.value();
            let indices_type = match sparse.indices.component_type.as_ref() {
                json::validation::Checked::Valid(t) => t.0,
                json::validation::Checked::Invalid => return None,
            };
            let indices = self.view_content::<u32>(
                Some(sparse.indices.buffer_view.value()),
                sparse.indices.byte_offset.value(),
                indices_type,
                sparse_count,
                1,
                false,
                false,
            )?;
            let values = self.view_content::<T>(
                Some(sparse.values.buffer_view.value()),
                sparse.values.byte_offset.value(),
                component_type,
                sparse_count,
                component_count,
                accessor.normalized,
                false,
            )?;
            // An absent base view zero-fills before the overrides apply.
            let mut dense = match base {
                Some(base) => base.into_owned(),
                None => vec![T::default(); vec_count * component_count],
            };
            for (i, &vec_index) in indices.iter().enumerate().take(sparse_count) {
                let dst_start = vec_index as usize * component_count;
                let src_start = i * component_count;
                if dst_start + component_count > dense.len() {
                    continue;
                }
                dense[dst_start..dst_start + component_count]
                    .copy_from_slice(&values[src_start..src_start + component_count]);
            }
            Cow::Owned(dense)
        } else {
            base?
        };

        Some(AccessorData {
            data,
            vec_count,
            component_count,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn view_content<T: Scalar>(
        &self,
        view_index: Option<usize>,
        byte_offset: usize,
        component_type: ComponentType,
        vec_count: usize,
        component_count: usize,
        normalized: bool,
        need_reformat: bool,
    ) -> Option<Cow<'_, [T]>> {
        let view_index = view_index?;
        let view = self.root.buffer_views.get(view_index)?;
        let buffer_data = self.buffer_data(view.buffer.value())?;
        let elem_size = component_count * component_type.size();
        let src_stride = view.byte_stride.map(|s| s.0).filter(|&s| s != 0).unwrap_or(elem_size);
        let dst_stride = component_count * std::mem::size_of::<T>();
        let src_offset = view.byte_offset.map(|o| o.value()).unwrap_or(0) + byte_offset;

        if vec_count == 0 {
            return Some(Cow::Owned(Vec::new()));
        }
        // Read extent against the whole buffer, not the declared view
        // length. Some assets under-declare byteLength; the validator has
        // already demoted that to a warning.
        let needed = src_stride * (vec_count - 1) + elem_size;
        if src_offset + needed > buffer_data.len() {
            return None;
        }
        let src = &buffer_data[src_offset..];

        let direct =
            !need_reformat && src_stride == dst_stride && T::is_direct(component_type);
        if direct {
            // Alignment of the middle of a byte buffer is not guaranteed,
            // so fall through to a copy when the cast fails.
            if let Ok(slice) = bytemuck::try_cast_slice::<u8, T>(&src[..needed]) {
                return Some(Cow::Borrowed(slice));
            }
        }

        let mut out = Vec::with_capacity(vec_count * component_count);
        let comp_size = component_type.size();
        for vi in 0..vec_count {
            let elem = &src[vi * src_stride..];
            for ci in 0..component_count {
                let raw = read_raw(component_type, &elem[ci * comp_size..]);
                let value = if normalized {
                    T::from_raw_normalized(component_type, raw)
                } else {
                    T::from_raw(raw)
                };
                out.push(value);
            }
        }
        Some(Cow::Owned(out))
    }

    /// True when the buffer's backing data exists.
    pub fn buffer_exists(&self, index: usize) -> bool {
        self.source.buffer_exists(self.root, index)
    }

    /// True when the image's backing data exists.
    pub fn image_exists(&self, index: usize) -> bool {
        self.source.image_exists(self.root, index)
    }

    /// Reports an image's attributes without decoding it.
    pub fn image_attributes(&self, index: usize) -> crate::import::ImageAttributes {
        self.source.image_attributes(self.root, index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root_with_buffer(json_text: &str) -> json::Root {
        json::Root::from_str(json_text).unwrap()
    }

    struct MemorySource(Vec<Vec<u8>>);

    impl Source for MemorySource {
        fn read_gltf(&self) -> Result<Vec<u8>, crate::Error> {
            Ok(Vec::new())
        }

        fn read_buffer(
            &self,
            _root: &json::Root,
            index: usize,
            start: usize,
            limit: usize,
        ) -> Result<Vec<u8>, crate::Error> {
            let data = self.0.get(index).ok_or(crate::Error::MissingData)?;
            let start = start.min(data.len());
            let end = if limit == 0 {
                data.len()
            } else {
                data.len().min(start + limit)
            };
            Ok(data[start..end].to_vec())
        }

        fn read_image(
            &self,
            _root: &json::Root,
            _index: usize,
        ) -> Result<(Vec<u8>, MimeType), crate::Error> {
            Err(crate::Error::MissingData)
        }

        fn image_attributes(
            &self,
            _root: &json::Root,
            _index: usize,
        ) -> crate::import::ImageAttributes {
            Default::default()
        }

        fn buffer_exists(&self, _root: &json::Root, index: usize) -> bool {
            index < self.0.len()
        }

        fn image_exists(&self, _root: &json::Root, _index: usize) -> bool {
            false
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

    fn scalar_f32_root(count: usize) -> json::Root {
        root_with_buffer(&format!(
            r#"{{
                "asset": {{"version": "2.0"}},
                "buffers": [{{"byteLength": {len}}}],
                "bufferViews": [{{"buffer": 0, "byteLength": {len}}}],
                "accessors": [{{
                    "bufferView": 0,
                    "componentType": 5126,
                    "count": {count},
                    "type": "SCALAR"
                }}]
            }}"#,
            len = count * 4,
            count = count
        ))
    }

    #[test]
    fn reads_float_scalars_in_place() {
        let root = scalar_f32_root(3);
        let bytes: Vec<u8> = [1.0f32, 2.0, 3.0]
            .iter()
            .flat_map(|f| f.to_le_bytes())
            .collect();
        let source = MemorySource(vec![bytes]);
        let cache = AccessorCache::new(&root, &source);
        let data = cache.access::<f32>(0).unwrap();
        assert_eq!(data.vec_count, 3);
        assert_eq!(data.component_count, 1);
        assert_eq!(data.as_slice(), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn converts_u8_indices_to_u32() {
        let root = root_with_buffer(
            r#"{
                "asset": {"version": "2.0"},
                "buffers": [{"byteLength": 3}],
                "bufferViews": [{"buffer": 0, "byteLength": 3}],
                "accessors": [{
                    "bufferView": 0,
                    "componentType": 5121,
                    "count": 3,
                    "type": "SCALAR"
                }]
            }"#,
        );
        let source = MemorySource(vec![vec![0u8, 1, 2]]);
        let cache = AccessorCache::new(&root, &source);
        let data = cache.access::<u32>(0).unwrap();
        assert_eq!(data.as_slice(), &[0u32, 1, 2]);
    }

    #[test]
    fn normalized_u8_reads_exact_endpoints() {
        let root = root_with_buffer(
            r#"{
                "asset": {"version": "2.0"},
                "buffers": [{"byteLength": 3}],
                "bufferViews": [{"buffer": 0, "byteLength": 3}],
                "accessors": [{
                    "bufferView": 0,
                    "componentType": 5121,
                    "count": 3,
                    "type": "SCALAR",
                    "normalized": true
                }]
            }"#,
        );
        let source = MemorySource(vec![vec![0u8, 255, 127]]);
        let cache = AccessorCache::new(&root, &source);
        let data = cache.access::<f32>(0).unwrap();
        assert_eq!(data.as_slice()[0], 0.0);
        assert_eq!(data.as_slice()[1], 1.0);
        assert_eq!(data.as_slice()[2], 127.0 / 255.0);
    }

    #[test]
    fn normalized_is_ignored_for_integer_destinations() {
        let root = root_with_buffer(
            r#"{
                "asset": {"version": "2.0"},
                "buffers": [{"byteLength": 2}],
                "bufferViews": [{"buffer": 0, "byteLength": 2}],
                "accessors": [{
                    "bufferView": 0,
                    "componentType": 5121,
                    "count": 2,
                    "type": "SCALAR",
                    "normalized": true
                }]
            }"#,
        );
        let source = MemorySource(vec![vec![7u8, 250]]);
        let cache = AccessorCache::new(&root, &source);
        let data = cache.access::<u16>(0).unwrap();
        assert_eq!(data.as_slice(), &[7u16, 250]);
    }

    #[test]
    fn sparse_with_absent_base_zero_fills() {
        let root = root_with_buffer(
            r#"{
                "asset": {"version": "2.0"},
                "buffers": [{"byteLength": 12}],
                "bufferViews": [
                    {"buffer": 0, "byteLength": 4},
                    {"buffer": 0, "byteOffset": 4, "byteLength": 8}
                ],
                "accessors": [{
                    "componentType": 5126,
                    "count": 4,
                    "type": "SCALAR",
                    "sparse": {
                        "count": 2,
                        "indices": {"bufferView": 0, "componentType": 5123},
                        "values": {"bufferView": 1}
                    }
                }]
            }"#,
        );
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&3u16.to_le_bytes());
        bytes.extend_from_slice(&7.0f32.to_le_bytes());
        bytes.extend_from_slice(&9.0f32.to_le_bytes());
        let source = MemorySource(vec![bytes]);
        let cache = AccessorCache::new(&root, &source);
        let data = cache.access::<f32>(0).unwrap();
        assert_eq!(data.as_slice(), &[0.0, 7.0, 0.0, 9.0]);
    }

    #[test]
    fn count_zero_accessor_is_empty_not_error() {
        let root = scalar_f32_root(0);
        let source = MemorySource(vec![vec![]]);
        let cache = AccessorCache::new(&root, &source);
        let data = cache.access::<f32>(0);
        // The backing buffer is empty so the buffer itself reads as absent,
        // but a zero count accessor over a live buffer must succeed.
        assert!(data.is_none());

        let root = scalar_f32_root(0);
        let source = MemorySource(vec![vec![0u8; 4]]);
        let cache = AccessorCache::new(&root, &source);
        let data = cache.access::<f32>(0).unwrap();
        assert_eq!(data.vec_count, 0);
        assert!(data.as_slice().is_empty());
    }

    #[test]
    fn interleaved_stride_reformats() {
        // Two vec3 positions interleaved with 4 bytes of padding.
        let root = root_with_buffer(
            r#"{
                "asset": {"version": "2.0"},
                "buffers": [{"byteLength": 32}],
                "bufferViews": [{"buffer": 0, "byteLength": 32, "byteStride": 16}],
                "accessors": [{
                    "bufferView": 0,
                    "componentType": 5126,
                    "count": 2,
                    "type": "VEC3"
                }]
            }"#,
        );
        let mut bytes = Vec::new();
        for v in [[1.0f32, 2.0, 3.0], [4.0, 5.0, 6.0]] {
            for c in v {
                bytes.extend_from_slice(&c.to_le_bytes());
            }
            bytes.extend_from_slice(&[0; 4]);
        }
        let source = MemorySource(vec![bytes]);
        let cache = AccessorCache::new(&root, &source);
        let data = cache.access::<f32>(0).unwrap();
        assert_eq!(data.as_slice(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }
}
