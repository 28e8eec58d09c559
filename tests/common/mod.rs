//! Shared fixtures: an in-memory data source and byte-packing helpers.

use std::path::Path;

use ufg::import::{ImageAttributes, MimeType, Source};
use ufg::json;

/// Data source serving buffers straight from memory.
#[derive(Default)]
pub struct FixtureSource {
    pub gltf: Vec<u8>,
    pub buffers: Vec<Vec<u8>>,
}

impl FixtureSource {
    pub fn new(buffers: Vec<Vec<u8>>) -> Self {
        Self {
            gltf: Vec::new(),
            buffers,
        }
    }
}

impl Source for FixtureSource {
    fn read_gltf(&self) -> Result<Vec<u8>, ufg::Error> {
        Ok(self.gltf.clone())
    }

    fn read_buffer(
        &self,
        _root: &json::Root,
        index: usize,
        start: usize,
        limit: usize,
    ) -> Result<Vec<u8>, ufg::Error> {
        let data = self.buffers.get(index).ok_or(ufg::Error::MissingData)?;
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
    ) -> Result<(Vec<u8>, MimeType), ufg::Error> {
        Err(ufg::Error::MissingData)
    }

    fn image_attributes(&self, _root: &json::Root, _index: usize) -> ImageAttributes {
        ImageAttributes::default()
    }

    fn buffer_exists(&self, _root: &json::Root, index: usize) -> bool {
        index < self.buffers.len()
    }

    fn image_exists(&self, _root: &json::Root, _index: usize) -> bool {
        false
    }

    fn is_source_path(&self, _path: &Path) -> bool {
        false
    }

    fn write_binary(&self, _dst_path: &Path, _data: &[u8]) -> Result<(), ufg::Error> {
        Ok(())
    }
}

pub fn pack_f32(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn pack_u16(values: &[u16]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn pack_u8(values: &[u8]) -> Vec<u8> {
    values.to_vec()
}
