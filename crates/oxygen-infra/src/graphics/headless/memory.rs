// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Host-memory storage behind headless buffers and textures.

use super::queue::StateRegistration;
use oxygen_core::graphics::{
    BufferTextureCopyRegion, GraphicsError, NativeBuffer, NativeTexture, TextureDesc,
};
use oxygen_core::utils::lock;
use std::any::Any;
use std::sync::Mutex;

/// The bytes of a headless buffer.
#[derive(Debug)]
pub struct HeadlessBuffer {
    bytes: Mutex<Vec<u8>>,
    _registration: Option<StateRegistration>,
}

impl HeadlessBuffer {
    pub(crate) fn new(size: u64, registration: Option<StateRegistration>) -> Result<Self, String> {
        let size =
            usize::try_from(size).map_err(|_| format!("{size} bytes exceed the address space"))?;
        Ok(Self {
            bytes: Mutex::new(vec![0; size]),
            _registration: registration,
        })
    }

    /// Copies `size` bytes starting at `offset` out of the buffer.
    pub fn read(&self, offset: u64, size: u64) -> Option<Vec<u8>> {
        let bytes = lock(&self.bytes);
        let (start, end) = range(offset, size, bytes.len())?;
        Some(bytes[start..end].to_vec())
    }

    /// Writes `data` at `offset`. Returns `false` if it does not fit.
    pub fn write(&self, offset: u64, data: &[u8]) -> bool {
        let mut bytes = lock(&self.bytes);
        match range(offset, data.len() as u64, bytes.len()) {
            Some((start, end)) => {
                bytes[start..end].copy_from_slice(data);
                true
            }
            None => false,
        }
    }
}

impl NativeBuffer for HeadlessBuffer {
    fn map(
        &self,
        offset: u64,
        size: u64,
        f: &mut dyn FnMut(&mut [u8]),
    ) -> Result<(), GraphicsError> {
        let mut bytes = lock(&self.bytes);
        let (start, end) = range(offset, size, bytes.len()).ok_or_else(|| {
            GraphicsError::InvalidRequest(format!("map of [{offset}, +{size}) is out of range"))
        })?;
        f(&mut bytes[start..end]);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Per-subresource texel storage of a headless texture, tightly packed by
/// block rows.
#[derive(Debug)]
pub struct HeadlessTexture {
    desc: TextureDesc,
    subresources: Mutex<Vec<Vec<u8>>>,
    _registration: Option<StateRegistration>,
}

impl HeadlessTexture {
    pub(crate) fn new(desc: &TextureDesc, registration: Option<StateRegistration>) -> Self {
        let subresources = (0..desc.array_layers)
            .flat_map(|_| 0..desc.mip_levels)
            .map(|mip| vec![0; packed_layout(desc, mip).total])
            .collect();
        Self {
            desc: desc.clone(),
            subresources: Mutex::new(subresources),
            _registration: registration,
        }
    }

    /// A copy of the bytes of one subresource.
    pub fn read_subresource(&self, index: u32) -> Option<Vec<u8>> {
        lock(&self.subresources).get(index as usize).cloned()
    }

    /// Writes one copy region read from `src`, the full source buffer.
    ///
    /// Returns a description of the problem if the region does not fit either
    /// side.
    pub(crate) fn write_region(
        &self,
        src: &[u8],
        region: &BufferTextureCopyRegion,
    ) -> Result<u64, String> {
        let desc = &self.desc;
        if region.mip_level >= desc.mip_levels || region.array_slice >= desc.array_layers {
            return Err(format!(
                "subresource (mip {}, slice {}) does not exist",
                region.mip_level, region.array_slice
            ));
        }
        let info = desc.format.info();
        let (mip_width, mip_height, mip_depth) = desc.mip_extent(region.mip_level);
        let extent = |value: u32, origin: u32, full: u32| {
            if value == 0 {
                full.saturating_sub(origin)
            } else {
                value
            }
        };
        let width = extent(region.width, region.x, mip_width);
        let height = extent(region.height, region.y, mip_height);
        let depth = extent(region.depth, region.z, mip_depth);
        if region.x + width > mip_width
            || region.y + height > mip_height
            || region.z + depth > mip_depth
        {
            return Err(format!(
                "region {width}x{height}x{depth} at ({}, {}, {}) exceeds mip {} ({mip_width}x{mip_height}x{mip_depth})",
                region.x, region.y, region.z, region.mip_level
            ));
        }

        let layout = packed_layout(desc, region.mip_level);
        let row_bytes = width.div_ceil(info.block_width) as usize * info.block_size as usize;
        let block_rows = height.div_ceil(info.block_height) as usize;
        let first_row = (region.y / info.block_height) as usize;
        let first_column = (region.x / info.block_width) as usize * info.block_size as usize;

        let mut subresources = lock(&self.subresources);
        let index = desc.subresource_index(region.mip_level, region.array_slice) as usize;
        let target = subresources
            .get_mut(index)
            .ok_or_else(|| format!("subresource {index} is missing"))?;

        let mut written = 0u64;
        for z in 0..depth as usize {
            for row in 0..block_rows {
                let src_start = region.buffer_offset as usize
                    + z * region.buffer_slice_pitch as usize
                    + row * region.buffer_row_pitch as usize;
                let source = src
                    .get(src_start..src_start + row_bytes)
                    .ok_or_else(|| format!("source row at {src_start} is out of range"))?;
                let dst_start = ((z + region.z as usize) * layout.block_rows + first_row + row)
                    * layout.row_bytes
                    + first_column;
                target
                    .get_mut(dst_start..dst_start + row_bytes)
                    .ok_or_else(|| format!("destination row at {dst_start} is out of range"))?
                    .copy_from_slice(source);
                written += row_bytes as u64;
            }
        }
        Ok(written)
    }
}

impl NativeTexture for HeadlessTexture {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct PackedLayout {
    row_bytes: usize,
    block_rows: usize,
    total: usize,
}

fn packed_layout(desc: &TextureDesc, mip: u32) -> PackedLayout {
    let info = desc.format.info();
    let (width, height, depth) = desc.mip_extent(mip);
    let row_bytes = width.div_ceil(info.block_width) as usize * info.block_size as usize;
    let block_rows = height.div_ceil(info.block_height) as usize;
    PackedLayout {
        row_bytes,
        block_rows,
        total: row_bytes * block_rows * depth as usize,
    }
}

fn range(offset: u64, size: u64, len: usize) -> Option<(usize, usize)> {
    let start = usize::try_from(offset).ok()?;
    let end = start.checked_add(usize::try_from(size).ok()?)?;
    (end <= len).then_some((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxygen_core::graphics::TextureFormat;

    #[test]
    fn buffer_reads_back_what_was_written() {
        let buffer = HeadlessBuffer::new(16, None).unwrap();
        assert!(buffer.write(4, &[1, 2, 3]));
        assert_eq!(buffer.read(3, 5).unwrap(), vec![0, 1, 2, 3, 0]);
        assert!(!buffer.write(15, &[1, 2]));
        assert!(buffer.read(10, 7).is_none());
    }

    #[test]
    fn pitched_rows_are_packed_into_the_subresource() {
        let desc = TextureDesc::texture_2d(2, 2, TextureFormat::Rgba8Unorm, "t");
        let texture = HeadlessTexture::new(&desc, None);

        // Two rows of 8 bytes with a 16-byte pitch.
        let mut src = vec![0u8; 32];
        src[..8].copy_from_slice(&[1; 8]);
        src[16..24].copy_from_slice(&[2; 8]);
        let region = BufferTextureCopyRegion {
            buffer_row_pitch: 16,
            buffer_slice_pitch: 32,
            ..Default::default()
        };

        assert_eq!(texture.write_region(&src, &region), Ok(16));
        let texels = texture.read_subresource(0).unwrap();
        assert_eq!(&texels[..8], &[1; 8]);
        assert_eq!(&texels[8..], &[2; 8]);
    }

    #[test]
    fn out_of_range_regions_are_rejected() {
        let desc = TextureDesc::texture_2d(2, 2, TextureFormat::Rgba8Unorm, "t");
        let texture = HeadlessTexture::new(&desc, None);
        let region = BufferTextureCopyRegion {
            x: 1,
            width: 2,
            buffer_row_pitch: 8,
            ..Default::default()
        };
        assert!(texture.write_region(&[0; 64], &region).is_err());
    }
}
