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

//! Validation and staging layout of upload requests.
//!
//! Texture regions are packed into staging memory with the row pitch and
//! placement alignment copy engines require; buffers are copied verbatim.

use super::types::{
    UploadBufferDesc, UploadError, UploadKind, UploadSubresource, UploadTarget, UploadTextureDesc,
};
use oxygen_core::graphics::{BufferTextureCopyRegion, BufferUsage, TextureType};
use oxygen_core::utils::align_up;

/// Alignment rules of the staging layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackingPolicy {
    /// Alignment of each row of texel blocks.
    pub row_pitch_alignment: u64,
    /// Alignment of the start of each subresource region.
    pub placement_alignment: u64,
}

impl Default for PackingPolicy {
    fn default() -> Self {
        Self {
            row_pitch_alignment: 256,
            placement_alignment: 512,
        }
    }
}

/// Where one texture region lives in staging memory and in the caller's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubresourceFootprint {
    /// Destination mip.
    pub mip: u32,
    /// Destination array slice.
    pub array_slice: u32,
    /// Destination origin in texels.
    pub origin: (u32, u32, u32),
    /// Resolved extent in texels.
    pub extent: (u32, u32, u32),
    /// Offset from the start of the staging allocation.
    pub offset: u64,
    /// Aligned bytes per row of blocks in staging.
    pub row_pitch: u64,
    /// Aligned bytes per depth slice in staging.
    pub slice_pitch: u64,
    /// Bytes this region occupies in staging.
    pub size_bytes: u64,
    /// Tightly packed bytes per row of blocks.
    pub row_bytes: u64,
    /// Rows of blocks per depth slice.
    pub block_rows: u32,
    /// Offset of the region in the caller's data.
    pub source_offset: u64,
    /// Bytes per row of blocks in the caller's data.
    pub source_row_pitch: u64,
    /// Bytes per depth slice in the caller's data.
    pub source_slice_pitch: u64,
}

/// The staging layout of a texture upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TexturePlan {
    /// Regions in upload order.
    pub footprints: Vec<SubresourceFootprint>,
    /// Staging bytes needed, including alignment padding.
    pub total_bytes: u64,
    /// Bytes of caller data the regions consume.
    pub source_bytes: u64,
}

impl TexturePlan {
    /// Copy regions for a staging allocation starting at `base_offset`.
    pub fn regions(&self, base_offset: u64) -> Vec<BufferTextureCopyRegion> {
        self.footprints
            .iter()
            .map(|fp| BufferTextureCopyRegion {
                buffer_offset: base_offset + fp.offset,
                buffer_row_pitch: fp.row_pitch,
                buffer_slice_pitch: fp.slice_pitch,
                mip_level: fp.mip,
                array_slice: fp.array_slice,
                x: fp.origin.0,
                y: fp.origin.1,
                z: fp.origin.2,
                width: fp.extent.0,
                height: fp.extent.1,
                depth: fp.extent.2,
            })
            .collect()
    }

    /// Copies tightly packed (or caller-pitched) `source` bytes into the
    /// pitched staging layout.
    pub fn pack(&self, source: &[u8], staging: &mut [u8]) {
        for fp in &self.footprints {
            let row_bytes = fp.row_bytes as usize;
            for z in 0..fp.extent.2 as u64 {
                for row in 0..fp.block_rows as u64 {
                    let src = (fp.source_offset + z * fp.source_slice_pitch + row * fp.source_row_pitch)
                        as usize;
                    let dst = (fp.offset + z * fp.slice_pitch + row * fp.row_pitch) as usize;
                    staging[dst..dst + row_bytes].copy_from_slice(&source[src..src + row_bytes]);
                }
            }
        }
    }
}

/// The validated layout of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadPlan {
    /// A verbatim buffer copy.
    Buffer {
        /// Bytes copied.
        size_bytes: u64,
    },
    /// A pitched texture copy.
    Texture(TexturePlan),
}

impl UploadPlan {
    /// Staging bytes the plan needs.
    pub fn total_bytes(&self) -> u64 {
        match self {
            UploadPlan::Buffer { size_bytes } => *size_bytes,
            UploadPlan::Texture(plan) => plan.total_bytes,
        }
    }
}

fn invalid(message: impl Into<String>) -> UploadError {
    UploadError::InvalidRequest(message.into())
}

/// Validates a request and computes its staging layout.
///
/// `source_len` is the length of view data, `None` for producers.
///
/// # Errors
///
/// [`UploadError::InvalidRequest`] when the request does not fit its
/// destination or the view data is too short.
pub fn plan(
    kind: UploadKind,
    target: &UploadTarget,
    source_len: Option<usize>,
    policy: &PackingPolicy,
) -> Result<UploadPlan, UploadError> {
    match (kind, target) {
        (UploadKind::Buffer, UploadTarget::Buffer(desc)) => plan_buffer(desc, source_len),
        (UploadKind::Buffer, UploadTarget::Texture(_)) => {
            Err(invalid("buffer upload with a texture target"))
        }
        (_, UploadTarget::Buffer(_)) => Err(invalid(format!(
            "{kind:?} upload with a buffer target"
        ))),
        (_, UploadTarget::Texture(desc)) => {
            plan_texture(kind, desc, source_len, policy).map(UploadPlan::Texture)
        }
    }
}

fn plan_buffer(desc: &UploadBufferDesc, source_len: Option<usize>) -> Result<UploadPlan, UploadError> {
    let name = &desc.dst.desc().debug_name;
    if desc.size_bytes == 0 {
        return Err(invalid(format!("zero-sized upload into '{name}'")));
    }
    if !desc.dst.desc().usage.contains(BufferUsage::COPY_DST) {
        return Err(invalid(format!("buffer '{name}' is not a copy destination")));
    }
    let fits = desc
        .dst_offset
        .checked_add(desc.size_bytes)
        .is_some_and(|end| end <= desc.dst.size());
    if !fits {
        return Err(invalid(format!(
            "upload of {} bytes at offset {} exceeds '{name}' ({} bytes)",
            desc.size_bytes,
            desc.dst_offset,
            desc.dst.size()
        )));
    }
    if let Some(len) = source_len {
        if len as u64 != desc.size_bytes {
            return Err(invalid(format!(
                "view of {len} bytes for an upload of {} bytes into '{name}'",
                desc.size_bytes
            )));
        }
    }
    Ok(UploadPlan::Buffer {
        size_bytes: desc.size_bytes,
    })
}

fn kind_matches(kind: UploadKind, texture_type: TextureType) -> bool {
    matches!(
        (kind, texture_type),
        (UploadKind::Texture1D, TextureType::Texture1D)
            | (UploadKind::Texture2D, TextureType::Texture2D)
            | (UploadKind::Texture3D, TextureType::Texture3D)
            | (UploadKind::TextureCube, TextureType::TextureCube)
            | (UploadKind::TextureCube, TextureType::TextureCubeArray)
    )
}

fn plan_texture(
    kind: UploadKind,
    desc: &UploadTextureDesc,
    source_len: Option<usize>,
    policy: &PackingPolicy,
) -> Result<TexturePlan, UploadError> {
    let tex = desc.dst.desc();
    let name = &tex.debug_name;
    if !kind_matches(kind, tex.texture_type) {
        return Err(invalid(format!(
            "{kind:?} upload into '{name}' of type {:?}",
            tex.texture_type
        )));
    }
    if desc.format != tex.format {
        return Err(invalid(format!(
            "format {:?} does not match '{name}' ({:?})",
            desc.format, tex.format
        )));
    }
    if (desc.width, desc.height, desc.depth) != (tex.width, tex.height, tex.depth) {
        return Err(invalid(format!(
            "extent {}x{}x{} does not match '{name}' ({}x{}x{})",
            desc.width, desc.height, desc.depth, tex.width, tex.height, tex.depth
        )));
    }

    let boxes: Vec<UploadSubresource> = if desc.subresources.is_empty() {
        (0..tex.array_layers)
            .flat_map(|slice| (0..tex.mip_levels).map(move |mip| UploadSubresource::full(mip, slice)))
            .collect()
    } else {
        desc.subresources.clone()
    };

    let info = tex.format.info();
    let (block_w, block_h) = (info.block_width, info.block_height);
    let mut footprints = Vec::with_capacity(boxes.len());
    let mut cursor = 0u64;
    let mut source_cursor = 0u64;

    for sub in &boxes {
        if sub.mip >= tex.mip_levels || sub.array_slice >= tex.array_layers {
            return Err(invalid(format!(
                "subresource (mip {}, slice {}) out of range for '{name}'",
                sub.mip, sub.array_slice
            )));
        }
        let (mip_w, mip_h, mip_d) = tex.mip_extent(sub.mip);
        let resolve = |size: u32, origin: u32, full: u32| if size == 0 { full.saturating_sub(origin) } else { size };
        let extent = (
            resolve(sub.width, sub.x, mip_w),
            resolve(sub.height, sub.y, mip_h),
            resolve(sub.depth, sub.z, mip_d),
        );
        let inside = |origin: u32, size: u32, full: u32| {
            size > 0 && origin.checked_add(size).is_some_and(|end| end <= full)
        };
        if !inside(sub.x, extent.0, mip_w) || !inside(sub.y, extent.1, mip_h) || !inside(sub.z, extent.2, mip_d) {
            return Err(invalid(format!(
                "region at ({}, {}, {}) of {}x{}x{} exceeds mip {} of '{name}' ({mip_w}x{mip_h}x{mip_d})",
                sub.x, sub.y, sub.z, extent.0, extent.1, extent.2, sub.mip
            )));
        }
        // Compressed regions start on block boundaries and cover whole blocks
        // unless they reach the edge of the mip.
        let block_aligned = |origin: u32, size: u32, full: u32, block: u32| {
            origin % block == 0 && (size % block == 0 || origin + size == full)
        };
        if !block_aligned(sub.x, extent.0, mip_w, block_w) || !block_aligned(sub.y, extent.1, mip_h, block_h) {
            return Err(invalid(format!(
                "region of '{name}' is not aligned to {block_w}x{block_h} blocks"
            )));
        }

        let blocks_wide = extent.0.div_ceil(block_w) as u64;
        let block_rows = extent.1.div_ceil(block_h);
        let row_bytes = blocks_wide * info.block_size as u64;
        let row_pitch = align_up(row_bytes, policy.row_pitch_alignment);
        let slice_pitch = row_pitch * block_rows as u64;
        let size_bytes = slice_pitch * extent.2 as u64;
        let offset = align_up(cursor, policy.placement_alignment);
        cursor = offset + size_bytes;

        let source_row_pitch = if sub.row_pitch == 0 { row_bytes } else { sub.row_pitch };
        let source_slice_pitch = if sub.slice_pitch == 0 {
            source_row_pitch * block_rows as u64
        } else {
            sub.slice_pitch
        };
        if source_row_pitch < row_bytes || source_slice_pitch < source_row_pitch * block_rows as u64 {
            return Err(invalid(format!(
                "source pitches ({}, {}) of '{name}' are smaller than one row ({row_bytes})",
                source_row_pitch, source_slice_pitch
            )));
        }

        footprints.push(SubresourceFootprint {
            mip: sub.mip,
            array_slice: sub.array_slice,
            origin: (sub.x, sub.y, sub.z),
            extent,
            offset,
            row_pitch,
            slice_pitch,
            size_bytes,
            row_bytes,
            block_rows,
            source_offset: source_cursor,
            source_row_pitch,
            source_slice_pitch,
        });
        source_cursor += source_slice_pitch * extent.2 as u64;
    }

    if let Some(len) = source_len {
        if (len as u64) < source_cursor {
            return Err(invalid(format!(
                "view of {len} bytes is shorter than the {source_cursor} bytes '{name}' needs"
            )));
        }
    }

    Ok(TexturePlan {
        footprints,
        total_bytes: cursor,
        source_bytes: source_cursor,
    })
}
