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

//! Texture descriptors, formats and the backend-neutral texture object.

use super::ResourceId;
use std::any::Any;
use std::fmt;

/// The dimensionality of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureType {
    /// One-dimensional texture.
    Texture1D,
    /// Two-dimensional texture.
    #[default]
    Texture2D,
    /// Volume texture.
    Texture3D,
    /// Cube map; `array_layers` is a multiple of six.
    TextureCube,
    /// Array of cube maps.
    TextureCubeArray,
}

/// Pixel formats supported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[allow(missing_docs)]
pub enum TextureFormat {
    R8Unorm,
    Rg8Unorm,
    #[default]
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    R16Float,
    Rgba16Float,
    R32Float,
    Rgba32Float,
    Depth32Float,
    Depth24Stencil8,
    Bc1Unorm,
    Bc3Unorm,
    Bc7Unorm,
}

/// Block layout of a format. Uncompressed formats use 1x1 blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatInfo {
    /// Bytes per block.
    pub block_size: u32,
    /// Block width in texels.
    pub block_width: u32,
    /// Block height in texels.
    pub block_height: u32,
}

impl TextureFormat {
    /// Returns the block layout of the format.
    pub const fn info(self) -> FormatInfo {
        let (block_size, block_width, block_height) = match self {
            TextureFormat::R8Unorm => (1, 1, 1),
            TextureFormat::Rg8Unorm | TextureFormat::R16Float => (2, 1, 1),
            TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8UnormSrgb
            | TextureFormat::Bgra8Unorm
            | TextureFormat::R32Float
            | TextureFormat::Depth32Float
            | TextureFormat::Depth24Stencil8 => (4, 1, 1),
            TextureFormat::Rgba16Float => (8, 1, 1),
            TextureFormat::Rgba32Float => (16, 1, 1),
            TextureFormat::Bc1Unorm => (8, 4, 4),
            TextureFormat::Bc3Unorm | TextureFormat::Bc7Unorm => (16, 4, 4),
        };
        FormatInfo {
            block_size,
            block_width,
            block_height,
        }
    }

    /// Returns `true` for depth and depth-stencil formats.
    pub const fn is_depth(self) -> bool {
        matches!(
            self,
            TextureFormat::Depth32Float | TextureFormat::Depth24Stencil8
        )
    }

    /// Returns `true` for block-compressed formats.
    pub const fn is_compressed(self) -> bool {
        self.info().block_width > 1
    }
}

/// Describes a texture to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureDesc {
    /// Width of mip 0 in texels.
    pub width: u32,
    /// Height of mip 0 in texels.
    pub height: u32,
    /// Depth of mip 0 (volume textures), 1 otherwise.
    pub depth: u32,
    /// Number of array layers (6 per cube).
    pub array_layers: u32,
    /// Number of mip levels.
    pub mip_levels: u32,
    /// MSAA sample count.
    pub sample_count: u32,
    /// Pixel format.
    pub format: TextureFormat,
    /// Dimensionality.
    pub texture_type: TextureType,
    /// Whether the texture may be bound as a render target or depth target.
    pub is_render_target: bool,
    /// A label for logging and debugging tools.
    pub debug_name: String,
}

impl TextureDesc {
    /// A single-mip 2D texture.
    pub fn texture_2d(width: u32, height: u32, format: TextureFormat, debug_name: &str) -> Self {
        Self {
            width,
            height,
            depth: 1,
            array_layers: 1,
            mip_levels: 1,
            sample_count: 1,
            format,
            texture_type: TextureType::Texture2D,
            is_render_target: false,
            debug_name: debug_name.to_string(),
        }
    }

    /// The subresource index of (`mip`, `array_slice`): `mip + array_slice * mip_levels`.
    pub fn subresource_index(&self, mip: u32, array_slice: u32) -> u32 {
        mip + array_slice * self.mip_levels
    }

    /// The number of subresources (mips times layers).
    pub fn subresource_count(&self) -> u32 {
        self.mip_levels * self.array_layers
    }

    /// The extent of `mip`, clamped to one texel per axis.
    pub fn mip_extent(&self, mip: u32) -> (u32, u32, u32) {
        let depth = match self.texture_type {
            TextureType::Texture3D => (self.depth >> mip).max(1),
            _ => 1,
        };
        ((self.width >> mip).max(1), (self.height >> mip).max(1), depth)
    }
}

/// The backend half of a texture.
pub trait NativeTexture: Send + Sync + fmt::Debug {
    /// Returns `self` for backend downcasts.
    fn as_any(&self) -> &dyn Any;
}

/// A GPU texture. Shared through `Arc`.
#[derive(Debug)]
pub struct Texture {
    id: ResourceId,
    desc: TextureDesc,
    native: Box<dyn NativeTexture>,
}

impl Texture {
    /// Wraps a backend texture. Called by backends only.
    pub fn new(id: ResourceId, desc: TextureDesc, native: Box<dyn NativeTexture>) -> Self {
        Self { id, desc, native }
    }

    /// The resource id.
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// The creation descriptor.
    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }

    /// The backend object.
    pub fn native(&self) -> &dyn NativeTexture {
        self.native.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subresource_index_is_layer_major() {
        let mut desc = TextureDesc::texture_2d(64, 64, TextureFormat::Rgba8Unorm, "t");
        desc.mip_levels = 4;
        desc.array_layers = 6;
        desc.texture_type = TextureType::TextureCube;
        assert_eq!(desc.subresource_index(0, 0), 0);
        assert_eq!(desc.subresource_index(3, 0), 3);
        assert_eq!(desc.subresource_index(1, 2), 9);
        assert_eq!(desc.subresource_count(), 24);
    }

    #[test]
    fn mip_extent_clamps_to_one() {
        let mut desc = TextureDesc::texture_2d(8, 2, TextureFormat::Rgba8Unorm, "t");
        desc.mip_levels = 4;
        assert_eq!(desc.mip_extent(0), (8, 2, 1));
        assert_eq!(desc.mip_extent(2), (2, 1, 1));
        assert_eq!(desc.mip_extent(3), (1, 1, 1));
    }

    #[test]
    fn block_compressed_info() {
        let bc1 = TextureFormat::Bc1Unorm.info();
        assert_eq!((bc1.block_size, bc1.block_width, bc1.block_height), (8, 4, 4));
        assert!(TextureFormat::Bc7Unorm.is_compressed());
        assert!(!TextureFormat::Rgba8Unorm.is_compressed());
        assert!(TextureFormat::Depth32Float.is_depth());
    }
}
