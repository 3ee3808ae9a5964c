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

//! Bindless descriptor management.
//!
//! Descriptor space is partitioned into *domains*, one per
//! ([`ResourceViewType`], [`DescriptorVisibility`]) pair. Each domain owns a
//! reserved, non-overlapping slice of a global index space and is served by
//! one or more [`DescriptorSegment`]s. The union of the shader-visible domains
//! is the bindless heap shaders index into.
//!
//! ```text
//! 0          4096             5120            6144 ...
//! | TextureSrv | StructuredSrv  |  RawBufferSrv  | ...
//! | seg0 seg1  | seg0           |  seg0          |
//! ```

mod allocator;
mod handle;
mod segment;
mod strategy;

pub use allocator::*;
pub use handle::*;
pub use segment::*;
pub use strategy::*;

use serde::{Deserialize, Serialize};

/// The kind of view a descriptor describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum ResourceViewType {
    TextureSrv,
    TextureUav,
    TypedBufferSrv,
    TypedBufferUav,
    RawBufferSrv,
    RawBufferUav,
    StructuredBufferSrv,
    StructuredBufferUav,
    ConstantBuffer,
    Sampler,
    TextureRtv,
    TextureDsv,
}

impl ResourceViewType {
    /// Every view type, in domain layout order.
    pub const ALL: [ResourceViewType; 12] = [
        ResourceViewType::TextureSrv,
        ResourceViewType::TextureUav,
        ResourceViewType::TypedBufferSrv,
        ResourceViewType::TypedBufferUav,
        ResourceViewType::RawBufferSrv,
        ResourceViewType::RawBufferUav,
        ResourceViewType::StructuredBufferSrv,
        ResourceViewType::StructuredBufferUav,
        ResourceViewType::ConstantBuffer,
        ResourceViewType::Sampler,
        ResourceViewType::TextureRtv,
        ResourceViewType::TextureDsv,
    ];

    /// Render-target and depth-stencil views never live in a shader-visible heap.
    pub const fn is_cpu_only(self) -> bool {
        matches!(self, ResourceViewType::TextureRtv | ResourceViewType::TextureDsv)
    }

    /// Returns `true` for views over textures.
    pub const fn is_texture_view(self) -> bool {
        matches!(
            self,
            ResourceViewType::TextureSrv
                | ResourceViewType::TextureUav
                | ResourceViewType::TextureRtv
                | ResourceViewType::TextureDsv
        )
    }
}

/// Whether a descriptor lives in a shader-visible heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DescriptorVisibility {
    /// Staging descriptors, never indexed by shaders.
    CpuOnly,
    /// Descriptors indexed by shaders through the bindless heap.
    ShaderVisible,
}

/// A global index in the allocator's space (`domain base + local offset`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorIndex(pub u32);

/// The index a shader uses to reach a descriptor in the bindless heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderVisibleIndex(pub u32);

impl ShaderVisibleIndex {
    /// Marker written into GPU tables for "no resource".
    pub const INVALID: ShaderVisibleIndex = ShaderVisibleIndex(u32::MAX);

    /// Returns the raw value as stored in GPU structures.
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Returns `true` unless this is [`ShaderVisibleIndex::INVALID`].
    pub const fn is_valid(self) -> bool {
        self.0 != u32::MAX
    }
}

impl Default for ShaderVisibleIndex {
    fn default() -> Self {
        ShaderVisibleIndex::INVALID
    }
}
