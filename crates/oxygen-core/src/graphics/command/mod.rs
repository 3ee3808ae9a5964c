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

//! Defines the in-stream commands recorded into a [`CommandList`] and the
//! [`CommandRecorder`] that records them.

mod list;
mod recorder;

pub use list::CommandList;
pub use recorder::CommandRecorder;

use super::descriptor::DescriptorIndex;
use super::fence::{FenceValue, Timeline};
use super::resources::{Buffer, Texture};
use super::state::Barrier;
use std::sync::Arc;

crate::oxygen_bitflags! {
    /// Which aspects of a depth-stencil view a clear touches.
    pub struct ClearFlags: u8 {
        /// Clear depth.
        const DEPTH = 1 << 0;
        /// Clear stencil.
        const STENCIL = 1 << 1;
    }
}

/// One region of a buffer-to-texture copy.
///
/// Zero `width`, `height` or `depth` mean "the full extent of the subresource".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferTextureCopyRegion {
    /// Offset of the first texel block in the source buffer.
    pub buffer_offset: u64,
    /// Bytes between two rows of blocks in the source buffer.
    pub buffer_row_pitch: u64,
    /// Bytes between two depth slices in the source buffer.
    pub buffer_slice_pitch: u64,
    /// Destination mip.
    pub mip_level: u32,
    /// Destination array slice.
    pub array_slice: u32,
    /// Destination x offset in texels.
    pub x: u32,
    /// Destination y offset in texels.
    pub y: u32,
    /// Destination z offset in texels.
    pub z: u32,
    /// Copied width in texels.
    pub width: u32,
    /// Copied height in texels.
    pub height: u32,
    /// Copied depth in texels.
    pub depth: u32,
}

/// Color and depth attachments cleared or rendered together.
#[derive(Debug, Clone, Default)]
pub struct Framebuffer {
    /// Color targets.
    pub color_attachments: Vec<Arc<Texture>>,
    /// Optional depth target.
    pub depth_attachment: Option<Arc<Texture>>,
}

/// A recorded GPU operation, executed in order by the queue.
#[derive(Debug, Clone)]
pub enum Command {
    /// A batch of barriers.
    Barriers(Vec<Barrier>),
    /// Buffer to buffer copy.
    CopyBuffer {
        /// Destination buffer.
        dst: Arc<Buffer>,
        /// Destination offset.
        dst_offset: u64,
        /// Source buffer.
        src: Arc<Buffer>,
        /// Source offset.
        src_offset: u64,
        /// Bytes copied.
        size: u64,
    },
    /// Buffer to texture copy.
    CopyBufferToTexture {
        /// Source buffer.
        src: Arc<Buffer>,
        /// Destination texture.
        dst: Arc<Texture>,
        /// Copied regions.
        regions: Vec<BufferTextureCopyRegion>,
    },
    /// Clears framebuffer attachments.
    ClearFramebuffer {
        /// The framebuffer.
        framebuffer: Framebuffer,
        /// Per color attachment clear color, `None` to leave it untouched.
        colors: Vec<Option<[f32; 4]>>,
        /// Depth clear value.
        depth: Option<f32>,
        /// Stencil clear value.
        stencil: Option<u8>,
    },
    /// Clears a depth-stencil view.
    ClearDepthStencil {
        /// The depth texture.
        texture: Arc<Texture>,
        /// The DSV slot.
        dsv: DescriptorIndex,
        /// Aspects cleared.
        flags: ClearFlags,
        /// Depth value.
        depth: f32,
        /// Stencil value.
        stencil: u8,
    },
    /// Non-indexed draw.
    Draw {
        /// Vertices per instance.
        vertex_count: u32,
        /// Instances.
        instance_count: u32,
        /// First vertex.
        first_vertex: u32,
        /// First instance.
        first_instance: u32,
    },
    /// Indexed draw.
    DrawIndexed {
        /// Indices per instance.
        index_count: u32,
        /// Instances.
        instance_count: u32,
        /// First index.
        first_index: u32,
        /// Added to every index.
        base_vertex: i32,
        /// First instance.
        first_instance: u32,
    },
    /// Compute dispatch.
    Dispatch {
        /// Thread groups along x.
        x: u32,
        /// Thread groups along y.
        y: u32,
        /// Thread groups along z.
        z: u32,
    },
    /// Sets a 32-bit root constant, typically a bindless index.
    SetRootConstant {
        /// Root slot.
        slot: u32,
        /// Value.
        value: u32,
    },
    /// Signals the executing queue's timeline.
    Signal(FenceValue),
    /// Waits until another timeline reaches a value.
    Wait {
        /// The awaited timeline.
        timeline: Arc<Timeline>,
        /// The awaited value.
        value: FenceValue,
    },
}
