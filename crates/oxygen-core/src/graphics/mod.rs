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

//! Backend-agnostic graphics contracts.
//!
//! Everything in this module is expressed in terms of opaque ids, `Arc` owned
//! resources and small traits at the backend seams ([`Graphics`],
//! [`CommandQueue`], [`ViewFactory`], [`DescriptorHeapBackend`]). A concrete
//! backend lives in `oxygen-infra`.

pub mod backend;
pub mod command;
pub mod descriptor;
pub mod error;
pub mod fence;
pub mod frame;
pub mod queue;
pub mod reclaimer;
pub mod registry;
pub mod resources;
pub mod state;

pub use backend::Graphics;
pub use command::{
    BufferTextureCopyRegion, ClearFlags, Command, CommandList, CommandRecorder, Framebuffer,
};
pub use descriptor::{
    BindlessDescriptorAllocator, DescriptorHandle, DescriptorHeapBackend, DescriptorHeapStrategy,
    DescriptorIndex, DescriptorSegment, DescriptorVisibility, ResourceViewType, ShaderVisibleIndex,
};
pub use error::GraphicsError;
pub use fence::{FenceValue, Timeline};
pub use frame::{FrameSequence, FrameSlot, MAX_FRAMES_IN_FLIGHT};
pub use queue::{
    strategy_from_config, CommandQueue, MultiQueueStrategy, QueueAllocationPreference,
    QueueManager, QueueRole, QueueSharingPreference, QueueSpecification, QueueStrategy,
    SingleQueueStrategy,
};
pub use reclaimer::{DeferredReclaimer, Releasable};
pub use registry::{
    BufferViewDesc, NativeView, ResourceRegistry, TextureViewDesc, ViewDesc, ViewFactory,
};
pub use resources::{
    Buffer, BufferDesc, BufferUsage, FormatInfo, MemoryLocation, NativeBuffer, NativeTexture,
    Resource, ResourceId, Texture, TextureDesc, TextureFormat, TextureType,
};
pub use state::{Barrier, ResourceStateTracker, ResourceStates, TrackingMode};
