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

//! Element-grain allocation in a shader-visible structured buffer.

use crate::upload::UploadBufferDesc;
use oxygen_core::graphics::{
    Buffer, BufferDesc, BufferUsage, DescriptorHandle, FrameSlot, Graphics, GraphicsError,
    Resource, ShaderVisibleIndex, ViewDesc,
};
use oxygen_core::utils::lock;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors raised by [`AtlasBuffer`].
#[derive(Debug, Error)]
pub enum AtlasError {
    /// Every element is allocated; grow with [`AtlasBuffer::ensure_capacity`].
    #[error("Atlas '{0}' has no free element")]
    NoBufferSpace(String),
    /// Only single elements can be allocated.
    #[error("Atlas allocations of {0} elements are not supported")]
    UnsupportedCount(u32),
    /// The buffer has not been created yet.
    #[error("Atlas '{0}' has no buffer")]
    NotCreated(String),
    /// An element upload larger than the stride would spill into the next one.
    #[error("Atlas '{label}': {size_bytes} bytes do not fit a {stride}-byte element")]
    ElementOverflow {
        /// The atlas.
        label: String,
        /// Requested upload size.
        size_bytes: u64,
        /// Element stride.
        stride: u32,
    },
    /// Creating the buffer or its view failed.
    #[error("Graphics error: {0}")]
    Graphics(#[from] GraphicsError),
}

/// What [`AtlasBuffer::ensure_capacity`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureResult {
    /// The buffer was already large enough.
    Unchanged,
    /// The first buffer was created.
    Created,
    /// A larger buffer (with a new SRV) replaced the old one; live contents
    /// must be uploaded again.
    Resized,
}

/// An allocated element: the SRV of the buffer it lives in and its index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementRef {
    /// Bindless index of the buffer's structured SRV.
    pub srv_index: ShaderVisibleIndex,
    /// Element index inside the buffer.
    pub element_index: u32,
}

#[derive(Debug)]
struct AtlasState {
    buffer: Option<Arc<Buffer>>,
    srv: Option<DescriptorHandle>,
    srv_index: ShaderVisibleIndex,
    capacity: u32,
    next_index: u32,
    free_list: Vec<u32>,
    retire_lists: Vec<Vec<u32>>,
}

/// A device-local structured buffer handing out fixed-stride elements.
///
/// Released elements wait in the retire list of the frame slot they were
/// released against and return to the free list when that slot begins
/// again, so the GPU never sees an element rewritten while a frame that read
/// it may still be executing.
pub struct AtlasBuffer {
    graphics: Arc<dyn Graphics>,
    stride: u32,
    label: String,
    state: Mutex<AtlasState>,
}

impl std::fmt::Debug for AtlasBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("AtlasBuffer")
            .field("label", &self.label)
            .field("stride", &self.stride)
            .field("capacity", &state.capacity)
            .field("srv_index", &state.srv_index)
            .finish()
    }
}

impl AtlasBuffer {
    /// Creates an empty atlas of `stride`-byte elements.
    pub fn new(graphics: Arc<dyn Graphics>, stride: u32, label: impl Into<String>) -> Self {
        let frames_in_flight = graphics.config().frames_in_flight.max(1) as usize;
        Self {
            graphics,
            stride: stride.max(1),
            label: label.into(),
            state: Mutex::new(AtlasState {
                buffer: None,
                srv: None,
                srv_index: ShaderVisibleIndex::INVALID,
                capacity: 0,
                next_index: 0,
                free_list: Vec::new(),
                retire_lists: vec![Vec::new(); frames_in_flight],
            }),
        }
    }

    /// Element size in bytes.
    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// The label used for the buffer and logs.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Elements the current buffer holds.
    pub fn capacity(&self) -> u32 {
        lock(&self.state).capacity
    }

    /// Bindless index of the current buffer, or invalid before creation.
    pub fn srv_index(&self) -> ShaderVisibleIndex {
        lock(&self.state).srv_index
    }

    /// The current buffer.
    pub fn buffer(&self) -> Option<Arc<Buffer>> {
        lock(&self.state).buffer.clone()
    }

    /// Elements handed out and not yet returned to the free list.
    pub fn allocated_count(&self) -> u32 {
        let state = lock(&self.state);
        state.next_index - state.free_list.len() as u32
    }

    /// Elements waiting in the free list.
    pub fn free_count(&self) -> usize {
        lock(&self.state).free_list.len()
    }

    /// Makes room for at least `min_elements`, growing by `slack` (a
    /// fraction of `min_elements`) to amortize future growth.
    ///
    /// The replaced buffer and its SRV are released through the deferred
    /// reclaimer.
    pub fn ensure_capacity(&self, min_elements: u32, slack: f32) -> Result<EnsureResult, AtlasError> {
        let mut state = lock(&self.state);
        if state.buffer.is_some() && state.capacity >= min_elements {
            return Ok(EnsureResult::Unchanged);
        }

        let extra = (min_elements as f32 * slack.max(0.0)).ceil() as u32;
        let capacity = min_elements.saturating_add(extra).max(1);
        let size = capacity as u64 * self.stride as u64;
        let buffer = self.graphics.create_buffer(BufferDesc::device_local(
            size,
            BufferUsage::STORAGE | BufferUsage::COPY_DST | BufferUsage::COPY_SRC,
            self.label.clone(),
        ))?;
        let resource = Resource::from(&buffer);
        self.graphics.register_resource(resource.clone())?;
        let handle = self
            .graphics
            .allocate_view(&resource, ViewDesc::structured_srv(size, self.stride))?;
        let srv_index = self.graphics.shader_visible_index(&handle)?;

        let previous = state.buffer.replace(buffer).zip(state.srv.replace(handle));
        state.srv_index = srv_index;
        let old_capacity = std::mem::replace(&mut state.capacity, capacity);
        drop(state);

        match previous {
            Some((old_buffer, old_handle)) => {
                self.graphics.deferred_reclaimer().register_deferred_view_release(
                    self.graphics.resource_registry(),
                    Resource::from(old_buffer),
                    old_handle,
                );
                log::debug!(
                    "AtlasBuffer({}): grown from {old_capacity} to {capacity} elements (srv {})",
                    self.label,
                    srv_index.get()
                );
                Ok(EnsureResult::Resized)
            }
            None => {
                log::debug!(
                    "AtlasBuffer({}): created with {capacity} elements (srv {})",
                    self.label,
                    srv_index.get()
                );
                Ok(EnsureResult::Created)
            }
        }
    }

    /// Allocates `count` elements; only `count == 1` is supported.
    ///
    /// Reuses the most recently freed element before bumping.
    pub fn allocate(&self, count: u32) -> Result<ElementRef, AtlasError> {
        if count != 1 {
            return Err(AtlasError::UnsupportedCount(count));
        }
        let mut state = lock(&self.state);
        if state.buffer.is_none() {
            return Err(AtlasError::NotCreated(self.label.clone()));
        }
        let element_index = match state.free_list.pop() {
            Some(index) => index,
            None if state.next_index < state.capacity => {
                state.next_index += 1;
                state.next_index - 1
            }
            None => return Err(AtlasError::NoBufferSpace(self.label.clone())),
        };
        Ok(ElementRef {
            srv_index: state.srv_index,
            element_index,
        })
    }

    /// Returns an element once `slot` comes around again.
    pub fn release(&self, element: ElementRef, slot: FrameSlot) {
        let mut state = lock(&self.state);
        let count = state.retire_lists.len();
        state.retire_lists[slot.index() % count].push(element.element_index);
    }

    /// Moves the elements released against `slot` into the free list.
    pub fn on_frame_start(&self, slot: FrameSlot) {
        let mut state = lock(&self.state);
        let count = state.retire_lists.len();
        let retired = std::mem::take(&mut state.retire_lists[slot.index() % count]);
        if !retired.is_empty() {
            log::trace!(
                "AtlasBuffer({}): recycled {} elements for slot {}",
                self.label,
                retired.len(),
                slot.0
            );
        }
        state.free_list.extend(retired);
    }

    /// The upload target of one element; `size_bytes` may not exceed the stride.
    pub fn make_upload_desc(&self, element: ElementRef, size_bytes: u64) -> Result<UploadBufferDesc, AtlasError> {
        if size_bytes > self.stride as u64 {
            return Err(AtlasError::ElementOverflow {
                label: self.label.clone(),
                size_bytes,
                stride: self.stride,
            });
        }
        self.make_run_upload_desc(element.element_index, 1)
            .map(|desc| UploadBufferDesc { size_bytes, ..desc })
    }

    /// The upload target of `count` consecutive elements starting at `first`.
    pub fn make_run_upload_desc(&self, first: u32, count: u32) -> Result<UploadBufferDesc, AtlasError> {
        let state = lock(&self.state);
        let dst = state
            .buffer
            .clone()
            .ok_or_else(|| AtlasError::NotCreated(self.label.clone()))?;
        Ok(UploadBufferDesc {
            dst,
            size_bytes: count as u64 * self.stride as u64,
            dst_offset: first as u64 * self.stride as u64,
        })
    }
}

impl Drop for AtlasBuffer {
    fn drop(&mut self) {
        let state = match self.state.get_mut() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let (Some(buffer), Some(handle)) = (state.buffer.take(), state.srv.take()) {
            self.graphics.deferred_reclaimer().register_deferred_view_release(
                self.graphics.resource_registry(),
                Resource::from(buffer),
                handle,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxygen_core::config::GraphicsConfig;
    use oxygen_infra::HeadlessGraphics;

    fn atlas() -> (Arc<HeadlessGraphics>, AtlasBuffer) {
        let graphics = HeadlessGraphics::new(GraphicsConfig::default()).unwrap();
        let atlas = AtlasBuffer::new(graphics.clone(), 64, "TestAtlas");
        (graphics, atlas)
    }

    #[test]
    fn allocate_before_creation_fails() {
        let (_graphics, atlas) = atlas();
        assert!(matches!(atlas.allocate(1), Err(AtlasError::NotCreated(_))));
    }

    #[test]
    fn ensure_capacity_reports_what_it_did() {
        let (_graphics, atlas) = atlas();
        assert_eq!(atlas.ensure_capacity(4, 0.25).unwrap(), EnsureResult::Created);
        assert_eq!(atlas.capacity(), 5);
        assert_eq!(atlas.ensure_capacity(5, 0.25).unwrap(), EnsureResult::Unchanged);

        let before = atlas.srv_index();
        assert_eq!(atlas.ensure_capacity(8, 0.0).unwrap(), EnsureResult::Resized);
        assert_ne!(atlas.srv_index(), before);
        assert_eq!(atlas.capacity(), 8);
    }

    #[test]
    fn replaced_buffer_is_released_through_the_reclaimer() {
        let (graphics, atlas) = atlas();
        atlas.ensure_capacity(1, 0.0).unwrap();
        atlas.ensure_capacity(2, 0.0).unwrap();
        assert_eq!(graphics.resource_registry().live_resource_count(), 2);

        graphics.deferred_reclaimer().process_all_deferred_releases();
        assert_eq!(graphics.resource_registry().live_resource_count(), 1);
    }

    #[test]
    fn full_atlas_has_no_space() {
        let (_graphics, atlas) = atlas();
        atlas.ensure_capacity(1, 0.0).unwrap();
        atlas.allocate(1).unwrap();
        assert!(matches!(atlas.allocate(1), Err(AtlasError::NoBufferSpace(_))));
        assert!(matches!(atlas.allocate(2), Err(AtlasError::UnsupportedCount(2))));
    }

    #[test]
    fn released_elements_wait_for_their_slot() {
        let (_graphics, atlas) = atlas();
        atlas.ensure_capacity(2, 0.0).unwrap();
        let element = atlas.allocate(1).unwrap();
        assert_eq!(element.element_index, 0);

        atlas.on_frame_start(FrameSlot(1));
        atlas.release(element, FrameSlot(1));

        atlas.on_frame_start(FrameSlot(0));
        assert_eq!(atlas.free_count(), 0);
        assert_eq!(atlas.allocate(1).unwrap().element_index, 1);

        atlas.on_frame_start(FrameSlot(1));
        assert_eq!(atlas.free_count(), 1);
        assert_eq!(atlas.allocate(1).unwrap().element_index, 0);
    }

    #[test]
    fn upload_desc_targets_the_element() {
        let (_graphics, atlas) = atlas();
        atlas.ensure_capacity(4, 0.0).unwrap();
        atlas.allocate(1).unwrap();
        let element = atlas.allocate(1).unwrap();
        let desc = atlas.make_upload_desc(element, 48).unwrap();
        assert_eq!(desc.dst_offset, 64);
        assert_eq!(desc.size_bytes, 48);
    }

    #[test]
    fn upload_desc_rejects_sizes_past_the_stride() {
        let (_graphics, atlas) = atlas();
        atlas.ensure_capacity(2, 0.0).unwrap();
        let element = atlas.allocate(1).unwrap();
        assert!(atlas.make_upload_desc(element, 64).is_ok());
        assert!(matches!(
            atlas.make_upload_desc(element, 65),
            Err(AtlasError::ElementOverflow { size_bytes: 65, stride: 64, .. })
        ));
    }
}
