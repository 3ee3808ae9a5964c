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

//! A descriptor heap kept as a table of views.

use oxygen_core::graphics::{
    DescriptorHeapBackend, DescriptorIndex, DescriptorSegment, GraphicsError, NativeView,
    Resource, ResourceId, ViewDesc, ViewFactory,
};
use oxygen_core::utils::lock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

/// The view written into one descriptor slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadlessView {
    /// The viewed resource.
    pub resource: ResourceId,
    /// The view description.
    pub desc: ViewDesc,
    /// The native handle returned to the registry.
    pub native: NativeView,
}

/// Mirrors the bindless allocator and the resource registry into a table
/// keyed by descriptor index.
#[derive(Debug, Default)]
pub struct HeadlessDescriptorHeap {
    views: Mutex<HashMap<DescriptorIndex, HeadlessView>>,
    next_view: AtomicU64,
    segments: AtomicUsize,
}

impl HeadlessDescriptorHeap {
    /// Creates an empty heap.
    pub fn new() -> Self {
        Self::default()
    }

    /// The view stored at `index`, if any.
    pub fn view_at(&self, index: DescriptorIndex) -> Option<HeadlessView> {
        lock(&self.views).get(&index).cloned()
    }

    /// Number of occupied slots.
    pub fn view_count(&self) -> usize {
        lock(&self.views).len()
    }

    /// Number of segments the allocator has provisioned.
    pub fn segment_count(&self) -> usize {
        self.segments.load(Ordering::Relaxed)
    }
}

impl DescriptorHeapBackend for HeadlessDescriptorHeap {
    fn on_segment_created(&self, segment: &DescriptorSegment) {
        self.segments.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "HeadlessDescriptorHeap: segment [{}, +{}) for ({:?}, {:?})",
            segment.base_index(),
            segment.capacity(),
            segment.view_type(),
            segment.visibility()
        );
    }

    fn copy_descriptor(
        &self,
        dst: DescriptorIndex,
        src: DescriptorIndex,
    ) -> Result<(), GraphicsError> {
        let mut views = lock(&self.views);
        let view = views.get(&src).cloned().ok_or_else(|| {
            GraphicsError::InvalidRequest(format!("descriptor {} holds no view to copy", src.0))
        })?;
        views.insert(dst, view);
        Ok(())
    }
}

impl ViewFactory for HeadlessDescriptorHeap {
    fn create_view(
        &self,
        resource: &Resource,
        index: DescriptorIndex,
        desc: &ViewDesc,
    ) -> Result<NativeView, GraphicsError> {
        let native = NativeView(self.next_view.fetch_add(1, Ordering::Relaxed) + 1);
        lock(&self.views).insert(
            index,
            HeadlessView {
                resource: resource.id(),
                desc: desc.clone(),
                native,
            },
        );
        Ok(native)
    }

    fn destroy_view(&self, view: NativeView, index: DescriptorIndex) {
        let mut views = lock(&self.views);
        if views.get(&index).is_some_and(|slot| slot.native == view) {
            views.remove(&index);
        }
    }
}
