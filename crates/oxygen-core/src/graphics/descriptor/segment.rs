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

//! Fixed-range bump + free-list allocator over one contiguous index window.

use super::{DescriptorIndex, DescriptorVisibility, ResourceViewType};
use crate::utils::lock;
use std::sync::Mutex;

#[derive(Debug)]
struct SegmentState {
    /// One bit per local index; set while allocated.
    occupancy: Vec<u8>,
    /// Released local indices, reused LIFO.
    free_list: Vec<u32>,
    /// Next never-used local index.
    bump: u32,
    allocated: u32,
}

impl SegmentState {
    fn is_set(&self, local: u32) -> bool {
        self.occupancy[(local / 8) as usize] & (1 << (local % 8)) != 0
    }

    fn set(&mut self, local: u32, value: bool) {
        let byte = &mut self.occupancy[(local / 8) as usize];
        if value {
            *byte |= 1 << (local % 8);
        } else {
            *byte &= !(1 << (local % 8));
        }
    }
}

/// Owns the range `[base, base + capacity)` of one descriptor domain.
///
/// Allocation prefers the most recently released index, then the bump cursor.
/// Safe for concurrent use.
#[derive(Debug)]
pub struct DescriptorSegment {
    view_type: ResourceViewType,
    visibility: DescriptorVisibility,
    base: u32,
    capacity: u32,
    state: Mutex<SegmentState>,
}

impl DescriptorSegment {
    /// Creates an empty segment.
    pub fn new(
        capacity: u32,
        base: u32,
        view_type: ResourceViewType,
        visibility: DescriptorVisibility,
    ) -> Self {
        Self {
            view_type,
            visibility,
            base,
            capacity,
            state: Mutex::new(SegmentState {
                occupancy: vec![0; capacity.div_ceil(8) as usize],
                free_list: Vec::new(),
                bump: 0,
                allocated: 0,
            }),
        }
    }

    /// Allocates one index, or returns `None` when the segment is full.
    pub fn allocate(&self) -> Option<DescriptorIndex> {
        let mut state = lock(&self.state);
        let local = if let Some(local) = state.free_list.pop() {
            local
        } else if state.bump < self.capacity {
            let local = state.bump;
            state.bump += 1;
            local
        } else {
            return None;
        };
        state.set(local, true);
        state.allocated += 1;
        Some(DescriptorIndex(self.base + local))
    }

    /// Releases a global index previously returned by [`allocate`](Self::allocate).
    ///
    /// Returns `false`, leaving the segment untouched, if the index lies
    /// outside the segment or is not currently allocated.
    pub fn release(&self, index: DescriptorIndex) -> bool {
        if !self.contains(index) {
            log::warn!(
                "DescriptorSegment({:?}/{:?}): index {} is outside [{}, {})",
                self.view_type,
                self.visibility,
                index.0,
                self.base,
                self.base + self.capacity
            );
            return false;
        }
        let local = index.0 - self.base;
        let mut state = lock(&self.state);
        if !state.is_set(local) {
            log::warn!(
                "DescriptorSegment({:?}/{:?}): index {} released twice",
                self.view_type,
                self.visibility,
                index.0
            );
            return false;
        }
        state.set(local, false);
        state.free_list.push(local);
        state.allocated -= 1;
        true
    }

    /// Returns `true` if `index` lies in this segment's range.
    pub fn contains(&self, index: DescriptorIndex) -> bool {
        index.0 >= self.base && index.0 - self.base < self.capacity
    }

    /// Returns `true` if `index` is currently allocated.
    pub fn is_allocated(&self, index: DescriptorIndex) -> bool {
        self.contains(index) && lock(&self.state).is_set(index.0 - self.base)
    }

    /// Number of indices still available.
    pub fn available(&self) -> u32 {
        self.capacity - lock(&self.state).allocated
    }

    /// Number of indices currently allocated.
    pub fn allocated_count(&self) -> u32 {
        lock(&self.state).allocated
    }

    /// Number of released indices waiting for reuse.
    pub fn free_list_len(&self) -> usize {
        lock(&self.state).free_list.len()
    }

    /// First global index of the segment.
    pub fn base_index(&self) -> u32 {
        self.base
    }

    /// Number of indices in the segment.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// The view type served by this segment.
    pub fn view_type(&self) -> ResourceViewType {
        self.view_type
    }

    /// The visibility of this segment.
    pub fn visibility(&self) -> DescriptorVisibility {
        self.visibility
    }
}
