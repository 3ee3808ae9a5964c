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

use super::{BindlessDescriptorAllocator, DescriptorIndex, DescriptorVisibility, ResourceViewType};
use std::sync::Weak;

/// Owning handle to one descriptor slot.
///
/// Dropping the handle releases its index back to the allocator. The handle is
/// move-only and only weakly references its allocator, so it never keeps the
/// allocator alive.
#[derive(Debug)]
pub struct DescriptorHandle {
    allocator: Weak<BindlessDescriptorAllocator>,
    index: DescriptorIndex,
    view_type: ResourceViewType,
    visibility: DescriptorVisibility,
    valid: bool,
}

impl DescriptorHandle {
    pub(super) fn new(
        allocator: Weak<BindlessDescriptorAllocator>,
        index: DescriptorIndex,
        view_type: ResourceViewType,
        visibility: DescriptorVisibility,
    ) -> Self {
        Self {
            allocator,
            index,
            view_type,
            visibility,
            valid: true,
        }
    }

    /// The global index within the allocator's space.
    pub fn index(&self) -> DescriptorIndex {
        self.index
    }

    /// The view type of the owning domain.
    pub fn view_type(&self) -> ResourceViewType {
        self.view_type
    }

    /// The visibility of the owning domain.
    pub fn visibility(&self) -> DescriptorVisibility {
        self.visibility
    }

    /// Returns `true` if `allocator` handed out this handle.
    pub fn belongs_to(&self, allocator: &BindlessDescriptorAllocator) -> bool {
        std::ptr::eq(self.allocator.as_ptr(), allocator)
    }

    /// Returns `false` once the handle has been released or invalidated.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Releases the slot now. Returns `false` if it was already released.
    pub fn release(&mut self) -> bool {
        if !self.valid {
            return false;
        }
        self.valid = false;
        match self.allocator.upgrade() {
            Some(allocator) => allocator.release_index(self.index, self.view_type, self.visibility),
            None => {
                log::debug!(
                    "DescriptorHandle({}): allocator already dropped, nothing to release",
                    self.index.0
                );
                false
            }
        }
    }

    /// Forgets the slot without releasing it.
    pub fn invalidate(&mut self) {
        self.valid = false;
    }
}

impl Drop for DescriptorHandle {
    fn drop(&mut self) {
        self.release();
    }
}
