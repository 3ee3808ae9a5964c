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

//! Resource states, barrier descriptors and the per-command-list state tracker.

use super::error::GraphicsError;
use super::resources::{Resource, ResourceId};
use std::collections::HashMap;

crate::oxygen_bitflags! {
    /// The usage state a resource is in from the GPU's point of view.
    pub struct ResourceStates: u32 {
        /// Resting state; implicitly usable by copy queues.
        const COMMON = 1 << 0;
        /// Read as vertex or constant data.
        const VERTEX_AND_CONSTANT_BUFFER = 1 << 1;
        /// Read as index data.
        const INDEX_BUFFER = 1 << 2;
        /// Written as a color target.
        const RENDER_TARGET = 1 << 3;
        /// Read and written through unordered access views.
        const UNORDERED_ACCESS = 1 << 4;
        /// Written as a depth target.
        const DEPTH_WRITE = 1 << 5;
        /// Read-only depth.
        const DEPTH_READ = 1 << 6;
        /// Read by shaders through SRVs.
        const SHADER_RESOURCE = 1 << 7;
        /// Read as indirect arguments.
        const INDIRECT_ARGUMENT = 1 << 8;
        /// Destination of a copy.
        const COPY_DEST = 1 << 9;
        /// Source of a copy.
        const COPY_SOURCE = 1 << 10;
        /// Presented to a swapchain.
        const PRESENT = 1 << 11;
        /// Every read-only state; the resting state of upload memory.
        const GENERIC_READ = (1 << 1) | (1 << 2) | (1 << 7) | (1 << 8) | (1 << 10);
    }
}

impl ResourceStates {
    /// Returns `true` if the set contains a state the GPU writes in.
    pub const fn is_write(self) -> bool {
        self.intersects(
            ResourceStates::RENDER_TARGET
                .with(ResourceStates::UNORDERED_ACCESS)
                .with(ResourceStates::DEPTH_WRITE)
                .with(ResourceStates::COPY_DEST),
        )
    }
}

/// A barrier recorded into a command list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Barrier {
    /// State transition of a buffer.
    Buffer {
        /// The buffer.
        resource: ResourceId,
        /// State before the barrier.
        before: ResourceStates,
        /// State after the barrier.
        after: ResourceStates,
    },
    /// State transition of a texture.
    Texture {
        /// The texture.
        resource: ResourceId,
        /// State before the barrier.
        before: ResourceStates,
        /// State after the barrier.
        after: ResourceStates,
        /// A single subresource, or every subresource when `None`.
        subresource: Option<u32>,
    },
    /// Orders unordered-access writes on a resource without a transition.
    Memory {
        /// The resource.
        resource: ResourceId,
    },
}

impl Barrier {
    /// The resource this barrier applies to.
    pub fn resource(&self) -> ResourceId {
        match self {
            Barrier::Buffer { resource, .. }
            | Barrier::Texture { resource, .. }
            | Barrier::Memory { resource } => *resource,
        }
    }

    /// Returns `true` for memory barriers.
    pub fn is_memory(&self) -> bool {
        matches!(self, Barrier::Memory { .. })
    }

    fn transition(resource: ResourceId, is_texture: bool, before: ResourceStates, after: ResourceStates) -> Self {
        if is_texture {
            Barrier::Texture {
                resource,
                before,
                after,
                subresource: None,
            }
        } else {
            Barrier::Buffer {
                resource,
                before,
                after,
            }
        }
    }

    fn set_after(&mut self, state: ResourceStates) {
        match self {
            Barrier::Buffer { after, .. } | Barrier::Texture { after, .. } => *after = state,
            Barrier::Memory { .. } => {}
        }
    }

    fn is_noop(&self) -> bool {
        match self {
            Barrier::Buffer { before, after, .. } | Barrier::Texture { before, after, .. } => {
                before == after
            }
            Barrier::Memory { .. } => false,
        }
    }
}

/// How the tracker treats a resource's state across command lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackingMode {
    /// Whatever state the list leaves the resource in is kept.
    #[default]
    Default,
    /// The resource is transitioned back to its initial state when the list closes.
    KeepInitial,
    /// The resource never changes state; requesting a different one is an error.
    Permanent,
}

#[derive(Debug, Clone, Copy)]
struct TrackedResource {
    initial: ResourceStates,
    current: ResourceStates,
    mode: TrackingMode,
    is_texture: bool,
}

/// Tracks the last-known state of every resource used by one command list and
/// batches the transitions it needs.
///
/// Transitions requested for the same resource between two flushes are merged
/// into a single barrier going from the state at the start of the batch to the
/// last requested state.
#[derive(Debug, Default)]
pub struct ResourceStateTracker {
    tracked: HashMap<ResourceId, TrackedResource>,
    pending: Vec<Barrier>,
}

impl ResourceStateTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking `resource`, currently in `initial`.
    ///
    /// Tracking an already tracked resource keeps its current state.
    pub fn track_resource(&mut self, resource: &Resource, initial: ResourceStates, mode: TrackingMode) {
        self.tracked.entry(resource.id()).or_insert(TrackedResource {
            initial,
            current: initial,
            mode,
            is_texture: resource.is_texture(),
        });
    }

    /// Returns `true` if `resource` is tracked.
    pub fn is_tracked(&self, resource: ResourceId) -> bool {
        self.tracked.contains_key(&resource)
    }

    /// The last-known state of `resource`, pending barriers included.
    pub fn current_state(&self, resource: ResourceId) -> Option<ResourceStates> {
        self.tracked.get(&resource).map(|t| t.current)
    }

    /// Requests that `resource` be in `required` for the next command.
    ///
    /// # Errors
    ///
    /// [`GraphicsError::NotTracked`] for unknown resources and
    /// [`GraphicsError::InvalidStateTransition`] when a permanent resource is
    /// asked to change state. The latter also trips a debug assertion.
    pub fn require_resource_state(
        &mut self,
        resource: ResourceId,
        required: ResourceStates,
    ) -> Result<(), GraphicsError> {
        let tracked = self
            .tracked
            .get_mut(&resource)
            .ok_or(GraphicsError::NotTracked(resource))?;

        if required == ResourceStates::UNORDERED_ACCESS
            && tracked.current == ResourceStates::UNORDERED_ACCESS
        {
            if !self.pending.iter().any(|b| b.resource() == resource) {
                self.pending.push(Barrier::Memory { resource });
            }
            return Ok(());
        }

        if tracked.current.contains(required) {
            return Ok(());
        }

        if tracked.mode == TrackingMode::Permanent {
            log::error!(
                "ResourceStateTracker: {resource:?} is permanent in {:?}, refusing {required:?}",
                tracked.current
            );
            debug_assert!(false, "state change requested on a permanent resource");
            return Err(GraphicsError::InvalidStateTransition {
                resource,
                reason: format!(
                    "resource is permanent in {:?}, {required:?} was requested",
                    tracked.current
                ),
            });
        }

        let before = tracked.current;
        tracked.current = required;
        let is_texture = tracked.is_texture;
        self.push_transition(resource, is_texture, before, required);
        Ok(())
    }

    fn push_transition(
        &mut self,
        resource: ResourceId,
        is_texture: bool,
        before: ResourceStates,
        after: ResourceStates,
    ) {
        if let Some(position) = self
            .pending
            .iter()
            .position(|b| b.resource() == resource && !b.is_memory())
        {
            self.pending[position].set_after(after);
            if self.pending[position].is_noop() {
                self.pending.remove(position);
            }
        } else {
            // A transition already orders prior UAV work.
            self.pending
                .retain(|b| !(b.is_memory() && b.resource() == resource));
            self.pending
                .push(Barrier::transition(resource, is_texture, before, after));
        }
    }

    /// Returns `true` if barriers are waiting to be flushed.
    pub fn has_pending_barriers(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Takes the pending batch.
    pub fn flush(&mut self) -> Vec<Barrier> {
        std::mem::take(&mut self.pending)
    }

    /// Queues the transitions returning `KeepInitial` resources to their
    /// initial state. Called when the command list is closed.
    pub fn on_command_list_closed(&mut self) {
        let restores: Vec<_> = self
            .tracked
            .iter_mut()
            .filter(|(_, t)| t.mode == TrackingMode::KeepInitial && t.current != t.initial)
            .map(|(id, t)| {
                let before = t.current;
                t.current = t.initial;
                (*id, t.is_texture, before, t.initial)
            })
            .collect();
        for (resource, is_texture, before, after) in restores {
            self.push_transition(resource, is_texture, before, after);
        }
    }

    /// Forgets every tracked resource. Called once the list has been submitted.
    pub fn on_command_list_submitted(&mut self) {
        if !self.pending.is_empty() {
            log::warn!(
                "ResourceStateTracker: dropping {} unflushed barriers on submission",
                self.pending.len()
            );
        }
        self.pending.clear();
        self.tracked.clear();
    }
}
