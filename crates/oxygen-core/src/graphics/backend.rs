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

//! Defines the `Graphics` trait, the boundary every backend implements.

use super::command::{CommandList, CommandRecorder};
use super::descriptor::{BindlessDescriptorAllocator, DescriptorHandle, ShaderVisibleIndex};
use super::error::GraphicsError;
use super::queue::{CommandQueue, QueueManager, QueueRole, QueueStrategy};
use super::reclaimer::DeferredReclaimer;
use super::registry::{ResourceRegistry, ViewDesc};
use super::resources::{Buffer, BufferDesc, Resource, ResourceId, Texture, TextureDesc};
use crate::config::GraphicsConfig;
use std::sync::Arc;

/// The graphics device facade shared by the renderer and its subsystems.
///
/// A backend provides resource creation, the descriptor allocator, the
/// resource registry, the reclaimer and the queues; everything else is built
/// on top of those in the provided methods.
pub trait Graphics: Send + Sync {
    /// A human readable backend name.
    fn name(&self) -> &str;

    /// The configuration the backend was created with.
    fn config(&self) -> &GraphicsConfig;

    /// Creates a buffer.
    ///
    /// # Errors
    ///
    /// [`GraphicsError::ResourceCreationFailed`] if the backend refuses the descriptor.
    fn create_buffer(&self, desc: BufferDesc) -> Result<Arc<Buffer>, GraphicsError>;

    /// Creates a texture.
    fn create_texture(&self, desc: TextureDesc) -> Result<Arc<Texture>, GraphicsError>;

    /// The bindless descriptor allocator.
    fn descriptor_allocator(&self) -> &Arc<BindlessDescriptorAllocator>;

    /// The resource registry.
    fn resource_registry(&self) -> &Arc<ResourceRegistry>;

    /// The per-frame deferred reclaimer.
    fn deferred_reclaimer(&self) -> &Arc<DeferredReclaimer>;

    /// The queue manager.
    fn queue_manager(&self) -> &QueueManager;

    /// Creates the queues `strategy` asks for.
    fn create_command_queues(&self, strategy: &dyn QueueStrategy) -> Result<(), GraphicsError>;

    /// Holds a closed list for [`submit_deferred_command_lists`](Self::submit_deferred_command_lists).
    fn defer_command_list(&self, queue: Arc<dyn CommandQueue>, list: CommandList);

    /// Submits every deferred list in the order it was deferred.
    fn submit_deferred_command_lists(&self) -> Result<(), GraphicsError>;

    /// Looks a queue up by name.
    fn get_command_queue(&self, name: &str) -> Result<Arc<dyn CommandQueue>, GraphicsError> {
        self.queue_manager()
            .get_queue_by_name(name)
            .ok_or_else(|| GraphicsError::QueueNotFound(name.to_string()))
    }

    /// Looks a queue up by role.
    fn queue_by_role(&self, role: QueueRole) -> Result<Arc<dyn CommandQueue>, GraphicsError> {
        self.queue_manager()
            .get_queue_by_role(role)
            .ok_or_else(|| GraphicsError::QueueNotFound(format!("{role:?}")))
    }

    /// Starts recording a fresh command list for `queue`.
    fn acquire_command_recorder(
        &self,
        queue: Arc<dyn CommandQueue>,
        debug_name: &str,
    ) -> CommandRecorder {
        CommandRecorder::new(queue, debug_name)
    }

    /// Adds a resource to the registry.
    fn register_resource(&self, resource: Resource) -> Result<(), GraphicsError> {
        self.resource_registry().register(resource)
    }

    /// Removes a resource and its views from the registry.
    fn unregister_resource(&self, resource: ResourceId) -> Option<Resource> {
        self.resource_registry().unregister_resource(resource)
    }

    /// Allocates a descriptor in `desc`'s domain and binds a view of
    /// `resource` into it. The resource must be registered.
    fn allocate_view(
        &self,
        resource: &Resource,
        desc: ViewDesc,
    ) -> Result<DescriptorHandle, GraphicsError> {
        let handle = self
            .descriptor_allocator()
            .allocate(desc.view_type(), desc.visibility())?;
        self.resource_registry()
            .register_view(resource.id(), &handle, desc)?;
        Ok(handle)
    }

    /// The bindless index of a shader-visible handle.
    fn shader_visible_index(
        &self,
        handle: &DescriptorHandle,
    ) -> Result<ShaderVisibleIndex, GraphicsError> {
        self.descriptor_allocator().get_shader_visible_index(handle)
    }
}
