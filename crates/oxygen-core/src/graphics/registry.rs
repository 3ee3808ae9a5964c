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

//! The resource registry: live resources and the views bound to descriptor slots.

use super::descriptor::{DescriptorHandle, DescriptorIndex, DescriptorVisibility, ResourceViewType};
use super::error::GraphicsError;
use super::resources::{Resource, ResourceId, TextureFormat};
use crate::utils::lock;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

/// An opaque backend view object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeView(pub u64);

/// A view over a range of a buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BufferViewDesc {
    /// Kind of view.
    pub view_type: ResourceViewType,
    /// Heap the view lives in.
    pub visibility: DescriptorVisibility,
    /// First byte covered by the view.
    pub offset: u64,
    /// Bytes covered by the view.
    pub size: u64,
    /// Element stride for structured views, zero otherwise.
    pub stride: u32,
}

/// A view over a range of texture subresources.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureViewDesc {
    /// Kind of view.
    pub view_type: ResourceViewType,
    /// Heap the view lives in.
    pub visibility: DescriptorVisibility,
    /// Format the texels are read as.
    pub format: TextureFormat,
    /// First mip covered.
    pub first_mip: u32,
    /// Number of mips covered.
    pub mip_count: u32,
    /// First array slice covered.
    pub first_slice: u32,
    /// Number of array slices covered.
    pub slice_count: u32,
}

/// Describes a view of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ViewDesc {
    /// A buffer view.
    Buffer(BufferViewDesc),
    /// A texture view.
    Texture(TextureViewDesc),
}

impl ViewDesc {
    /// A shader-visible structured buffer SRV over `[0, size)`.
    pub fn structured_srv(size: u64, stride: u32) -> Self {
        ViewDesc::Buffer(BufferViewDesc {
            view_type: ResourceViewType::StructuredBufferSrv,
            visibility: DescriptorVisibility::ShaderVisible,
            offset: 0,
            size,
            stride,
        })
    }

    /// A shader-visible raw (byte address) buffer SRV over `[0, size)`.
    pub fn raw_srv(size: u64) -> Self {
        ViewDesc::Buffer(BufferViewDesc {
            view_type: ResourceViewType::RawBufferSrv,
            visibility: DescriptorVisibility::ShaderVisible,
            offset: 0,
            size,
            stride: 0,
        })
    }

    /// A shader-visible constant buffer view over `[0, size)`.
    pub fn constant_buffer(size: u64) -> Self {
        ViewDesc::Buffer(BufferViewDesc {
            view_type: ResourceViewType::ConstantBuffer,
            visibility: DescriptorVisibility::ShaderVisible,
            offset: 0,
            size,
            stride: 0,
        })
    }

    /// A shader-visible SRV over every subresource of a texture.
    pub fn texture_srv(format: TextureFormat, mip_count: u32, slice_count: u32) -> Self {
        ViewDesc::Texture(TextureViewDesc {
            view_type: ResourceViewType::TextureSrv,
            visibility: DescriptorVisibility::ShaderVisible,
            format,
            first_mip: 0,
            mip_count,
            first_slice: 0,
            slice_count,
        })
    }

    /// The kind of view.
    pub fn view_type(&self) -> ResourceViewType {
        match self {
            ViewDesc::Buffer(desc) => desc.view_type,
            ViewDesc::Texture(desc) => desc.view_type,
        }
    }

    /// The heap the view lives in.
    pub fn visibility(&self) -> DescriptorVisibility {
        match self {
            ViewDesc::Buffer(desc) => desc.visibility,
            ViewDesc::Texture(desc) => desc.visibility,
        }
    }
}

/// Backend seam creating native view objects in descriptor slots.
pub trait ViewFactory: Send + Sync {
    /// Writes a view of `resource` described by `desc` into slot `index`.
    fn create_view(
        &self,
        resource: &Resource,
        index: DescriptorIndex,
        desc: &ViewDesc,
    ) -> Result<NativeView, GraphicsError>;

    /// Destroys a view previously created in slot `index`.
    fn destroy_view(&self, view: NativeView, index: DescriptorIndex);
}

#[derive(Debug)]
struct BoundView {
    index: DescriptorIndex,
    native: NativeView,
}

#[derive(Debug)]
struct RegisteredResource {
    resource: Resource,
    views: HashMap<ViewDesc, BoundView>,
}

#[derive(Debug, Default)]
struct RegistryState {
    resources: HashMap<ResourceId, RegisteredResource>,
    slots: HashMap<DescriptorIndex, (ResourceId, ViewDesc)>,
}

/// Thread-safe map of live resources and the views bound to descriptor slots.
///
/// The registry owns the association between a resource and its descriptor
/// slots, not the slots themselves: those are released by their
/// [`DescriptorHandle`].
pub struct ResourceRegistry {
    factory: Option<Arc<dyn ViewFactory>>,
    state: Mutex<RegistryState>,
}

impl fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("ResourceRegistry")
            .field("resources", &state.resources.len())
            .field("views", &state.slots.len())
            .finish()
    }
}

impl ResourceRegistry {
    /// Creates a registry. Without a factory, views are recorded with a null
    /// native object.
    pub fn new(factory: Option<Arc<dyn ViewFactory>>) -> Self {
        Self {
            factory,
            state: Mutex::new(RegistryState::default()),
        }
    }

    fn create_native(
        &self,
        resource: &Resource,
        index: DescriptorIndex,
        desc: &ViewDesc,
    ) -> Result<NativeView, GraphicsError> {
        match &self.factory {
            Some(factory) => factory.create_view(resource, index, desc),
            None => Ok(NativeView(0)),
        }
    }

    fn destroy_native(&self, view: &BoundView) {
        if let Some(factory) = &self.factory {
            factory.destroy_view(view.native, view.index);
        }
    }

    /// Adds a resource to the live set.
    ///
    /// # Errors
    ///
    /// Fails if the resource is already registered.
    pub fn register(&self, resource: impl Into<Resource>) -> Result<(), GraphicsError> {
        let resource = resource.into();
        let mut state = lock(&self.state);
        if state.resources.contains_key(&resource.id()) {
            return Err(GraphicsError::ResourceRegistrationFailed(format!(
                "'{}' ({:?}) is already registered",
                resource.debug_name(),
                resource.id()
            )));
        }
        log::trace!("ResourceRegistry: registered '{}'", resource.debug_name());
        state.resources.insert(
            resource.id(),
            RegisteredResource {
                resource,
                views: HashMap::new(),
            },
        );
        Ok(())
    }

    /// Creates a view of a registered resource in `handle`'s descriptor slot.
    ///
    /// # Errors
    ///
    /// Fails if the resource is unknown, the handle is released, the handle's
    /// domain does not match `desc`, the slot is already bound, or the resource
    /// already has a view with the same description.
    pub fn register_view(
        &self,
        resource: ResourceId,
        handle: &DescriptorHandle,
        desc: ViewDesc,
    ) -> Result<NativeView, GraphicsError> {
        Self::check_handle(handle, &desc)?;
        let index = handle.index();

        let mut state = lock(&self.state);
        if let Some((owner, _)) = state.slots.get(&index) {
            return Err(GraphicsError::ResourceRegistrationFailed(format!(
                "descriptor {} is already bound to {owner:?}",
                index.0
            )));
        }
        let entry = state.resources.get(&resource).ok_or_else(|| {
            GraphicsError::ResourceRegistrationFailed(format!("{resource:?} is not registered"))
        })?;
        if entry.views.contains_key(&desc) {
            return Err(GraphicsError::ResourceRegistrationFailed(format!(
                "'{}' already has a {:?} view with this description",
                entry.resource.debug_name(),
                desc.view_type()
            )));
        }

        let native = self.create_native(&entry.resource, index, &desc)?;
        if let Some(entry) = state.resources.get_mut(&resource) {
            entry.views.insert(desc.clone(), BoundView { index, native });
        }
        state.slots.insert(index, (resource, desc));
        Ok(native)
    }

    fn check_handle(handle: &DescriptorHandle, desc: &ViewDesc) -> Result<(), GraphicsError> {
        if !handle.is_valid() {
            return Err(GraphicsError::InvalidRequest(
                "cannot bind a view to a released descriptor".to_string(),
            ));
        }
        if handle.view_type() != desc.view_type() || handle.visibility() != desc.visibility() {
            return Err(GraphicsError::InvalidRequest(format!(
                "descriptor domain ({:?}, {:?}) does not match view ({:?}, {:?})",
                handle.view_type(),
                handle.visibility(),
                desc.view_type(),
                desc.visibility()
            )));
        }
        Ok(())
    }

    /// Removes one view of a resource. Other views of the resource are kept.
    ///
    /// Returns `false` if no such view exists.
    pub fn unregister_view(&self, resource: ResourceId, desc: &ViewDesc) -> bool {
        let mut state = lock(&self.state);
        let Some(view) = state
            .resources
            .get_mut(&resource)
            .and_then(|entry| entry.views.remove(desc))
        else {
            return false;
        };
        state.slots.remove(&view.index);
        self.destroy_native(&view);
        true
    }

    /// Re-points the slot of `handle` at `new_resource`. The descriptor index
    /// does not change.
    ///
    /// # Errors
    ///
    /// Fails if `new_resource` is not registered or the handle does not match
    /// `desc`.
    pub fn update_view(
        &self,
        handle: &DescriptorHandle,
        new_resource: ResourceId,
        desc: ViewDesc,
    ) -> Result<NativeView, GraphicsError> {
        Self::check_handle(handle, &desc)?;
        let index = handle.index();

        let mut state = lock(&self.state);
        let target = state
            .resources
            .get(&new_resource)
            .map(|entry| entry.resource.clone())
            .ok_or_else(|| {
                GraphicsError::ResourceRegistrationFailed(format!(
                    "{new_resource:?} is not registered"
                ))
            })?;

        if let Some((old_owner, old_desc)) = state.slots.remove(&index) {
            if let Some(old) = state
                .resources
                .get_mut(&old_owner)
                .and_then(|entry| entry.views.remove(&old_desc))
            {
                self.destroy_native(&old);
            }
        }
        if let Some(stale) = state
            .resources
            .get_mut(&new_resource)
            .and_then(|entry| entry.views.remove(&desc))
        {
            // The new resource already had this view elsewhere; its old slot is unbound.
            state.slots.remove(&stale.index);
            self.destroy_native(&stale);
        }

        let native = self.create_native(&target, index, &desc)?;
        if let Some(entry) = state.resources.get_mut(&new_resource) {
            entry.views.insert(desc.clone(), BoundView { index, native });
        }
        state.slots.insert(index, (new_resource, desc));
        log::trace!(
            "ResourceRegistry: descriptor {} now views '{}'",
            index.0,
            target.debug_name()
        );
        Ok(native)
    }

    /// Removes a resource and every view bound to it. Returns the resource if
    /// it was registered.
    pub fn unregister_resource(&self, resource: ResourceId) -> Option<Resource> {
        let mut state = lock(&self.state);
        let entry = state.resources.remove(&resource)?;
        for view in entry.views.values() {
            state.slots.remove(&view.index);
            self.destroy_native(view);
        }
        log::trace!(
            "ResourceRegistry: unregistered '{}' ({} views)",
            entry.resource.debug_name(),
            entry.views.len()
        );
        Some(entry.resource)
    }

    /// Returns `true` if the resource is registered.
    pub fn contains(&self, resource: ResourceId) -> bool {
        lock(&self.state).resources.contains_key(&resource)
    }

    /// The descriptor slot holding the view of `resource` described by `desc`.
    pub fn find_view(&self, resource: ResourceId, desc: &ViewDesc) -> Option<DescriptorIndex> {
        lock(&self.state)
            .resources
            .get(&resource)
            .and_then(|entry| entry.views.get(desc))
            .map(|view| view.index)
    }

    /// The resource currently viewed by descriptor slot `index`.
    pub fn resource_at(&self, index: DescriptorIndex) -> Option<Resource> {
        let state = lock(&self.state);
        let (owner, _) = state.slots.get(&index)?;
        state.resources.get(owner).map(|entry| entry.resource.clone())
    }

    /// Number of registered resources.
    pub fn live_resource_count(&self) -> usize {
        lock(&self.state).resources.len()
    }

    /// Number of bound views.
    pub fn view_count(&self) -> usize {
        lock(&self.state).slots.len()
    }
}
