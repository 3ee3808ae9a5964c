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

//! Per-frame scene constants.
//!
//! [`SceneConstants`] is the CPU authoring side: its setters bump a version
//! and the 256-byte [`GpuSceneConstants`] snapshot is rebuilt lazily when the
//! version moved. [`SceneConstantsRing`] holds one host-visible constant
//! buffer per frame slot that the snapshot is written into.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use oxygen_core::graphics::{
    Buffer, BufferDesc, DescriptorHandle, FrameSequence, FrameSlot, Graphics, GraphicsError,
    Resource, ShaderVisibleIndex, ViewDesc,
};
use std::sync::Arc;

/// Proof of being the renderer. Only the render agent can create one, so
/// only the render agent can author scene constants.
#[derive(Debug, Clone, Copy)]
pub struct RendererTag {
    _private: (),
}

impl RendererTag {
    pub(crate) fn new() -> Self {
        Self { _private: () }
    }
}

/// Bindless indices of the tables shaders read during a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindlessIndices {
    /// Draw metadata records.
    pub draw_metadata: ShaderVisibleIndex,
    /// World matrices.
    pub transforms: ShaderVisibleIndex,
    /// Normal matrices.
    pub normals: ShaderVisibleIndex,
    /// Material constants.
    pub materials: ShaderVisibleIndex,
    /// Static environment data.
    pub env_static: ShaderVisibleIndex,
    /// Directional lights.
    pub directional_lights: ShaderVisibleIndex,
    /// Directional light shadow parameters.
    pub directional_shadows: ShaderVisibleIndex,
    /// Point and spot lights.
    pub positional_lights: ShaderVisibleIndex,
    /// Per-draw instance bindings.
    pub instance_data: ShaderVisibleIndex,
}

impl Default for BindlessIndices {
    fn default() -> Self {
        Self {
            draw_metadata: ShaderVisibleIndex::INVALID,
            transforms: ShaderVisibleIndex::INVALID,
            normals: ShaderVisibleIndex::INVALID,
            materials: ShaderVisibleIndex::INVALID,
            env_static: ShaderVisibleIndex::INVALID,
            directional_lights: ShaderVisibleIndex::INVALID,
            directional_shadows: ShaderVisibleIndex::INVALID,
            positional_lights: ShaderVisibleIndex::INVALID,
            instance_data: ShaderVisibleIndex::INVALID,
        }
    }
}

/// The scene constant buffer, as shaders read it.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuSceneConstants {
    /// World to view.
    pub view: Mat4,
    /// View to clip.
    pub projection: Mat4,
    /// Camera position in world space.
    pub camera_position: [f32; 3],
    /// Seconds since the renderer started.
    pub time_seconds: f32,
    /// Frame slot being recorded.
    pub frame_slot: u32,
    /// Low 32 bits of the frame sequence.
    pub frame_sequence: u32,
    /// See [`BindlessIndices::draw_metadata`].
    pub draw_metadata_index: u32,
    /// See [`BindlessIndices::transforms`].
    pub transforms_index: u32,
    /// See [`BindlessIndices::normals`].
    pub normals_index: u32,
    /// See [`BindlessIndices::materials`].
    pub materials_index: u32,
    /// See [`BindlessIndices::env_static`].
    pub env_static_index: u32,
    /// See [`BindlessIndices::directional_lights`].
    pub directional_lights_index: u32,
    /// See [`BindlessIndices::directional_shadows`].
    pub directional_shadows_index: u32,
    /// See [`BindlessIndices::positional_lights`].
    pub positional_lights_index: u32,
    /// See [`BindlessIndices::instance_data`].
    pub instance_data_index: u32,
    _padding: [u32; 17],
}

const _: () = assert!(std::mem::size_of::<GpuSceneConstants>() == 256);

/// CPU side of the scene constants.
#[derive(Debug)]
pub struct SceneConstants {
    view: Mat4,
    projection: Mat4,
    camera_position: Vec3,
    time_seconds: f32,
    frame_slot: FrameSlot,
    frame_sequence: FrameSequence,
    indices: BindlessIndices,
    version: u64,
    cached_version: u64,
    cached: GpuSceneConstants,
}

impl Default for SceneConstants {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneConstants {
    /// Identity camera, invalid indices.
    pub fn new() -> Self {
        Self {
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            camera_position: Vec3::ZERO,
            time_seconds: 0.0,
            frame_slot: FrameSlot(0),
            frame_sequence: FrameSequence(0),
            indices: BindlessIndices::default(),
            version: 1,
            cached_version: 0,
            cached: GpuSceneConstants::zeroed(),
        }
    }

    fn touch<T: PartialEq>(field: &mut T, value: T, version: &mut u64) {
        if *field != value {
            *field = value;
            *version += 1;
        }
    }

    /// Sets the view matrix.
    pub fn set_view_matrix(&mut self, _tag: RendererTag, view: Mat4) {
        Self::touch(&mut self.view, view, &mut self.version);
    }

    /// Sets the projection matrix.
    pub fn set_projection_matrix(&mut self, _tag: RendererTag, projection: Mat4) {
        Self::touch(&mut self.projection, projection, &mut self.version);
    }

    /// Sets the camera position.
    pub fn set_camera_position(&mut self, _tag: RendererTag, position: Vec3) {
        Self::touch(&mut self.camera_position, position, &mut self.version);
    }

    /// Sets the renderer time.
    pub fn set_time_seconds(&mut self, _tag: RendererTag, seconds: f32) {
        Self::touch(&mut self.time_seconds, seconds, &mut self.version);
    }

    /// Sets the frame being recorded.
    pub fn set_frame(&mut self, _tag: RendererTag, slot: FrameSlot, sequence: FrameSequence) {
        Self::touch(&mut self.frame_slot, slot, &mut self.version);
        Self::touch(&mut self.frame_sequence, sequence, &mut self.version);
    }

    /// Publishes the bindless indices of the frame's tables.
    pub fn set_bindless_indices(&mut self, _tag: RendererTag, indices: BindlessIndices) {
        Self::touch(&mut self.indices, indices, &mut self.version);
    }

    /// World to view.
    pub fn view_matrix(&self) -> Mat4 {
        self.view
    }

    /// View to clip.
    pub fn projection_matrix(&self) -> Mat4 {
        self.projection
    }

    /// Camera position.
    pub fn camera_position(&self) -> Vec3 {
        self.camera_position
    }

    /// Renderer time.
    pub fn time_seconds(&self) -> f32 {
        self.time_seconds
    }

    /// Frame slot being recorded.
    pub fn frame_slot(&self) -> FrameSlot {
        self.frame_slot
    }

    /// Frame being recorded.
    pub fn frame_sequence(&self) -> FrameSequence {
        self.frame_sequence
    }

    /// Bindless indices of the frame.
    pub fn bindless_indices(&self) -> BindlessIndices {
        self.indices
    }

    /// Bumped by every setter that changed a value.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns `true` if the snapshot is out of date.
    pub fn is_dirty(&self) -> bool {
        self.cached_version != self.version
    }

    /// The GPU snapshot, rebuilt if a setter ran since the last call.
    pub fn snapshot(&mut self) -> &GpuSceneConstants {
        if self.is_dirty() {
            let i = &self.indices;
            self.cached = GpuSceneConstants {
                view: self.view,
                projection: self.projection,
                camera_position: self.camera_position.to_array(),
                time_seconds: self.time_seconds,
                frame_slot: self.frame_slot.0,
                frame_sequence: self.frame_sequence.0 as u32,
                draw_metadata_index: i.draw_metadata.get(),
                transforms_index: i.transforms.get(),
                normals_index: i.normals.get(),
                materials_index: i.materials.get(),
                env_static_index: i.env_static.get(),
                directional_lights_index: i.directional_lights.get(),
                directional_shadows_index: i.directional_shadows.get(),
                positional_lights_index: i.positional_lights.get(),
                instance_data_index: i.instance_data.get(),
                _padding: [0; 17],
            };
            self.cached_version = self.version;
        }
        &self.cached
    }
}

#[derive(Debug)]
struct RingSlot {
    buffer: Arc<Buffer>,
    handle: DescriptorHandle,
    cbv_index: ShaderVisibleIndex,
}

/// One host-visible constant buffer per frame slot.
pub struct SceneConstantsRing {
    graphics: Arc<dyn Graphics>,
    slots: Vec<RingSlot>,
}

impl std::fmt::Debug for SceneConstantsRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SceneConstantsRing")
            .field("slots", &self.slots.len())
            .finish()
    }
}

impl SceneConstantsRing {
    /// Creates and views one buffer per frame in flight.
    ///
    /// # Errors
    ///
    /// Propagates buffer creation, registration and view allocation failures.
    pub fn new(graphics: Arc<dyn Graphics>) -> Result<Self, GraphicsError> {
        let size = std::mem::size_of::<GpuSceneConstants>() as u64;
        let mut ring = Self {
            slots: Vec::new(),
            graphics,
        };
        for slot in 0..ring.graphics.config().frames_in_flight.max(1) {
            let buffer = ring
                .graphics
                .create_buffer(BufferDesc::upload(size, format!("SceneConstants[{slot}]")))?;
            let resource = Resource::from(&buffer);
            ring.graphics.register_resource(resource.clone())?;
            let handle = ring
                .graphics
                .allocate_view(&resource, ViewDesc::constant_buffer(size))?;
            let cbv_index = ring.graphics.shader_visible_index(&handle)?;
            ring.slots.push(RingSlot {
                buffer,
                handle,
                cbv_index,
            });
        }
        Ok(ring)
    }

    /// Writes `constants` into the buffer of `slot` and returns its CBV index.
    pub fn write(
        &self,
        slot: FrameSlot,
        constants: &GpuSceneConstants,
    ) -> Result<ShaderVisibleIndex, GraphicsError> {
        let entry = &self.slots[slot.index() % self.slots.len()];
        let bytes = bytemuck::bytes_of(constants);
        entry
            .buffer
            .with_mapped_range(0, bytes.len() as u64, |dst| dst.copy_from_slice(bytes))?;
        Ok(entry.cbv_index)
    }

    /// The CBV index of `slot`.
    pub fn cbv_index(&self, slot: FrameSlot) -> ShaderVisibleIndex {
        self.slots[slot.index() % self.slots.len()].cbv_index
    }

    /// The buffer of `slot`.
    pub fn buffer(&self, slot: FrameSlot) -> &Arc<Buffer> {
        &self.slots[slot.index() % self.slots.len()].buffer
    }
}

impl Drop for SceneConstantsRing {
    fn drop(&mut self) {
        let reclaimer = self.graphics.deferred_reclaimer();
        for slot in self.slots.drain(..) {
            reclaimer.register_deferred_view_release(
                self.graphics.resource_registry(),
                Resource::from(slot.buffer),
                slot.handle,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxygen_core::config::GraphicsConfig;
    use oxygen_infra::HeadlessGraphics;

    #[test]
    fn setters_bump_the_version_only_on_change() {
        let tag = RendererTag::new();
        let mut constants = SceneConstants::new();
        let start = constants.version();

        constants.set_time_seconds(tag, 1.5);
        assert_eq!(constants.version(), start + 1);
        constants.set_time_seconds(tag, 1.5);
        assert_eq!(constants.version(), start + 1);
        constants.set_frame(tag, FrameSlot(1), FrameSequence(7));
        assert_eq!(constants.version(), start + 3);
    }

    #[test]
    fn snapshot_is_rebuilt_lazily() {
        let tag = RendererTag::new();
        let mut constants = SceneConstants::new();
        assert!(constants.is_dirty());
        assert_eq!(constants.snapshot().draw_metadata_index, u32::MAX);
        assert!(!constants.is_dirty());

        constants.set_bindless_indices(
            tag,
            BindlessIndices {
                draw_metadata: ShaderVisibleIndex(12),
                ..BindlessIndices::default()
            },
        );
        assert!(constants.is_dirty());
        let snapshot = *constants.snapshot();
        assert_eq!(snapshot.draw_metadata_index, 12);
        assert_eq!(snapshot.transforms_index, u32::MAX);
    }

    #[test]
    fn ring_writes_the_slot_buffer() {
        let graphics = HeadlessGraphics::new(GraphicsConfig::default()).unwrap();
        let ring = SceneConstantsRing::new(graphics.clone()).unwrap();
        let mut constants = SceneConstants::new();
        constants.set_camera_position(RendererTag::new(), Vec3::new(1.0, 2.0, 3.0));

        let cbv = ring.write(FrameSlot(1), constants.snapshot()).unwrap();
        assert_eq!(cbv, ring.cbv_index(FrameSlot(1)));
        assert_ne!(ring.cbv_index(FrameSlot(0)), ring.cbv_index(FrameSlot(1)));

        let written = ring
            .buffer(FrameSlot(1))
            .with_mapped_range(0, 256, |bytes| bytes.to_vec())
            .unwrap();
        let read: GpuSceneConstants = bytemuck::pod_read_unaligned(&written);
        assert_eq!(read.camera_position, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn dropping_the_ring_releases_its_buffers() {
        let graphics = HeadlessGraphics::new(GraphicsConfig::default()).unwrap();
        let ring = SceneConstantsRing::new(graphics.clone()).unwrap();
        assert_eq!(graphics.resource_registry().live_resource_count(), 2);
        drop(ring);
        graphics.deferred_reclaimer().process_all_deferred_releases();
        assert_eq!(graphics.resource_registry().live_resource_count(), 0);
    }
}
