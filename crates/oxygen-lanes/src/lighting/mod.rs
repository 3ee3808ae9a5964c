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

//! The light manager: gathers scene lights into three GPU arrays.
//!
//! - [`DirectionalLightBasic`]: the hot data of every directional light.
//! - [`DirectionalLightShadows`]: shadow parameters, index-aligned with the
//!   basic array.
//! - [`PositionalLightData`]: point and spot lights, told apart by `kind`.

use crate::resources::TransientStructuredBuffer;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use oxygen_core::graphics::{FrameSlot, Graphics, GraphicsError, ShaderVisibleIndex};
use oxygen_data::{LightComponent, LightKind, LightMobility, NodeFlags, Scene};
use std::sync::Arc;

oxygen_core::oxygen_bitflags! {
    /// Per-light switches packed into the GPU records.
    pub struct LightFlags: u32 {
        /// The light renders shadows.
        const CASTS_SHADOWS = 1 << 0;
        /// Direct light is dynamic, indirect light is baked.
        const MIXED = 1 << 1;
    }
}

/// `kind` of a point light in [`PositionalLightData`].
pub const POSITIONAL_KIND_POINT: u32 = 0;
/// `kind` of a spot light in [`PositionalLightData`].
pub const POSITIONAL_KIND_SPOT: u32 = 1;

/// Hot data of a directional light.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct DirectionalLightBasic {
    /// Linear color.
    pub color: [f32; 3],
    /// Intensity multiplier.
    pub intensity: f32,
    /// World-space direction the light travels in.
    pub direction: [f32; 3],
    /// [`LightFlags`] bits.
    pub flags: u32,
}

/// Shadow parameters of a directional light.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct DirectionalLightShadows {
    /// Depth bias.
    pub bias: f32,
    /// Normal offset bias.
    pub normal_bias: f32,
    /// Cascades rendered; zero without shadows.
    pub cascade_count: u32,
    /// Unused.
    pub reserved: u32,
}

/// A point or spot light.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PositionalLightData {
    /// World-space position.
    pub position: [f32; 3],
    /// Distance where the light fades out.
    pub range: f32,
    /// Linear color.
    pub color: [f32; 3],
    /// Intensity multiplier.
    pub intensity: f32,
    /// World-space direction (spots only).
    pub direction: [f32; 3],
    /// [`POSITIONAL_KIND_POINT`] or [`POSITIONAL_KIND_SPOT`].
    pub kind: u32,
    /// Cosine of the inner cone angle.
    pub inner_cone_cos: f32,
    /// Cosine of the outer cone angle.
    pub outer_cone_cos: f32,
    /// [`LightFlags`] bits.
    pub flags: u32,
    /// Depth bias.
    pub shadow_bias: f32,
}

const _: () = assert!(std::mem::size_of::<DirectionalLightBasic>() == 32);
const _: () = assert!(std::mem::size_of::<DirectionalLightShadows>() == 16);
const _: () = assert!(std::mem::size_of::<PositionalLightData>() == 64);

/// Builds the light arrays of each frame.
#[derive(Debug)]
pub struct LightManager {
    directional_buffer: TransientStructuredBuffer,
    shadow_buffer: TransientStructuredBuffer,
    positional_buffer: TransientStructuredBuffer,
    directional: Vec<DirectionalLightBasic>,
    shadows: Vec<DirectionalLightShadows>,
    positional: Vec<PositionalLightData>,
    directional_srv: ShaderVisibleIndex,
    shadow_srv: ShaderVisibleIndex,
    positional_srv: ShaderVisibleIndex,
}

impl LightManager {
    /// Creates a manager with empty arrays.
    pub fn new(graphics: Arc<dyn Graphics>) -> Self {
        Self {
            directional_buffer: TransientStructuredBuffer::new(
                Arc::clone(&graphics),
                std::mem::size_of::<DirectionalLightBasic>() as u32,
                "DirectionalLights",
            ),
            shadow_buffer: TransientStructuredBuffer::new(
                Arc::clone(&graphics),
                std::mem::size_of::<DirectionalLightShadows>() as u32,
                "DirectionalShadows",
            ),
            positional_buffer: TransientStructuredBuffer::new(
                graphics,
                std::mem::size_of::<PositionalLightData>() as u32,
                "PositionalLights",
            ),
            directional: Vec::new(),
            shadows: Vec::new(),
            positional: Vec::new(),
            directional_srv: ShaderVisibleIndex::INVALID,
            shadow_srv: ShaderVisibleIndex::INVALID,
            positional_srv: ShaderVisibleIndex::INVALID,
        }
    }

    /// Drops the previous frame's lights.
    pub fn on_frame_start(&mut self) {
        self.directional.clear();
        self.shadows.clear();
        self.positional.clear();
    }

    /// Gathers the dynamic lights of `scene`, in arena order.
    ///
    /// Hidden nodes, lights that do not affect the world and baked lights are
    /// skipped. Shadows need both the light's and the node's consent.
    pub fn collect(&mut self, scene: &Scene) {
        for (_, node) in scene.iter() {
            let Some(light) = &node.light else {
                continue;
            };
            let node_flags = node.effective_flags();
            if !node_flags.contains(NodeFlags::VISIBLE)
                || !light.affects_world
                || light.mobility == LightMobility::Baked
            {
                continue;
            }
            let casts_shadows = light.casts_shadows && node_flags.contains(NodeFlags::CASTS_SHADOWS);
            self.add_light(light, &node.world_matrix(), casts_shadows);
        }
        log::trace!(
            "LightManager: {} directional, {} positional",
            self.directional.len(),
            self.positional.len()
        );
    }

    fn add_light(&mut self, light: &LightComponent, world: &Mat4, casts_shadows: bool) {
        let mut flags = LightFlags::EMPTY;
        if casts_shadows {
            flags.insert(LightFlags::CASTS_SHADOWS);
        }
        if light.mobility == LightMobility::Mixed {
            flags.insert(LightFlags::MIXED);
        }
        let direction = world.transform_vector3(Vec3::NEG_Z).normalize_or_zero();
        let color = light.color.to_array();

        match light.kind {
            LightKind::Directional => {
                self.directional.push(DirectionalLightBasic {
                    color,
                    intensity: light.intensity,
                    direction: direction.to_array(),
                    flags: flags.bits(),
                });
                self.shadows.push(DirectionalLightShadows {
                    bias: light.shadow_bias,
                    normal_bias: light.shadow_normal_bias,
                    cascade_count: if casts_shadows { light.cascade_count } else { 0 },
                    reserved: 0,
                });
            }
            LightKind::Point { range } => self.positional.push(PositionalLightData {
                position: world.w_axis.truncate().to_array(),
                range,
                color,
                intensity: light.intensity,
                direction: direction.to_array(),
                kind: POSITIONAL_KIND_POINT,
                inner_cone_cos: -1.0,
                outer_cone_cos: -1.0,
                flags: flags.bits(),
                shadow_bias: light.shadow_bias,
            }),
            LightKind::Spot {
                range,
                inner_cone_angle,
                outer_cone_angle,
            } => self.positional.push(PositionalLightData {
                position: world.w_axis.truncate().to_array(),
                range,
                color,
                intensity: light.intensity,
                direction: direction.to_array(),
                kind: POSITIONAL_KIND_SPOT,
                inner_cone_cos: inner_cone_angle.cos(),
                outer_cone_cos: outer_cone_angle.cos(),
                flags: flags.bits(),
                shadow_bias: light.shadow_bias,
            }),
        }
    }

    /// Writes the three arrays into the transient buffers of `slot`.
    ///
    /// # Errors
    ///
    /// Fails if a buffer cannot be created or mapped.
    pub fn ensure_frame_resources(&mut self, slot: FrameSlot) -> Result<(), GraphicsError> {
        self.directional_srv = write_array(&self.directional_buffer, slot, &self.directional)?;
        self.shadow_srv = write_array(&self.shadow_buffer, slot, &self.shadows)?;
        self.positional_srv = write_array(&self.positional_buffer, slot, &self.positional)?;
        Ok(())
    }

    /// The directional lights of the frame.
    pub fn directional_lights(&self) -> &[DirectionalLightBasic] {
        &self.directional
    }

    /// Shadow parameters, aligned with [`Self::directional_lights`].
    pub fn directional_shadows(&self) -> &[DirectionalLightShadows] {
        &self.shadows
    }

    /// The point and spot lights of the frame.
    pub fn positional_lights(&self) -> &[PositionalLightData] {
        &self.positional
    }

    /// Bindless index of the directional array.
    pub fn directional_srv_index(&self) -> ShaderVisibleIndex {
        self.directional_srv
    }

    /// Bindless index of the directional shadow array.
    pub fn shadow_srv_index(&self) -> ShaderVisibleIndex {
        self.shadow_srv
    }

    /// Bindless index of the positional array.
    pub fn positional_srv_index(&self) -> ShaderVisibleIndex {
        self.positional_srv
    }
}

fn write_array<T: Pod>(
    buffer: &TransientStructuredBuffer,
    slot: FrameSlot,
    items: &[T],
) -> Result<ShaderVisibleIndex, GraphicsError> {
    let allocation = buffer.reserve(slot, items.len() as u32)?;
    allocation.write(bytemuck::cast_slice(items))?;
    Ok(allocation.srv_index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use oxygen_core::config::GraphicsConfig;
    use oxygen_data::Transform;
    use oxygen_infra::HeadlessGraphics;

    fn add(scene: &mut Scene, light: LightComponent, flags: NodeFlags) {
        let handle = scene.create_node("Light", None).unwrap();
        let node = scene.get_mut(handle).unwrap();
        node.light = Some(light);
        node.flags = flags;
    }

    #[test]
    fn gating_rules_filter_lights() {
        let graphics = HeadlessGraphics::new(GraphicsConfig::default()).unwrap();
        let mut lights = LightManager::new(graphics);
        let mut scene = Scene::new();
        let shown = NodeFlags::VISIBLE | NodeFlags::CASTS_SHADOWS;

        add(&mut scene, LightComponent::directional(), shown);
        add(&mut scene, LightComponent::directional(), NodeFlags::EMPTY);
        let mut baked = LightComponent::point(4.0);
        baked.mobility = LightMobility::Baked;
        add(&mut scene, baked, shown);
        let mut unlit = LightComponent::point(4.0);
        unlit.affects_world = false;
        add(&mut scene, unlit, shown);
        add(&mut scene, LightComponent::spot(8.0, 0.2, 0.4), shown);
        scene.update_transforms();

        lights.on_frame_start();
        lights.collect(&scene);
        assert_eq!(lights.directional_lights().len(), 1);
        assert_eq!(lights.directional_shadows().len(), 1);
        assert_eq!(lights.positional_lights().len(), 1);
        assert_eq!(lights.positional_lights()[0].kind, POSITIONAL_KIND_SPOT);
    }

    #[test]
    fn shadows_need_light_and_node_consent() {
        let graphics = HeadlessGraphics::new(GraphicsConfig::default()).unwrap();
        let mut lights = LightManager::new(graphics);
        let mut scene = Scene::new();
        let mut sun = LightComponent::directional();
        sun.casts_shadows = true;
        add(&mut scene, sun.clone(), NodeFlags::VISIBLE | NodeFlags::CASTS_SHADOWS);
        add(&mut scene, sun, NodeFlags::VISIBLE);
        scene.update_transforms();

        lights.collect(&scene);
        let flags: Vec<u32> = lights.directional_lights().iter().map(|l| l.flags).collect();
        assert_eq!(flags, vec![LightFlags::CASTS_SHADOWS.bits(), 0]);
        assert_eq!(lights.directional_shadows()[1].cascade_count, 0);
    }

    #[test]
    fn position_and_direction_come_from_the_node() {
        let graphics = HeadlessGraphics::new(GraphicsConfig::default()).unwrap();
        let mut lights = LightManager::new(graphics);
        let mut scene = Scene::new();
        let handle = scene.create_node("Lamp", None).unwrap();
        let node = scene.get_mut(handle).unwrap();
        node.local_transform = Transform::from_translation(Vec3::new(1.0, 2.0, 3.0));
        node.light = Some(LightComponent::point(5.0));
        scene.update_transforms();

        lights.collect(&scene);
        let lamp = lights.positional_lights()[0];
        assert_eq!(lamp.position, [1.0, 2.0, 3.0]);
        assert_relative_eq!(lamp.direction[2], -1.0);
    }

    #[test]
    fn arrays_reach_transient_buffers() {
        let graphics = HeadlessGraphics::new(GraphicsConfig::default()).unwrap();
        let mut lights = LightManager::new(graphics.clone());
        let mut scene = Scene::new();
        add(&mut scene, LightComponent::directional(), NodeFlags::VISIBLE);
        scene.update_transforms();

        lights.collect(&scene);
        lights.ensure_frame_resources(FrameSlot(0)).unwrap();
        assert_ne!(lights.directional_srv_index(), ShaderVisibleIndex::INVALID);
        assert_ne!(lights.positional_srv_index(), ShaderVisibleIndex::INVALID);
        assert_ne!(lights.directional_srv_index(), lights.shadow_srv_index());
        assert_eq!(graphics.resource_registry().live_resource_count(), 3);
    }
}
