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

use glam::Vec3;
use oxygen_agents::render_agent::GpuSceneConstants;
use oxygen_agents::{RenderAgent, RenderError};
use oxygen_core::co::LocalEventLoop;
use oxygen_core::config::GraphicsConfig;
use oxygen_core::graphics::{Command, FrameSlot, Graphics, QueueRole};
use oxygen_data::{
    GeometryAsset, LightComponent, MaterialAsset, Mesh, Renderable, Scene, Transform,
};
use oxygen_infra::HeadlessGraphics;
use oxygen_lanes::scene_prep::{InMemoryTextureSource, ViewState};
use std::sync::Arc;
use std::time::Duration;

fn add_cube(scene: &mut Scene, name: &str, position: Vec3, material: &Arc<MaterialAsset>) {
    let mesh = Arc::new(Mesh::cube(name, 0.5, Some(material.clone())));
    let geometry = Arc::new(GeometryAsset::new(name, vec![mesh]));
    let handle = scene.create_node(name, None).unwrap();
    let node = scene.get_mut(handle).unwrap();
    node.local_transform = Transform::from_translation(position);
    node.renderable = Some(Renderable::new(geometry));
}

fn shared_material_scene() -> Scene {
    let material = Arc::new(MaterialAsset::new("Shared"));
    let mut scene = Scene::new();
    add_cube(&mut scene, "Left", Vec3::new(-1.5, 0.0, 0.0), &material);
    add_cube(&mut scene, "Right", Vec3::new(1.5, 0.0, 0.0), &material);
    let sun = scene.create_node("Sun", None).unwrap();
    scene.get_mut(sun).unwrap().light = Some(LightComponent::directional());
    scene.update_transforms();
    scene
}

fn camera() -> ViewState {
    ViewState::look_at(Vec3::new(0.0, 2.0, 8.0), Vec3::ZERO, 1.0, (1280, 720), 0.1, 100.0)
}

fn agent_on(config: GraphicsConfig) -> (Arc<HeadlessGraphics>, RenderAgent) {
    let graphics = HeadlessGraphics::new(config).unwrap();
    let agent = RenderAgent::new(graphics.clone(), Arc::new(InMemoryTextureSource::new())).unwrap();
    (graphics, agent)
}

#[test]
fn three_frames_of_a_shared_material_scene() {
    // --- 1. ARRANGE ---
    let (graphics, mut agent) = agent_on(GraphicsConfig::default());
    let scene = shared_material_scene();
    let reclaimer = graphics.deferred_reclaimer().clone();

    // --- 2. ACT ---
    let mut executed = Vec::new();
    let mut stats = Vec::new();
    for _ in 0..3 {
        stats.push(agent.render_frame(&scene, &camera()).unwrap());
        executed.push(reclaimer.executed_count());
    }

    // --- 3. ASSERT ---
    for (sequence, frame) in stats.iter().enumerate() {
        assert_eq!(frame.sequence.0, sequence as u64);
        assert_eq!(frame.slot, FrameSlot(sequence as u32 % 2));
        assert_eq!(frame.items, 2);
        assert_eq!(frame.draws, 2);
        assert_eq!(frame.skipped, 0);
        assert_eq!(frame.lights, 1);
    }

    // One draw per visible submesh, partitions covering them exactly once.
    let emitter = agent.emitter();
    assert_eq!(emitter.draw_metadata().len(), 2);
    let mut next = 0;
    for partition in emitter.partitions() {
        assert_eq!(partition.begin, next);
        next = partition.end;
    }
    assert_eq!(next, 2);

    // Element 0 is the default material; both cubes share element 1.
    let default = MaterialAsset::default_material();
    assert_eq!(agent.materials().material_count(), 2);
    assert_eq!(agent.materials().constants(0).unwrap().base_color, default.base_color);
    assert!(emitter.instances().iter().all(|i| i.material_index == 1));

    // Frame 3 reuses slot 0 and runs the releases frame 1 registered there.
    assert!(executed[2] > executed[1]);

    let device = graphics.stats();
    assert_eq!(device.draws, 6);
    assert_eq!(device.validation_errors, 0);
}

#[test]
fn frames_wait_for_their_uploads_on_the_graphics_queue() {
    let (graphics, mut agent) = agent_on(GraphicsConfig::default());
    let queue = graphics.headless_queue_by_role(QueueRole::Graphics).unwrap();
    queue.set_capture(true);

    let stats = agent.render_frame(&shared_material_scene(), &camera()).unwrap();

    let commands = queue.take_captured();
    let Some(Command::Wait { value, .. }) = commands.first() else {
        panic!("frame should start by waiting on the transfer queue");
    };
    assert_eq!(*value, agent.uploads().last_submitted_fence());

    let cbv = agent.constants_ring().cbv_index(stats.slot).get();
    assert!(commands
        .iter()
        .any(|c| matches!(c, Command::SetRootConstant { slot: 1, value } if *value == cbv)));
    let draws = commands
        .iter()
        .filter(|c| matches!(c, Command::DrawIndexed { .. }))
        .count();
    assert_eq!(draws, 2);
    assert!(matches!(commands.last(), Some(Command::Signal(fence)) if *fence == stats.fence));
    assert_eq!(agent.slot_fence(stats.slot), stats.fence);
}

#[test]
fn scene_constants_publish_the_frame_tables() {
    let (_graphics, mut agent) = agent_on(GraphicsConfig::default());
    let view = camera();
    let stats = agent.render_frame(&shared_material_scene(), &view).unwrap();

    let bytes = agent
        .constants_ring()
        .buffer(stats.slot)
        .with_mapped_range(0, 256, |bytes| bytes.to_vec())
        .unwrap();
    let constants: GpuSceneConstants = bytemuck::pod_read_unaligned(&bytes);

    assert_eq!(constants.view, view.view);
    assert_eq!(constants.camera_position, view.camera_position.to_array());
    assert_eq!(constants.frame_slot, stats.slot.0);
    assert_eq!(constants.frame_sequence, 0);
    assert_eq!(constants.draw_metadata_index, agent.emitter().metadata_srv_index().get());
    assert_eq!(constants.instance_data_index, agent.emitter().instance_srv_index().get());
    assert_eq!(constants.transforms_index, agent.transforms().srv_index().get());
    assert_eq!(constants.normals_index, constants.transforms_index);
    assert_eq!(constants.materials_index, agent.materials().srv_index().get());
    assert_eq!(
        constants.directional_lights_index,
        agent.lights().directional_srv_index().get()
    );
    assert_eq!(constants.env_static_index, u32::MAX);
}

#[test]
fn culled_items_are_not_drawn() {
    let (_graphics, mut agent) = agent_on(GraphicsConfig::default());
    let material = Arc::new(MaterialAsset::new("Shared"));
    let mut scene = Scene::new();
    add_cube(&mut scene, "Visible", Vec3::ZERO, &material);
    add_cube(&mut scene, "Behind", Vec3::new(0.0, 0.0, 50.0), &material);
    scene.update_transforms();

    let stats = agent.render_frame(&scene, &camera()).unwrap();

    assert_eq!(stats.items, 1);
    assert_eq!(stats.culled, 1);
    assert_eq!(stats.draws, 1);
}

#[test]
fn busy_slot_times_out_until_the_queue_drains() {
    // --- 1. ARRANGE ---
    let config = GraphicsConfig {
        slot_wait_timeout_ms: 10,
        ..GraphicsConfig::default()
    };
    let (graphics, mut agent) = agent_on(config);
    let scene = shared_material_scene();
    let queue = graphics.headless_queue_by_role(QueueRole::Graphics).unwrap();
    queue.set_stalled(true);

    // --- 2. ACT ---
    agent.render_frame(&scene, &camera()).unwrap();
    agent.render_frame(&scene, &camera()).unwrap();
    let blocked = agent.render_frame(&scene, &camera());
    queue.set_stalled(false);
    let resumed = agent.render_frame(&scene, &camera());

    // --- 3. ASSERT ---
    assert!(matches!(blocked, Err(RenderError::SlotTimeout { slot: 0, .. })));
    let resumed = resumed.unwrap();
    assert_eq!(resumed.slot, FrameSlot(1));
    assert_eq!(resumed.draws, 2);
}

#[test]
fn device_loss_fails_the_frame() {
    let (graphics, mut agent) = agent_on(GraphicsConfig::default());
    agent.render_frame(&shared_material_scene(), &camera()).unwrap();

    graphics.simulate_device_lost();
    let err = agent
        .render_frame(&shared_material_scene(), &camera())
        .unwrap_err();

    assert!(err.is_device_lost());
}

#[test]
fn shutdown_releases_every_gpu_object() {
    let (graphics, mut agent) = agent_on(GraphicsConfig::default());
    for _ in 0..2 {
        agent.render_frame(&shared_material_scene(), &camera()).unwrap();
    }

    let event_loop = LocalEventLoop::new().unwrap();
    let result = event_loop.run(agent.shutdown(Duration::from_millis(100)));

    assert!(matches!(result, Some(Ok(()))));
    let reclaimer = graphics.deferred_reclaimer();
    assert_eq!(reclaimer.pending_count(), 0);
    assert_eq!(reclaimer.executed_count(), reclaimer.registered_count());
    assert_eq!(graphics.resource_registry().live_resource_count(), 0);
}
