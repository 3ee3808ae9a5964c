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

//! Renders a small scene on the headless backend.
//!
//! Usage: `sandbox [config.json]`. The path may also come from
//! `OXYGEN_CONFIG`; without one the default configuration is used. Set
//! `RUST_LOG` to change the log filter.

use anyhow::{anyhow, Context};
use glam::{Quat, Vec3};
use oxygen_agents::{FrameRequest, RenderAgent, RenderLoop};
use oxygen_core::co::{start_live_object, LiveObject, LocalEventLoop, Nursery};
use oxygen_core::config::GraphicsConfig;
use oxygen_core::graphics::TextureFormat;
use oxygen_data::{
    GeometryAsset, LightComponent, MaterialAsset, Mesh, Renderable, ResourceKey, Scene, Transform,
};
use oxygen_infra::HeadlessGraphics;
use oxygen_lanes::scene_prep::{InMemoryTextureSource, TextureData, ViewState};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

const FRAME_COUNT: u64 = 8;
const CONFIG_ENV: &str = "OXYGEN_CONFIG";
const CHECKER: ResourceKey = ResourceKey(1);

fn load_config() -> anyhow::Result<GraphicsConfig> {
    let path = std::env::args().nth(1).or_else(|| std::env::var(CONFIG_ENV).ok());
    match path {
        Some(path) => {
            log::info!("Sandbox: loading configuration from '{path}'");
            GraphicsConfig::from_json_file(&path)
        }
        None => Ok(GraphicsConfig::default()),
    }
}

fn checker_texture() -> TextureData {
    let mut bytes = Vec::with_capacity(8 * 8 * 4);
    for y in 0..8u32 {
        for x in 0..8u32 {
            let value = if (x + y) % 2 == 0 { 255 } else { 32 };
            bytes.extend_from_slice(&[value, value, value, 255]);
        }
    }
    TextureData {
        width: 8,
        height: 8,
        format: TextureFormat::Rgba8UnormSrgb,
        bytes,
    }
}

fn build_scene() -> anyhow::Result<Scene> {
    let mut scene = Scene::new();

    let mut floor_material = MaterialAsset::new("Floor");
    floor_material.base_color_texture = Some(CHECKER);
    let floor_material = Arc::new(floor_material);
    let crate_material = Arc::new(MaterialAsset::new("Crate"));

    let root = scene
        .create_node("Root", None)
        .ok_or_else(|| anyhow!("scene rejected the root node"))?;

    let floor_mesh = Arc::new(Mesh::cube("Floor", 0.5, Some(floor_material)));
    let floor = scene
        .create_node("Floor", Some(root))
        .ok_or_else(|| anyhow!("scene rejected the floor"))?;
    if let Some(node) = scene.get_mut(floor) {
        node.local_transform =
            Transform::from_translation(Vec3::new(0.0, -1.0, 0.0)).with_scale(Vec3::new(10.0, 0.2, 10.0));
        node.renderable = Some(Renderable::new(Arc::new(GeometryAsset::new("Floor", vec![floor_mesh]))));
    }

    let crate_mesh = Arc::new(Mesh::cube("Crate", 0.5, Some(crate_material)));
    let crate_geometry = Arc::new(GeometryAsset::new("Crate", vec![crate_mesh]));
    for i in 0..5 {
        let name = format!("Crate{i}");
        let handle = scene
            .create_node(&name, Some(root))
            .ok_or_else(|| anyhow!("scene rejected '{name}'"))?;
        if let Some(node) = scene.get_mut(handle) {
            node.local_transform = Transform::from_translation(Vec3::new(i as f32 * 1.5 - 3.0, 0.0, 0.0))
                .with_rotation(Quat::from_rotation_y(i as f32 * 0.4));
            node.renderable = Some(Renderable::new(crate_geometry.clone()));
        }
    }

    let sun = scene
        .create_node("Sun", Some(root))
        .ok_or_else(|| anyhow!("scene rejected the sun"))?;
    if let Some(node) = scene.get_mut(sun) {
        node.local_transform = Transform::default().with_rotation(Quat::from_rotation_x(-0.8));
        let mut light = LightComponent::directional();
        light.casts_shadows = true;
        node.light = Some(light);
    }
    let lamp = scene
        .create_node("Lamp", Some(root))
        .ok_or_else(|| anyhow!("scene rejected the lamp"))?;
    if let Some(node) = scene.get_mut(lamp) {
        node.local_transform = Transform::from_translation(Vec3::new(0.0, 2.0, 2.0));
        node.light = Some(LightComponent::point(6.0));
    }

    scene.update_transforms();
    Ok(scene)
}

fn camera(frame: u64, config: &GraphicsConfig) -> ViewState {
    let angle = frame as f32 * 0.25;
    let eye = Vec3::new(8.0 * angle.sin(), 3.0, 8.0 * angle.cos());
    let target = &config.render_target;
    ViewState::look_at(eye, Vec3::ZERO, 1.0, (target.width, target.height), 0.1, 100.0)
}

fn main() -> anyhow::Result<()> {
    oxygen_infra::logging::init("info");

    let config = load_config()?;
    log::info!(
        "Sandbox: {} frames in flight, {}x{} target",
        config.frames_in_flight,
        config.render_target.width,
        config.render_target.height
    );

    let graphics = HeadlessGraphics::new(config.clone()).context("Failed to create the headless backend")?;
    let textures = Arc::new(InMemoryTextureSource::new());
    textures.insert(CHECKER, checker_texture());
    let agent = RenderAgent::new(graphics.clone(), textures)?;
    let render_loop = Rc::new(RenderLoop::new(agent, 2, Duration::from_secs(1)));
    let scene = Arc::new(build_scene()?);

    let event_loop = LocalEventLoop::new().context("Failed to create the graphics event loop")?;
    let outcome = event_loop.run({
        let render_loop = Rc::clone(&render_loop);
        async move {
            let mut nursery = Nursery::new("Sandbox");
            start_live_object(Rc::clone(&render_loop), &mut nursery).await?;
            for frame in 0..FRAME_COUNT {
                let request = FrameRequest {
                    scene: Arc::clone(&scene),
                    view: camera(frame, &config),
                };
                if render_loop.submit(request).await.is_err() {
                    log::warn!("Sandbox: render loop stopped early");
                    break;
                }
            }
            render_loop.wait_for_frames(FRAME_COUNT).await;
            if let Some(Some(stats)) = render_loop.with_agent(RenderAgent::last_stats) {
                log::info!(
                    "Sandbox: last frame drew {} of {} items ({} culled, {} lights)",
                    stats.draws,
                    stats.items + stats.culled,
                    stats.culled,
                    stats.lights
                );
            }
            render_loop.stop();
            nursery.join().await
        }
    });
    outcome.ok_or_else(|| anyhow!("graphics event loop stopped before the sandbox finished"))??;

    let stats = graphics.stats();
    log::info!(
        "Sandbox: {} frames, {} draws, {} buffer copies, {} texture copies, {} validation errors",
        render_loop.frames_done(),
        stats.draws,
        stats.buffer_copies,
        stats.texture_copies,
        stats.validation_errors
    );
    if stats.validation_errors > 0 {
        return Err(anyhow!("the backend reported {} validation errors", stats.validation_errors));
    }
    Ok(())
}
