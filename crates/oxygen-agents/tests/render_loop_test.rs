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

use anyhow::anyhow;
use glam::Vec3;
use oxygen_agents::{FrameRequest, RenderAgent, RenderLoop};
use oxygen_core::co::{start_live_object, LiveObject, LocalEventLoop, Nursery};
use oxygen_core::config::GraphicsConfig;
use oxygen_core::graphics::Graphics;
use oxygen_data::{GeometryAsset, MaterialAsset, Mesh, Renderable, Scene, Transform};
use oxygen_infra::HeadlessGraphics;
use oxygen_lanes::scene_prep::{InMemoryTextureSource, ViewState};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

fn two_cubes() -> Arc<Scene> {
    let material = Arc::new(MaterialAsset::new("Shared"));
    let mut scene = Scene::new();
    for (name, x) in [("Left", -1.5), ("Right", 1.5)] {
        let mesh = Arc::new(Mesh::cube(name, 0.5, Some(material.clone())));
        let geometry = Arc::new(GeometryAsset::new(name, vec![mesh]));
        let handle = scene.create_node(name, None).unwrap();
        let node = scene.get_mut(handle).unwrap();
        node.local_transform = Transform::from_translation(Vec3::new(x, 0.0, 0.0));
        node.renderable = Some(Renderable::new(geometry));
    }
    scene.update_transforms();
    Arc::new(scene)
}

fn request(scene: &Arc<Scene>) -> FrameRequest {
    FrameRequest {
        scene: scene.clone(),
        view: ViewState::look_at(Vec3::new(0.0, 2.0, 8.0), Vec3::ZERO, 1.0, (1280, 720), 0.1, 100.0),
    }
}

fn render_loop() -> (Arc<HeadlessGraphics>, Rc<RenderLoop>) {
    let graphics = HeadlessGraphics::new(GraphicsConfig::default()).unwrap();
    let agent = RenderAgent::new(graphics.clone(), Arc::new(InMemoryTextureSource::new())).unwrap();
    let render_loop = Rc::new(RenderLoop::new(agent, 4, Duration::from_millis(100)));
    (graphics, render_loop)
}

#[test]
fn renders_requests_in_order_then_stops() {
    // --- 1. ARRANGE ---
    let (graphics, render_loop) = render_loop();
    let event_loop = LocalEventLoop::new().unwrap();
    let scene = two_cubes();

    // --- 2. ACT ---
    let result = event_loop.run({
        let render_loop = render_loop.clone();
        async move {
            let mut nursery = Nursery::new("test");
            start_live_object(render_loop.clone(), &mut nursery).await?;
            assert!(render_loop.is_running());
            for _ in 0..3 {
                render_loop
                    .submit(request(&scene))
                    .await
                    .map_err(|_| anyhow!("request rejected"))?;
            }
            assert_eq!(render_loop.wait_for_frames(3).await, Some(3));
            assert_eq!(render_loop.with_agent(|agent| agent.frames_started()), Some(3));
            render_loop.stop();
            nursery.join().await
        }
    });

    // --- 3. ASSERT ---
    assert!(matches!(result, Some(Ok(()))));
    assert!(!render_loop.is_running());
    assert_eq!(render_loop.frames_done(), 3);
    assert_eq!(render_loop.failed_frames(), 0);
    assert!(render_loop.with_agent(|_| ()).is_none());
    assert_eq!(graphics.stats().draws, 6);
    assert_eq!(graphics.resource_registry().live_resource_count(), 0);
}

#[test]
fn stopped_loop_rejects_requests() {
    let (_graphics, render_loop) = render_loop();
    let event_loop = LocalEventLoop::new().unwrap();

    let result = event_loop.run({
        let render_loop = render_loop.clone();
        async move {
            let mut nursery = Nursery::new("test");
            start_live_object(render_loop.clone(), &mut nursery).await?;
            render_loop.stop();
            nursery.join().await
        }
    });

    assert!(matches!(result, Some(Ok(()))));
    assert!(render_loop.try_submit(request(&two_cubes())).is_err());
    assert_eq!(render_loop.frames_done(), 0);
}

#[test]
fn stop_renders_requests_already_queued() {
    // --- 1. ARRANGE ---
    let (graphics, render_loop) = render_loop();
    let event_loop = LocalEventLoop::new().unwrap();
    let scene = two_cubes();

    // --- 2. ACT ---
    let result = event_loop.run({
        let render_loop = render_loop.clone();
        async move {
            let mut nursery = Nursery::new("test");
            start_live_object(render_loop.clone(), &mut nursery).await?;
            for _ in 0..3 {
                render_loop
                    .try_submit(request(&scene))
                    .map_err(|_| anyhow!("request rejected"))?;
            }
            render_loop.stop();
            nursery.join().await
        }
    });

    // --- 3. ASSERT ---
    assert!(matches!(result, Some(Ok(()))));
    assert_eq!(render_loop.frames_done(), 3);
    assert_eq!(graphics.stats().draws, 6);
    assert!(render_loop.try_submit(request(&two_cubes())).is_err());
}

#[test]
fn device_loss_ends_the_loop_with_an_error() {
    let (graphics, render_loop) = render_loop();
    let event_loop = LocalEventLoop::new().unwrap();
    let scene = two_cubes();

    let result = event_loop.run({
        let render_loop = render_loop.clone();
        async move {
            let mut nursery = Nursery::new("test");
            start_live_object(render_loop.clone(), &mut nursery).await?;
            graphics.simulate_device_lost();
            let _ = render_loop.submit(request(&scene)).await;
            nursery.join().await
        }
    });

    let err = result.unwrap().unwrap_err();
    assert!(format!("{err:#}").contains("device lost"));
    assert_eq!(render_loop.frames_done(), 0);
    assert!(render_loop.try_submit(request(&two_cubes())).is_err());
}
