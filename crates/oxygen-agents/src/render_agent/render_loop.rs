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

//! Runs the render agent on the graphics event loop.

use super::agent::RenderAgent;
use async_trait::async_trait;
use oxygen_core::co::{Channel, LiveObject, Nursery, TaskStarted, Value};
use oxygen_data::Scene;
use oxygen_lanes::scene_prep::ViewState;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

/// A frame to render: an immutable scene snapshot and the camera to use.
#[derive(Debug, Clone)]
pub struct FrameRequest {
    /// The scene, as published by its owner.
    pub scene: Arc<Scene>,
    /// The camera.
    pub view: ViewState,
}

struct LoopState {
    agent: RefCell<Option<RenderAgent>>,
    requests: Channel<FrameRequest>,
    frames_done: Value<u64>,
    failed_frames: Cell<u64>,
}

impl LoopState {
    async fn run_frames(&self) -> anyhow::Result<()> {
        while let Some(request) = self.requests.receive().await {
            let outcome = {
                let mut agent = self.agent.borrow_mut();
                let Some(agent) = agent.as_mut() else {
                    break;
                };
                agent.render_frame(&request.scene, &request.view)
            };
            if let Err(e) = outcome {
                if e.is_device_lost() {
                    return Err(anyhow::Error::new(e).context("RenderLoop: device lost"));
                }
                self.failed_frames.set(self.failed_frames.get() + 1);
            }
            self.frames_done.update(|done| *done += 1);
            tokio::task::yield_now().await;
        }
        Ok(())
    }
}

/// A [`LiveObject`] rendering every [`FrameRequest`] it receives, in order.
///
/// Frames run one at a time inside the loop's nursery. [`stop`](LiveObject::stop)
/// closes the request channel so no new request is accepted; the loop still
/// renders the requests already queued, then shuts the agent down.
pub struct RenderLoop {
    state: Rc<LoopState>,
    running: Cell<bool>,
    shutdown_timeout: Duration,
}

impl std::fmt::Debug for RenderLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderLoop")
            .field("running", &self.running.get())
            .field("pending", &self.state.requests.len())
            .field("frames_done", &self.state.frames_done.get())
            .finish()
    }
}

impl RenderLoop {
    /// Wraps `agent`. At most `capacity` requests wait at once; the agent
    /// gets `shutdown_timeout` to drain the GPU when the loop stops.
    pub fn new(agent: RenderAgent, capacity: usize, shutdown_timeout: Duration) -> Self {
        Self {
            state: Rc::new(LoopState {
                agent: RefCell::new(Some(agent)),
                requests: Channel::new(capacity),
                frames_done: Value::new(0),
                failed_frames: Cell::new(0),
            }),
            running: Cell::new(false),
            shutdown_timeout,
        }
    }

    /// Queues a frame, suspending while the queue is full.
    ///
    /// Returns the request back once the loop has stopped.
    pub async fn submit(&self, request: FrameRequest) -> Result<(), FrameRequest> {
        self.state.requests.submit(request).await
    }

    /// Queues a frame without waiting.
    pub fn try_submit(&self, request: FrameRequest) -> Result<(), FrameRequest> {
        self.state.requests.try_submit(request)
    }

    /// Frames rendered so far, failed ones included. The frame with sequence
    /// `s` is done once this reaches `s + 1`.
    pub fn frames_done(&self) -> u64 {
        self.state.frames_done.get()
    }

    /// Frames that ended with an error.
    pub fn failed_frames(&self) -> u64 {
        self.state.failed_frames.get()
    }

    /// Suspends until `count` frames are done. Returns the number done.
    pub async fn wait_for_frames(&self, count: u64) -> Option<u64> {
        self.state.frames_done.until(|done| *done >= count).await
    }

    /// Runs `f` on the agent, unless the loop already shut it down.
    pub fn with_agent<R>(&self, f: impl FnOnce(&RenderAgent) -> R) -> Option<R> {
        self.state.agent.borrow().as_ref().map(f)
    }
}

#[async_trait(?Send)]
impl LiveObject for RenderLoop {
    async fn activate_async(&self, started: TaskStarted) -> anyhow::Result<()> {
        let mut nursery = Nursery::new("RenderLoop");
        let state = Rc::clone(&self.state);
        nursery.start(async move { state.run_frames().await });
        started.started();

        let result = nursery.join().await;
        self.state.requests.close();
        self.running.set(false);

        let agent = self.state.agent.borrow_mut().take();
        match (agent, &result) {
            (Some(agent), Ok(())) => agent.shutdown(self.shutdown_timeout).await?,
            (Some(agent), Err(e)) => {
                log::error!("RenderLoop: stopped on error, dropping the agent: {e:#}");
                drop(agent);
            }
            (None, _) => {}
        }
        log::info!(
            "RenderLoop: stopped after {} frames ({} failed)",
            self.frames_done(),
            self.failed_frames()
        );
        result
    }

    fn run(&self) {
        self.running.set(true);
    }

    fn stop(&self) {
        self.running.set(false);
        self.state.requests.close();
    }

    fn is_running(&self) -> bool {
        self.running.get()
    }
}
