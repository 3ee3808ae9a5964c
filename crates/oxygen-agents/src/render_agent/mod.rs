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

//! The render agent: frame orchestration for the graphics runtime.
//!
//! [`RenderAgent`] holds the upload coordinator, the scene-prep resolvers, the
//! draw emitter, the light manager and the [`SceneConstants`], and runs them
//! in a fixed order for each frame. [`RenderLoop`] feeds it from a channel of
//! [`FrameRequest`]s on the graphics event loop.

mod agent;
mod error;
mod render_loop;
mod scene_constants;

pub use agent::{FrameStats, RenderAgent, DRAW_INDEX_ROOT_CONSTANT, SCENE_CONSTANTS_ROOT_CONSTANT};
pub use error::RenderError;
pub use render_loop::{FrameRequest, RenderLoop};
pub use scene_constants::{
    BindlessIndices, GpuSceneConstants, RendererTag, SceneConstants, SceneConstantsRing,
};
