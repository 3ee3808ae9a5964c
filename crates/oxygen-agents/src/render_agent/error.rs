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

use oxygen_core::graphics::GraphicsError;
use oxygen_lanes::scene_prep::ScenePrepError;
use oxygen_lanes::UploadError;
use thiserror::Error;

/// Errors that end a frame early.
#[derive(Debug, Error)]
pub enum RenderError {
    /// A graphics call failed.
    #[error("Graphics error: {0}")]
    Graphics(#[from] GraphicsError),
    /// The upload pipeline failed.
    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),
    /// Preparing the scene failed.
    #[error("Scene preparation error: {0}")]
    ScenePrep(#[from] ScenePrepError),
    /// The previous use of a frame slot did not finish in time.
    #[error("Frame slot {slot} still busy after {timeout_ms} ms")]
    SlotTimeout {
        /// The busy slot.
        slot: u32,
        /// How long the agent waited.
        timeout_ms: u64,
    },
    /// The agent was shut down.
    #[error("Render agent is shut down")]
    ShutDown,
}

impl RenderError {
    /// Returns `true` if the device was lost and the renderer needs a re-init.
    pub fn is_device_lost(&self) -> bool {
        matches!(
            self,
            RenderError::Graphics(GraphicsError::DeviceLost)
                | RenderError::Upload(UploadError::DeviceLost)
                | RenderError::ScenePrep(ScenePrepError::Graphics(GraphicsError::DeviceLost))
                | RenderError::ScenePrep(ScenePrepError::Upload(UploadError::DeviceLost))
        )
    }
}
