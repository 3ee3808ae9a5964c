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

//! Runtime configuration.
//!
//! Every knob has a sane default; a configuration file only needs to list the
//! values it overrides:
//!
//! ```json
//! { "frames_in_flight": 3, "staging": { "bytes_per_slot": 33554432 } }
//! ```

use crate::graphics::descriptor::{DescriptorVisibility, ResourceViewType};
use crate::graphics::error::GraphicsError;
use crate::graphics::queue::QueueRole;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Capacity of one descriptor domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainConfig {
    /// View type of the domain.
    pub view_type: ResourceViewType,
    /// Visibility of the domain.
    pub visibility: DescriptorVisibility,
    /// Capacity of each segment.
    pub capacity: u32,
    /// Extra segments the domain may add once the first is full.
    #[serde(default)]
    pub growth_segments: u32,
}

/// Sizes of every descriptor domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DescriptorHeapConfig {
    /// The provisioned domains.
    pub domains: Vec<DomainConfig>,
}

impl Default for DescriptorHeapConfig {
    fn default() -> Self {
        use DescriptorVisibility::{CpuOnly, ShaderVisible};
        use ResourceViewType::*;

        let domain = |view_type, visibility, capacity, growth_segments| DomainConfig {
            view_type,
            visibility,
            capacity,
            growth_segments,
        };
        Self {
            domains: vec![
                domain(TextureSrv, ShaderVisible, 4096, 1),
                domain(TextureUav, ShaderVisible, 256, 0),
                domain(TypedBufferSrv, ShaderVisible, 256, 0),
                domain(RawBufferSrv, ShaderVisible, 2048, 1),
                domain(RawBufferUav, ShaderVisible, 256, 0),
                domain(StructuredBufferSrv, ShaderVisible, 1024, 1),
                domain(StructuredBufferUav, ShaderVisible, 256, 0),
                domain(ConstantBuffer, ShaderVisible, 64, 0),
                domain(Sampler, ShaderVisible, 256, 0),
                domain(TextureSrv, CpuOnly, 256, 0),
                domain(StructuredBufferSrv, CpuOnly, 256, 0),
                domain(TextureRtv, CpuOnly, 64, 0),
                domain(TextureDsv, CpuOnly, 32, 0),
            ],
        }
    }
}

/// Transfer staging memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagingConfig {
    /// Bytes of staging memory reserved per frame slot.
    pub bytes_per_slot: u64,
    /// Alignment of the per-slot partitions.
    pub alignment: u64,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            bytes_per_slot: 16 * 1024 * 1024,
            alignment: 512,
        }
    }
}

/// How the upload coordinator groups copies into command lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPolicy {
    /// Submit each upload's copies right away.
    Immediate,
    /// Record into an open batch until it is flushed.
    #[default]
    Coalesce,
}

/// Scheduling hint for uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadPriority {
    /// Background streaming.
    Low,
    /// Regular per-frame data.
    #[default]
    Normal,
    /// Data needed by the frame being recorded.
    High,
}

/// Upload coordinator knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Role of the queue uploads are submitted to.
    pub queue_role: QueueRole,
    /// Default batching for requests that do not override it.
    pub batch_policy: BatchPolicy,
    /// Default priority.
    pub priority: UploadPriority,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            queue_role: QueueRole::Transfer,
            batch_policy: BatchPolicy::Coalesce,
            priority: UploadPriority::Normal,
        }
    }
}

/// Which command queues the backend creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueueStrategyConfig {
    /// One universal queue aliased by every role.
    Single {
        /// Name of the universal queue.
        name: String,
    },
    /// Dedicated graphics, compute and transfer queues.
    Multi {
        /// Name of the graphics queue.
        graphics: String,
        /// Name of the compute queue.
        compute: String,
        /// Name of the transfer queue.
        transfer: String,
    },
}

impl Default for QueueStrategyConfig {
    fn default() -> Self {
        QueueStrategyConfig::Multi {
            graphics: "graphics".to_string(),
            compute: "compute".to_string(),
            transfer: "transfer".to_string(),
        }
    }
}

/// Size of the offscreen render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderTargetConfig {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Default for RenderTargetConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// The level-of-detail policy applied to renderables that do not carry one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LodPolicyConfig {
    /// Always the same LOD, clamped to the coarsest available.
    Fixed {
        /// The LOD index.
        lod: u32,
    },
    /// LOD `i` is used while the view distance is below `thresholds[i]`.
    Distance {
        /// Ascending distance thresholds in world units.
        thresholds: Vec<f32>,
    },
    /// LOD `i` is used while the projected radius is above `thresholds[i]` pixels.
    ScreenSpaceError {
        /// Descending pixel-size thresholds.
        thresholds: Vec<f32>,
    },
}

impl Default for LodPolicyConfig {
    fn default() -> Self {
        LodPolicyConfig::Fixed { lod: 0 }
    }
}

/// Top-level graphics runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    /// Number of frames the CPU may record ahead of the GPU (2 or 3).
    pub frames_in_flight: u32,
    /// Descriptor heap sizes.
    pub descriptor_heaps: DescriptorHeapConfig,
    /// Transfer staging memory.
    pub staging: StagingConfig,
    /// Upload coordinator knobs.
    pub upload: UploadConfig,
    /// Extra capacity added when an atlas buffer grows.
    pub atlas_growth_slack: f32,
    /// Queue layout.
    pub queues: QueueStrategyConfig,
    /// Offscreen render target.
    pub render_target: RenderTargetConfig,
    /// How long the frame orchestrator waits for a frame slot, in milliseconds.
    pub slot_wait_timeout_ms: u64,
    /// LOD policy for renderables without their own.
    pub default_lod_policy: LodPolicyConfig,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            descriptor_heaps: DescriptorHeapConfig::default(),
            staging: StagingConfig::default(),
            upload: UploadConfig::default(),
            atlas_growth_slack: 0.25,
            queues: QueueStrategyConfig::default(),
            render_target: RenderTargetConfig::default(),
            slot_wait_timeout_ms: 5_000,
            default_lod_policy: LodPolicyConfig::default(),
        }
    }
}

impl GraphicsConfig {
    /// Parses and validates a JSON configuration.
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        let config: GraphicsConfig =
            serde_json::from_str(json).context("Failed to parse graphics configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read graphics configuration '{}'", path.display()))?;
        Self::from_json_str(&json)
            .with_context(|| format!("Invalid graphics configuration '{}'", path.display()))
    }

    /// Rejects out-of-range values.
    pub fn validate(&self) -> Result<(), GraphicsError> {
        if !(2..=crate::graphics::MAX_FRAMES_IN_FLIGHT as u32).contains(&self.frames_in_flight) {
            return Err(GraphicsError::InvalidRequest(format!(
                "frames_in_flight must be 2 or 3, got {}",
                self.frames_in_flight
            )));
        }
        if !self.atlas_growth_slack.is_finite() || self.atlas_growth_slack < 0.0 {
            return Err(GraphicsError::InvalidRequest(format!(
                "atlas_growth_slack must be a non-negative number, got {}",
                self.atlas_growth_slack
            )));
        }
        if self.staging.bytes_per_slot == 0 {
            return Err(GraphicsError::InvalidRequest(
                "staging.bytes_per_slot must be greater than zero".to_string(),
            ));
        }
        if !self.staging.alignment.is_power_of_two() {
            return Err(GraphicsError::InvalidRequest(format!(
                "staging.alignment must be a power of two, got {}",
                self.staging.alignment
            )));
        }
        if let Some(domain) = self.descriptor_heaps.domains.iter().find(|d| d.capacity == 0) {
            return Err(GraphicsError::InvalidRequest(format!(
                "descriptor domain ({:?}, {:?}) has zero capacity",
                domain.view_type, domain.visibility
            )));
        }
        match &self.default_lod_policy {
            LodPolicyConfig::Distance { thresholds }
            | LodPolicyConfig::ScreenSpaceError { thresholds }
                if thresholds.iter().any(|t| !t.is_finite() || *t < 0.0) =>
            {
                return Err(GraphicsError::InvalidRequest(
                    "default_lod_policy thresholds must be non-negative numbers".to_string(),
                ));
            }
            _ => {}
        }
        if self.render_target.width == 0 || self.render_target.height == 0 {
            return Err(GraphicsError::InvalidRequest(
                "render_target dimensions must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn defaults_are_valid() {
        let config = GraphicsConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.frames_in_flight, 2);
        assert_relative_eq!(config.atlas_growth_slack, 0.25);
        assert_eq!(config.upload.queue_role, QueueRole::Transfer);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = GraphicsConfig::from_json_str(
            r#"{ "frames_in_flight": 3, "staging": { "bytes_per_slot": 1024 } }"#,
        )
        .unwrap();
        assert_eq!(config.frames_in_flight, 3);
        assert_eq!(config.staging.bytes_per_slot, 1024);
        assert_eq!(config.staging.alignment, 512);
        assert_eq!(config.queues, QueueStrategyConfig::default());
    }

    #[test]
    fn queue_strategy_is_tagged() {
        let config = GraphicsConfig::from_json_str(
            r#"{ "queues": { "kind": "single", "name": "universal" }, "upload": { "batch_policy": "immediate" } }"#,
        )
        .unwrap();
        assert_eq!(
            config.queues,
            QueueStrategyConfig::Single {
                name: "universal".to_string()
            }
        );
        assert_eq!(config.upload.batch_policy, BatchPolicy::Immediate);
    }

    #[test]
    fn lod_policy_is_tagged() {
        let config = GraphicsConfig::from_json_str(
            r#"{ "default_lod_policy": { "kind": "distance", "thresholds": [10.0, 50.0] } }"#,
        )
        .unwrap();
        assert_eq!(
            config.default_lod_policy,
            LodPolicyConfig::Distance {
                thresholds: vec![10.0, 50.0]
            }
        );
    }

    #[test]
    fn out_of_range_frames_in_flight_is_rejected() {
        let err = GraphicsConfig::from_json_str(r#"{ "frames_in_flight": 4 }"#).unwrap_err();
        assert!(format!("{err:#}").contains("frames_in_flight"));
    }

    #[test]
    fn negative_slack_is_rejected() {
        let config = GraphicsConfig {
            atlas_growth_slack: -1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_file_reports_path() {
        let err = GraphicsConfig::from_json_file("/nonexistent/oxygen.json").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/oxygen.json"));
    }
}
