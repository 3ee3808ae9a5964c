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

use crate::assets::{GeometryAsset, MaterialAsset};
use crate::math::Aabb;
use glam::Vec3;
use oxygen_core::config::LodPolicyConfig;
use std::sync::Arc;

/// How a renderable picks its level of detail.
#[derive(Debug, Clone, PartialEq)]
pub enum LodPolicy {
    /// Always the given LOD.
    Fixed(u32),
    /// LOD `i` while the distance to the camera is below `thresholds[i]`.
    Distance {
        /// Ascending distance thresholds.
        thresholds: Vec<f32>,
    },
    /// LOD `i` while the projected bounding radius is above `thresholds[i]` pixels.
    ScreenSpaceError {
        /// Descending pixel thresholds.
        thresholds: Vec<f32>,
    },
}

/// View data needed to evaluate a [`LodPolicy`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LodContext {
    /// Camera position in world space.
    pub camera_position: Vec3,
    /// Pixels covered by one world unit at distance one:
    /// `viewport_height / (2 * tan(fov_y / 2))`.
    pub projection_scale: f32,
}

impl LodPolicy {
    /// Picks a LOD in `[0, lod_count)` for an object with `world_bounds`.
    ///
    /// Values exactly on a threshold resolve to the coarser LOD, and a LOD
    /// past the last one resolves to the coarsest available.
    pub fn select_lod(&self, lod_count: usize, world_bounds: &Aabb, view: &LodContext) -> u32 {
        let coarsest = lod_count.saturating_sub(1) as u32;
        let picked = match self {
            LodPolicy::Fixed(lod) => *lod,
            LodPolicy::Distance { thresholds } => {
                let distance = world_bounds.center().distance(view.camera_position);
                thresholds
                    .iter()
                    .position(|t| distance < *t)
                    .unwrap_or(thresholds.len()) as u32
            }
            LodPolicy::ScreenSpaceError { thresholds } => {
                let distance = world_bounds
                    .center()
                    .distance(view.camera_position)
                    .max(f32::EPSILON);
                let pixels = world_bounds.radius() * view.projection_scale / distance;
                thresholds
                    .iter()
                    .position(|t| pixels > *t)
                    .unwrap_or(thresholds.len()) as u32
            }
        };
        picked.min(coarsest)
    }
}

impl Default for LodPolicy {
    fn default() -> Self {
        LodPolicy::Fixed(0)
    }
}

impl From<&LodPolicyConfig> for LodPolicy {
    fn from(config: &LodPolicyConfig) -> Self {
        match config {
            LodPolicyConfig::Fixed { lod } => LodPolicy::Fixed(*lod),
            LodPolicyConfig::Distance { thresholds } => LodPolicy::Distance {
                thresholds: thresholds.clone(),
            },
            LodPolicyConfig::ScreenSpaceError { thresholds } => LodPolicy::ScreenSpaceError {
                thresholds: thresholds.clone(),
            },
        }
    }
}

/// Makes a node drawable.
#[derive(Debug, Clone)]
pub struct Renderable {
    /// The geometry and its LODs.
    pub geometry: Arc<GeometryAsset>,
    /// Per-submesh material overrides, indexed by submesh.
    pub material_overrides: Vec<Option<Arc<MaterialAsset>>>,
    /// LOD policy; `None` uses the renderer default.
    pub lod_policy: Option<LodPolicy>,
    /// Submeshes to draw; `None` draws all of them.
    pub visible_submeshes: Option<Vec<u32>>,
}

impl Renderable {
    /// A renderable drawing every submesh of `geometry` with its own materials.
    pub fn new(geometry: Arc<GeometryAsset>) -> Self {
        Self {
            geometry,
            material_overrides: Vec::new(),
            lod_policy: None,
            visible_submeshes: None,
        }
    }

    /// Returns a copy using `policy`.
    #[must_use]
    pub fn with_lod_policy(mut self, policy: LodPolicy) -> Self {
        self.lod_policy = Some(policy);
        self
    }

    /// Overrides the material of `submesh`.
    pub fn set_material_override(&mut self, submesh: u32, material: Arc<MaterialAsset>) {
        let index = submesh as usize;
        if self.material_overrides.len() <= index {
            self.material_overrides.resize(index + 1, None);
        }
        self.material_overrides[index] = Some(material);
    }

    /// The override for `submesh`, if any.
    pub fn material_override(&self, submesh: u32) -> Option<&Arc<MaterialAsset>> {
        self.material_overrides
            .get(submesh as usize)
            .and_then(Option::as_ref)
    }

    /// Returns `true` if `submesh` should be drawn.
    pub fn is_submesh_visible(&self, submesh: u32) -> bool {
        match &self.visible_submeshes {
            None => true,
            Some(list) => list.contains(&submesh),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box_at(z: f32) -> Aabb {
        Aabb::from_min_max(Vec3::new(-1.0, -1.0, z - 1.0), Vec3::new(1.0, 1.0, z + 1.0))
    }

    fn view() -> LodContext {
        LodContext {
            camera_position: Vec3::ZERO,
            projection_scale: 600.0,
        }
    }

    #[test]
    fn fixed_lod_clamps_to_coarsest() {
        let policy = LodPolicy::Fixed(7);
        assert_eq!(policy.select_lod(3, &unit_box_at(-5.0), &view()), 2);
        assert_eq!(LodPolicy::Fixed(1).select_lod(3, &unit_box_at(-5.0), &view()), 1);
    }

    #[test]
    fn distance_ties_pick_the_coarser_lod() {
        let policy = LodPolicy::Distance {
            thresholds: vec![10.0, 20.0],
        };
        assert_eq!(policy.select_lod(3, &unit_box_at(-5.0), &view()), 0);
        assert_eq!(policy.select_lod(3, &unit_box_at(-10.0), &view()), 1);
        assert_eq!(policy.select_lod(3, &unit_box_at(-50.0), &view()), 2);
        assert_eq!(policy.select_lod(2, &unit_box_at(-50.0), &view()), 1);
    }

    #[test]
    fn screen_space_error_uses_projected_size() {
        let policy = LodPolicy::ScreenSpaceError {
            thresholds: vec![100.0, 20.0],
        };
        // radius sqrt(3) ~ 1.73; at distance 5 that is ~208 px.
        assert_eq!(policy.select_lod(3, &unit_box_at(-5.0), &view()), 0);
        // ~26 px at distance 40.
        assert_eq!(policy.select_lod(3, &unit_box_at(-40.0), &view()), 1);
        assert_eq!(policy.select_lod(3, &unit_box_at(-500.0), &view()), 2);
    }

    #[test]
    fn policy_converts_from_config() {
        let config = LodPolicyConfig::Distance {
            thresholds: vec![1.0],
        };
        assert_eq!(
            LodPolicy::from(&config),
            LodPolicy::Distance {
                thresholds: vec![1.0]
            }
        );
    }
}
