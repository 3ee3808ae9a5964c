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

//! The light capability.
//!
//! Position and orientation come from the owning node's world matrix; a light
//! shines along the node's local `-Z`.

use glam::Vec3;

/// The shape of a light.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LightKind {
    /// Infinitely distant light (sun).
    Directional,
    /// Omnidirectional light with a finite range.
    Point {
        /// Distance at which the light fades out.
        range: f32,
    },
    /// Cone light.
    Spot {
        /// Distance at which the light fades out.
        range: f32,
        /// Half-angle of the full-intensity cone, in radians.
        inner_cone_angle: f32,
        /// Half-angle of the falloff cone, in radians.
        outer_cone_angle: f32,
    },
}

/// Whether a light can change at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LightMobility {
    /// Fully dynamic.
    #[default]
    Realtime,
    /// Dynamic direct lighting over baked indirect lighting.
    Mixed,
    /// Entirely baked; never part of the dynamic light arrays.
    Baked,
}

/// Adds a light to a node.
#[derive(Debug, Clone, PartialEq)]
pub struct LightComponent {
    /// Shape.
    pub kind: LightKind,
    /// Linear RGB color.
    pub color: Vec3,
    /// Intensity multiplier.
    pub intensity: f32,
    /// Runtime mobility.
    pub mobility: LightMobility,
    /// Whether the light contributes to world lighting at all.
    pub affects_world: bool,
    /// Whether the light wants to cast shadows.
    pub casts_shadows: bool,
    /// Depth bias applied when sampling the shadow map.
    pub shadow_bias: f32,
    /// Normal-offset bias applied when sampling the shadow map.
    pub shadow_normal_bias: f32,
    /// Cascade count for directional shadows.
    pub cascade_count: u32,
}

impl LightComponent {
    fn new(kind: LightKind) -> Self {
        Self {
            kind,
            color: Vec3::ONE,
            intensity: 1.0,
            mobility: LightMobility::Realtime,
            affects_world: true,
            casts_shadows: false,
            shadow_bias: 0.005,
            shadow_normal_bias: 0.01,
            cascade_count: 4,
        }
    }

    /// A white directional light.
    pub fn directional() -> Self {
        Self::new(LightKind::Directional)
    }

    /// A white point light.
    pub fn point(range: f32) -> Self {
        Self::new(LightKind::Point { range })
    }

    /// A white spot light.
    pub fn spot(range: f32, inner_cone_angle: f32, outer_cone_angle: f32) -> Self {
        Self::new(LightKind::Spot {
            range,
            inner_cone_angle,
            outer_cone_angle,
        })
    }

    /// Returns `true` for directional lights.
    pub fn is_directional(&self) -> bool {
        matches!(self.kind, LightKind::Directional)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_the_kind() {
        assert!(LightComponent::directional().is_directional());
        assert!(matches!(
            LightComponent::point(5.0).kind,
            LightKind::Point { range } if range == 5.0
        ));
        let spot = LightComponent::spot(10.0, 0.2, 0.4);
        assert!(!spot.is_directional());
        assert!(spot.affects_world);
        assert_eq!(spot.mobility, LightMobility::Realtime);
    }
}
