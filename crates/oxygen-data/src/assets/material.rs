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

use super::{AssetId, ResourceKey};

/// How a material treats alpha.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AlphaMode {
    /// Alpha ignored.
    #[default]
    Opaque,
    /// Alpha tested against a cutoff.
    Masked,
    /// Alpha blended.
    Blended,
}

/// A physically based material.
///
/// Texture slots hold [`ResourceKey`]s; the renderer turns them into bindless
/// indices when it serializes the material.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialAsset {
    /// Asset identity, used for deduplication.
    pub id: AssetId,
    /// Debug name.
    pub name: String,
    /// Linear RGBA base color.
    pub base_color: [f32; 4],
    /// Metalness factor.
    pub metalness: f32,
    /// Roughness factor.
    pub roughness: f32,
    /// Normal map strength.
    pub normal_scale: f32,
    /// Ambient occlusion strength.
    pub ambient_occlusion: f32,
    /// Base color texture.
    pub base_color_texture: Option<ResourceKey>,
    /// Tangent-space normal texture.
    pub normal_texture: Option<ResourceKey>,
    /// Metalness texture.
    pub metallic_texture: Option<ResourceKey>,
    /// Roughness texture.
    pub roughness_texture: Option<ResourceKey>,
    /// Ambient occlusion texture.
    pub ambient_occlusion_texture: Option<ResourceKey>,
    /// Alpha handling.
    pub alpha_mode: AlphaMode,
    /// Whether back faces are drawn.
    pub double_sided: bool,
}

impl MaterialAsset {
    /// A white, rough, opaque dielectric with a name-derived id.
    pub fn new(name: &str) -> Self {
        Self {
            id: AssetId::from_name(name),
            name: name.to_string(),
            base_color: [1.0, 1.0, 1.0, 1.0],
            metalness: 0.0,
            roughness: 1.0,
            normal_scale: 1.0,
            ambient_occlusion: 1.0,
            base_color_texture: None,
            normal_texture: None,
            metallic_texture: None,
            roughness_texture: None,
            ambient_occlusion_texture: None,
            alpha_mode: AlphaMode::Opaque,
            double_sided: false,
        }
    }

    /// The material used when a submesh has none.
    pub fn default_material() -> Self {
        Self::new("__default_material")
    }
}
