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

//! Deduplicated material constants in a bindless atlas.

use super::{ScenePrepError, TextureBinder};
use crate::resources::{AtlasBuffer, EnsureResult};
use crate::upload::{UploadCoordinator, UploadData, UploadRequest};
use bytemuck::{Pod, Zeroable};
use oxygen_core::graphics::{FrameSlot, Graphics, ShaderVisibleIndex};
use oxygen_data::{AlphaMode, AssetId, MaterialAsset, ResourceKey};
use std::collections::HashMap;
use std::sync::Arc;

oxygen_core::oxygen_bitflags! {
    /// Shading switches packed into [`MaterialConstants::flags`].
    pub struct MaterialFlags: u32 {
        /// Back faces are shaded.
        const DOUBLE_SIDED = 1 << 0;
        /// Alpha-tested.
        const MASKED = 1 << 1;
        /// Alpha-blended.
        const BLENDED = 1 << 2;
    }
}

/// One element of the material atlas, as shaders read it.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MaterialConstants {
    /// Linear RGBA base color.
    pub base_color: [f32; 4],
    /// Metalness factor.
    pub metalness: f32,
    /// Roughness factor.
    pub roughness: f32,
    /// Normal map strength.
    pub normal_scale: f32,
    /// Ambient occlusion factor.
    pub ambient_occlusion: f32,
    /// Bindless index of the base color texture.
    pub base_color_texture: u32,
    /// Bindless index of the normal texture.
    pub normal_texture: u32,
    /// Bindless index of the metallic texture.
    pub metallic_texture: u32,
    /// Bindless index of the roughness texture.
    pub roughness_texture: u32,
    /// Bindless index of the ambient occlusion texture.
    pub ambient_occlusion_texture: u32,
    /// [`MaterialFlags`] bits.
    pub flags: u32,
    _padding: [u32; 2],
}

const _: () = assert!(std::mem::size_of::<MaterialConstants>() == 64);

impl MaterialConstants {
    /// Serializes `material`, resolving texture keys through `textures`.
    pub fn from_asset(material: &MaterialAsset, textures: &mut TextureBinder) -> Self {
        let mut resolve = |key: Option<ResourceKey>| {
            key.map_or(ShaderVisibleIndex::INVALID, |key| textures.get_or_allocate(key))
                .get()
        };
        let mut flags = MaterialFlags::EMPTY;
        if material.double_sided {
            flags.insert(MaterialFlags::DOUBLE_SIDED);
        }
        match material.alpha_mode {
            AlphaMode::Opaque => {}
            AlphaMode::Masked => flags.insert(MaterialFlags::MASKED),
            AlphaMode::Blended => flags.insert(MaterialFlags::BLENDED),
        }
        Self {
            base_color: material.base_color,
            metalness: material.metalness,
            roughness: material.roughness,
            normal_scale: material.normal_scale,
            ambient_occlusion: material.ambient_occlusion,
            base_color_texture: resolve(material.base_color_texture),
            normal_texture: resolve(material.normal_texture),
            metallic_texture: resolve(material.metallic_texture),
            roughness_texture: resolve(material.roughness_texture),
            ambient_occlusion_texture: resolve(material.ambient_occlusion_texture),
            flags: flags.bits(),
            _padding: [0; 2],
        }
    }

    /// Constants without textures.
    fn untextured(material: &MaterialAsset) -> Self {
        let invalid = ShaderVisibleIndex::INVALID.get();
        let flags = if material.double_sided { MaterialFlags::DOUBLE_SIDED } else { MaterialFlags::EMPTY };
        Self {
            base_color: material.base_color,
            metalness: material.metalness,
            roughness: material.roughness,
            normal_scale: material.normal_scale,
            ambient_occlusion: material.ambient_occlusion,
            base_color_texture: invalid,
            normal_texture: invalid,
            metallic_texture: invalid,
            roughness_texture: invalid,
            ambient_occlusion_texture: invalid,
            flags: flags.bits(),
            _padding: [0; 2],
        }
    }
}

/// Maps materials to elements of the material atlas.
///
/// Element 0 always holds the default material. Materials live as long as
/// the binder; a grown atlas gets every live material uploaded again.
#[derive(Debug)]
pub struct MaterialBinder {
    uploads: Arc<UploadCoordinator>,
    atlas: AtlasBuffer,
    slack: f32,
    constants: Vec<MaterialConstants>,
    dirty: Vec<bool>,
    handles: HashMap<AssetId, u32>,
}

impl MaterialBinder {
    /// Element of the default material.
    pub const DEFAULT_MATERIAL: u32 = 0;

    /// Creates the binder with the default material in element 0.
    ///
    /// # Errors
    ///
    /// Fails if the atlas cannot be created.
    pub fn new(graphics: Arc<dyn Graphics>, uploads: Arc<UploadCoordinator>) -> Result<Self, ScenePrepError> {
        let slack = graphics.config().atlas_growth_slack;
        let mut binder = Self {
            uploads,
            atlas: AtlasBuffer::new(graphics, std::mem::size_of::<MaterialConstants>() as u32, "MaterialAtlas"),
            slack,
            constants: Vec::new(),
            dirty: Vec::new(),
            handles: HashMap::new(),
        };
        let default = MaterialAsset::default_material();
        let index = binder.insert(MaterialConstants::untextured(&default))?;
        binder.handles.insert(default.id, index);
        Ok(binder)
    }

    /// Returns the element of `material`, serializing it on first use.
    /// `None` resolves to the default material.
    ///
    /// # Errors
    ///
    /// Fails if the atlas cannot grow; callers fall back to
    /// [`Self::DEFAULT_MATERIAL`].
    pub fn get_or_allocate(
        &mut self,
        material: Option<&Arc<MaterialAsset>>,
        textures: &mut TextureBinder,
    ) -> Result<u32, ScenePrepError> {
        let Some(material) = material else {
            return Ok(Self::DEFAULT_MATERIAL);
        };
        if let Some(&index) = self.handles.get(&material.id) {
            return Ok(index);
        }
        let constants = MaterialConstants::from_asset(material, textures);
        let index = self.insert(constants)?;
        self.handles.insert(material.id, index);
        log::trace!("MaterialBinder: '{}' -> element {index}", material.name);
        Ok(index)
    }

    fn insert(&mut self, constants: MaterialConstants) -> Result<u32, ScenePrepError> {
        let needed = self.constants.len() as u32 + 1;
        if self.atlas.ensure_capacity(needed, self.slack)? == EnsureResult::Resized {
            self.dirty.iter_mut().for_each(|d| *d = true);
        }
        let element = self.atlas.allocate(1)?;
        let index = element.element_index as usize;
        if index >= self.constants.len() {
            self.constants.resize(index + 1, MaterialConstants::zeroed());
            self.dirty.resize(index + 1, false);
        }
        self.constants[index] = constants;
        self.dirty[index] = true;
        Ok(element.element_index)
    }

    /// Recycles atlas elements retired against `slot`.
    pub fn on_frame_start(&mut self, slot: FrameSlot) {
        self.atlas.on_frame_start(slot);
    }

    /// Uploads every changed element, one upload per contiguous run.
    ///
    /// Returns the number of uploads submitted.
    pub fn ensure_frame_resources(&mut self) -> Result<usize, ScenePrepError> {
        let mut uploads = 0;
        let mut cursor = 0;
        while cursor < self.dirty.len() {
            if !self.dirty[cursor] {
                cursor += 1;
                continue;
            }
            let first = cursor;
            while cursor < self.dirty.len() && self.dirty[cursor] {
                cursor += 1;
            }
            let desc = self
                .atlas
                .make_run_upload_desc(first as u32, (cursor - first) as u32)?;
            let bytes: &[u8] = bytemuck::cast_slice(&self.constants[first..cursor]);
            self.uploads.submit(
                UploadRequest::buffer(desc, UploadData::View(bytes))
                    .with_debug_name(format!("MaterialAtlas[{first}..{cursor}]")),
            )?;
            self.dirty[first..cursor].iter_mut().for_each(|d| *d = false);
            uploads += 1;
        }
        Ok(uploads)
    }

    /// Bindless index of the material atlas.
    pub fn srv_index(&self) -> ShaderVisibleIndex {
        self.atlas.srv_index()
    }

    /// Number of materials, the default one included.
    pub fn material_count(&self) -> usize {
        self.handles.len()
    }

    /// The CPU copy of an element.
    pub fn constants(&self, index: u32) -> Option<&MaterialConstants> {
        self.constants.get(index as usize)
    }

    /// The atlas holding the constants.
    pub fn atlas(&self) -> &AtlasBuffer {
        &self.atlas
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene_prep::{InMemoryTextureSource, TextureData};
    use oxygen_core::config::GraphicsConfig;
    use oxygen_core::graphics::TextureFormat;
    use oxygen_infra::HeadlessGraphics;

    struct Fixture {
        graphics: Arc<HeadlessGraphics>,
        uploads: Arc<UploadCoordinator>,
        source: Arc<InMemoryTextureSource>,
        textures: TextureBinder,
        materials: MaterialBinder,
    }

    fn fixture() -> Fixture {
        let graphics = HeadlessGraphics::new(GraphicsConfig::default()).unwrap();
        let uploads = Arc::new(UploadCoordinator::new(graphics.clone()).unwrap());
        let source = Arc::new(InMemoryTextureSource::new());
        let textures = TextureBinder::new(graphics.clone(), uploads.clone(), source.clone()).unwrap();
        let materials = MaterialBinder::new(graphics.clone(), uploads.clone()).unwrap();
        Fixture {
            graphics,
            uploads,
            source,
            textures,
            materials,
        }
    }

    #[test]
    fn default_material_lives_in_element_zero() {
        let mut f = fixture();
        assert_eq!(f.materials.get_or_allocate(None, &mut f.textures).unwrap(), 0);
        let default = f.materials.constants(0).unwrap();
        assert_eq!(default.base_color_texture, ShaderVisibleIndex::INVALID.get());
        assert_eq!(f.materials.material_count(), 1);
    }

    #[test]
    fn materials_are_deduplicated_by_asset() {
        let mut f = fixture();
        let red = Arc::new(MaterialAsset::new("Red"));
        let blue = Arc::new(MaterialAsset::new("Blue"));

        let a = f.materials.get_or_allocate(Some(&red), &mut f.textures).unwrap();
        let b = f.materials.get_or_allocate(Some(&blue), &mut f.textures).unwrap();
        let again = f.materials.get_or_allocate(Some(&red.clone()), &mut f.textures).unwrap();
        assert_eq!((a, b, again), (1, 2, 1));
        assert_eq!(f.materials.material_count(), 3);
    }

    #[test]
    fn texture_indices_come_from_the_texture_binder() {
        let mut f = fixture();
        let key = ResourceKey(9);
        f.source.insert(
            key,
            TextureData {
                width: 1,
                height: 1,
                format: TextureFormat::Rgba8Unorm,
                bytes: vec![0; 4],
            },
        );
        let mut asset = MaterialAsset::new("Textured");
        asset.base_color_texture = Some(key);
        asset.alpha_mode = AlphaMode::Masked;
        let index = f
            .materials
            .get_or_allocate(Some(&Arc::new(asset)), &mut f.textures)
            .unwrap();

        let constants = f.materials.constants(index).unwrap();
        assert_eq!(
            Some(ShaderVisibleIndex(constants.base_color_texture)),
            f.textures.descriptor_index(key)
        );
        assert_eq!(constants.normal_texture, ShaderVisibleIndex::INVALID.get());
        assert_eq!(constants.flags, MaterialFlags::MASKED.bits());
    }

    #[test]
    fn dirty_runs_are_uploaded_once() {
        let mut f = fixture();
        for name in ["A", "B", "C"] {
            let material = Arc::new(MaterialAsset::new(name));
            f.materials.get_or_allocate(Some(&material), &mut f.textures).unwrap();
        }
        // Growth re-marks everything, so a single run covers all elements.
        assert_eq!(f.materials.ensure_frame_resources().unwrap(), 1);
        assert_eq!(f.materials.ensure_frame_resources().unwrap(), 0);
        f.uploads.flush().unwrap();

        let buffer = f.materials.atlas().buffer().unwrap();
        let bytes = f.graphics.read_buffer(&buffer, 64, 64).unwrap();
        let second: MaterialConstants = bytemuck::pod_read_unaligned(&bytes);
        assert_eq!(second, *f.materials.constants(1).unwrap());
    }
}
