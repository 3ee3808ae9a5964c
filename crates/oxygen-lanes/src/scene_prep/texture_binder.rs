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

//! Stable bindless indices for textures that load asynchronously.
//!
//! Every key gets a descriptor the first time it is asked for. The slot first
//! views a cheap per-entry placeholder; once the real texture has loaded and
//! its upload completed, the same slot is re-pointed at it, so indices cached
//! in material constants stay valid. Failed loads re-point the slot at a
//! fresh texture holding the magenta/black error pattern.

use super::ScenePrepError;
use crate::upload::{UploadCoordinator, UploadData, UploadKind, UploadRequest, UploadTextureDesc, UploadTicket};
use oxygen_core::config::BatchPolicy;
use oxygen_core::graphics::{
    DescriptorHandle, Graphics, Resource, ShaderVisibleIndex, Texture, TextureDesc,
    TextureFormat, ViewDesc,
};
use oxygen_core::utils::lock;
use oxygen_data::ResourceKey;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const WHITE_2X2: [u8; 16] = [255; 16];
const CHECKER_2X2: [u8; 16] = [
    255, 0, 255, 255, //
    0, 0, 0, 255, //
    0, 0, 0, 255, //
    255, 0, 255, 255,
];

/// Decoded pixels of a single-mip 2D texture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureData {
    /// Width in texels.
    pub width: u32,
    /// Height in texels.
    pub height: u32,
    /// Pixel format of `bytes`.
    pub format: TextureFormat,
    /// Tightly packed pixel rows.
    pub bytes: Vec<u8>,
}

/// The outcome of a texture load, sent back by a [`TextureSource`].
#[derive(Debug, Clone)]
pub struct TextureLoadCompletion {
    /// The requested key.
    pub key: ResourceKey,
    /// The pixels, or why they could not be produced.
    pub result: Result<TextureData, String>,
}

/// Loads texture pixels for a key, possibly on another thread.
pub trait TextureSource: Send + Sync {
    /// Starts loading `key`; the outcome must be sent on `completions`
    /// exactly once.
    fn request(&self, key: ResourceKey, completions: flume::Sender<TextureLoadCompletion>);
}

/// A [`TextureSource`] answering from a map, synchronously.
#[derive(Debug, Default)]
pub struct InMemoryTextureSource {
    textures: Mutex<HashMap<ResourceKey, TextureData>>,
}

impl InMemoryTextureSource {
    /// Creates an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the pixels of `key`.
    pub fn insert(&self, key: ResourceKey, data: TextureData) {
        lock(&self.textures).insert(key, data);
    }
}

impl TextureSource for InMemoryTextureSource {
    fn request(&self, key: ResourceKey, completions: flume::Sender<TextureLoadCompletion>) {
        let result = lock(&self.textures)
            .get(&key)
            .cloned()
            .ok_or_else(|| format!("texture {} not found", key.0));
        if completions.send(TextureLoadCompletion { key, result }).is_err() {
            log::debug!("InMemoryTextureSource: binder gone, dropping texture {}", key.0);
        }
    }
}

/// Where a key's texture is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureEntryState {
    /// Waiting for the source.
    Loading,
    /// Pixels received; the upload is in flight.
    Uploading,
    /// The slot views the final texture.
    Ready,
    /// The load or upload failed; the slot shows the error pattern.
    Failed,
}

#[derive(Debug)]
enum EntryPhase {
    Loading,
    Uploading { ticket: UploadTicket, texture: Arc<Texture> },
    Ready { texture: Arc<Texture> },
    Failed,
}

#[derive(Debug)]
struct EntrySlot {
    handle: DescriptorHandle,
    /// What the slot views until the final texture is ready.
    placeholder: Arc<Texture>,
}

#[derive(Debug)]
struct TextureEntry {
    srv_index: ShaderVisibleIndex,
    slot: Option<EntrySlot>,
    phase: EntryPhase,
}

#[derive(Debug)]
struct SharedTexture {
    texture: Arc<Texture>,
    handle: DescriptorHandle,
    srv_index: ShaderVisibleIndex,
}

/// Maps [`ResourceKey`]s to stable shader-visible texture indices.
pub struct TextureBinder {
    graphics: Arc<dyn Graphics>,
    uploads: Arc<UploadCoordinator>,
    source: Arc<dyn TextureSource>,
    sender: flume::Sender<TextureLoadCompletion>,
    receiver: flume::Receiver<TextureLoadCompletion>,
    placeholder: Option<SharedTexture>,
    error: Option<SharedTexture>,
    entries: HashMap<ResourceKey, TextureEntry>,
}

impl std::fmt::Debug for TextureBinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextureBinder")
            .field("entries", &self.entries.len())
            .field("placeholder", &self.placeholder_index())
            .field("error", &self.error_index())
            .finish()
    }
}

impl TextureBinder {
    /// Creates the binder and its shared placeholder and error textures.
    ///
    /// # Errors
    ///
    /// Fails if the shared textures cannot be created or uploaded.
    pub fn new(
        graphics: Arc<dyn Graphics>,
        uploads: Arc<UploadCoordinator>,
        source: Arc<dyn TextureSource>,
    ) -> Result<Self, ScenePrepError> {
        let placeholder = create_shared(graphics.as_ref(), &uploads, 1, 1, &WHITE_2X2[..4], "TexturePlaceholder")?;
        let error = create_shared(graphics.as_ref(), &uploads, 2, 2, &CHECKER_2X2, "TextureError")?;
        let (sender, receiver) = flume::unbounded();
        log::debug!(
            "TextureBinder: placeholder srv {}, error srv {}",
            placeholder.srv_index.get(),
            error.srv_index.get()
        );
        Ok(Self {
            graphics,
            uploads,
            source,
            sender,
            receiver,
            placeholder: Some(placeholder),
            error: Some(error),
            entries: HashMap::new(),
        })
    }

    /// The index of the shared placeholder, bound to [`ResourceKey::PLACEHOLDER`].
    pub fn placeholder_index(&self) -> ShaderVisibleIndex {
        self.placeholder
            .as_ref()
            .map_or(ShaderVisibleIndex::INVALID, |p| p.srv_index)
    }

    /// The index of the shared error texture.
    pub fn error_index(&self) -> ShaderVisibleIndex {
        self.error.as_ref().map_or(ShaderVisibleIndex::INVALID, |e| e.srv_index)
    }

    /// Returns the stable index of `key`, starting its load on first use.
    ///
    /// Keys whose descriptor cannot be allocated resolve to the shared error
    /// texture.
    pub fn get_or_allocate(&mut self, key: ResourceKey) -> ShaderVisibleIndex {
        if key.is_placeholder() {
            return self.placeholder_index();
        }
        if let Some(entry) = self.entries.get(&key) {
            return entry.srv_index;
        }

        let entry = match self.create_entry(key) {
            Ok(slot) => {
                let srv_index = self.graphics.shader_visible_index(&slot.handle);
                match srv_index {
                    Ok(srv_index) => TextureEntry {
                        srv_index,
                        slot: Some(slot),
                        phase: EntryPhase::Loading,
                    },
                    Err(e) => {
                        log::warn!("TextureBinder: texture {} has no shader-visible index: {e}", key.0);
                        release_slot(self.graphics.as_ref(), slot, None);
                        self.failed_entry()
                    }
                }
            }
            Err(e) => {
                log::warn!("TextureBinder: cannot allocate texture {}: {e}", key.0);
                self.failed_entry()
            }
        };
        let srv_index = entry.srv_index;
        let loading = matches!(entry.phase, EntryPhase::Loading);
        self.entries.insert(key, entry);
        if loading {
            self.source.request(key, self.sender.clone());
        }
        srv_index
    }

    fn failed_entry(&self) -> TextureEntry {
        TextureEntry {
            srv_index: self.error_index(),
            slot: None,
            phase: EntryPhase::Failed,
        }
    }

    fn create_entry(&self, key: ResourceKey) -> Result<EntrySlot, ScenePrepError> {
        let placeholder = self.graphics.create_texture(TextureDesc::texture_2d(
            2,
            2,
            TextureFormat::Rgba8Unorm,
            &format!("TexturePlaceholder({})", key.0),
        ))?;
        let resource = Resource::from(&placeholder);
        self.graphics.register_resource(resource.clone())?;
        let handle = match self
            .graphics
            .allocate_view(&resource, ViewDesc::texture_srv(TextureFormat::Rgba8Unorm, 1, 1))
        {
            Ok(handle) => handle,
            Err(e) => {
                self.graphics.unregister_resource(resource.id());
                return Err(e.into());
            }
        };
        if let Err(e) = upload_pixels(&self.uploads, &placeholder, &WHITE_2X2) {
            self.graphics.deferred_reclaimer().register_deferred_view_release(
                self.graphics.resource_registry(),
                resource,
                handle,
            );
            return Err(e);
        }
        Ok(EntrySlot { handle, placeholder })
    }

    /// The lifecycle state of `key`, if it was ever requested.
    pub fn entry_state(&self, key: ResourceKey) -> Option<TextureEntryState> {
        self.entries.get(&key).map(|entry| match entry.phase {
            EntryPhase::Loading => TextureEntryState::Loading,
            EntryPhase::Uploading { .. } => TextureEntryState::Uploading,
            EntryPhase::Ready { .. } => TextureEntryState::Ready,
            EntryPhase::Failed => TextureEntryState::Failed,
        })
    }

    /// The index handed out for `key`, without allocating.
    pub fn descriptor_index(&self, key: ResourceKey) -> Option<ShaderVisibleIndex> {
        self.entries.get(&key).map(|entry| entry.srv_index)
    }

    /// The final texture of a ready key.
    pub fn ready_texture(&self, key: ResourceKey) -> Option<Arc<Texture>> {
        match &self.entries.get(&key)?.phase {
            EntryPhase::Ready { texture } => Some(Arc::clone(texture)),
            _ => None,
        }
    }

    /// Number of keys requested so far.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Starts uploads for the loads that completed, then re-points the slots
    /// whose uploads finished.
    pub fn on_frame_start(&mut self) {
        let completions: Vec<TextureLoadCompletion> = self.receiver.try_iter().collect();
        for completion in completions {
            self.on_load_completed(completion);
        }
        self.poll_uploads();
    }

    /// Re-points the slots whose uploads finished.
    pub fn on_frame_end(&mut self) {
        self.poll_uploads();
    }

    fn on_load_completed(&mut self, completion: TextureLoadCompletion) {
        let TextureLoadCompletion { key, result } = completion;
        let Some(entry) = self.entries.get_mut(&key) else {
            log::debug!("TextureBinder: ignoring completion for unknown texture {}", key.0);
            return;
        };
        if !matches!(entry.phase, EntryPhase::Loading) {
            return;
        }
        let started = result.and_then(|data| {
            start_upload(self.graphics.as_ref(), &self.uploads, key, &data).map_err(|e| e.to_string())
        });
        match started {
            Ok((ticket, texture)) => entry.phase = EntryPhase::Uploading { ticket, texture },
            Err(message) => {
                log::warn!("TextureBinder: texture {} failed to load: {message}", key.0);
                mark_failed(self.graphics.as_ref(), &self.uploads, key, entry);
            }
        }
    }

    fn poll_uploads(&mut self) {
        let registry = self.graphics.resource_registry();
        let reclaimer = self.graphics.deferred_reclaimer();
        for (key, entry) in self.entries.iter_mut() {
            let EntryPhase::Uploading { ticket, texture } = &entry.phase else {
                continue;
            };
            let Some(result) = self.uploads.try_get_result(*ticket) else {
                continue;
            };
            let texture = Arc::clone(texture);
            let Some(slot) = entry.slot.as_ref() else {
                continue;
            };
            if !result.success {
                log::warn!("TextureBinder: upload of texture {} failed: {}", key.0, result.message);
                registry.unregister_resource(texture.id());
                mark_failed(self.graphics.as_ref(), &self.uploads, *key, entry);
                continue;
            }

            let view = ViewDesc::texture_srv(texture.desc().format, 1, 1);
            match registry.update_view(&slot.handle, texture.id(), view) {
                Ok(_) => {
                    let registry = Arc::clone(registry);
                    let placeholder = Arc::clone(&slot.placeholder);
                    reclaimer.register_deferred_action(move || {
                        registry.unregister_resource(placeholder.id());
                    });
                    log::trace!(
                        "TextureBinder: srv {} now views '{}'",
                        entry.srv_index.get(),
                        texture.desc().debug_name
                    );
                    entry.phase = EntryPhase::Ready { texture };
                }
                Err(e) => {
                    log::warn!("TextureBinder: cannot re-point texture {}: {e}", key.0);
                    registry.unregister_resource(texture.id());
                    mark_failed(self.graphics.as_ref(), &self.uploads, *key, entry);
                }
            }
        }
    }
}

impl Drop for TextureBinder {
    fn drop(&mut self) {
        for (_, entry) in self.entries.drain() {
            let Some(slot) = entry.slot else {
                continue;
            };
            match entry.phase {
                EntryPhase::Ready { texture } => release_slot(self.graphics.as_ref(), slot, Some(texture)),
                EntryPhase::Uploading { texture, .. } => {
                    let registry = Arc::clone(self.graphics.resource_registry());
                    self.graphics.deferred_reclaimer().register_deferred_action(move || {
                        registry.unregister_resource(texture.id());
                    });
                    release_slot(self.graphics.as_ref(), slot, None);
                }
                EntryPhase::Loading | EntryPhase::Failed => release_slot(self.graphics.as_ref(), slot, None),
            }
        }
        for shared in [self.placeholder.take(), self.error.take()].into_iter().flatten() {
            self.graphics.deferred_reclaimer().register_deferred_view_release(
                self.graphics.resource_registry(),
                Resource::from(shared.texture),
                shared.handle,
            );
        }
    }
}

/// Releases an entry's descriptor along with the texture it views.
fn release_slot(graphics: &dyn Graphics, slot: EntrySlot, viewed: Option<Arc<Texture>>) {
    let viewed = viewed.unwrap_or_else(|| Arc::clone(&slot.placeholder));
    graphics.deferred_reclaimer().register_deferred_view_release(
        graphics.resource_registry(),
        Resource::from(viewed),
        slot.handle,
    );
    let registry = Arc::clone(graphics.resource_registry());
    let placeholder = slot.placeholder;
    graphics.deferred_reclaimer().register_deferred_action(move || {
        registry.unregister_resource(placeholder.id());
    });
}

/// Re-points the entry's slot at a new error-pattern texture. The old
/// placeholder is left untouched for frames still sampling it and retired
/// through the reclaimer.
fn mark_failed(graphics: &dyn Graphics, uploads: &UploadCoordinator, key: ResourceKey, entry: &mut TextureEntry) {
    entry.phase = EntryPhase::Failed;
    let Some(slot) = entry.slot.as_mut() else {
        return;
    };
    let texture = match start_upload(
        graphics,
        uploads,
        key,
        &TextureData {
            width: 2,
            height: 2,
            format: TextureFormat::Rgba8Unorm,
            bytes: CHECKER_2X2.to_vec(),
        },
    ) {
        Ok((_, texture)) => texture,
        Err(e) => {
            log::warn!("TextureBinder: cannot create the error pattern for texture {}: {e}", key.0);
            return;
        }
    };
    let registry = graphics.resource_registry();
    let view = ViewDesc::texture_srv(TextureFormat::Rgba8Unorm, 1, 1);
    if let Err(e) = registry.update_view(&slot.handle, texture.id(), view) {
        log::warn!("TextureBinder: cannot re-point texture {} at its error pattern: {e}", key.0);
        registry.unregister_resource(texture.id());
        return;
    }
    let previous = std::mem::replace(&mut slot.placeholder, texture);
    let registry = Arc::clone(registry);
    graphics.deferred_reclaimer().register_deferred_action(move || {
        registry.unregister_resource(previous.id());
    });
}

fn create_shared(
    graphics: &dyn Graphics,
    uploads: &UploadCoordinator,
    width: u32,
    height: u32,
    pixels: &[u8],
    name: &str,
) -> Result<SharedTexture, ScenePrepError> {
    let texture = graphics.create_texture(TextureDesc::texture_2d(width, height, TextureFormat::Rgba8Unorm, name))?;
    let resource = Resource::from(&texture);
    graphics.register_resource(resource.clone())?;
    let handle = graphics.allocate_view(&resource, ViewDesc::texture_srv(TextureFormat::Rgba8Unorm, 1, 1))?;
    let srv_index = graphics.shader_visible_index(&handle)?;
    upload_pixels(uploads, &texture, pixels)?;
    Ok(SharedTexture {
        texture,
        handle,
        srv_index,
    })
}

fn upload_pixels(uploads: &UploadCoordinator, texture: &Arc<Texture>, pixels: &[u8]) -> Result<UploadTicket, ScenePrepError> {
    let request = UploadRequest::texture(
        UploadKind::Texture2D,
        UploadTextureDesc::full(Arc::clone(texture)),
        UploadData::View(pixels),
    )
    .with_batch_policy(BatchPolicy::Coalesce);
    Ok(uploads.submit(request)?)
}

fn start_upload(
    graphics: &dyn Graphics,
    uploads: &UploadCoordinator,
    key: ResourceKey,
    data: &TextureData,
) -> Result<(UploadTicket, Arc<Texture>), ScenePrepError> {
    let texture = graphics.create_texture(TextureDesc::texture_2d(
        data.width,
        data.height,
        data.format,
        &format!("Texture({})", key.0),
    ))?;
    graphics.register_resource(Resource::from(&texture))?;
    match upload_pixels(uploads, &texture, &data.bytes) {
        Ok(ticket) => Ok((ticket, texture)),
        Err(e) => {
            graphics.unregister_resource(texture.id());
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxygen_core::config::GraphicsConfig;
    use oxygen_core::graphics::DescriptorIndex;
    use oxygen_infra::HeadlessGraphics;

    struct Fixture {
        graphics: Arc<HeadlessGraphics>,
        uploads: Arc<UploadCoordinator>,
        source: Arc<InMemoryTextureSource>,
        binder: TextureBinder,
    }

    fn fixture() -> Fixture {
        let graphics = HeadlessGraphics::new(GraphicsConfig::default()).unwrap();
        let uploads = Arc::new(UploadCoordinator::new(graphics.clone()).unwrap());
        let source = Arc::new(InMemoryTextureSource::new());
        let binder = TextureBinder::new(graphics.clone(), uploads.clone(), source.clone()).unwrap();
        Fixture {
            graphics,
            uploads,
            source,
            binder,
        }
    }

    fn solid(width: u32, height: u32, value: u8) -> TextureData {
        TextureData {
            width,
            height,
            format: TextureFormat::Rgba8Unorm,
            bytes: vec![value; (width * height * 4) as usize],
        }
    }

    #[test]
    fn placeholder_key_uses_the_shared_texture() {
        let mut f = fixture();
        let index = f.binder.get_or_allocate(ResourceKey::PLACEHOLDER);
        assert_eq!(index, f.binder.placeholder_index());
        assert_eq!(f.binder.get_or_allocate(ResourceKey::PLACEHOLDER), index);
        assert_eq!(f.binder.entry_count(), 0);
    }

    #[test]
    fn loaded_texture_keeps_its_index() {
        let mut f = fixture();
        let key = ResourceKey(7);
        f.source.insert(key, solid(4, 4, 200));

        let index = f.binder.get_or_allocate(key);
        assert_eq!(f.binder.entry_state(key), Some(TextureEntryState::Loading));
        assert_ne!(index, f.binder.placeholder_index());

        f.binder.on_frame_start();
        assert_eq!(f.binder.entry_state(key), Some(TextureEntryState::Uploading));
        f.uploads.flush().unwrap();
        f.binder.on_frame_end();

        assert_eq!(f.binder.entry_state(key), Some(TextureEntryState::Ready));
        assert_eq!(f.binder.get_or_allocate(key), index);
        let texture = f.binder.ready_texture(key).unwrap();
        let viewed = f
            .graphics
            .resource_registry()
            .resource_at(DescriptorIndex(index.get()))
            .unwrap();
        assert_eq!(viewed.id(), texture.id());
        assert_eq!(
            f.graphics.read_texture_subresource(&texture, 0).unwrap(),
            vec![200; 64]
        );
    }

    #[test]
    fn missing_texture_shows_the_error_pattern_in_its_own_slot() {
        let mut f = fixture();
        let key = ResourceKey(42);
        let index = f.binder.get_or_allocate(key);
        let Resource::Texture(initial) = f
            .graphics
            .resource_registry()
            .resource_at(DescriptorIndex(index.get()))
            .unwrap()
        else {
            panic!("slot should view a texture");
        };

        f.binder.on_frame_start();
        f.uploads.flush().unwrap();
        f.binder.on_frame_end();

        // Frames still in flight keep sampling the untouched placeholder.
        assert_eq!(
            f.graphics.read_texture_subresource(&initial, 0).unwrap(),
            WHITE_2X2.to_vec()
        );

        assert_eq!(f.binder.entry_state(key), Some(TextureEntryState::Failed));
        assert_eq!(f.binder.descriptor_index(key), Some(index));
        let viewed = f
            .graphics
            .resource_registry()
            .resource_at(DescriptorIndex(index.get()))
            .unwrap();
        let Resource::Texture(pattern) = viewed else {
            panic!("slot should view a texture");
        };
        assert_ne!(pattern.id(), initial.id());
        assert_eq!(
            f.graphics.read_texture_subresource(&pattern, 0).unwrap(),
            CHECKER_2X2.to_vec()
        );
    }

    #[test]
    fn dropping_the_binder_releases_every_texture() {
        let mut f = fixture();
        f.source.insert(ResourceKey(1), solid(2, 2, 1));
        f.binder.get_or_allocate(ResourceKey(1));
        f.binder.get_or_allocate(ResourceKey(2));
        f.binder.on_frame_start();
        f.uploads.flush().unwrap();
        f.binder.on_frame_end();

        drop(f.binder);
        f.graphics.deferred_reclaimer().process_all_deferred_releases();
        assert_eq!(f.graphics.resource_registry().live_resource_count(), 0);
    }
}
