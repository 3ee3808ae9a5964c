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

//! Per-frame world transforms in a bindless atlas.

use super::ScenePrepError;
use crate::resources::{AtlasBuffer, ElementRef};
use crate::upload::{UploadCoordinator, UploadData, UploadRequest};
use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use oxygen_core::graphics::{FrameSlot, Graphics, ShaderVisibleIndex};
use std::collections::HashMap;
use std::sync::Arc;

/// One element of the transforms atlas.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct TransformEntry {
    /// Object to world.
    pub world: Mat4,
    /// Inverse-transpose of `world`, for normals.
    pub normal: Mat4,
}

const _: () = assert!(std::mem::size_of::<TransformEntry>() == 128);

impl TransformEntry {
    /// The entry of `world`. Singular matrices get an identity normal matrix.
    pub fn new(world: Mat4) -> Self {
        let normal = if world.determinant().abs() > f32::EPSILON {
            world.inverse().transpose()
        } else {
            Mat4::IDENTITY
        };
        Self { world, normal }
    }
}

/// Deduplicates the frame's world matrices into atlas elements.
///
/// Elements written in a frame stay reserved until that frame's slot comes
/// around again.
#[derive(Debug)]
pub struct TransformUploader {
    uploads: Arc<UploadCoordinator>,
    atlas: AtlasBuffer,
    slack: f32,
    slot: FrameSlot,
    entries: Vec<(ElementRef, TransformEntry)>,
    dedupe: HashMap<[u32; 16], u32>,
    slot_refs: Vec<Vec<ElementRef>>,
}

impl TransformUploader {
    /// Creates an uploader with an empty atlas.
    pub fn new(graphics: Arc<dyn Graphics>, uploads: Arc<UploadCoordinator>) -> Self {
        let config = graphics.config();
        let slack = config.atlas_growth_slack;
        let frames = config.frames_in_flight.max(1) as usize;
        Self {
            uploads,
            atlas: AtlasBuffer::new(graphics, std::mem::size_of::<TransformEntry>() as u32, "TransformAtlas"),
            slack,
            slot: FrameSlot(0),
            entries: Vec::new(),
            dedupe: HashMap::new(),
            slot_refs: vec![Vec::new(); frames],
        }
    }

    /// Begins `slot`: the elements its previous frame used become free.
    pub fn on_frame_start(&mut self, slot: FrameSlot) {
        let index = slot.index() % self.slot_refs.len();
        for element in self.slot_refs[index].drain(..) {
            self.atlas.release(element, slot);
        }
        self.atlas.on_frame_start(slot);
        self.slot = slot;
        self.entries.clear();
        self.dedupe.clear();
    }

    /// Returns the element holding `world` this frame.
    ///
    /// # Errors
    ///
    /// Fails if the atlas cannot grow.
    pub fn get_or_allocate(&mut self, world: &Mat4) -> Result<u32, ScenePrepError> {
        let key = world.to_cols_array().map(f32::to_bits);
        if let Some(&index) = self.dedupe.get(&key) {
            return Ok(index);
        }
        self.atlas
            .ensure_capacity(self.atlas.allocated_count() + 1, self.slack)?;
        let element = self.atlas.allocate(1)?;
        let index = element.element_index;
        self.entries.push((element, TransformEntry::new(*world)));
        self.dedupe.insert(key, index);
        let slot = self.slot.index() % self.slot_refs.len();
        self.slot_refs[slot].push(element);
        Ok(index)
    }

    /// Uploads the frame's entries, one upload per run of consecutive
    /// elements. Returns the number of uploads submitted.
    pub fn ensure_frame_resources(&mut self) -> Result<usize, ScenePrepError> {
        let mut sorted: Vec<(u32, TransformEntry)> = self
            .entries
            .iter()
            .map(|(element, entry)| (element.element_index, *entry))
            .collect();
        sorted.sort_by_key(|(index, _)| *index);

        let mut uploads = 0;
        for run in sorted.chunk_by(|a, b| b.0 == a.0 + 1) {
            let first = run[0].0;
            let data: Vec<TransformEntry> = run.iter().map(|(_, entry)| *entry).collect();
            let desc = self.atlas.make_run_upload_desc(first, run.len() as u32)?;
            self.uploads.submit(
                UploadRequest::buffer(desc, UploadData::View(bytemuck::cast_slice(&data)))
                    .with_debug_name(format!("TransformAtlas[{first}+{}]", run.len())),
            )?;
            uploads += 1;
        }
        Ok(uploads)
    }

    /// Bindless index of the transforms atlas.
    pub fn srv_index(&self) -> ShaderVisibleIndex {
        self.atlas.srv_index()
    }

    /// Distinct transforms this frame.
    pub fn transform_count(&self) -> usize {
        self.entries.len()
    }

    /// The atlas holding the entries.
    pub fn atlas(&self) -> &AtlasBuffer {
        &self.atlas
    }
}
