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

//! Builds the frame's draw tables: one metadata record and one instance
//! record per draw, sorted and partitioned by pass.

use super::{RenderItem, ScenePrepError};
use crate::resources::{AtlasBuffer, ElementRef};
use crate::upload::{UploadCoordinator, UploadData, UploadRequest};
use bytemuck::{Pod, Zeroable};
use oxygen_core::graphics::{FrameSlot, Graphics, ShaderVisibleIndex};
use oxygen_data::AlphaMode;
use std::sync::Arc;

oxygen_core::oxygen_bitflags! {
    /// The passes a draw takes part in.
    pub struct PassMask: u32 {
        /// Opaque geometry.
        const OPAQUE = 1 << 0;
        /// Alpha-tested geometry.
        const MASKED = 1 << 1;
        /// Alpha-blended geometry.
        const TRANSPARENT = 1 << 2;
        /// Rendered without back-face culling.
        const DOUBLE_SIDED = 1 << 3;
        /// Drawn into shadow maps.
        const SHADOW_CASTER = 1 << 4;
    }
}

/// Per-draw geometry record, as shaders read it.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawMetadata {
    /// First index of the submesh.
    pub first_index: u32,
    /// Index count; zero for non-indexed draws.
    pub index_count: u32,
    /// Added to each index.
    pub base_vertex: i32,
    /// First vertex of non-indexed draws.
    pub first_vertex: u32,
    /// Vertex count of non-indexed draws, or of the whole mesh.
    pub vertex_count: u32,
    /// Position of the draw after sorting.
    pub draw_id: u32,
    /// Dense mesh id.
    pub mesh_id: u32,
    /// Submesh within the mesh.
    pub submesh_id: u32,
}

const _: () = assert!(std::mem::size_of::<DrawMetadata>() == 32);

/// Per-draw bindless indices, as shaders read them.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawInstanceData {
    /// Element of the transforms table.
    pub transform_index: u32,
    /// Element of the materials table.
    pub material_index: u32,
    /// Raw SRV of the vertex buffer.
    pub vertex_buffer_srv: u32,
    /// Raw SRV of the index buffer, invalid when not indexed.
    pub index_buffer_srv: u32,
}

const _: () = assert!(std::mem::size_of::<DrawInstanceData>() == 16);

/// A contiguous run of draws sharing a pass mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassPartition {
    /// First draw.
    pub begin: u32,
    /// One past the last draw.
    pub end: u32,
    /// The shared mask.
    pub pass_mask: PassMask,
}

fn pass_mask_of(item: &RenderItem) -> PassMask {
    let (alpha_mode, double_sided) = item
        .material
        .as_ref()
        .map_or((AlphaMode::Opaque, false), |m| (m.alpha_mode, m.double_sided));
    let mut mask = match alpha_mode {
        AlphaMode::Opaque => PassMask::OPAQUE,
        AlphaMode::Masked => PassMask::MASKED,
        AlphaMode::Blended => PassMask::TRANSPARENT,
    };
    if double_sided {
        mask.insert(PassMask::DOUBLE_SIDED);
    }
    if item.cast_shadows && alpha_mode != AlphaMode::Blended {
        mask.insert(PassMask::SHADOW_CASTER);
    }
    mask
}

/// Owns the CPU shadow of the draw tables and their GPU atlases.
///
/// The metadata and instance atlases grow in lockstep so one element index
/// addresses both; that index is what a draw passes to its shaders.
#[derive(Debug)]
pub struct DrawEmitter {
    uploads: Arc<UploadCoordinator>,
    metadata_atlas: AtlasBuffer,
    instance_atlas: AtlasBuffer,
    slack: f32,
    slot: FrameSlot,
    metadata: Vec<DrawMetadata>,
    instances: Vec<DrawInstanceData>,
    pass_masks: Vec<PassMask>,
    partitions: Vec<PassPartition>,
    elements: Vec<ElementRef>,
    slot_refs: Vec<Vec<ElementRef>>,
}

impl DrawEmitter {
    /// Creates an emitter with empty tables.
    pub fn new(graphics: Arc<dyn Graphics>, uploads: Arc<UploadCoordinator>) -> Self {
        let config = graphics.config();
        let slack = config.atlas_growth_slack;
        let frames = config.frames_in_flight.max(1) as usize;
        Self {
            uploads,
            metadata_atlas: AtlasBuffer::new(
                Arc::clone(&graphics),
                std::mem::size_of::<DrawMetadata>() as u32,
                "DrawMetadata",
            ),
            instance_atlas: AtlasBuffer::new(
                graphics,
                std::mem::size_of::<DrawInstanceData>() as u32,
                "DrawInstances",
            ),
            slack,
            slot: FrameSlot(0),
            metadata: Vec::new(),
            instances: Vec::new(),
            pass_masks: Vec::new(),
            partitions: Vec::new(),
            elements: Vec::new(),
            slot_refs: vec![Vec::new(); frames],
        }
    }

    /// Begins `slot`: resets the tables and frees the elements the previous
    /// frame in `slot` used.
    pub fn on_frame_start(&mut self, slot: FrameSlot) {
        let index = slot.index() % self.slot_refs.len();
        for element in self.slot_refs[index].drain(..) {
            self.metadata_atlas.release(element, slot);
        }
        self.metadata_atlas.on_frame_start(slot);
        self.slot = slot;
        self.metadata.clear();
        self.instances.clear();
        self.pass_masks.clear();
        self.partitions.clear();
        self.elements.clear();
    }

    /// Appends the draw of a resolved item and returns its provisional id.
    ///
    /// Items without geometry bindings are skipped.
    pub fn emit_draw_metadata(&mut self, item: &RenderItem) -> Option<u32> {
        let mesh = item.resolved.mesh?;
        let Some(submesh) = item.mesh.submeshes.get(item.submesh_index as usize) else {
            log::warn!(
                "DrawEmitter: '{}' has no submesh {}",
                item.mesh.name,
                item.submesh_index
            );
            return None;
        };
        let draw_id = self.metadata.len() as u32;
        let (first_index, index_count, first_vertex, vertex_count) = if mesh.is_indexed() {
            (submesh.first_index, submesh.index_count, 0, mesh.vertex_count)
        } else {
            (0, 0, submesh.first_index, submesh.index_count)
        };
        self.metadata.push(DrawMetadata {
            first_index,
            index_count,
            base_vertex: 0,
            first_vertex,
            vertex_count,
            draw_id,
            mesh_id: mesh.mesh_id,
            submesh_id: item.submesh_index,
        });
        self.instances.push(DrawInstanceData {
            transform_index: item.resolved.transform_index,
            material_index: item.resolved.material_index,
            vertex_buffer_srv: mesh.vertex_srv.get(),
            index_buffer_srv: mesh.index_srv.get(),
        });
        self.pass_masks.push(pass_mask_of(item));
        Some(draw_id)
    }

    /// Sorts draws by pass mask, material and geometry buffers, renumbers
    /// them, and groups runs of equal pass masks into partitions.
    pub fn sort_and_partition(&mut self) {
        let mut order: Vec<usize> = (0..self.metadata.len()).collect();
        order.sort_by_key(|&i| {
            let instance = &self.instances[i];
            (
                self.pass_masks[i].bits(),
                instance.material_index,
                instance.vertex_buffer_srv,
                instance.index_buffer_srv,
            )
        });
        let mut metadata: Vec<DrawMetadata> = order.iter().map(|&i| self.metadata[i]).collect();
        let instances: Vec<DrawInstanceData> = order.iter().map(|&i| self.instances[i]).collect();
        let pass_masks: Vec<PassMask> = order.iter().map(|&i| self.pass_masks[i]).collect();
        for (draw_id, record) in metadata.iter_mut().enumerate() {
            record.draw_id = draw_id as u32;
        }
        self.metadata = metadata;
        self.instances = instances;
        self.pass_masks = pass_masks;

        self.partitions.clear();
        let mut begin = 0;
        for run in self.pass_masks.chunk_by(|a, b| a == b) {
            let end = begin + run.len() as u32;
            self.partitions.push(PassPartition {
                begin,
                end,
                pass_mask: run[0],
            });
            begin = end;
        }
    }

    /// Allocates one element per draw in both atlases and uploads the
    /// tables, coalescing runs of consecutive elements. Returns the number of
    /// runs uploaded.
    ///
    /// Elements allocated earlier in the same frame are reused; only draws
    /// emitted since then get new ones.
    pub fn ensure_frame_resources(&mut self) -> Result<usize, ScenePrepError> {
        if self.metadata.is_empty() {
            return Ok(0);
        }
        let missing = self.metadata.len().saturating_sub(self.elements.len()) as u32;
        let needed = self.metadata_atlas.allocated_count() + missing;
        self.metadata_atlas.ensure_capacity(needed, self.slack)?;
        self.instance_atlas.ensure_capacity(needed, self.slack)?;

        let slot = self.slot.index() % self.slot_refs.len();
        for _ in 0..missing {
            let element = self.metadata_atlas.allocate(1)?;
            self.slot_refs[slot].push(element);
            self.elements.push(element);
        }

        let mut order: Vec<usize> = (0..self.elements.len()).collect();
        order.sort_by_key(|&draw| self.elements[draw].element_index);
        let mut runs = 0;
        for run in order.chunk_by(|&a, &b| {
            self.elements[b].element_index == self.elements[a].element_index + 1
        }) {
            let first = self.elements[run[0]].element_index;
            let count = run.len() as u32;
            let metadata: Vec<DrawMetadata> = run.iter().map(|&d| self.metadata[d]).collect();
            let instances: Vec<DrawInstanceData> = run.iter().map(|&d| self.instances[d]).collect();
            self.uploads.submit(
                UploadRequest::buffer(
                    self.metadata_atlas.make_run_upload_desc(first, count)?,
                    UploadData::View(bytemuck::cast_slice(&metadata)),
                )
                .with_debug_name(format!("DrawMetadata[{first}+{count}]")),
            )?;
            self.uploads.submit(
                UploadRequest::buffer(
                    self.instance_atlas.make_run_upload_desc(first, count)?,
                    UploadData::View(bytemuck::cast_slice(&instances)),
                )
                .with_debug_name(format!("DrawInstances[{first}+{count}]")),
            )?;
            runs += 1;
        }
        log::trace!(
            "DrawEmitter: {} draws in {} partitions, {runs} upload runs",
            self.metadata.len(),
            self.partitions.len()
        );
        Ok(runs)
    }

    /// The CPU copy of the metadata table, in draw order.
    pub fn draw_metadata_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.metadata)
    }

    /// The metadata records, in draw order.
    pub fn draw_metadata(&self) -> &[DrawMetadata] {
        &self.metadata
    }

    /// The instance records, in draw order.
    pub fn instances(&self) -> &[DrawInstanceData] {
        &self.instances
    }

    /// Pass mask of each draw, in draw order.
    pub fn pass_masks(&self) -> &[PassMask] {
        &self.pass_masks
    }

    /// Partitions of the sorted draws.
    pub fn partitions(&self) -> &[PassPartition] {
        &self.partitions
    }

    /// Number of draws this frame.
    pub fn draw_count(&self) -> usize {
        self.metadata.len()
    }

    /// The element both tables hold `draw_id` at, once resources are ensured.
    pub fn draw_element(&self, draw_id: u32) -> Option<u32> {
        self.elements
            .get(draw_id as usize)
            .map(|element| element.element_index)
    }

    /// Bindless index of the metadata table.
    pub fn metadata_srv_index(&self) -> ShaderVisibleIndex {
        self.metadata_atlas.srv_index()
    }

    /// Bindless index of the instance table.
    pub fn instance_srv_index(&self) -> ShaderVisibleIndex {
        self.instance_atlas.srv_index()
    }

    /// The metadata atlas.
    pub fn metadata_atlas(&self) -> &AtlasBuffer {
        &self.metadata_atlas
    }

    /// The instance atlas.
    pub fn instance_atlas(&self) -> &AtlasBuffer {
        &self.instance_atlas
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene_prep::{MeshBinding, ResolvedBindings};
    use glam::Mat4;
    use oxygen_core::config::GraphicsConfig;
    use oxygen_data::{Aabb, GeometryAsset, MaterialAsset, Mesh, Scene};
    use oxygen_infra::HeadlessGraphics;

    fn emitter() -> (Arc<HeadlessGraphics>, Arc<UploadCoordinator>, DrawEmitter) {
        let graphics = HeadlessGraphics::new(GraphicsConfig::default()).unwrap();
        let uploads = Arc::new(UploadCoordinator::new(graphics.clone()).unwrap());
        let emitter = DrawEmitter::new(graphics.clone(), uploads.clone());
        (graphics, uploads, emitter)
    }

    fn item(material: Option<MaterialAsset>, material_index: u32, vertex_srv: u32, cast_shadows: bool) -> RenderItem {
        let mut scene = Scene::new();
        let node = scene.create_node("Node", None).unwrap();
        let mesh = Arc::new(Mesh::cube("Cube", 0.5, None));
        RenderItem {
            node,
            world: Mat4::IDENTITY,
            world_bounds: Aabb::INVALID,
            geometry: Arc::new(GeometryAsset::new("Cube", vec![mesh.clone()])),
            lod: 0,
            mesh,
            submesh_index: 0,
            material: material.map(Arc::new),
            cast_shadows,
            receive_shadows: true,
            render_layer: 1,
            resolved: ResolvedBindings {
                transform_index: 0,
                material_index,
                mesh: Some(MeshBinding {
                    mesh_id: 0,
                    vertex_srv: ShaderVisibleIndex(vertex_srv),
                    index_srv: ShaderVisibleIndex(vertex_srv + 1),
                    vertex_count: 24,
                    index_count: 36,
                }),
            },
        }
    }

    fn blended() -> MaterialAsset {
        let mut material = MaterialAsset::new("Glass");
        material.alpha_mode = AlphaMode::Blended;
        material
    }

    #[test]
    fn pass_mask_follows_material_and_shadows() {
        assert_eq!(
            pass_mask_of(&item(None, 0, 10, true)),
            PassMask::OPAQUE | PassMask::SHADOW_CASTER
        );
        assert_eq!(pass_mask_of(&item(Some(blended()), 1, 10, true)), PassMask::TRANSPARENT);
    }

    #[test]
    fn draws_are_sorted_and_partitions_cover_them_once() {
        let (_graphics, _uploads, mut emitter) = emitter();
        emitter.on_frame_start(FrameSlot(0));
        emitter.emit_draw_metadata(&item(Some(blended()), 3, 10, false));
        emitter.emit_draw_metadata(&item(None, 2, 20, false));
        emitter.emit_draw_metadata(&item(None, 1, 30, false));
        emitter.emit_draw_metadata(&item(None, 1, 10, false));
        emitter.sort_and_partition();

        let materials: Vec<u32> = emitter.instances().iter().map(|i| i.material_index).collect();
        assert_eq!(materials, vec![1, 1, 2, 3]);
        let vbs: Vec<u32> = emitter
            .instances()
            .iter()
            .map(|i| i.vertex_buffer_srv)
            .collect();
        assert_eq!(vbs, vec![10, 30, 20, 10]);
        let ids: Vec<u32> = emitter.draw_metadata().iter().map(|m| m.draw_id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);

        let partitions = emitter.partitions();
        assert_eq!(partitions.len(), 2);
        assert_eq!((partitions[0].begin, partitions[0].end), (0, 3));
        assert_eq!(partitions[0].pass_mask, PassMask::OPAQUE);
        assert_eq!((partitions[1].begin, partitions[1].end), (3, 4));
        assert_eq!(partitions[1].pass_mask, PassMask::TRANSPARENT);
        assert_eq!(emitter.draw_metadata_bytes().len(), 4 * 32);
        assert_eq!(emitter.pass_masks()[3], PassMask::TRANSPARENT);
    }

    #[test]
    fn metadata_bytes_follow_the_shader_layout() {
        assert_eq!(std::mem::size_of::<DrawMetadata>(), 32);
        assert_eq!(std::mem::size_of::<DrawInstanceData>(), 16);

        let (_graphics, _uploads, mut emitter) = emitter();
        emitter.on_frame_start(FrameSlot(0));
        let mut second = item(None, 1, 10, false);
        second.resolved.mesh.as_mut().unwrap().mesh_id = 7;
        emitter.emit_draw_metadata(&item(None, 0, 10, false));
        emitter.emit_draw_metadata(&second);
        emitter.sort_and_partition();

        let bytes = emitter.draw_metadata_bytes();
        let word = |offset: usize| u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap());
        // first_index, index_count, base_vertex, first_vertex, vertex_count, draw_id, mesh_id, submesh_id
        assert_eq!(word(4), 36);
        assert_eq!(word(16), 24);
        assert_eq!(word(20), 0);
        assert_eq!(word(24), 0);
        assert_eq!(word(32 + 20), 1);
        assert_eq!(word(32 + 24), 7);
        assert_eq!(word(32 + 28), 0);
    }

    #[test]
    fn unresolved_items_are_skipped() {
        let (_graphics, _uploads, mut emitter) = emitter();
        emitter.on_frame_start(FrameSlot(0));
        let mut unresolved = item(None, 0, 10, false);
        unresolved.resolved.mesh = None;
        assert_eq!(emitter.emit_draw_metadata(&unresolved), None);
        assert_eq!(emitter.draw_count(), 0);
    }

    #[test]
    fn tables_reach_both_atlases_at_the_same_element() {
        let (graphics, uploads, mut emitter) = emitter();
        emitter.on_frame_start(FrameSlot(0));
        emitter.emit_draw_metadata(&item(None, 5, 10, false));
        emitter.emit_draw_metadata(&item(None, 6, 20, false));
        emitter.sort_and_partition();
        assert_eq!(emitter.ensure_frame_resources().unwrap(), 1);
        uploads.flush().unwrap();

        let element = emitter.draw_element(1).unwrap() as u64;
        let instance_buffer = emitter.instance_atlas().buffer().unwrap();
        let bytes = graphics
            .read_buffer(&instance_buffer, element * 16, 16)
            .unwrap();
        let instance: DrawInstanceData = bytemuck::pod_read_unaligned(&bytes);
        assert_eq!(instance.material_index, 6);
        assert_eq!(
            emitter.metadata_atlas().capacity(),
            emitter.instance_atlas().capacity()
        );
    }

    #[test]
    fn ensuring_twice_in_a_frame_reuses_elements() {
        let (_graphics, uploads, mut emitter) = emitter();
        emitter.on_frame_start(FrameSlot(0));
        emitter.emit_draw_metadata(&item(None, 0, 10, false));
        emitter.emit_draw_metadata(&item(None, 0, 20, false));
        emitter.sort_and_partition();
        emitter.ensure_frame_resources().unwrap();
        let first: Vec<u32> = (0..2).map(|d| emitter.draw_element(d).unwrap()).collect();

        emitter.ensure_frame_resources().unwrap();
        assert_eq!(emitter.metadata_atlas().allocated_count(), 2);
        let second: Vec<u32> = (0..2).map(|d| emitter.draw_element(d).unwrap()).collect();
        assert_eq!(first, second);

        emitter.emit_draw_metadata(&item(None, 0, 30, false));
        emitter.ensure_frame_resources().unwrap();
        assert_eq!(emitter.metadata_atlas().allocated_count(), 3);
        uploads.flush().unwrap();
    }

    #[test]
    fn elements_are_recycled_with_their_slot() {
        let (_graphics, _uploads, mut emitter) = emitter();
        for slot in [0, 1, 0, 1] {
            emitter.on_frame_start(FrameSlot(slot));
            emitter.emit_draw_metadata(&item(None, 0, 10, false));
            emitter.sort_and_partition();
            emitter.ensure_frame_resources().unwrap();
        }
        assert_eq!(emitter.metadata_atlas().allocated_count(), 2);
    }
}
