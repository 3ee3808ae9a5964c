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

//! Extraction of render items from a scene snapshot.

use super::{RenderItem, ResolvedBindings, ViewState};
use oxygen_data::{Frustum, LodContext, LodPolicy, Node, NodeFlags, NodeHandle, Renderable, Scene};
use std::sync::Arc;

/// Counters of the last [`ScenePrepState::collect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExtractionStats {
    /// Nodes with a renderable.
    pub renderables: usize,
    /// Nodes dropped by the visibility and layer tests.
    pub hidden: usize,
    /// Submeshes dropped by frustum culling.
    pub culled: usize,
    /// Items emitted.
    pub emitted: usize,
}

/// Per-node data carried from stage to stage.
struct Candidate<'a> {
    handle: NodeHandle,
    node: &'a Node,
    renderable: &'a Renderable,
}

/// Owns the render items of the current frame.
#[derive(Debug, Default)]
pub struct ScenePrepState {
    items: Vec<RenderItem>,
    stats: ExtractionStats,
}

impl ScenePrepState {
    /// Creates an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops the previous frame's items.
    pub fn on_frame_start(&mut self) {
        self.items.clear();
        self.stats = ExtractionStats::default();
    }

    /// Items of the current frame.
    pub fn items(&self) -> &[RenderItem] {
        &self.items
    }

    /// Items of the current frame, for the resolvers.
    pub fn items_mut(&mut self) -> &mut [RenderItem] {
        &mut self.items
    }

    /// Counters of the last collection.
    pub fn stats(&self) -> ExtractionStats {
        self.stats
    }

    /// Walks `scene` in arena order and emits one item per visible submesh.
    ///
    /// World matrices and effective flags are read as of the last
    /// [`Scene::update_transforms`]. `default_lod` applies to renderables
    /// without their own policy.
    pub fn collect(&mut self, scene: &Scene, view: &ViewState, default_lod: &LodPolicy) -> &[RenderItem] {
        self.items.clear();
        self.stats = ExtractionStats::default();
        let frustum = view.frustum();
        let lod_context = view.lod_context();

        for (handle, node) in scene.iter() {
            // 1. Pre-filter: drawable and visible.
            let Some(candidate) = pre_filter(handle, node) else {
                continue;
            };
            self.stats.renderables += 1;
            // 2. Visibility: flags and layer.
            if !visible_in(candidate.node, view.layer_mask) {
                self.stats.hidden += 1;
                continue;
            }
            self.emit_submeshes(&candidate, &frustum, &lod_context, default_lod);
        }

        log::trace!(
            "ScenePrep: {} items from {} renderables ({} hidden, {} culled)",
            self.stats.emitted,
            self.stats.renderables,
            self.stats.hidden,
            self.stats.culled
        );
        &self.items
    }

    fn emit_submeshes(
        &mut self,
        candidate: &Candidate<'_>,
        frustum: &Frustum,
        lod_context: &LodContext,
        default_lod: &LodPolicy,
    ) {
        // 3. Transform snapshot.
        let world = candidate.node.world_matrix();
        let renderable = candidate.renderable;
        let geometry = &renderable.geometry;

        // 4. Mesh and LOD.
        let object_bounds = geometry.bounds.transform(&world);
        let policy = renderable.lod_policy.as_ref().unwrap_or(default_lod);
        let lod = policy.select_lod(geometry.lod_count(), &object_bounds, lod_context);
        let Some(mesh) = geometry.lod(lod) else {
            log::warn!("ScenePrep: '{}' has no LODs", geometry.name);
            return;
        };

        // 5. Flags.
        let flags = candidate.node.effective_flags();
        let cast_shadows = flags.contains(NodeFlags::CASTS_SHADOWS);
        let receive_shadows = flags.contains(NodeFlags::RECEIVES_SHADOWS);

        for (index, submesh) in mesh.submeshes.iter().enumerate() {
            let submesh_index = index as u32;
            if !renderable.is_submesh_visible(submesh_index) {
                continue;
            }
            // 6. Frustum test on the submesh bounds.
            let local_bounds = if submesh.bounds.is_valid() { submesh.bounds } else { mesh.bounds };
            let world_bounds = local_bounds.transform(&world);
            if world_bounds.is_valid() && !frustum.intersects_aabb(&world_bounds) {
                self.stats.culled += 1;
                continue;
            }
            // 7. Material: override, then the submesh's own.
            let material = renderable
                .material_override(submesh_index)
                .or(submesh.material.as_ref())
                .cloned();

            self.items.push(RenderItem {
                node: candidate.handle,
                world,
                world_bounds,
                geometry: Arc::clone(geometry),
                lod,
                mesh: Arc::clone(mesh),
                submesh_index,
                material,
                cast_shadows,
                receive_shadows,
                render_layer: candidate.node.render_layer,
                resolved: ResolvedBindings::default(),
            });
            self.stats.emitted += 1;
        }
    }
}

fn pre_filter(handle: NodeHandle, node: &Node) -> Option<Candidate<'_>> {
    let renderable = node.renderable.as_ref()?;
    Some(Candidate {
        handle,
        node,
        renderable,
    })
}

fn visible_in(node: &Node, layer_mask: u32) -> bool {
    node.effective_flags().contains(NodeFlags::VISIBLE) && node.render_layer & layer_mask != 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use oxygen_data::{GeometryAsset, MaterialAsset, Mesh, Transform};

    fn cube_geometry(name: &str) -> Arc<GeometryAsset> {
        let material = Arc::new(MaterialAsset::new(&format!("{name}.Material")));
        let mesh = Arc::new(Mesh::cube(name, 0.5, Some(material)));
        Arc::new(GeometryAsset::new(name, vec![mesh]))
    }

    fn view() -> ViewState {
        ViewState::look_at(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO, 1.0, (1280, 720), 0.1, 100.0)
    }

    fn place(scene: &mut Scene, name: &str, at: Vec3) -> NodeHandle {
        let handle = scene.create_node(name, None).unwrap();
        let node = scene.get_mut(handle).unwrap();
        node.local_transform = Transform::from_translation(at);
        node.renderable = Some(Renderable::new(cube_geometry(name)));
        handle
    }

    #[test]
    fn emits_visible_submeshes_in_arena_order() {
        let mut scene = Scene::new();
        let a = place(&mut scene, "A", Vec3::new(-1.0, 0.0, 0.0));
        let b = place(&mut scene, "B", Vec3::new(1.0, 0.0, 0.0));
        scene.update_transforms();

        let mut state = ScenePrepState::new();
        let items = state.collect(&scene, &view(), &LodPolicy::default());
        let nodes: Vec<NodeHandle> = items.iter().map(|i| i.node).collect();
        assert_eq!(nodes, vec![a, b]);
        assert!(items[0].material.is_some());
    }

    #[test]
    fn hidden_and_culled_nodes_are_dropped() {
        let mut scene = Scene::new();
        place(&mut scene, "Visible", Vec3::ZERO);
        let hidden = place(&mut scene, "Hidden", Vec3::ZERO);
        place(&mut scene, "Behind", Vec3::new(0.0, 0.0, 50.0));
        scene.get_mut(hidden).unwrap().flags.remove(NodeFlags::VISIBLE);
        scene.update_transforms();

        let mut state = ScenePrepState::new();
        state.collect(&scene, &view(), &LodPolicy::default());
        assert_eq!(state.items().len(), 1);
        assert_eq!(state.stats().hidden, 1);
        assert_eq!(state.stats().culled, 1);
    }

    #[test]
    fn layer_mask_filters_nodes() {
        let mut scene = Scene::new();
        let node = place(&mut scene, "Layer2", Vec3::ZERO);
        scene.get_mut(node).unwrap().render_layer = 1 << 2;
        scene.update_transforms();

        let mut view = view();
        view.layer_mask = 1;
        let mut state = ScenePrepState::new();
        assert!(state.collect(&scene, &view, &LodPolicy::default()).is_empty());
    }

    #[test]
    fn collection_is_deterministic() {
        let mut scene = Scene::new();
        for i in 0..5 {
            place(&mut scene, &format!("N{i}"), Vec3::new(i as f32 - 2.0, 0.0, 0.0));
        }
        scene.update_transforms();

        let key = |items: &[RenderItem]| -> Vec<(NodeHandle, u32, u32, [f32; 16])> {
            items
                .iter()
                .map(|i| (i.node, i.lod, i.submesh_index, i.world.to_cols_array()))
                .collect()
        };
        let mut first = ScenePrepState::new();
        let mut second = ScenePrepState::new();
        let a = key(first.collect(&scene, &view(), &LodPolicy::default()));
        let b = key(second.collect(&scene, &view(), &LodPolicy::default()));
        assert_eq!(a, b);
    }
}
