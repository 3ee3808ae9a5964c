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

//! An arena scene graph with generational handles.

mod transform;

pub use transform::Transform;

use crate::components::{LightComponent, Renderable};
use glam::Mat4;

oxygen_core::oxygen_bitflags! {
    /// Per-node flags. The inherited subset is AND-ed down the hierarchy.
    pub struct NodeFlags: u32 {
        /// The node and its subtree are drawn.
        const VISIBLE = 1 << 0;
        /// Geometry under the node casts shadows.
        const CASTS_SHADOWS = 1 << 1;
        /// Geometry under the node receives shadows.
        const RECEIVES_SHADOWS = 1 << 2;
        /// The node never moves after creation.
        const STATIC = 1 << 3;
    }
}

impl NodeFlags {
    /// Flags a child only keeps when its parent has them too.
    pub const INHERITED: Self = Self::VISIBLE
        .with(Self::CASTS_SHADOWS)
        .with(Self::RECEIVES_SHADOWS);
}

/// A generational reference to a node. A stale handle never resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle {
    index: u32,
    generation: u32,
}

impl NodeHandle {
    /// The arena slot.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// The slot generation the handle was issued for.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// A scene node and its capabilities.
#[derive(Debug, Clone)]
pub struct Node {
    /// Debug name.
    pub name: String,
    /// Transform relative to the parent.
    pub local_transform: Transform,
    /// Flags as authored on this node.
    pub flags: NodeFlags,
    /// Layer bit tested against the view's layer mask.
    pub render_layer: u32,
    /// Optional geometry.
    pub renderable: Option<Renderable>,
    /// Optional light.
    pub light: Option<LightComponent>,
    parent: Option<NodeHandle>,
    children: Vec<NodeHandle>,
    world: Mat4,
    effective_flags: NodeFlags,
}

impl Node {
    fn new(name: String, parent: Option<NodeHandle>) -> Self {
        let flags = NodeFlags::VISIBLE | NodeFlags::CASTS_SHADOWS | NodeFlags::RECEIVES_SHADOWS;
        Self {
            name,
            local_transform: Transform::IDENTITY,
            flags,
            render_layer: 1,
            renderable: None,
            light: None,
            parent,
            children: Vec::new(),
            world: Mat4::IDENTITY,
            effective_flags: flags,
        }
    }

    /// The parent, if any.
    pub fn parent(&self) -> Option<NodeHandle> {
        self.parent
    }

    /// The children in creation order.
    pub fn children(&self) -> &[NodeHandle] {
        &self.children
    }

    /// World matrix as of the last [`Scene::update_transforms`].
    pub fn world_matrix(&self) -> Mat4 {
        self.world
    }

    /// Flags after inheritance, as of the last [`Scene::update_transforms`].
    pub fn effective_flags(&self) -> NodeFlags {
        self.effective_flags
    }
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// The scene arena.
#[derive(Debug, Clone, Default)]
pub struct Scene {
    slots: Vec<Slot>,
    free: Vec<u32>,
    roots: Vec<NodeHandle>,
}

impl Scene {
    /// Creates an empty scene.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a node under `parent`, or a root node.
    ///
    /// Returns `None` if `parent` is stale.
    pub fn create_node(
        &mut self,
        name: impl Into<String>,
        parent: Option<NodeHandle>,
    ) -> Option<NodeHandle> {
        if let Some(parent) = parent {
            self.get(parent)?;
        }
        let node = Node::new(name.into(), parent);
        let handle = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.node = Some(node);
                NodeHandle {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                NodeHandle {
                    index: (self.slots.len() - 1) as u32,
                    generation: 0,
                }
            }
        };
        match parent.and_then(|p| self.get_mut(p)) {
            Some(parent) => parent.children.push(handle),
            None => self.roots.push(handle),
        }
        Some(handle)
    }

    /// Destroys a node and its whole subtree. Returns `false` for stale handles.
    pub fn destroy_node(&mut self, handle: NodeHandle) -> bool {
        let Some(parent) = self.get(handle).map(|n| n.parent) else {
            return false;
        };
        match parent.and_then(|p| self.get_mut(p)) {
            Some(parent) => parent.children.retain(|c| *c != handle),
            None => self.roots.retain(|r| *r != handle),
        }

        let mut pending = vec![handle];
        while let Some(current) = pending.pop() {
            let slot = &mut self.slots[current.index as usize];
            if let Some(node) = slot.node.take() {
                pending.extend(node.children);
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(current.index);
            }
        }
        true
    }

    /// Resolves a handle.
    pub fn get(&self, handle: NodeHandle) -> Option<&Node> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    /// Resolves a handle mutably.
    pub fn get_mut(&mut self, handle: NodeHandle) -> Option<&mut Node> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.node.as_mut())
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Returns `true` if the scene has no node.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live nodes in arena order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeHandle, &Node)> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.node.as_ref().map(|node| {
                (
                    NodeHandle {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    node,
                )
            })
        })
    }

    /// Recomputes world matrices and inherited flags, parents before children.
    pub fn update_transforms(&mut self) {
        let mut stack: Vec<(NodeHandle, Mat4, NodeFlags)> = self
            .roots
            .iter()
            .rev()
            .map(|root| (*root, Mat4::IDENTITY, NodeFlags::ALL))
            .collect();

        while let Some((handle, parent_world, parent_flags)) = stack.pop() {
            let Some(node) = self.get_mut(handle) else {
                continue;
            };
            node.world = parent_world * node.local_transform.to_matrix();
            let inherited = (node.flags & parent_flags) & NodeFlags::INHERITED;
            node.effective_flags = (node.flags.without(NodeFlags::INHERITED)) | inherited;
            let (world, flags) = (node.world, node.effective_flags);
            stack.extend(node.children.iter().rev().map(|c| (*c, world, flags)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::Vec3;

    #[test]
    fn stale_handles_do_not_resolve() {
        let mut scene = Scene::new();
        let a = scene.create_node("a", None).unwrap();
        assert!(scene.destroy_node(a));
        let b = scene.create_node("b", None).unwrap();

        assert_eq!(a.index(), b.index());
        assert_ne!(a.generation(), b.generation());
        assert!(scene.get(a).is_none());
        assert_eq!(scene.get(b).unwrap().name, "b");
        assert!(!scene.destroy_node(a));
    }

    #[test]
    fn destroy_removes_the_subtree() {
        let mut scene = Scene::new();
        let root = scene.create_node("root", None).unwrap();
        let child = scene.create_node("child", Some(root)).unwrap();
        let grandchild = scene.create_node("grandchild", Some(child)).unwrap();
        let sibling = scene.create_node("sibling", Some(root)).unwrap();

        scene.destroy_node(child);
        assert!(scene.get(grandchild).is_none());
        assert_eq!(scene.get(root).unwrap().children(), &[sibling]);
        assert_eq!(scene.len(), 2);
    }

    #[test]
    fn world_matrices_compose_down_the_tree() {
        let mut scene = Scene::new();
        let root = scene.create_node("root", None).unwrap();
        let child = scene.create_node("child", Some(root)).unwrap();
        scene.get_mut(root).unwrap().local_transform =
            Transform::from_translation(Vec3::new(1.0, 0.0, 0.0));
        scene.get_mut(child).unwrap().local_transform =
            Transform::from_translation(Vec3::new(0.0, 2.0, 0.0));

        scene.update_transforms();

        let p = scene.get(child).unwrap().world_matrix().transform_point3(Vec3::ZERO);
        assert_relative_eq!(p.x, 1.0);
        assert_relative_eq!(p.y, 2.0);
    }

    #[test]
    fn inherited_flags_are_anded() {
        let mut scene = Scene::new();
        let root = scene.create_node("root", None).unwrap();
        let child = scene.create_node("child", Some(root)).unwrap();
        scene.get_mut(root).unwrap().flags.remove(NodeFlags::VISIBLE);
        scene.get_mut(child).unwrap().flags.insert(NodeFlags::STATIC);

        scene.update_transforms();

        let flags = scene.get(child).unwrap().effective_flags();
        assert!(!flags.contains(NodeFlags::VISIBLE));
        assert!(flags.contains(NodeFlags::CASTS_SHADOWS));
        assert!(flags.contains(NodeFlags::STATIC));
    }

    #[test]
    fn iteration_follows_arena_order() {
        let mut scene = Scene::new();
        let names = ["a", "b", "c"];
        for name in names {
            scene.create_node(name, None).unwrap();
        }
        let seen: Vec<_> = scene.iter().map(|(_, n)| n.name.as_str()).collect();
        assert_eq!(seen, names);
    }
}
