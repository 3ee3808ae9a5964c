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

use super::{AssetId, MaterialAsset};
use crate::math::Aabb;
use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use std::sync::Arc;

/// The vertex layout shared by every mesh.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct Vertex {
    /// Object-space position.
    pub position: [f32; 3],
    /// Object-space normal.
    pub normal: [f32; 3],
    /// Texture coordinates.
    pub texcoord: [f32; 2],
    /// Tangent with handedness in `w`.
    pub tangent: [f32; 4],
}

/// A range of a mesh drawn with one material.
///
/// For indexed meshes the range addresses the index buffer; otherwise it
/// addresses vertices.
#[derive(Debug, Clone)]
pub struct Submesh {
    /// First index (or vertex) of the range.
    pub first_index: u32,
    /// Number of indices (or vertices).
    pub index_count: u32,
    /// Material; `None` uses the default material.
    pub material: Option<Arc<MaterialAsset>>,
    /// Object-space bounds of the range.
    pub bounds: Aabb,
}

/// One level of detail of a geometry asset.
#[derive(Debug, Clone)]
pub struct Mesh {
    /// Asset identity, used for deduplication of GPU buffers.
    pub id: AssetId,
    /// Debug name.
    pub name: String,
    /// Vertex data.
    pub vertices: Vec<Vertex>,
    /// Index data; empty for non-indexed meshes.
    pub indices: Vec<u32>,
    /// Submesh ranges.
    pub submeshes: Vec<Submesh>,
    /// Object-space bounds of all vertices.
    pub bounds: Aabb,
}

impl Mesh {
    /// Builds a mesh with a single submesh covering all of it.
    pub fn new(
        name: &str,
        vertices: Vec<Vertex>,
        indices: Vec<u32>,
        material: Option<Arc<MaterialAsset>>,
    ) -> Self {
        let bounds = Aabb::from_points(vertices.iter().map(|v| Vec3::from(v.position)))
            .unwrap_or(Aabb::INVALID);
        let count = if indices.is_empty() {
            vertices.len()
        } else {
            indices.len()
        } as u32;
        Self {
            id: AssetId::from_name(name),
            name: name.to_string(),
            vertices,
            indices,
            submeshes: vec![Submesh {
                first_index: 0,
                index_count: count,
                material,
                bounds,
            }],
            bounds,
        }
    }

    /// Returns `true` if the mesh has an index buffer.
    pub fn is_indexed(&self) -> bool {
        !self.indices.is_empty()
    }

    /// An axis-aligned box with per-face normals (24 vertices, 36 indices).
    pub fn cube(name: &str, half_extent: f32, material: Option<Arc<MaterialAsset>>) -> Self {
        const FACES: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
            ([1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, -1.0]),
            ([-1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]),
            ([0.0, 1.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0, 0.0]),
            ([0.0, -1.0, 0.0], [0.0, 0.0, -1.0], [1.0, 0.0, 0.0]),
            ([0.0, 0.0, 1.0], [0.0, 1.0, 0.0], [1.0, 0.0, 0.0]),
            ([0.0, 0.0, -1.0], [0.0, 1.0, 0.0], [-1.0, 0.0, 0.0]),
        ];
        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (normal, up, right) in FACES {
            let (n, u, r) = (Vec3::from(normal), Vec3::from(up), Vec3::from(right));
            let base = vertices.len() as u32;
            for (su, sr, uv) in [
                (-1.0, -1.0, [0.0, 1.0]),
                (1.0, -1.0, [0.0, 0.0]),
                (1.0, 1.0, [1.0, 0.0]),
                (-1.0, 1.0, [1.0, 1.0]),
            ] {
                let p = (n + u * su + r * sr) * half_extent;
                vertices.push(Vertex {
                    position: p.to_array(),
                    normal,
                    texcoord: uv,
                    tangent: [right[0], right[1], right[2], 1.0],
                });
            }
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }
        Self::new(name, vertices, indices, material)
    }
}

/// A renderable geometry with one mesh per LOD, finest first.
#[derive(Debug, Clone)]
pub struct GeometryAsset {
    /// Asset identity.
    pub id: AssetId,
    /// Debug name.
    pub name: String,
    /// LOD meshes, finest first.
    pub lods: Vec<Arc<Mesh>>,
    /// Object-space bounds of the finest LOD.
    pub bounds: Aabb,
}

impl GeometryAsset {
    /// Wraps LOD meshes, finest first.
    pub fn new(name: &str, lods: Vec<Arc<Mesh>>) -> Self {
        let bounds = lods.first().map(|m| m.bounds).unwrap_or(Aabb::INVALID);
        Self {
            id: AssetId::from_name(name),
            name: name.to_string(),
            lods,
            bounds,
        }
    }

    /// Number of LODs.
    pub fn lod_count(&self) -> usize {
        self.lods.len()
    }

    /// The mesh of `lod`, clamped to the coarsest available.
    pub fn lod(&self, lod: u32) -> Option<&Arc<Mesh>> {
        let last = self.lods.len().checked_sub(1)?;
        self.lods.get((lod as usize).min(last))
    }
}
