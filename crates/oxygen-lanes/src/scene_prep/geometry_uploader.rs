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

//! Lazy upload of mesh vertex and index buffers.

use super::ScenePrepError;
use crate::upload::{UploadBufferDesc, UploadCoordinator, UploadData, UploadRequest};
use oxygen_core::graphics::{
    Buffer, BufferDesc, BufferUsage, DescriptorHandle, Graphics, Resource, ShaderVisibleIndex,
    ViewDesc,
};
use oxygen_data::{AssetId, Mesh};
use std::collections::HashMap;
use std::sync::Arc;

/// The bindless view of an uploaded mesh.
///
/// Shaders read both buffers as raw bytes, addressed with the draw's first
/// index and base vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshBinding {
    /// Dense id, in first-use order.
    pub mesh_id: u32,
    /// Raw SRV of the vertex buffer.
    pub vertex_srv: ShaderVisibleIndex,
    /// Raw SRV of the index buffer; invalid for non-indexed meshes.
    pub index_srv: ShaderVisibleIndex,
    /// Number of vertices.
    pub vertex_count: u32,
    /// Number of indices; zero for non-indexed meshes.
    pub index_count: u32,
}

impl MeshBinding {
    /// Returns `true` if the mesh has an index buffer.
    pub fn is_indexed(&self) -> bool {
        self.index_srv != ShaderVisibleIndex::INVALID
    }
}

#[derive(Debug)]
struct GpuBuffer {
    buffer: Arc<Buffer>,
    handle: DescriptorHandle,
}

#[derive(Debug)]
struct MeshEntry {
    binding: MeshBinding,
    buffers: Vec<GpuBuffer>,
}

/// Uploads each mesh once, on first use.
pub struct GeometryUploader {
    graphics: Arc<dyn Graphics>,
    uploads: Arc<UploadCoordinator>,
    meshes: HashMap<AssetId, MeshEntry>,
}

impl std::fmt::Debug for GeometryUploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeometryUploader")
            .field("meshes", &self.meshes.len())
            .finish()
    }
}

impl GeometryUploader {
    /// Creates an uploader with no mesh.
    pub fn new(graphics: Arc<dyn Graphics>, uploads: Arc<UploadCoordinator>) -> Self {
        Self {
            graphics,
            uploads,
            meshes: HashMap::new(),
        }
    }

    /// Returns the binding of `mesh`, uploading its buffers on first use.
    ///
    /// # Errors
    ///
    /// [`ScenePrepError::EmptyMesh`] for meshes without vertices; creation
    /// and upload failures otherwise.
    pub fn get_or_upload(&mut self, mesh: &Mesh) -> Result<MeshBinding, ScenePrepError> {
        if let Some(entry) = self.meshes.get(&mesh.id) {
            return Ok(entry.binding);
        }
        if mesh.vertices.is_empty() {
            return Err(ScenePrepError::EmptyMesh(mesh.name.clone()));
        }

        let mut buffers = Vec::with_capacity(2);
        let vertex = self.upload_buffer(
            bytemuck::cast_slice(&mesh.vertices),
            BufferUsage::VERTEX,
            format!("VertexBuffer({})", mesh.name),
        )?;
        let vertex_srv = vertex.1;
        buffers.push(vertex.0);

        let index_srv = if mesh.is_indexed() {
            match self.upload_buffer(
                bytemuck::cast_slice(&mesh.indices),
                BufferUsage::INDEX,
                format!("IndexBuffer({})", mesh.name),
            ) {
                Ok((buffer, srv)) => {
                    buffers.push(buffer);
                    srv
                }
                Err(e) => {
                    buffers.into_iter().for_each(|b| self.release(b));
                    return Err(e);
                }
            }
        } else {
            ShaderVisibleIndex::INVALID
        };

        let binding = MeshBinding {
            mesh_id: self.meshes.len() as u32,
            vertex_srv,
            index_srv,
            vertex_count: mesh.vertices.len() as u32,
            index_count: if mesh.is_indexed() { mesh.indices.len() as u32 } else { 0 },
        };
        log::debug!(
            "GeometryUploader: '{}' -> mesh {} (vb srv {}, ib srv {})",
            mesh.name,
            binding.mesh_id,
            vertex_srv.get(),
            index_srv.get()
        );
        self.meshes.insert(mesh.id, MeshEntry { binding, buffers });
        Ok(binding)
    }

    fn upload_buffer(
        &self,
        bytes: &[u8],
        usage: BufferUsage,
        name: String,
    ) -> Result<(GpuBuffer, ShaderVisibleIndex), ScenePrepError> {
        let size = bytes.len() as u64;
        let buffer = self.graphics.create_buffer(BufferDesc::device_local(
            size,
            usage | BufferUsage::STORAGE | BufferUsage::COPY_DST,
            name,
        ))?;
        let resource = Resource::from(&buffer);
        self.graphics.register_resource(resource.clone())?;
        let handle = match self.graphics.allocate_view(&resource, ViewDesc::raw_srv(size)) {
            Ok(handle) => handle,
            Err(e) => {
                self.graphics.unregister_resource(resource.id());
                return Err(e.into());
            }
        };
        let gpu = GpuBuffer { buffer, handle };

        let uploaded = self.graphics.shader_visible_index(&gpu.handle).map_err(ScenePrepError::from).and_then(|srv| {
            let desc = UploadBufferDesc {
                dst: Arc::clone(&gpu.buffer),
                size_bytes: size,
                dst_offset: 0,
            };
            self.uploads.submit(UploadRequest::buffer(desc, UploadData::View(bytes)))?;
            Ok(srv)
        });
        match uploaded {
            Ok(srv) => Ok((gpu, srv)),
            Err(e) => {
                self.release(gpu);
                Err(e)
            }
        }
    }

    fn release(&self, gpu: GpuBuffer) {
        self.graphics.deferred_reclaimer().register_deferred_view_release(
            self.graphics.resource_registry(),
            Resource::from(gpu.buffer),
            gpu.handle,
        );
    }

    /// The binding of an already uploaded mesh.
    pub fn binding(&self, mesh: AssetId) -> Option<MeshBinding> {
        self.meshes.get(&mesh).map(|entry| entry.binding)
    }

    /// Number of uploaded meshes.
    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }
}

impl Drop for GeometryUploader {
    fn drop(&mut self) {
        let meshes = std::mem::take(&mut self.meshes);
        for gpu in meshes.into_values().flat_map(|entry| entry.buffers) {
            self.release(gpu);
        }
    }
}
