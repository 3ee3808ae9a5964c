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

//! Scene preparation: turns a scene snapshot into GPU-ready draw data.
//!
//! [`ScenePrepState::collect`] extracts one [`RenderItem`] per visible
//! submesh. The resolvers then bind each item's resources: transforms
//! ([`TransformUploader`]), materials ([`MaterialBinder`], resolving textures
//! through the [`TextureBinder`]) and geometry ([`GeometryUploader`]). The
//! [`DrawEmitter`] finally builds the sorted, partitioned draw tables.

mod draw_emitter;
mod extraction;
mod geometry_uploader;
mod material_binder;
mod texture_binder;
mod transform_uploader;

pub use draw_emitter::{DrawEmitter, DrawInstanceData, DrawMetadata, PassMask, PassPartition};
pub use extraction::{ExtractionStats, ScenePrepState};
pub use geometry_uploader::{GeometryUploader, MeshBinding};
pub use material_binder::{MaterialBinder, MaterialConstants, MaterialFlags};
pub use texture_binder::{
    InMemoryTextureSource, TextureBinder, TextureData, TextureEntryState, TextureLoadCompletion,
    TextureSource,
};
pub use transform_uploader::{TransformEntry, TransformUploader};

use crate::resources::AtlasError;
use crate::upload::UploadError;
use glam::{Mat4, Vec3};
use oxygen_core::graphics::GraphicsError;
use oxygen_data::{Aabb, Frustum, GeometryAsset, LodContext, MaterialAsset, Mesh, NodeHandle};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while preparing a frame.
#[derive(Debug, Error)]
pub enum ScenePrepError {
    /// A graphics call failed.
    #[error("Graphics error: {0}")]
    Graphics(#[from] GraphicsError),
    /// Submitting an upload failed.
    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),
    /// An atlas could not provide an element.
    #[error("Atlas error: {0}")]
    Atlas(#[from] AtlasError),
    /// A mesh without vertices cannot be uploaded.
    #[error("Mesh '{0}' has no vertices")]
    EmptyMesh(String),
}

/// The camera a frame is prepared for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewState {
    /// World to view.
    pub view: Mat4,
    /// View to clip, with a `[0, 1]` depth range.
    pub projection: Mat4,
    /// Camera position in world space.
    pub camera_position: Vec3,
    /// Viewport height in pixels.
    pub viewport_height: f32,
    /// Render layers this view draws.
    pub layer_mask: u32,
}

impl ViewState {
    /// A perspective camera at `eye` looking at `target`.
    pub fn look_at(
        eye: Vec3,
        target: Vec3,
        fov_y: f32,
        viewport: (u32, u32),
        near: f32,
        far: f32,
    ) -> Self {
        let aspect = viewport.0.max(1) as f32 / viewport.1.max(1) as f32;
        Self {
            view: Mat4::look_at_rh(eye, target, Vec3::Y),
            projection: Mat4::perspective_rh(fov_y, aspect, near, far),
            camera_position: eye,
            viewport_height: viewport.1 as f32,
            layer_mask: u32::MAX,
        }
    }

    /// Projection times view.
    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }

    /// The culling frustum.
    pub fn frustum(&self) -> Frustum {
        Frustum::from_view_projection(&self.view_projection())
    }

    /// LOD selection inputs.
    pub fn lod_context(&self) -> LodContext {
        LodContext {
            camera_position: self.camera_position,
            projection_scale: self.viewport_height * self.projection.y_axis.y * 0.5,
        }
    }
}

/// Bindings filled in by the resolvers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResolvedBindings {
    /// Element of the transforms table.
    pub transform_index: u32,
    /// Element of the materials table (0 is the default material).
    pub material_index: u32,
    /// Geometry buffers; `None` until the geometry uploader ran or if it failed.
    pub mesh: Option<MeshBinding>,
}

/// One visible submesh, ready to be resolved and drawn.
#[derive(Debug, Clone)]
pub struct RenderItem {
    /// The node it came from.
    pub node: NodeHandle,
    /// World matrix snapshot.
    pub world: Mat4,
    /// World-space bounds of the submesh.
    pub world_bounds: Aabb,
    /// The geometry asset.
    pub geometry: Arc<GeometryAsset>,
    /// The selected LOD.
    pub lod: u32,
    /// The mesh of that LOD.
    pub mesh: Arc<Mesh>,
    /// Submesh index within the mesh.
    pub submesh_index: u32,
    /// The resolved material; `None` draws the default material.
    pub material: Option<Arc<MaterialAsset>>,
    /// Effective shadow casting.
    pub cast_shadows: bool,
    /// Effective shadow receiving.
    pub receive_shadows: bool,
    /// The node's render layer.
    pub render_layer: u32,
    /// Filled by the resolvers.
    pub resolved: ResolvedBindings,
}
