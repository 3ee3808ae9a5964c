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

//! GPU resources: buffers, textures and the type-erased [`Resource`] handle.

mod buffer;
mod texture;

pub use buffer::*;
pub use texture::*;

use crate::graphics::state::ResourceStates;
use std::sync::Arc;

/// A stable identifier assigned by the backend when a resource is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub u64);

/// A shared reference to any GPU resource.
#[derive(Debug, Clone)]
pub enum Resource {
    /// A buffer resource.
    Buffer(Arc<Buffer>),
    /// A texture resource.
    Texture(Arc<Texture>),
}

impl Resource {
    /// Returns the id of the underlying resource.
    pub fn id(&self) -> ResourceId {
        match self {
            Resource::Buffer(buffer) => buffer.id(),
            Resource::Texture(texture) => texture.id(),
        }
    }

    /// Returns the debug name of the underlying resource.
    pub fn debug_name(&self) -> &str {
        match self {
            Resource::Buffer(buffer) => &buffer.desc().debug_name,
            Resource::Texture(texture) => &texture.desc().debug_name,
        }
    }

    /// Returns `true` if this is a texture.
    pub fn is_texture(&self) -> bool {
        matches!(self, Resource::Texture(_))
    }

    /// The state the resource rests in between command lists.
    pub fn resting_state(&self) -> ResourceStates {
        match self {
            Resource::Buffer(buffer) => buffer.desc().initial_state(),
            Resource::Texture(_) => ResourceStates::COMMON,
        }
    }
}

impl From<Arc<Buffer>> for Resource {
    fn from(buffer: Arc<Buffer>) -> Self {
        Resource::Buffer(buffer)
    }
}

impl From<Arc<Texture>> for Resource {
    fn from(texture: Arc<Texture>) -> Self {
        Resource::Texture(texture)
    }
}

impl From<&Arc<Buffer>> for Resource {
    fn from(buffer: &Arc<Buffer>) -> Self {
        Resource::Buffer(buffer.clone())
    }
}

impl From<&Arc<Texture>> for Resource {
    fn from(texture: &Arc<Texture>) -> Self {
        Resource::Texture(texture.clone())
    }
}
