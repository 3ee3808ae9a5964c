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

//! Geometry and material assets referenced by renderables.

mod geometry;
mod material;

pub use geometry::{GeometryAsset, Mesh, Submesh, Vertex};
pub use material::{AlphaMode, MaterialAsset};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A persistent asset identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetId(Uuid);

impl AssetId {
    /// A random (version 4) identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// A stable (version 5) identifier derived from `name`, so the same name
    /// always yields the same asset.
    pub fn from_name(name: &str) -> Self {
        Self(Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()))
    }

    /// The underlying UUID.
    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for AssetId {
    fn default() -> Self {
        Self::new()
    }
}

/// Identifies a texture resource to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey(pub u64);

impl ResourceKey {
    /// The reserved key bound to the shared placeholder texture.
    pub const PLACEHOLDER: ResourceKey = ResourceKey(0);

    /// Returns `true` for [`ResourceKey::PLACEHOLDER`].
    pub const fn is_placeholder(self) -> bool {
        self.0 == 0
    }
}
