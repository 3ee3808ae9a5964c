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

//! Scene snapshot data consumed by the graphics runtime.
//!
//! The scene is an arena of nodes addressed by generational [`NodeHandle`]s.
//! Nodes carry optional capabilities (a [`Renderable`], a [`LightComponent`])
//! instead of belonging to a type hierarchy.

#![warn(missing_docs)]

pub mod assets;
pub mod components;
pub mod math;
pub mod scene;

pub use assets::{
    AlphaMode, AssetId, GeometryAsset, MaterialAsset, Mesh, ResourceKey, Submesh, Vertex,
};
pub use components::{
    LightComponent, LightKind, LightMobility, LodContext, LodPolicy, Renderable,
};
pub use math::{Aabb, Frustum};
pub use scene::{Node, NodeFlags, NodeHandle, Scene, Transform};
