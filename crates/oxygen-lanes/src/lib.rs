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

//! # Oxygen Lanes
//!
//! The hot-path pipelines of the graphics runtime.
//!
//! - [`upload`]: staging, planning, batching and ticketed completion of
//!   buffer and texture uploads, plus readbacks.
//! - [`resources`]: atlas buffers with per-element allocation and frame-slot
//!   retirement, and transient per-frame structured buffers.
//! - [`scene_prep`]: scene extraction, the texture/material/transform/geometry
//!   resolvers and the draw emitter.
//! - [`lighting`]: the light manager and its GPU light arrays.

#![warn(missing_docs)]

pub mod lighting;
pub mod resources;
pub mod scene_prep;
pub mod upload;

pub use lighting::LightManager;
pub use resources::{AtlasBuffer, AtlasError, ElementRef, EnsureResult, TransientStructuredBuffer};
pub use upload::{UploadCoordinator, UploadError, UploadRequest, UploadResult, UploadTicket};
