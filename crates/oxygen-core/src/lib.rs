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

//! # Oxygen Core
//!
//! Foundational crate containing the traits, core types, and interface contracts
//! of the Oxygen graphics runtime.
//!
//! - [`graphics`]: fences, frame slots, resources, bindless descriptors, the
//!   resource registry, state tracking, command recording, queues, the deferred
//!   reclaimer and the [`graphics::Graphics`] backend facade.
//! - [`co`]: the single-threaded cooperative runtime (event loops, nurseries,
//!   channels, parking lots, observable values, cancellation).
//! - [`config`]: serde-backed runtime configuration.

#![warn(missing_docs)]

pub mod co;
pub mod config;
pub mod graphics;
pub mod utils;

pub use config::GraphicsConfig;
pub use graphics::error::GraphicsError;
