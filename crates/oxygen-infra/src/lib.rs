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

//! # Oxygen Infra
//!
//! Concrete implementations of the contracts defined in `oxygen-core`.
//!
//! - [`graphics::headless`]: an in-memory backend. Buffers and textures are
//!   plain host memory, descriptor heaps are tables, and queues execute their
//!   commands in submission order while validating resource states.
//! - [`logging`]: `env_logger` initialization for binaries and tests.

#![warn(missing_docs)]

pub mod graphics;
pub mod logging;

pub use graphics::headless::{HeadlessGraphics, HeadlessQueue, HeadlessStats};
