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

//! Buffer descriptors and the backend-neutral buffer object.

use super::ResourceId;
use crate::graphics::error::GraphicsError;
use crate::graphics::state::ResourceStates;
use std::any::Any;
use std::fmt;

crate::oxygen_bitflags! {
    /// How a buffer may be used by the GPU.
    pub struct BufferUsage: u32 {
        /// Vertex data.
        const VERTEX = 1 << 0;
        /// Index data.
        const INDEX = 1 << 1;
        /// Constant (uniform) data.
        const CONSTANT = 1 << 2;
        /// Structured or raw storage read through bindless views.
        const STORAGE = 1 << 3;
        /// Indirect draw/dispatch arguments.
        const INDIRECT = 1 << 4;
        /// Source of a copy.
        const COPY_SRC = 1 << 5;
        /// Destination of a copy.
        const COPY_DST = 1 << 6;
    }
}

/// Where the memory of a buffer lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MemoryLocation {
    /// GPU-only memory; filled through copies.
    #[default]
    DeviceLocal,
    /// CPU-writable memory used as a copy source.
    Upload,
    /// CPU-readable memory used as a copy destination.
    Readback,
}

/// Describes a buffer to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDesc {
    /// Size of the buffer in bytes.
    pub size_bytes: u64,
    /// Allowed usages.
    pub usage: BufferUsage,
    /// Memory placement.
    pub memory: MemoryLocation,
    /// A label for logging and debugging tools.
    pub debug_name: String,
}

impl BufferDesc {
    /// Creates a device-local buffer descriptor.
    pub fn device_local(size_bytes: u64, usage: BufferUsage, debug_name: impl Into<String>) -> Self {
        Self {
            size_bytes,
            usage,
            memory: MemoryLocation::DeviceLocal,
            debug_name: debug_name.into(),
        }
    }

    /// Creates a host-visible upload buffer descriptor.
    pub fn upload(size_bytes: u64, debug_name: impl Into<String>) -> Self {
        Self {
            size_bytes,
            usage: BufferUsage::COPY_SRC | BufferUsage::CONSTANT,
            memory: MemoryLocation::Upload,
            debug_name: debug_name.into(),
        }
    }

    /// Creates a host-visible readback buffer descriptor.
    pub fn readback(size_bytes: u64, debug_name: impl Into<String>) -> Self {
        Self {
            size_bytes,
            usage: BufferUsage::COPY_DST,
            memory: MemoryLocation::Readback,
            debug_name: debug_name.into(),
        }
    }

    /// The state a freshly created buffer of this kind is in.
    pub fn initial_state(&self) -> ResourceStates {
        match self.memory {
            MemoryLocation::DeviceLocal => ResourceStates::COMMON,
            MemoryLocation::Upload => ResourceStates::GENERIC_READ,
            MemoryLocation::Readback => ResourceStates::COPY_DEST,
        }
    }
}

/// The backend half of a buffer.
pub trait NativeBuffer: Send + Sync + fmt::Debug {
    /// Runs `f` over the bytes `[offset, offset + size)` of the buffer memory.
    fn map(
        &self,
        offset: u64,
        size: u64,
        f: &mut dyn FnMut(&mut [u8]),
    ) -> Result<(), GraphicsError>;

    /// Returns `self` for backend downcasts.
    fn as_any(&self) -> &dyn Any;
}

/// A GPU buffer. Shared through `Arc`; destroyed when the last reference drops.
#[derive(Debug)]
pub struct Buffer {
    id: ResourceId,
    desc: BufferDesc,
    native: Box<dyn NativeBuffer>,
}

impl Buffer {
    /// Wraps a backend buffer. Called by backends only.
    pub fn new(id: ResourceId, desc: BufferDesc, native: Box<dyn NativeBuffer>) -> Self {
        Self { id, desc, native }
    }

    /// The resource id.
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// The creation descriptor.
    pub fn desc(&self) -> &BufferDesc {
        &self.desc
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.desc.size_bytes
    }

    /// The backend object.
    pub fn native(&self) -> &dyn NativeBuffer {
        self.native.as_ref()
    }

    /// Returns `true` if the CPU may map this buffer.
    pub fn is_host_visible(&self) -> bool {
        self.desc.memory != MemoryLocation::DeviceLocal
    }

    /// Maps `[offset, offset + size)` of a host-visible buffer for the duration of `f`.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::InvalidRequest`] for device-local buffers and
    /// out-of-range requests.
    pub fn with_mapped_range<R>(
        &self,
        offset: u64,
        size: u64,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R, GraphicsError> {
        if !self.is_host_visible() {
            return Err(GraphicsError::InvalidRequest(format!(
                "Buffer '{}' is device-local and cannot be mapped",
                self.desc.debug_name
            )));
        }
        let end = offset.checked_add(size);
        if !matches!(end, Some(end) if end <= self.desc.size_bytes) {
            return Err(GraphicsError::InvalidRequest(format!(
                "Mapped range [{offset}, +{size}) exceeds buffer '{}' of {} bytes",
                self.desc.debug_name, self.desc.size_bytes
            )));
        }

        let mut f = Some(f);
        let mut result = None;
        self.native.map(offset, size, &mut |bytes| {
            if let Some(f) = f.take() {
                result = Some(f(bytes));
            }
        })?;
        result.ok_or_else(|| {
            GraphicsError::Backend(format!(
                "Buffer '{}': mapping callback was not invoked",
                self.desc.debug_name
            ))
        })
    }
}
