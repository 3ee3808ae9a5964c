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

//! Per-frame structured buffers for arrays rebuilt every frame.

use oxygen_core::graphics::{
    Buffer, BufferDesc, BufferUsage, DescriptorHandle, FrameSlot, Graphics, GraphicsError,
    Resource, ShaderVisibleIndex, ViewDesc,
};
use oxygen_core::utils::lock;
use std::sync::{Arc, Mutex};

/// The buffer reserved for one frame slot.
#[derive(Debug, Clone)]
pub struct TransientAllocation {
    /// Bindless index of the buffer's structured SRV.
    pub srv_index: ShaderVisibleIndex,
    /// The host-visible buffer.
    pub buffer: Arc<Buffer>,
    /// Elements the buffer holds.
    pub capacity: u32,
}

impl TransientAllocation {
    /// Writes `bytes` at the start of the buffer.
    pub fn write(&self, bytes: &[u8]) -> Result<(), GraphicsError> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.buffer
            .with_mapped_range(0, bytes.len() as u64, |dst| dst.copy_from_slice(bytes))
    }
}

#[derive(Debug)]
struct SlotBuffer {
    allocation: TransientAllocation,
    handle: DescriptorHandle,
}

/// One host-visible structured buffer per frame slot, grown on demand.
///
/// The CPU writes a slot's buffer only while that slot is being recorded, so
/// no staging copy is needed.
pub struct TransientStructuredBuffer {
    graphics: Arc<dyn Graphics>,
    stride: u32,
    label: String,
    slots: Mutex<Vec<Option<SlotBuffer>>>,
}

impl std::fmt::Debug for TransientStructuredBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransientStructuredBuffer")
            .field("label", &self.label)
            .field("stride", &self.stride)
            .finish()
    }
}

impl TransientStructuredBuffer {
    /// Creates the ring without buffers.
    pub fn new(graphics: Arc<dyn Graphics>, stride: u32, label: impl Into<String>) -> Self {
        let slots = (0..graphics.config().frames_in_flight.max(1)).map(|_| None).collect();
        Self {
            graphics,
            stride: stride.max(1),
            label: label.into(),
            slots: Mutex::new(slots),
        }
    }

    /// Element size in bytes.
    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// Returns a buffer of `slot` holding at least `count` elements (and at
    /// least one), replacing a smaller one.
    pub fn reserve(&self, slot: FrameSlot, count: u32) -> Result<TransientAllocation, GraphicsError> {
        let count = count.max(1);
        let mut slots = lock(&self.slots);
        let index = slot.index() % slots.len();
        if let Some(existing) = &slots[index] {
            if existing.allocation.capacity >= count {
                return Ok(existing.allocation.clone());
            }
        }

        let capacity = count.next_power_of_two();
        let size = capacity as u64 * self.stride as u64;
        let buffer = self.graphics.create_buffer(BufferDesc {
            usage: BufferUsage::STORAGE,
            ..BufferDesc::upload(size, format!("{}[{index}]", self.label))
        })?;
        let resource = Resource::from(&buffer);
        self.graphics.register_resource(resource.clone())?;
        let handle = self
            .graphics
            .allocate_view(&resource, ViewDesc::structured_srv(size, self.stride))?;
        let srv_index = self.graphics.shader_visible_index(&handle)?;
        let allocation = TransientAllocation {
            srv_index,
            buffer,
            capacity,
        };

        if let Some(old) = slots[index].replace(SlotBuffer {
            allocation: allocation.clone(),
            handle,
        }) {
            self.graphics.deferred_reclaimer().register_deferred_view_release(
                self.graphics.resource_registry(),
                Resource::from(old.allocation.buffer),
                old.handle,
            );
        }
        log::debug!(
            "TransientStructuredBuffer({}): slot {index} holds {capacity} elements (srv {})",
            self.label,
            srv_index.get()
        );
        Ok(allocation)
    }
}

impl Drop for TransientStructuredBuffer {
    fn drop(&mut self) {
        let slots = match self.slots.get_mut() {
            Ok(slots) => slots,
            Err(poisoned) => poisoned.into_inner(),
        };
        for slot in slots.iter_mut().filter_map(Option::take) {
            self.graphics.deferred_reclaimer().register_deferred_view_release(
                self.graphics.resource_registry(),
                Resource::from(slot.allocation.buffer),
                slot.handle,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxygen_core::config::GraphicsConfig;
    use oxygen_infra::HeadlessGraphics;

    #[test]
    fn reserve_grows_per_slot() {
        let graphics = HeadlessGraphics::new(GraphicsConfig::default()).unwrap();
        let lights = TransientStructuredBuffer::new(graphics.clone(), 32, "Lights");

        let a = lights.reserve(FrameSlot(0), 0).unwrap();
        assert_eq!(a.capacity, 1);
        let again = lights.reserve(FrameSlot(0), 1).unwrap();
        assert_eq!(again.srv_index, a.srv_index);

        let grown = lights.reserve(FrameSlot(0), 3).unwrap();
        assert_eq!(grown.capacity, 4);
        assert_ne!(grown.srv_index, a.srv_index);

        let other = lights.reserve(FrameSlot(1), 1).unwrap();
        assert_ne!(other.buffer.id(), grown.buffer.id());
    }

    #[test]
    fn written_bytes_land_in_the_buffer() {
        let graphics = HeadlessGraphics::new(GraphicsConfig::default()).unwrap();
        let lights = TransientStructuredBuffer::new(graphics.clone(), 4, "Bytes");
        let allocation = lights.reserve(FrameSlot(0), 2).unwrap();
        allocation.write(&[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        assert_eq!(
            graphics.read_buffer(&allocation.buffer, 0, 8).unwrap(),
            vec![1, 2, 3, 4, 5, 6, 7, 8]
        );
    }
}
