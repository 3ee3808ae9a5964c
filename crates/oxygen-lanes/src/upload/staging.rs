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

//! Staging memory providers.

use oxygen_core::graphics::{Buffer, BufferDesc, FrameSlot, Graphics, GraphicsError};
use oxygen_core::utils::{align_up, lock};
use std::sync::{Arc, Mutex};

/// A span of host-visible memory an upload is written through.
#[derive(Debug, Clone)]
pub struct StagingAllocation {
    /// The upload buffer holding the span.
    pub buffer: Arc<Buffer>,
    /// Offset of the span in `buffer`.
    pub offset: u64,
    /// Length of the span.
    pub size: u64,
}

impl StagingAllocation {
    /// Returns `true` for zero-sized spans.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Runs `f` over the mapped span.
    pub fn write<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Result<R, GraphicsError> {
        if self.size == 0 {
            return Ok(f(&mut []));
        }
        self.buffer.with_mapped_range(self.offset, self.size, f)
    }
}

/// Hands out staging spans for uploads.
pub trait StagingProvider: Send + Sync {
    /// Allocates `size` bytes aligned to `alignment`, or `None` when full.
    fn allocate(&self, size: u64, alignment: u64) -> Option<StagingAllocation>;

    /// Called when `slot` begins; memory last used by `slot` may be reused.
    fn on_frame_start(&self, slot: FrameSlot);
}

#[derive(Debug)]
struct RingPartition {
    buffer: Arc<Buffer>,
    cursor: u64,
    high_water: u64,
}

#[derive(Debug)]
struct RingState {
    partitions: Vec<RingPartition>,
    active: usize,
}

/// One upload buffer per frame slot, bump-allocated and reset when its slot
/// comes around again.
#[derive(Debug)]
pub struct RingStagingProvider {
    state: Mutex<RingState>,
    bytes_per_slot: u64,
    alignment: u64,
}

impl RingStagingProvider {
    /// Creates `frames_in_flight` partitions of `bytes_per_slot` bytes.
    ///
    /// # Errors
    ///
    /// Propagates buffer creation failures.
    pub fn new(
        graphics: &dyn Graphics,
        frames_in_flight: u32,
        bytes_per_slot: u64,
        alignment: u64,
    ) -> Result<Self, GraphicsError> {
        let partitions = (0..frames_in_flight.max(1))
            .map(|slot| {
                graphics
                    .create_buffer(BufferDesc::upload(bytes_per_slot, format!("StagingRing[{slot}]")))
                    .map(|buffer| RingPartition {
                        buffer,
                        cursor: 0,
                        high_water: 0,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        log::debug!(
            "RingStagingProvider: {} partitions of {} bytes",
            partitions.len(),
            bytes_per_slot
        );
        Ok(Self {
            state: Mutex::new(RingState {
                partitions,
                active: 0,
            }),
            bytes_per_slot,
            alignment: alignment.max(1),
        })
    }

    /// Makes `slot` the partition allocations come from, keeping its contents.
    pub fn begin(&self, slot: FrameSlot) {
        let mut state = lock(&self.state);
        state.active = slot.index() % state.partitions.len();
    }

    /// Publishes the usage of `slot` once the frame stops allocating from it.
    pub fn end(&self, slot: FrameSlot) {
        let state = lock(&self.state);
        let partition = &state.partitions[slot.index() % state.partitions.len()];
        log::trace!(
            "RingStagingProvider: slot {} used {} of {} bytes",
            slot.0,
            partition.cursor,
            self.bytes_per_slot
        );
    }

    /// Bytes each partition holds.
    pub fn bytes_per_slot(&self) -> u64 {
        self.bytes_per_slot
    }

    /// The partition allocations currently come from.
    pub fn active_slot(&self) -> FrameSlot {
        FrameSlot(lock(&self.state).active as u32)
    }

    /// Bytes handed out from the active partition.
    pub fn used_bytes(&self) -> u64 {
        let state = lock(&self.state);
        state.partitions[state.active].cursor
    }

    /// The most bytes a partition ever held at once.
    pub fn high_water_mark(&self) -> u64 {
        lock(&self.state)
            .partitions
            .iter()
            .map(|p| p.high_water)
            .max()
            .unwrap_or(0)
    }
}

impl StagingProvider for RingStagingProvider {
    fn allocate(&self, size: u64, alignment: u64) -> Option<StagingAllocation> {
        let mut state = lock(&self.state);
        let active = state.active;
        let partition = &mut state.partitions[active];
        if size == 0 {
            return Some(StagingAllocation {
                buffer: Arc::clone(&partition.buffer),
                offset: partition.cursor,
                size: 0,
            });
        }
        let offset = align_up(partition.cursor, alignment.max(self.alignment));
        let end = offset.checked_add(size)?;
        if end > self.bytes_per_slot {
            log::warn!(
                "RingStagingProvider: slot {active} exhausted ({} of {} bytes used, {size} requested)",
                partition.cursor,
                self.bytes_per_slot
            );
            return None;
        }
        partition.cursor = end;
        partition.high_water = partition.high_water.max(end);
        Some(StagingAllocation {
            buffer: Arc::clone(&partition.buffer),
            offset,
            size,
        })
    }

    fn on_frame_start(&self, slot: FrameSlot) {
        let mut state = lock(&self.state);
        let count = state.partitions.len();
        state.active = slot.index() % count;
        let active = state.active;
        state.partitions[active].cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxygen_core::config::GraphicsConfig;
    use oxygen_infra::HeadlessGraphics;

    fn provider(bytes: u64) -> RingStagingProvider {
        let graphics = HeadlessGraphics::new(GraphicsConfig::default()).unwrap();
        RingStagingProvider::new(graphics.as_ref(), 2, bytes, 512).unwrap()
    }

    #[test]
    fn allocations_are_aligned_and_sequential() {
        let ring = provider(4096);
        let a = ring.allocate(100, 512).unwrap();
        let b = ring.allocate(100, 512).unwrap();
        assert_eq!(a.offset, 0);
        assert_eq!(b.offset, 512);
        assert_eq!(ring.used_bytes(), 612);
    }

    #[test]
    fn zero_size_allocation_is_empty() {
        let ring = provider(4096);
        let span = ring.allocate(0, 512).unwrap();
        assert!(span.is_empty());
        assert_eq!(span.write(|bytes| bytes.len()).unwrap(), 0);
        assert_eq!(ring.used_bytes(), 0);
    }

    #[test]
    fn exhausted_partition_returns_none_until_recycled() {
        let ring = provider(1024);
        assert!(ring.allocate(1000, 512).is_some());
        assert!(ring.allocate(100, 512).is_none());

        ring.on_frame_start(FrameSlot(1));
        assert!(ring.allocate(1000, 512).is_some());

        ring.on_frame_start(FrameSlot(0));
        assert_eq!(ring.used_bytes(), 0);
        assert_eq!(ring.high_water_mark(), 1000);
    }

    #[test]
    fn slots_use_distinct_buffers() {
        let ring = provider(1024);
        let a = ring.allocate(16, 512).unwrap();
        ring.on_frame_start(FrameSlot(1));
        let b = ring.allocate(16, 512).unwrap();
        assert_ne!(a.buffer.id(), b.buffer.id());
    }
}
