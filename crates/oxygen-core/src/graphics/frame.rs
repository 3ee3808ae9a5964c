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

//! Frame ring identifiers.
//!
//! A [`FrameSlot`] names a position in the ring of frames in flight and is the
//! key of every per-frame ring-buffered structure (reclaimer queues, staging
//! partitions, atlas retire lists). A [`FrameSequence`] is the strictly
//! monotonic frame counter.

/// Upper bound on the number of frames in flight supported by the runtime.
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

/// A position in `[0, frames_in_flight)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct FrameSlot(pub u32);

impl FrameSlot {
    /// Returns the slot as a `usize`, for indexing per-slot arrays.
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Returns the slot that follows this one in a ring of `frames_in_flight`.
    pub const fn next(self, frames_in_flight: u32) -> Self {
        FrameSlot((self.0 + 1) % frames_in_flight)
    }
}

/// A strictly monotonic frame counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct FrameSequence(pub u64);

impl FrameSequence {
    /// Returns the following sequence number.
    pub const fn next(self) -> Self {
        FrameSequence(self.0 + 1)
    }

    /// Returns the slot this frame occupies in a ring of `frames_in_flight`.
    pub const fn slot(self, frames_in_flight: u32) -> FrameSlot {
        FrameSlot((self.0 % frames_in_flight as u64) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_wraps_around_the_ring() {
        assert_eq!(FrameSlot(0).next(2), FrameSlot(1));
        assert_eq!(FrameSlot(1).next(2), FrameSlot(0));
        assert_eq!(FrameSlot(2).next(3), FrameSlot(0));
    }

    #[test]
    fn sequence_maps_to_slot() {
        assert_eq!(FrameSequence(0).slot(3), FrameSlot(0));
        assert_eq!(FrameSequence(4).slot(3), FrameSlot(1));
        assert_eq!(FrameSequence(7).next(), FrameSequence(8));
    }
}
