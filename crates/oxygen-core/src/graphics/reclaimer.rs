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

//! Fence-gated destruction keyed on frame slots.
//!
//! Anything the GPU may still read is handed to the [`DeferredReclaimer`]
//! instead of being dropped. The reclaimer runs the release actions of slot `S`
//! at the next [`DeferredReclaimer::on_begin_frame`] for `S`, which the frame
//! orchestrator only calls once the GPU has finished the frame that last used
//! `S`.

use super::descriptor::DescriptorHandle;
use super::frame::FrameSlot;
use super::registry::ResourceRegistry;
use super::resources::Resource;
use crate::utils::lock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

type DeferredAction = Box<dyn FnOnce() + Send>;

/// An object with an explicit release step.
pub trait Releasable: Send + Sync {
    /// Releases the object's GPU-side state.
    fn release(&self);
}

struct ReclaimerState {
    slots: Vec<Vec<DeferredAction>>,
    active: usize,
}

/// Per-frame-slot FIFO queues of release actions.
pub struct DeferredReclaimer {
    state: Mutex<ReclaimerState>,
    registered: AtomicU64,
    executed: AtomicU64,
}

impl std::fmt::Debug for DeferredReclaimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredReclaimer")
            .field("registered", &self.registered_count())
            .field("executed", &self.executed_count())
            .finish()
    }
}

impl DeferredReclaimer {
    /// Creates a reclaimer with one queue per frame in flight.
    pub fn new(frames_in_flight: u32) -> Self {
        let slots = (0..frames_in_flight.max(1)).map(|_| Vec::new()).collect();
        Self {
            state: Mutex::new(ReclaimerState { slots, active: 0 }),
            registered: AtomicU64::new(0),
            executed: AtomicU64::new(0),
        }
    }

    /// Appends `action` to the queue of the active slot.
    pub fn register_deferred_action(&self, action: impl FnOnce() + Send + 'static) {
        let mut state = lock(&self.state);
        let active = state.active;
        state.slots[active].push(Box::new(action));
        self.registered.fetch_add(1, Ordering::Relaxed);
    }

    /// Keeps `object` alive until the active slot is recycled, then drops this
    /// reference.
    pub fn register_deferred_release<T: Send + Sync + 'static>(&self, object: Arc<T>) {
        self.register_deferred_action(move || drop(object));
    }

    /// Calls [`Releasable::release`] on `object` when the active slot is recycled.
    pub fn register_deferred_releasable<T: Releasable + 'static>(&self, object: Arc<T>) {
        self.register_deferred_action(move || object.release());
    }

    /// Unregisters `resource` and releases `handle` when the active slot is
    /// recycled.
    pub fn register_deferred_view_release(
        &self,
        registry: &Arc<ResourceRegistry>,
        resource: Resource,
        handle: DescriptorHandle,
    ) {
        let registry = Arc::clone(registry);
        self.register_deferred_action(move || {
            registry.unregister_resource(resource.id());
            drop(handle);
            drop(resource);
        });
    }

    /// Makes `slot` active and runs every action registered against it.
    ///
    /// Actions registered by those actions land in `slot` again and run the
    /// next time it is recycled.
    pub fn on_begin_frame(&self, slot: FrameSlot) {
        let actions = {
            let mut state = lock(&self.state);
            let count = state.slots.len();
            let index = slot.index();
            if index >= count {
                log::warn!("DeferredReclaimer: slot {index} out of range for {count} frames in flight");
            }
            state.active = index % count;
            let active = state.active;
            std::mem::take(&mut state.slots[active])
        };
        if !actions.is_empty() {
            log::trace!(
                "DeferredReclaimer: running {} deferred releases for slot {}",
                actions.len(),
                slot.0
            );
        }
        self.run(actions);
    }

    fn run(&self, actions: Vec<DeferredAction>) {
        for action in actions {
            action();
            self.executed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Runs every pending action of every slot until none remains.
    pub fn process_all_deferred_releases(&self) {
        loop {
            let actions: Vec<DeferredAction> = {
                let mut state = lock(&self.state);
                state.slots.iter_mut().flat_map(std::mem::take).collect()
            };
            if actions.is_empty() {
                break;
            }
            self.run(actions);
        }
    }

    /// Drains everything. Called once the GPU is idle at shutdown.
    pub fn on_renderer_shutdown(&self) {
        self.process_all_deferred_releases();
        log::debug!(
            "DeferredReclaimer: shut down after {} releases",
            self.executed_count()
        );
    }

    /// Number of actions pending across every slot.
    pub fn pending_count(&self) -> usize {
        lock(&self.state).slots.iter().map(Vec::len).sum()
    }

    /// Total number of registered actions.
    pub fn registered_count(&self) -> u64 {
        self.registered.load(Ordering::Relaxed)
    }

    /// Total number of executed actions.
    pub fn executed_count(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn actions_run_when_their_slot_is_recycled() {
        let reclaimer = DeferredReclaimer::new(2);
        let hits = Arc::new(AtomicUsize::new(0));

        reclaimer.on_begin_frame(FrameSlot(0));
        let h = hits.clone();
        reclaimer.register_deferred_action(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });

        reclaimer.on_begin_frame(FrameSlot(1));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        reclaimer.on_begin_frame(FrameSlot(0));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn deferred_release_drops_the_last_reference() {
        let reclaimer = DeferredReclaimer::new(2);
        let object = Arc::new(42u32);
        let weak = Arc::downgrade(&object);
        reclaimer.register_deferred_release(object);
        assert!(weak.upgrade().is_some());

        reclaimer.on_begin_frame(FrameSlot(0));
        assert!(weak.upgrade().is_none());
    }

    struct Counted(AtomicUsize);

    impl Releasable for Counted {
        fn release(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn releasable_objects_are_released() {
        let reclaimer = DeferredReclaimer::new(3);
        let object = Arc::new(Counted(AtomicUsize::new(0)));
        reclaimer.register_deferred_releasable(object.clone());
        reclaimer.on_renderer_shutdown();
        assert_eq!(object.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reentrant_registration_waits_for_the_next_recycle() {
        let reclaimer = Arc::new(DeferredReclaimer::new(2));
        let hits = Arc::new(AtomicUsize::new(0));

        let inner = reclaimer.clone();
        let h = hits.clone();
        reclaimer.register_deferred_action(move || {
            let h = h.clone();
            inner.register_deferred_action(move || {
                h.fetch_add(1, Ordering::SeqCst);
            });
        });

        reclaimer.on_begin_frame(FrameSlot(0));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(reclaimer.pending_count(), 1);
        reclaimer.on_begin_frame(FrameSlot(1));
        reclaimer.on_begin_frame(FrameSlot(0));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn shutdown_never_drops_an_action() {
        let reclaimer = Arc::new(DeferredReclaimer::new(3));
        for slot in 0..3 {
            reclaimer.on_begin_frame(FrameSlot(slot));
            for _ in 0..4 {
                let inner = reclaimer.clone();
                reclaimer.register_deferred_action(move || {
                    inner.register_deferred_action(|| {});
                });
            }
        }

        reclaimer.on_renderer_shutdown();
        assert_eq!(reclaimer.pending_count(), 0);
        assert_eq!(reclaimer.registered_count(), 24);
        assert_eq!(reclaimer.executed_count(), reclaimer.registered_count());
    }
}
