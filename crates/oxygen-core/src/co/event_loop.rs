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

//! The single-threaded event loop hosting coroutines.

use std::cell::Cell;
use std::future::Future;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::Notify;
use tokio::task::LocalSet;

static NEXT_LOOP_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies an event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventLoopId(pub u64);

/// Host-side control of an event loop.
pub trait EventLoop {
    /// The loop identifier.
    fn id(&self) -> EventLoopId;

    /// Returns `true` while [`LocalEventLoop::run`] is executing.
    fn is_running(&self) -> bool;

    /// Asks the running loop to return.
    fn stop(&self);
}

#[derive(Debug, Default)]
struct StopState {
    requested: AtomicBool,
    notify: Notify,
}

/// A thread-safe handle that stops a [`LocalEventLoop`] from anywhere.
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<StopState>);

impl StopHandle {
    /// Asks the loop to return from its current run.
    pub fn stop(&self) {
        self.0.requested.store(true, Ordering::Release);
        self.0.notify.notify_one();
    }
}

/// A current-thread tokio runtime plus a `LocalSet`, so `!Send` coroutines
/// can be spawned with `spawn_local`.
pub struct LocalEventLoop {
    id: EventLoopId,
    runtime: Runtime,
    local: LocalSet,
    running: Cell<bool>,
    stop: Arc<StopState>,
}

impl std::fmt::Debug for LocalEventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalEventLoop")
            .field("id", &self.id)
            .field("running", &self.running.get())
            .finish()
    }
}

impl LocalEventLoop {
    /// Creates an idle loop.
    pub fn new() -> std::io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let id = EventLoopId(NEXT_LOOP_ID.fetch_add(1, Ordering::Relaxed));
        log::debug!("LocalEventLoop({}): created", id.0);
        Ok(Self {
            id,
            runtime,
            local: LocalSet::new(),
            running: Cell::new(false),
            stop: Arc::new(StopState::default()),
        })
    }

    /// A handle that can stop the loop from another thread or task.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(Arc::clone(&self.stop))
    }

    /// Drives `future` to completion on this thread.
    ///
    /// Returns `None` if the loop was stopped before `future` completed.
    pub fn run<F: Future>(&self, future: F) -> Option<F::Output> {
        self.stop.requested.store(false, Ordering::Release);
        self.running.set(true);
        log::trace!("LocalEventLoop({}): running", self.id.0);

        let stop = Arc::clone(&self.stop);
        let output = self.local.block_on(&self.runtime, async move {
            let stopped = async {
                loop {
                    let mut notified = pin!(stop.notify.notified());
                    notified.as_mut().enable();
                    if stop.requested.swap(false, Ordering::AcqRel) {
                        return;
                    }
                    notified.await;
                }
            };
            tokio::select! {
                biased;
                output = future => Some(output),
                _ = stopped => None,
            }
        });

        self.running.set(false);
        output
    }
}

impl EventLoop for LocalEventLoop {
    fn id(&self) -> EventLoopId {
        self.id
    }

    fn is_running(&self) -> bool {
        self.running.get()
    }

    fn stop(&self) {
        StopHandle(Arc::clone(&self.stop)).stop();
    }
}
