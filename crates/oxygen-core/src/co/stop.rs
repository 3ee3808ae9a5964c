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

//! Hierarchical stop requests.

use crate::utils::lock;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct StopState {
    stopped: AtomicBool,
    notify: Notify,
    children: Mutex<Vec<Weak<StopState>>>,
}

impl StopState {
    fn request(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.notify.notify_waiters();
        let children = std::mem::take(&mut *lock(&self.children));
        for child in children.iter().filter_map(Weak::upgrade) {
            child.request();
        }
    }
}

/// The owning side of a stop request.
///
/// Stopping a source stops every child created from it; stopping a child
/// leaves the parent alone.
#[derive(Debug, Clone, Default)]
pub struct StopSource {
    state: Arc<StopState>,
}

impl StopSource {
    /// Creates a source that has not been stopped.
    pub fn new() -> Self {
        Self::default()
    }

    /// A token observing this source.
    pub fn token(&self) -> StopToken {
        StopToken {
            state: Arc::clone(&self.state),
        }
    }

    /// Creates a source stopped whenever this one is.
    pub fn child(&self) -> StopSource {
        let child = StopSource::new();
        if self.is_stop_requested() {
            child.request_stop();
            return child;
        }
        let mut children = lock(&self.state.children);
        children.retain(|weak| weak.strong_count() > 0);
        children.push(Arc::downgrade(&child.state));
        child
    }

    /// Requests a stop on this source and all its children.
    pub fn request_stop(&self) {
        self.state.request();
    }

    /// Returns `true` once a stop was requested.
    pub fn is_stop_requested(&self) -> bool {
        self.state.stopped.load(Ordering::Acquire)
    }
}

/// The observing side of a stop request.
#[derive(Debug, Clone)]
pub struct StopToken {
    state: Arc<StopState>,
}

impl StopToken {
    /// Returns `true` once a stop was requested.
    pub fn is_stop_requested(&self) -> bool {
        self.state.stopped.load(Ordering::Acquire)
    }

    /// Suspends until a stop is requested.
    pub async fn cancelled(&self) {
        loop {
            let mut notified = pin!(self.state.notify.notified());
            notified.as_mut().enable();
            if self.is_stop_requested() {
                return;
            }
            notified.await;
        }
    }
}
