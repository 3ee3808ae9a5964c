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

use std::cell::{Cell, RefCell};
use std::rc::Rc;

type Runnable = Box<dyn FnOnce()>;

#[derive(Default)]
struct ExecutorState {
    pending: RefCell<Vec<Runnable>>,
    draining: Cell<bool>,
    capture_depth: Cell<u32>,
}

/// A LIFO queue of callbacks drained on the owning thread.
///
/// Cloning shares the queue. Draining is reentrant: a runnable that schedules
/// or drains again only appends, and the outermost drain picks the new work up.
#[derive(Clone, Default)]
pub struct Executor {
    state: Rc<ExecutorState>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl Executor {
    /// Creates an empty executor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a runnable.
    pub fn schedule(&self, runnable: impl FnOnce() + 'static) {
        self.state.pending.borrow_mut().push(Box::new(runnable));
    }

    /// Runs pending work, most recently scheduled first, until none remains.
    ///
    /// Does nothing inside a [`capture`](Self::capture) scope or a drain
    /// already in progress.
    pub fn run_soon(&self) {
        if self.state.draining.get() || self.state.capture_depth.get() > 0 {
            return;
        }
        self.state.draining.set(true);
        loop {
            let next = self.state.pending.borrow_mut().pop();
            match next {
                Some(runnable) => runnable(),
                None => break,
            }
        }
        self.state.draining.set(false);
    }

    /// Runs `f` with draining suspended, then drains everything it scheduled
    /// in one pass.
    pub fn capture<R>(&self, f: impl FnOnce() -> R) -> R {
        self.state
            .capture_depth
            .set(self.state.capture_depth.get() + 1);
        let result = f();
        self.state
            .capture_depth
            .set(self.state.capture_depth.get() - 1);
        self.run_soon();
        result
    }

    /// Number of runnables waiting.
    pub fn pending_count(&self) -> usize {
        self.state.pending.borrow().len()
    }
}
