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

use tokio::sync::watch;

/// An observable value. Coroutines can suspend until it satisfies a predicate.
#[derive(Debug)]
pub struct Value<T> {
    sender: watch::Sender<T>,
}

impl<T: Clone> Value<T> {
    /// Creates a value holding `initial`.
    pub fn new(initial: T) -> Self {
        let (sender, _) = watch::channel(initial);
        Self { sender }
    }

    /// Replaces the value and wakes observers.
    pub fn set(&self, value: T) {
        self.sender.send_replace(value);
    }

    /// Applies `f` in place and wakes observers.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        self.sender.send_modify(f);
    }

    /// A copy of the current value.
    pub fn get(&self) -> T {
        self.sender.borrow().clone()
    }

    /// Suspends until `predicate` holds and returns the value that satisfied it.
    ///
    /// Checks the current value first. Returns `None` only if the value is
    /// dropped while waiting.
    pub async fn until(&self, mut predicate: impl FnMut(&T) -> bool) -> Option<T> {
        let mut receiver = self.sender.subscribe();
        let value = match receiver.wait_for(|v| predicate(v)).await {
            Ok(current) => Some(current.clone()),
            Err(_) => None,
        };
        value
    }
}
