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

//! Bounded FIFO channel for coroutines.

use crate::utils::lock;
use std::collections::VecDeque;
use std::pin::pin;
use std::sync::Mutex;
use tokio::sync::Notify;

#[derive(Debug)]
struct ChannelState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// A bounded multi-producer multi-consumer FIFO queue.
///
/// [`submit`](Self::submit) suspends while the channel is full and
/// [`receive`](Self::receive) while it is empty. After [`close`](Self::close)
/// senders get their value back, while receivers keep draining the buffered
/// items and get `None` once none are left.
#[derive(Debug)]
pub struct Channel<T> {
    capacity: usize,
    state: Mutex<ChannelState<T>>,
    readable: Notify,
    writable: Notify,
}

impl<T> Channel<T> {
    /// Creates a channel holding at most `capacity` items (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(ChannelState {
                items: VecDeque::new(),
                closed: false,
            }),
            readable: Notify::new(),
            writable: Notify::new(),
        }
    }

    /// Queues `value` without waiting.
    ///
    /// Returns the value back if the channel is full or closed.
    pub fn try_submit(&self, value: T) -> Result<(), T> {
        let mut state = lock(&self.state);
        if state.closed || state.items.len() >= self.capacity {
            return Err(value);
        }
        state.items.push_back(value);
        drop(state);
        self.readable.notify_waiters();
        Ok(())
    }

    /// Queues `value`, suspending while the channel is full.
    ///
    /// Returns the value back if the channel is closed.
    pub async fn submit(&self, value: T) -> Result<(), T> {
        let mut value = value;
        loop {
            let mut writable = pin!(self.writable.notified());
            writable.as_mut().enable();
            match self.try_submit(value) {
                Ok(()) => return Ok(()),
                Err(rejected) if self.is_closed() => return Err(rejected),
                Err(rejected) => value = rejected,
            }
            writable.await;
        }
    }

    /// Takes the oldest item without waiting.
    pub fn try_receive(&self) -> Option<T> {
        let item = lock(&self.state).items.pop_front();
        if item.is_some() {
            self.writable.notify_waiters();
        }
        item
    }

    /// Takes the oldest item, suspending while the channel is empty.
    ///
    /// Returns `None` once the channel is closed and empty.
    pub async fn receive(&self) -> Option<T> {
        loop {
            let mut readable = pin!(self.readable.notified());
            readable.as_mut().enable();
            if let Some(item) = self.try_receive() {
                return Some(item);
            }
            if self.is_closed() {
                return None;
            }
            readable.await;
        }
    }

    /// Closes the channel and wakes every waiter. Buffered items stay
    /// available to receivers.
    pub fn close(&self) {
        let pending = {
            let mut state = lock(&self.state);
            state.closed = true;
            state.items.len()
        };
        if pending > 0 {
            log::debug!("Channel: closed with {pending} items left to drain");
        }
        self.readable.notify_waiters();
        self.writable.notify_waiters();
    }

    /// Returns `true` once closed.
    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    /// Number of buffered items.
    pub fn len(&self) -> usize {
        lock(&self.state).items.len()
    }

    /// Returns `true` if no item is buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
