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

//! Per-queue monotonic timelines.
//!
//! A [`Timeline`] carries two values: the *current* value, which is the highest
//! value reserved for a signal, and the *completed* value, which the queue
//! advances as it executes signals. `completed <= current` always holds, except
//! for the [`FenceValue::DEVICE_LOST`] marker which a backend publishes when
//! the device goes away.

use super::error::GraphicsError;
use crate::utils::lock;
use std::pin::pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// A value on a queue timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct FenceValue(pub u64);

impl FenceValue {
    /// The value reported by a queue whose device was lost.
    pub const DEVICE_LOST: FenceValue = FenceValue(u64::MAX);

    /// Returns `true` if this value is the device-lost marker.
    pub const fn is_device_lost(self) -> bool {
        self.0 == u64::MAX
    }
}

/// A monotonic signal/wait counter owned by one command queue.
#[derive(Debug)]
pub struct Timeline {
    name: String,
    current: AtomicU64,
    completed: Mutex<u64>,
    condvar: Condvar,
    notify: Notify,
}

impl Timeline {
    /// Creates a timeline whose current and completed values start at zero.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            current: AtomicU64::new(0),
            completed: Mutex::new(0),
            condvar: Condvar::new(),
            notify: Notify::new(),
        }
    }

    /// Returns the debug name of the timeline.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reserves the next signal value and returns it.
    pub fn reserve_next(&self) -> FenceValue {
        FenceValue(self.current.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Reserves an explicit signal value.
    ///
    /// Signals must be strictly increasing: a value not greater than the
    /// current value is rejected.
    pub fn request_signal(&self, value: FenceValue) -> Result<(), GraphicsError> {
        self.current
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (value.0 > current).then_some(value.0)
            })
            .map(|_| ())
            .map_err(|current| {
                GraphicsError::InvalidRequest(format!(
                    "Timeline({}): signal {} is not greater than current value {}",
                    self.name, value.0, current
                ))
            })
    }

    /// Returns the highest value reserved so far.
    pub fn current_value(&self) -> FenceValue {
        FenceValue(self.current.load(Ordering::Acquire))
    }

    /// Returns the highest value the queue has completed.
    pub fn completed_value(&self) -> FenceValue {
        FenceValue(*lock(&self.completed))
    }

    /// Returns `true` if the device-lost marker has been published.
    pub fn is_device_lost(&self) -> bool {
        self.completed_value().is_device_lost()
    }

    /// Returns `true` if `value` has been reached (never after device loss).
    pub fn is_completed(&self, value: FenceValue) -> bool {
        let completed = self.completed_value();
        !completed.is_device_lost() && completed >= value
    }

    /// Advances the completed value to `value` and wakes every waiter.
    ///
    /// Going backwards is ignored. Called by the queue when it executes a
    /// signal.
    pub fn mark_completed(&self, value: FenceValue) {
        {
            let mut completed = lock(&self.completed);
            if *completed == u64::MAX || value.0 <= *completed {
                return;
            }
            *completed = value.0;
        }
        // Keep `current >= completed` for signals that were never reserved.
        self.current.fetch_max(value.0, Ordering::AcqRel);
        log::trace!("Timeline({}): completed {}", self.name, value.0);
        self.condvar.notify_all();
        self.notify.notify_waiters();
    }

    /// Publishes the device-lost marker and wakes every waiter.
    pub fn mark_device_lost(&self) {
        *lock(&self.completed) = u64::MAX;
        log::error!("Timeline({}): device lost", self.name);
        self.condvar.notify_all();
        self.notify.notify_waiters();
    }

    /// Blocks the calling thread until `value` is completed or `timeout` elapses.
    pub fn wait_blocking(&self, value: FenceValue, timeout: Duration) -> Result<(), GraphicsError> {
        let deadline = Instant::now() + timeout;
        let mut completed = lock(&self.completed);
        loop {
            if *completed == u64::MAX {
                return Err(GraphicsError::DeviceLost);
            }
            if *completed >= value.0 {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(GraphicsError::TimedOut);
            }
            completed = self
                .condvar
                .wait_timeout(completed, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    /// Suspends the calling task until `value` is completed.
    ///
    /// Resolves to [`GraphicsError::DeviceLost`] if the device is lost while
    /// waiting.
    pub async fn wait(&self, value: FenceValue) -> Result<(), GraphicsError> {
        loop {
            let mut notified = pin!(self.notify.notified());
            notified.as_mut().enable();

            let completed = self.completed_value();
            if completed.is_device_lost() {
                return Err(GraphicsError::DeviceLost);
            }
            if completed >= value {
                return Ok(());
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn reserve_is_monotonic() {
        let timeline = Timeline::new("test");
        assert_eq!(timeline.reserve_next(), FenceValue(1));
        assert_eq!(timeline.reserve_next(), FenceValue(2));
        assert_eq!(timeline.current_value(), FenceValue(2));
        assert_eq!(timeline.completed_value(), FenceValue(0));
    }

    #[test]
    fn request_signal_rejects_non_increasing_values() {
        let timeline = Timeline::new("test");
        assert!(timeline.request_signal(FenceValue(3)).is_ok());
        assert!(timeline.request_signal(FenceValue(3)).is_err());
        assert!(timeline.request_signal(FenceValue(2)).is_err());
        assert_eq!(timeline.current_value(), FenceValue(3));
    }

    #[test]
    fn completion_never_goes_backwards() {
        let timeline = Timeline::new("test");
        timeline.mark_completed(FenceValue(5));
        timeline.mark_completed(FenceValue(2));
        assert_eq!(timeline.completed_value(), FenceValue(5));
        assert!(timeline.current_value() >= timeline.completed_value());
    }

    #[test]
    fn wait_on_reached_value_returns_immediately() {
        let timeline = Timeline::new("test");
        let v = timeline.reserve_next();
        timeline.mark_completed(v);
        assert_eq!(timeline.wait_blocking(v, Duration::ZERO), Ok(()));
    }

    #[test]
    fn blocking_wait_times_out() {
        let timeline = Timeline::new("test");
        let v = timeline.reserve_next();
        assert_eq!(
            timeline.wait_blocking(v, Duration::from_millis(5)),
            Err(GraphicsError::TimedOut)
        );
    }

    #[test]
    fn blocking_wait_is_released_by_another_thread() {
        let timeline = Arc::new(Timeline::new("test"));
        let v = timeline.reserve_next();
        let signaller = {
            let timeline = timeline.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(10));
                timeline.mark_completed(v);
            })
        };
        assert_eq!(timeline.wait_blocking(v, Duration::from_secs(5)), Ok(()));
        signaller.join().unwrap();
    }

    #[test]
    fn device_lost_is_not_progress() {
        let timeline = Timeline::new("test");
        let v = timeline.reserve_next();
        timeline.mark_device_lost();
        assert!(timeline.is_device_lost());
        assert!(!timeline.is_completed(v));
        assert_eq!(
            timeline.wait_blocking(v, Duration::from_millis(1)),
            Err(GraphicsError::DeviceLost)
        );
        // Later completions do not clear the marker.
        timeline.mark_completed(FenceValue(1));
        assert!(timeline.is_device_lost());
    }

    #[tokio::test]
    async fn async_wait_resumes_on_completion() {
        let timeline = Arc::new(Timeline::new("test"));
        let v = timeline.reserve_next();
        let waiter = {
            let timeline = timeline.clone();
            tokio::spawn(async move { timeline.wait(v).await })
        };
        tokio::task::yield_now().await;
        timeline.mark_completed(v);
        assert_eq!(waiter.await.unwrap(), Ok(()));
    }
}
