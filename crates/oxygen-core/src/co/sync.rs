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

//! Parking lots and one-shot events.

use std::pin::pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Notify;

/// Suspends any number of coroutines until someone calls
/// [`unpark_all`](Self::unpark_all).
#[derive(Debug, Default)]
pub struct ParkingLot {
    notify: Notify,
    parked: AtomicUsize,
}

impl ParkingLot {
    /// Creates an empty parking lot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Suspends until the next [`unpark_all`](Self::unpark_all).
    pub async fn park(&self) {
        let notified = self.notify.notified();
        self.parked.fetch_add(1, Ordering::AcqRel);
        notified.await;
        self.parked.fetch_sub(1, Ordering::AcqRel);
    }

    /// Resumes every coroutine currently parked.
    pub fn unpark_all(&self) {
        self.notify.notify_waiters();
    }

    /// Number of coroutines currently parked.
    pub fn parked(&self) -> usize {
        self.parked.load(Ordering::Acquire)
    }
}

/// A one-shot event. Once triggered it stays triggered.
#[derive(Debug, Default)]
pub struct Event {
    triggered: AtomicBool,
    notify: Notify,
}

impl Event {
    /// Creates an untriggered event.
    pub fn new() -> Self {
        Self::default()
    }

    /// Triggers the event and resumes every waiter.
    pub fn trigger(&self) {
        self.triggered.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Returns `true` once triggered.
    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::Acquire)
    }

    /// Suspends until the event is triggered. Returns at once if it already is.
    pub async fn wait(&self) {
        loop {
            let mut notified = pin!(self.notify.notified());
            notified.as_mut().enable();
            if self.is_triggered() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::co::LocalEventLoop;
    use std::rc::Rc;

    #[test]
    fn unpark_all_resumes_every_parked_coroutine() {
        let event_loop = LocalEventLoop::new().unwrap();
        let lot = Rc::new(ParkingLot::new());

        let resumed = event_loop.run({
            let lot = lot.clone();
            async move {
                let handles: Vec<_> = (0..3)
                    .map(|_| {
                        let lot = lot.clone();
                        tokio::task::spawn_local(async move { lot.park().await })
                    })
                    .collect();
                while lot.parked() < 3 {
                    tokio::task::yield_now().await;
                }
                lot.unpark_all();
                for handle in handles {
                    handle.await.unwrap();
                }
                lot.parked()
            }
        });
        assert_eq!(resumed, Some(0));
    }

    #[test]
    fn event_wait_after_trigger_returns_immediately() {
        let event_loop = LocalEventLoop::new().unwrap();
        let event = Event::new();
        event.trigger();
        assert_eq!(event_loop.run(event.wait()), Some(()));
        assert!(event.is_triggered());
    }

    #[test]
    fn event_wakes_a_waiting_coroutine() {
        let event_loop = LocalEventLoop::new().unwrap();
        let event = Rc::new(Event::new());
        let done = event_loop.run({
            let event = event.clone();
            async move {
                let waiter = {
                    let event = event.clone();
                    tokio::task::spawn_local(async move { event.wait().await })
                };
                tokio::task::yield_now().await;
                event.trigger();
                waiter.await.is_ok()
            }
        });
        assert_eq!(done, Some(true));
    }
}
