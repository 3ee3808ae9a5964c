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

//! The cooperative runtime.
//!
//! One [`LocalEventLoop`] per thread (graphics, importer, ...) runs coroutines
//! on a tokio current-thread runtime and `LocalSet`. A coroutine runs until it
//! reaches an explicit suspension point: a [`Channel`], a [`ParkingLot`], an
//! [`Event`], a [`Value`] predicate, a timer or a subsystem awaitable such as
//! a fence wait. Child tasks are always owned by a [`Nursery`]; there are no
//! detached tasks. Cancellation flows downward through [`StopSource`]s.

mod channel;
mod event_loop;
mod executor;
mod live_object;
mod nursery;
mod stop;
mod sync;
mod value;

pub use channel::Channel;
pub use event_loop::{EventLoop, EventLoopId, LocalEventLoop, StopHandle};
pub use executor::Executor;
pub use live_object::{start_live_object, LiveObject, TaskStarted};
pub use nursery::Nursery;
pub use stop::{StopSource, StopToken};
pub use sync::{Event, ParkingLot};
pub use value::Value;

use std::future::Future;
use std::pin::Pin;

/// A lazy, boxed coroutine bound to the current thread.
pub type Co<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// Boxes a future into a [`Co`].
pub fn co<'a, T>(future: impl Future<Output = T> + 'a) -> Co<'a, T> {
    Box::pin(future)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coroutines_compose() {
        let event_loop = LocalEventLoop::new().unwrap();
        let add = |a: u32, b: u32| co(async move { a + b });
        let result = event_loop.run(async move {
            let first = add(1, 2).await;
            add(first, 4).await
        });
        assert_eq!(result, Some(7));
    }
}
