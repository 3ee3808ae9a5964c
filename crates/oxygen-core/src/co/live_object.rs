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

//! Long-lived coroutine owners.

use super::nursery::Nursery;
use anyhow::Context;
use async_trait::async_trait;
use std::rc::Rc;
use tokio::sync::oneshot;

/// Signals that a [`LiveObject`] finished its startup.
#[derive(Debug)]
pub struct TaskStarted {
    sender: Option<oneshot::Sender<()>>,
}

impl TaskStarted {
    /// Reports startup completion. Reporting twice is harmless.
    pub fn started(mut self) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(());
        }
    }
}

/// A component that lives on an event loop and owns its own coroutines.
///
/// [`activate_async`](Self::activate_async) runs until the object stops. It
/// must call [`TaskStarted::started`] once the object is ready to receive
/// work. Implementors keep their state behind shared references, since the
/// object stays in use while it is active.
#[async_trait(?Send)]
pub trait LiveObject {
    /// Runs the object. Returns once the object has stopped.
    async fn activate_async(&self, started: TaskStarted) -> anyhow::Result<()>;

    /// Opens the object's work loops. Called after activation started.
    fn run(&self);

    /// Asks the object to stop. Idempotent.
    fn stop(&self);

    /// Returns `true` between [`run`](Self::run) and [`stop`](Self::stop).
    fn is_running(&self) -> bool;
}

/// Activates `object` as a child of `nursery` and waits for it to report
/// startup, then calls [`LiveObject::run`].
///
/// # Errors
///
/// Returns an error if the object finished without reporting startup.
pub async fn start_live_object<T>(object: Rc<T>, nursery: &mut Nursery) -> anyhow::Result<()>
where
    T: LiveObject + 'static,
{
    let (sender, receiver) = oneshot::channel();
    let started = TaskStarted {
        sender: Some(sender),
    };
    let activated = Rc::clone(&object);
    nursery.start(async move { activated.activate_async(started).await });
    receiver
        .await
        .context("live object ended before reporting startup")?;
    object.run();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::co::{Event, LocalEventLoop};
    use std::cell::Cell;

    #[derive(Default)]
    struct Ticker {
        running: Cell<bool>,
        ticks: Cell<u32>,
        shutdown: Event,
    }

    #[async_trait(?Send)]
    impl LiveObject for Ticker {
        async fn activate_async(&self, started: TaskStarted) -> anyhow::Result<()> {
            started.started();
            self.shutdown.wait().await;
            Ok(())
        }

        fn run(&self) {
            self.running.set(true);
            self.ticks.set(self.ticks.get() + 1);
        }

        fn stop(&self) {
            self.running.set(false);
            self.shutdown.trigger();
        }

        fn is_running(&self) -> bool {
            self.running.get()
        }
    }

    struct NeverStarts;

    #[async_trait(?Send)]
    impl LiveObject for NeverStarts {
        async fn activate_async(&self, _started: TaskStarted) -> anyhow::Result<()> {
            Ok(())
        }
        fn run(&self) {}
        fn stop(&self) {}
        fn is_running(&self) -> bool {
            false
        }
    }

    #[test]
    fn start_waits_for_startup_then_runs() {
        let event_loop = LocalEventLoop::new().unwrap();
        let ticker = Rc::new(Ticker::default());
        let result = event_loop.run({
            let ticker = ticker.clone();
            async move {
                let mut nursery = Nursery::new("live");
                start_live_object(ticker.clone(), &mut nursery).await?;
                assert!(ticker.is_running());
                ticker.stop();
                nursery.join().await
            }
        });
        assert!(matches!(result, Some(Ok(()))));
        assert_eq!(ticker.ticks.get(), 1);
        assert!(!ticker.is_running());
    }

    #[test]
    fn object_that_never_starts_is_an_error() {
        let event_loop = LocalEventLoop::new().unwrap();
        let result = event_loop
            .run(async {
                let mut nursery = Nursery::new("live");
                start_live_object(Rc::new(NeverStarts), &mut nursery).await
            })
            .unwrap();
        assert!(result.is_err());
    }
}
