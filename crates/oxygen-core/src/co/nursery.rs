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

//! Structured concurrency: every child task belongs to a nursery.

use super::stop::{StopSource, StopToken};
use anyhow::anyhow;
use std::future::Future;
use tokio::task::JoinSet;

/// Owns a set of child coroutines on the current [`LocalEventLoop`](super::LocalEventLoop).
///
/// [`join`](Self::join) waits for all of them. The first child that fails
/// cancels its siblings and its error is returned. Dropping a nursery aborts
/// whatever is still running.
#[derive(Debug)]
pub struct Nursery {
    name: String,
    tasks: JoinSet<anyhow::Result<()>>,
    stop: StopSource,
}

impl Nursery {
    /// Opens a nursery.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: JoinSet::new(),
            stop: StopSource::new(),
        }
    }

    /// Opens a nursery that is cancelled whenever `parent` is.
    pub fn with_parent(name: impl Into<String>, parent: &StopSource) -> Self {
        Self {
            name: name.into(),
            tasks: JoinSet::new(),
            stop: parent.child(),
        }
    }

    /// Starts `future` as a child.
    ///
    /// A child still running when the nursery is cancelled is dropped at its
    /// next suspension point and counts as a success.
    ///
    /// Must be called from inside a running event loop.
    pub fn start<F>(&mut self, future: F)
    where
        F: Future<Output = anyhow::Result<()>> + 'static,
    {
        let token = self.stop.token();
        self.tasks.spawn_local(async move {
            tokio::select! {
                result = future => result,
                _ = token.cancelled() => Ok(()),
            }
        });
    }

    /// A token children can poll to notice cancellation.
    pub fn token(&self) -> StopToken {
        self.stop.token()
    }

    /// Cancels every child.
    pub fn cancel(&self) {
        log::debug!("Nursery({}): cancel requested", self.name);
        self.stop.request_stop();
    }

    /// Number of children not yet joined.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns `true` when no child is left.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Waits for every child.
    ///
    /// # Errors
    ///
    /// The first child error, or an error describing a panicked child.
    pub async fn join(mut self) -> anyhow::Result<()> {
        let mut first_error = None;
        while let Some(joined) = self.tasks.join_next().await {
            let outcome = match joined {
                Ok(result) => result,
                Err(e) if e.is_panic() => Err(anyhow!("child task panicked")),
                Err(_) => Ok(()),
            };
            if let Err(e) = outcome {
                if first_error.is_none() {
                    log::warn!("Nursery({}): child failed, cancelling siblings: {e:#}", self.name);
                    self.stop.request_stop();
                    first_error = Some(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e.context(format!("Nursery({}) failed", self.name))),
            None => Ok(()),
        }
    }
}

impl Drop for Nursery {
    fn drop(&mut self) {
        if !self.tasks.is_empty() {
            log::debug!(
                "Nursery({}): dropped with {} running children",
                self.name,
                self.tasks.len()
            );
            self.stop.request_stop();
            self.tasks.abort_all();
        }
    }
}
