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

//! Logical command queues, queue strategies and the queue manager.

use super::command::CommandList;
use super::error::GraphicsError;
use super::fence::{FenceValue, Timeline};
use crate::config::QueueStrategyConfig;
use crate::utils::lock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};

/// The kind of work a queue accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueRole {
    /// Draws, dispatches and copies.
    Graphics,
    /// Dispatches and copies.
    Compute,
    /// Copies only.
    Transfer,
    /// Presentation.
    Present,
}

/// Whether a queue should be backed by its own hardware queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueAllocationPreference {
    /// One universal queue serves every role.
    AllInOne,
    /// A queue dedicated to its role.
    Dedicated,
}

/// Whether a queue may be shared with other roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueSharingPreference {
    /// Other roles may alias this queue.
    Shared,
    /// The queue serves its role only.
    Separate,
}

/// Describes one queue a strategy wants created.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueSpecification {
    /// Unique name used for lookups.
    pub name: String,
    /// Primary role.
    pub role: QueueRole,
    /// Allocation preference.
    pub allocation_preference: QueueAllocationPreference,
    /// Sharing preference.
    pub sharing_preference: QueueSharingPreference,
    /// Only reachable by name, never by role.
    pub named_only: bool,
}

/// A submission queue with its own timeline.
///
/// Submissions are executed in FIFO order. Implementations are internally
/// synchronized.
pub trait CommandQueue: Send + Sync + fmt::Debug {
    /// The queue name.
    fn name(&self) -> &str;

    /// The queue role.
    fn role(&self) -> QueueRole;

    /// The queue timeline.
    fn timeline(&self) -> &Arc<Timeline>;

    /// Submits a closed command list.
    fn submit(&self, list: CommandList) -> Result<(), GraphicsError>;

    /// Signals `value` on the timeline once all previously submitted work has executed.
    fn signal(&self, value: FenceValue) -> Result<(), GraphicsError>;

    /// Reserves the next timeline value and signals it.
    fn signal_next(&self) -> Result<FenceValue, GraphicsError> {
        let value = self.timeline().reserve_next();
        self.signal(value)?;
        Ok(value)
    }

    /// The highest completed value.
    fn completed_value(&self) -> FenceValue {
        self.timeline().completed_value()
    }

    /// The highest reserved value.
    fn current_value(&self) -> FenceValue {
        self.timeline().current_value()
    }
}

/// Decides which queues a backend creates.
pub trait QueueStrategy: Send + Sync {
    /// The queues to create.
    fn specifications(&self) -> Vec<QueueSpecification>;
}

/// One universal queue aliased by every role.
#[derive(Debug, Clone)]
pub struct SingleQueueStrategy {
    name: String,
}

impl SingleQueueStrategy {
    /// Creates the strategy.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for SingleQueueStrategy {
    fn default() -> Self {
        Self::new("universal")
    }
}

impl QueueStrategy for SingleQueueStrategy {
    fn specifications(&self) -> Vec<QueueSpecification> {
        vec![QueueSpecification {
            name: self.name.clone(),
            role: QueueRole::Graphics,
            allocation_preference: QueueAllocationPreference::AllInOne,
            sharing_preference: QueueSharingPreference::Shared,
            named_only: false,
        }]
    }
}

/// Dedicated graphics, compute and transfer queues.
#[derive(Debug, Clone)]
pub struct MultiQueueStrategy {
    graphics: String,
    compute: String,
    transfer: String,
}

impl MultiQueueStrategy {
    /// Creates the strategy with the given queue names.
    pub fn new(
        graphics: impl Into<String>,
        compute: impl Into<String>,
        transfer: impl Into<String>,
    ) -> Self {
        Self {
            graphics: graphics.into(),
            compute: compute.into(),
            transfer: transfer.into(),
        }
    }
}

impl Default for MultiQueueStrategy {
    fn default() -> Self {
        Self::new("graphics", "compute", "transfer")
    }
}

impl QueueStrategy for MultiQueueStrategy {
    fn specifications(&self) -> Vec<QueueSpecification> {
        [
            (&self.graphics, QueueRole::Graphics),
            (&self.compute, QueueRole::Compute),
            (&self.transfer, QueueRole::Transfer),
        ]
        .into_iter()
        .map(|(name, role)| QueueSpecification {
            name: name.clone(),
            role,
            allocation_preference: QueueAllocationPreference::Dedicated,
            sharing_preference: QueueSharingPreference::Separate,
            named_only: false,
        })
        .collect()
    }
}

/// Builds the strategy described by configuration.
pub fn strategy_from_config(config: &QueueStrategyConfig) -> Box<dyn QueueStrategy> {
    match config {
        QueueStrategyConfig::Single { name } => Box::new(SingleQueueStrategy::new(name.clone())),
        QueueStrategyConfig::Multi {
            graphics,
            compute,
            transfer,
        } => Box::new(MultiQueueStrategy::new(
            graphics.clone(),
            compute.clone(),
            transfer.clone(),
        )),
    }
}

struct QueueEntry {
    spec: QueueSpecification,
    queue: Arc<dyn CommandQueue>,
}

/// Creates and looks up logical command queues.
#[derive(Default)]
pub struct QueueManager {
    entries: Mutex<Vec<QueueEntry>>,
}

impl fmt::Debug for QueueManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = lock(&self.entries);
        f.debug_list()
            .entries(entries.iter().map(|e| (&e.spec.name, e.spec.role)))
            .finish()
    }
}

impl QueueManager {
    /// Creates an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates every queue `strategy` asks for with `creator`.
    ///
    /// A name already created with an identical specification is reused.
    ///
    /// # Errors
    ///
    /// [`GraphicsError::DuplicateQueue`] if a name is reused with a different
    /// specification, or whatever `creator` returns.
    pub fn create_queues(
        &self,
        strategy: &dyn QueueStrategy,
        mut creator: impl FnMut(&QueueSpecification) -> Result<Arc<dyn CommandQueue>, GraphicsError>,
    ) -> Result<(), GraphicsError> {
        let mut entries = lock(&self.entries);
        for spec in strategy.specifications() {
            if let Some(existing) = entries.iter().find(|e| e.spec.name == spec.name) {
                if existing.spec != spec {
                    return Err(GraphicsError::DuplicateQueue(spec.name));
                }
                log::debug!("QueueManager: reusing queue '{}'", spec.name);
                continue;
            }
            let queue = creator(&spec)?;
            log::info!("QueueManager: created queue '{}' ({:?})", spec.name, spec.role);
            entries.push(QueueEntry { spec, queue });
        }
        Ok(())
    }

    /// Looks a queue up by name.
    pub fn get_queue_by_name(&self, name: &str) -> Option<Arc<dyn CommandQueue>> {
        lock(&self.entries)
            .iter()
            .find(|e| e.spec.name == name)
            .map(|e| Arc::clone(&e.queue))
    }

    /// Looks a queue up by role.
    ///
    /// Prefers a dedicated queue for the role, then any queue of the role, then
    /// a universal queue. Named-only queues are never returned. Presentation
    /// falls back to the graphics queue.
    pub fn get_queue_by_role(&self, role: QueueRole) -> Option<Arc<dyn CommandQueue>> {
        let entries = lock(&self.entries);
        let candidates = || entries.iter().filter(|e| !e.spec.named_only);

        candidates()
            .find(|e| {
                e.spec.role == role
                    && e.spec.allocation_preference == QueueAllocationPreference::Dedicated
            })
            .or_else(|| candidates().find(|e| e.spec.role == role))
            .or_else(|| {
                candidates().find(|e| {
                    e.spec.allocation_preference == QueueAllocationPreference::AllInOne
                })
            })
            .or_else(|| {
                (role == QueueRole::Present)
                    .then(|| candidates().find(|e| e.spec.role == QueueRole::Graphics))
                    .flatten()
            })
            .map(|e| Arc::clone(&e.queue))
    }

    /// Calls `f` once per distinct queue, even when several names alias it.
    pub fn for_each_queue(&self, mut f: impl FnMut(&Arc<dyn CommandQueue>)) {
        let queues: Vec<Arc<dyn CommandQueue>> = {
            let entries = lock(&self.entries);
            let mut seen: Vec<*const ()> = Vec::new();
            entries
                .iter()
                .filter(|e| {
                    let ptr = Arc::as_ptr(&e.queue) as *const ();
                    if seen.contains(&ptr) {
                        false
                    } else {
                        seen.push(ptr);
                        true
                    }
                })
                .map(|e| Arc::clone(&e.queue))
                .collect()
        };
        for queue in &queues {
            f(queue);
        }
    }

    /// Number of distinct queues.
    pub fn queue_count(&self) -> usize {
        let mut count = 0;
        self.for_each_queue(|_| count += 1);
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct FakeQueue {
        name: String,
        role: QueueRole,
        timeline: Arc<Timeline>,
    }

    impl CommandQueue for FakeQueue {
        fn name(&self) -> &str {
            &self.name
        }

        fn role(&self) -> QueueRole {
            self.role
        }

        fn timeline(&self) -> &Arc<Timeline> {
            &self.timeline
        }

        fn submit(&self, _list: CommandList) -> Result<(), GraphicsError> {
            Ok(())
        }

        fn signal(&self, value: FenceValue) -> Result<(), GraphicsError> {
            self.timeline.mark_completed(value);
            Ok(())
        }
    }

    fn create(spec: &QueueSpecification) -> Result<Arc<dyn CommandQueue>, GraphicsError> {
        Ok(Arc::new(FakeQueue {
            name: spec.name.clone(),
            role: spec.role,
            timeline: Arc::new(Timeline::new(spec.name.clone())),
        }))
    }

    struct Custom(Vec<QueueSpecification>);

    impl QueueStrategy for Custom {
        fn specifications(&self) -> Vec<QueueSpecification> {
            self.0.clone()
        }
    }

    fn spec(name: &str, role: QueueRole, named_only: bool) -> QueueSpecification {
        QueueSpecification {
            name: name.to_string(),
            role,
            allocation_preference: QueueAllocationPreference::Dedicated,
            sharing_preference: QueueSharingPreference::Separate,
            named_only,
        }
    }

    #[test]
    fn multi_queue_roles_resolve_to_dedicated_queues() {
        let manager = QueueManager::new();
        manager.create_queues(&MultiQueueStrategy::default(), create).unwrap();

        let transfer = manager.get_queue_by_role(QueueRole::Transfer).unwrap();
        assert_eq!(transfer.name(), "transfer");
        assert_eq!(manager.get_queue_by_role(QueueRole::Present).unwrap().name(), "graphics");
        assert_eq!(manager.queue_count(), 3);
    }

    #[test]
    fn single_queue_serves_every_role() {
        let manager = QueueManager::new();
        manager.create_queues(&SingleQueueStrategy::default(), create).unwrap();

        for role in [QueueRole::Graphics, QueueRole::Compute, QueueRole::Transfer] {
            assert_eq!(manager.get_queue_by_role(role).unwrap().name(), "universal");
        }
    }

    #[test]
    fn named_only_queues_are_invisible_to_role_lookup() {
        let manager = QueueManager::new();
        manager
            .create_queues(
                &Custom(vec![
                    spec("async-copy", QueueRole::Transfer, true),
                    spec("gfx", QueueRole::Graphics, false),
                ]),
                create,
            )
            .unwrap();

        assert!(manager.get_queue_by_role(QueueRole::Transfer).is_none());
        assert!(manager.get_queue_by_name("async-copy").is_some());
    }

    #[test]
    fn duplicate_names_must_match() {
        let manager = QueueManager::new();
        manager.create_queues(&MultiQueueStrategy::default(), create).unwrap();
        manager.create_queues(&MultiQueueStrategy::default(), create).unwrap();
        assert_eq!(manager.queue_count(), 3);

        let clash = Custom(vec![spec("graphics", QueueRole::Compute, false)]);
        assert_eq!(
            manager.create_queues(&clash, create),
            Err(GraphicsError::DuplicateQueue("graphics".to_string()))
        );
    }

    #[test]
    fn aliased_queues_are_visited_once() {
        let manager = QueueManager::new();
        let shared = create(&spec("shared", QueueRole::Graphics, false)).unwrap();
        manager
            .create_queues(
                &Custom(vec![
                    spec("a", QueueRole::Graphics, false),
                    spec("b", QueueRole::Compute, false),
                ]),
                |_| Ok(Arc::clone(&shared)),
            )
            .unwrap();

        let mut visits = 0;
        manager.for_each_queue(|_| visits += 1);
        assert_eq!(visits, 1);
    }

    #[test]
    fn signal_next_advances_the_timeline() {
        let queue = create(&spec("q", QueueRole::Graphics, false)).unwrap();
        let value = queue.signal_next().unwrap();
        assert_eq!(value, FenceValue(1));
        assert_eq!(queue.completed_value(), value);
    }
}
