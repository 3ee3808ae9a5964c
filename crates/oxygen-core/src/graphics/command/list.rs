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

use super::Command;
use crate::graphics::queue::QueueRole;
use crate::graphics::resources::{Resource, ResourceId};
use std::collections::HashSet;

/// An ordered list of commands for one queue.
///
/// A list is open while it is being recorded and closed once the recorder
/// ends it; only closed lists are accepted by queues.
#[derive(Debug)]
pub struct CommandList {
    name: String,
    role: QueueRole,
    commands: Vec<Command>,
    referenced: Vec<Resource>,
    referenced_ids: HashSet<ResourceId>,
    closed: bool,
}

impl CommandList {
    /// Creates an empty, open list.
    pub fn new(name: impl Into<String>, role: QueueRole) -> Self {
        Self {
            name: name.into(),
            role,
            commands: Vec::new(),
            referenced: Vec::new(),
            referenced_ids: HashSet::new(),
            closed: false,
        }
    }

    /// Debug name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Role of the queue the list was recorded for.
    pub fn role(&self) -> QueueRole {
        self.role
    }

    /// Recorded commands, in order.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Returns `true` once recording has ended.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Every resource the list referenced, in first-use order.
    pub fn referenced_resources(&self) -> &[Resource] {
        &self.referenced
    }

    /// Takes the referenced resources, leaving the list without any.
    pub fn take_referenced_resources(&mut self) -> Vec<Resource> {
        self.referenced_ids.clear();
        std::mem::take(&mut self.referenced)
    }

    /// Consumes the list, returning its commands for execution.
    pub fn into_commands(self) -> Vec<Command> {
        self.commands
    }

    pub(super) fn push(&mut self, command: Command) {
        debug_assert!(!self.closed, "recording into a closed command list");
        self.commands.push(command);
    }

    pub(super) fn reference(&mut self, resource: &Resource) {
        if self.referenced_ids.insert(resource.id()) {
            self.referenced.push(resource.clone());
        }
    }

    pub(super) fn close(&mut self) {
        self.closed = true;
    }
}
