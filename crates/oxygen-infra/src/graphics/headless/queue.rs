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

//! Queues that execute recorded commands on the CPU.

use super::memory::{HeadlessBuffer, HeadlessTexture};
use oxygen_core::graphics::{
    Barrier, Buffer, BufferTextureCopyRegion, Command, CommandList, CommandQueue, FenceValue,
    GraphicsError, QueueRole, QueueSpecification, ResourceId, ResourceStates, Texture, Timeline,
};
use oxygen_core::utils::lock;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Counters collected while executing commands.
#[derive(Debug, Default)]
pub(crate) struct ExecutionStats {
    pub(crate) signals_executed: AtomicU64,
    pub(crate) commands_executed: AtomicU64,
    pub(crate) buffer_copies: AtomicU64,
    pub(crate) texture_copies: AtomicU64,
    pub(crate) bytes_copied: AtomicU64,
    pub(crate) draws: AtomicU64,
    pub(crate) barriers: AtomicU64,
    pub(crate) validation_errors: AtomicU64,
}

/// State shared by every queue of a device: the GPU-side resource states and
/// the queues themselves, so a signal can unblock waits on other queues.
#[derive(Debug, Default)]
pub(crate) struct ExecutionContext {
    states: Mutex<HashMap<ResourceId, ResourceStates>>,
    queues: Mutex<Vec<Weak<HeadlessQueue>>>,
    pub(crate) stats: ExecutionStats,
}

impl ExecutionContext {
    pub(crate) fn register_resource(&self, resource: ResourceId, state: ResourceStates) {
        lock(&self.states).insert(resource, state);
    }

    pub(crate) fn forget_resource(&self, resource: ResourceId) {
        lock(&self.states).remove(&resource);
    }

    pub(crate) fn state_of(&self, resource: ResourceId) -> Option<ResourceStates> {
        lock(&self.states).get(&resource).copied()
    }

    pub(crate) fn add_queue(&self, queue: &Arc<HeadlessQueue>) {
        lock(&self.queues).push(Arc::downgrade(queue));
    }

    pub(crate) fn queues(&self) -> Vec<Arc<HeadlessQueue>> {
        lock(&self.queues).iter().filter_map(Weak::upgrade).collect()
    }

    fn pump_all(&self) {
        for queue in self.queues() {
            queue.pump();
        }
    }

    fn report(&self, queue: &str, message: String) {
        self.stats.validation_errors.fetch_add(1, Ordering::Relaxed);
        log::error!("HeadlessQueue({queue}): validation error: {message}");
    }

    fn apply_barrier(&self, queue: &str, barrier: &Barrier) {
        self.stats.barriers.fetch_add(1, Ordering::Relaxed);
        let (resource, before, after) = match barrier {
            Barrier::Buffer {
                resource,
                before,
                after,
            }
            | Barrier::Texture {
                resource,
                before,
                after,
                ..
            } => (*resource, *before, *after),
            Barrier::Memory { .. } => return,
        };
        let mismatch = {
            let mut states = lock(&self.states);
            let current = states.insert(resource, after);
            current.filter(|current| *current != before)
        };
        if let Some(current) = mismatch {
            self.report(
                queue,
                format!("barrier on {resource:?} expects {before:?} but the resource is in {current:?}"),
            );
        }
    }

    fn require(&self, queue: &str, resource: ResourceId, state: ResourceStates, what: &str) {
        let current = lock(&self.states).get(&resource).copied();
        if let Some(current) = current {
            if !current.contains(state) {
                self.report(
                    queue,
                    format!("{what} needs {resource:?} in {state:?} but it is in {current:?}"),
                );
            }
        }
    }
}

/// Removes a resource from the execution state when its native object drops.
#[derive(Debug)]
pub(crate) struct StateRegistration {
    resource: ResourceId,
    context: Weak<ExecutionContext>,
}

impl StateRegistration {
    pub(crate) fn new(
        context: &Arc<ExecutionContext>,
        resource: ResourceId,
        state: ResourceStates,
    ) -> Self {
        context.register_resource(resource, state);
        Self {
            resource,
            context: Arc::downgrade(context),
        }
    }
}

impl Drop for StateRegistration {
    fn drop(&mut self) {
        if let Some(context) = self.context.upgrade() {
            context.forget_resource(self.resource);
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<Command>,
    stalled: bool,
    lost: bool,
    capture: bool,
    captured: Vec<Command>,
}

/// A queue executing commands in FIFO order on the submitting thread.
///
/// Work runs as soon as it is submitted unless the queue is stalled or the
/// next command waits on a timeline that has not reached its value yet; such
/// work runs once the queue is pumped again, which every signal on the device
/// does.
#[derive(Debug)]
pub struct HeadlessQueue {
    name: String,
    role: QueueRole,
    timeline: Arc<Timeline>,
    context: Arc<ExecutionContext>,
    state: Mutex<QueueState>,
    pumping: AtomicBool,
}

impl HeadlessQueue {
    pub(crate) fn new(spec: &QueueSpecification, context: Arc<ExecutionContext>) -> Arc<Self> {
        let queue = Arc::new(Self {
            name: spec.name.clone(),
            role: spec.role,
            timeline: Arc::new(Timeline::new(spec.name.clone())),
            context,
            state: Mutex::new(QueueState::default()),
            pumping: AtomicBool::new(false),
        });
        queue.context.add_queue(&queue);
        queue
    }

    /// Holds (`true`) or releases (`false`) execution of queued work.
    pub fn set_stalled(&self, stalled: bool) {
        lock(&self.state).stalled = stalled;
        log::debug!("HeadlessQueue({}): stalled = {stalled}", self.name);
        if !stalled {
            self.pump();
        }
    }

    /// Returns `true` while the queue is stalled.
    pub fn is_stalled(&self) -> bool {
        lock(&self.state).stalled
    }

    /// Number of commands waiting to execute.
    pub fn pending_count(&self) -> usize {
        lock(&self.state).pending.len()
    }

    /// Starts or stops keeping a copy of every executed command.
    pub fn set_capture(&self, capture: bool) {
        let mut state = lock(&self.state);
        state.capture = capture;
        if !capture {
            state.captured.clear();
        }
    }

    /// Takes the commands captured so far.
    pub fn take_captured(&self) -> Vec<Command> {
        std::mem::take(&mut lock(&self.state).captured)
    }

    pub(crate) fn mark_lost(&self) {
        let dropped = {
            let mut state = lock(&self.state);
            state.lost = true;
            std::mem::take(&mut state.pending)
        };
        if !dropped.is_empty() {
            log::warn!(
                "HeadlessQueue({}): dropping {} commands after device loss",
                self.name,
                dropped.len()
            );
        }
        self.timeline.mark_device_lost();
    }

    fn enqueue(&self, commands: impl IntoIterator<Item = Command>) -> Result<(), GraphicsError> {
        {
            let mut state = lock(&self.state);
            if state.lost {
                return Err(GraphicsError::DeviceLost);
            }
            state.pending.extend(commands);
        }
        self.pump();
        Ok(())
    }

    fn next_runnable(&self) -> Option<Command> {
        let mut state = lock(&self.state);
        if state.stalled || state.lost {
            return None;
        }
        match state.pending.front() {
            Some(Command::Wait { timeline, value }) if !timeline.is_completed(*value) => None,
            Some(_) => state.pending.pop_front(),
            None => None,
        }
    }

    fn has_runnable(&self) -> bool {
        let state = lock(&self.state);
        !state.stalled
            && !state.lost
            && match state.pending.front() {
                Some(Command::Wait { timeline, value }) => timeline.is_completed(*value),
                Some(_) => true,
                None => false,
            }
    }

    /// Executes queued work until the queue is empty, stalled, or blocked on a
    /// wait. Returns the number of commands executed.
    pub fn pump(&self) -> usize {
        let mut executed = 0;
        loop {
            if self.pumping.swap(true, Ordering::AcqRel) {
                // Another pump is draining this queue.
                return executed;
            }
            while let Some(command) = self.next_runnable() {
                self.execute(command);
                executed += 1;
            }
            self.pumping.store(false, Ordering::Release);
            if !self.has_runnable() {
                return executed;
            }
        }
    }

    fn execute(&self, command: Command) {
        let context = &self.context;
        let stats = &context.stats;
        stats.commands_executed.fetch_add(1, Ordering::Relaxed);
        match &command {
            Command::Barriers(barriers) => {
                for barrier in barriers {
                    context.apply_barrier(&self.name, barrier);
                }
            }
            Command::CopyBuffer {
                dst,
                dst_offset,
                src,
                src_offset,
                size,
            } => {
                context.require(&self.name, dst.id(), ResourceStates::COPY_DEST, "CopyBuffer");
                context.require(&self.name, src.id(), ResourceStates::COPY_SOURCE, "CopyBuffer");
                self.copy_buffer(dst, *dst_offset, src, *src_offset, *size);
            }
            Command::CopyBufferToTexture { src, dst, regions } => {
                context.require(&self.name, dst.id(), ResourceStates::COPY_DEST, "CopyBufferToTexture");
                context.require(&self.name, src.id(), ResourceStates::COPY_SOURCE, "CopyBufferToTexture");
                self.copy_buffer_to_texture(src, dst, regions);
            }
            Command::ClearFramebuffer {
                framebuffer,
                colors,
                depth,
                stencil,
            } => {
                for (attachment, color) in framebuffer.color_attachments.iter().zip(colors) {
                    if color.is_some() {
                        context.require(&self.name, attachment.id(), ResourceStates::RENDER_TARGET, "ClearFramebuffer");
                    }
                }
                if let Some(target) = &framebuffer.depth_attachment {
                    if depth.is_some() || stencil.is_some() {
                        context.require(&self.name, target.id(), ResourceStates::DEPTH_WRITE, "ClearFramebuffer");
                    }
                }
            }
            Command::ClearDepthStencil { texture, .. } => {
                context.require(&self.name, texture.id(), ResourceStates::DEPTH_WRITE, "ClearDepthStencil");
            }
            Command::Draw { .. } | Command::DrawIndexed { .. } | Command::Dispatch { .. } => {
                stats.draws.fetch_add(1, Ordering::Relaxed);
            }
            Command::SetRootConstant { .. } | Command::Wait { .. } => {}
            Command::Signal(value) => {
                stats.signals_executed.fetch_add(1, Ordering::Relaxed);
                self.timeline.mark_completed(*value);
                context.pump_all();
            }
        }

        let mut state = lock(&self.state);
        if state.capture {
            state.captured.push(command);
        }
    }

    fn copy_buffer(&self, dst: &Buffer, dst_offset: u64, src: &Buffer, src_offset: u64, size: u64) {
        let (Some(dst_native), Some(src_native)) = (headless_buffer(dst), headless_buffer(src)) else {
            self.context
                .report(&self.name, "CopyBuffer between foreign buffers".to_string());
            return;
        };
        let copied = src_native
            .read(src_offset, size)
            .is_some_and(|bytes| dst_native.write(dst_offset, &bytes));
        if copied {
            let stats = &self.context.stats;
            stats.buffer_copies.fetch_add(1, Ordering::Relaxed);
            stats.bytes_copied.fetch_add(size, Ordering::Relaxed);
        } else {
            self.context.report(
                &self.name,
                format!(
                    "CopyBuffer of {size} bytes '{}'+{src_offset} -> '{}'+{dst_offset} is out of range",
                    src.desc().debug_name,
                    dst.desc().debug_name
                ),
            );
        }
    }

    fn copy_buffer_to_texture(
        &self,
        src: &Buffer,
        dst: &Texture,
        regions: &[BufferTextureCopyRegion],
    ) {
        let (Some(src_native), Some(dst_native)) = (headless_buffer(src), headless_texture(dst)) else {
            self.context
                .report(&self.name, "CopyBufferToTexture with foreign resources".to_string());
            return;
        };
        let Some(source) = src_native.read(0, src.size()) else {
            self.context
                .report(&self.name, format!("'{}' cannot be read", src.desc().debug_name));
            return;
        };
        for region in regions {
            match dst_native.write_region(&source, region) {
                Ok(written) => {
                    self.context
                        .stats
                        .bytes_copied
                        .fetch_add(written, Ordering::Relaxed);
                }
                Err(reason) => self.context.report(
                    &self.name,
                    format!("CopyBufferToTexture into '{}': {reason}", dst.desc().debug_name),
                ),
            }
        }
        self.context
            .stats
            .texture_copies
            .fetch_add(1, Ordering::Relaxed);
    }
}

fn headless_buffer(buffer: &Buffer) -> Option<&HeadlessBuffer> {
    buffer.native().as_any().downcast_ref::<HeadlessBuffer>()
}

fn headless_texture(texture: &Texture) -> Option<&HeadlessTexture> {
    texture.native().as_any().downcast_ref::<HeadlessTexture>()
}

impl CommandQueue for HeadlessQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn role(&self) -> QueueRole {
        self.role
    }

    fn timeline(&self) -> &Arc<Timeline> {
        &self.timeline
    }

    fn submit(&self, list: CommandList) -> Result<(), GraphicsError> {
        if !list.is_closed() {
            return Err(GraphicsError::InvalidRequest(format!(
                "command list '{}' submitted while still recording",
                list.name()
            )));
        }
        log::trace!(
            "HeadlessQueue({}): queued '{}' ({} commands)",
            self.name,
            list.name(),
            list.commands().len()
        );
        self.enqueue(list.into_commands())
    }

    fn signal(&self, value: FenceValue) -> Result<(), GraphicsError> {
        self.enqueue([Command::Signal(value)])
    }
}
