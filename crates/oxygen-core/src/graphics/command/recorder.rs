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

use super::{BufferTextureCopyRegion, ClearFlags, Command, CommandList, Framebuffer};
use crate::graphics::descriptor::DescriptorIndex;
use crate::graphics::error::GraphicsError;
use crate::graphics::fence::{FenceValue, Timeline};
use crate::graphics::queue::CommandQueue;
use crate::graphics::resources::{Buffer, Resource, Texture};
use crate::graphics::state::{Barrier, ResourceStateTracker, ResourceStates, TrackingMode};
use std::sync::Arc;

/// Records commands into a [`CommandList`] for one queue.
///
/// Every operation that uses a resource first requires the matching state
/// from the [`ResourceStateTracker`], then flushes the pending barrier batch
/// ahead of the command itself. Resources used without an explicit
/// [`track_resource`](Self::track_resource) are tracked from their resting
/// state and returned to it when the list ends.
pub struct CommandRecorder {
    queue: Arc<dyn CommandQueue>,
    list: Option<CommandList>,
    tracker: ResourceStateTracker,
}

impl std::fmt::Debug for CommandRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRecorder")
            .field("queue", &self.queue.name())
            .field("list", &self.list.as_ref().map(CommandList::name))
            .finish()
    }
}

impl CommandRecorder {
    /// Begins recording a fresh list for `queue`.
    pub fn new(queue: Arc<dyn CommandQueue>, debug_name: impl Into<String>) -> Self {
        let list = CommandList::new(debug_name, queue.role());
        Self {
            queue,
            list: Some(list),
            tracker: ResourceStateTracker::new(),
        }
    }

    /// The queue this recorder submits to.
    pub fn queue(&self) -> &Arc<dyn CommandQueue> {
        &self.queue
    }

    /// The list being recorded, or `None` once ended.
    pub fn list(&self) -> Option<&CommandList> {
        self.list.as_ref()
    }

    fn list_mut(&mut self) -> Result<&mut CommandList, GraphicsError> {
        match self.list.as_mut() {
            Some(list) if !list.is_closed() => Ok(list),
            _ => Err(GraphicsError::InvalidRequest(
                "recording into an ended command list".to_string(),
            )),
        }
    }

    fn is_open(&self) -> bool {
        self.list.as_ref().is_some_and(|list| !list.is_closed())
    }

    /// Tracks `resource` with an explicit initial state and mode.
    pub fn track_resource(
        &mut self,
        resource: impl Into<Resource>,
        initial: ResourceStates,
        mode: TrackingMode,
    ) -> Result<(), GraphicsError> {
        let resource = resource.into();
        self.list_mut()?.reference(&resource);
        self.tracker.track_resource(&resource, initial, mode);
        Ok(())
    }

    /// Requires `resource` to be in `state` for the next command.
    pub fn require_resource_state(
        &mut self,
        resource: impl Into<Resource>,
        state: ResourceStates,
    ) -> Result<(), GraphicsError> {
        let resource = resource.into();
        self.list_mut()?.reference(&resource);
        if !self.tracker.is_tracked(resource.id()) {
            self.tracker
                .track_resource(&resource, resource.resting_state(), TrackingMode::KeepInitial);
        }
        self.tracker.require_resource_state(resource.id(), state)
    }

    fn flush_barriers(&mut self) -> Result<(), GraphicsError> {
        let barriers = self.tracker.flush();
        let list = self.list_mut()?;
        if !barriers.is_empty() {
            list.push(Command::Barriers(barriers));
        }
        Ok(())
    }

    fn record(&mut self, command: Command) -> Result<(), GraphicsError> {
        self.flush_barriers()?;
        self.list_mut()?.push(command);
        Ok(())
    }

    /// Copies `size` bytes from `src` at `src_offset` into `dst` at `dst_offset`.
    ///
    /// # Errors
    ///
    /// Fails for empty or out-of-range copies.
    pub fn copy_buffer(
        &mut self,
        dst: &Arc<Buffer>,
        dst_offset: u64,
        src: &Arc<Buffer>,
        src_offset: u64,
        size: u64,
    ) -> Result<(), GraphicsError> {
        let in_range = |buffer: &Buffer, offset: u64| {
            offset
                .checked_add(size)
                .is_some_and(|end| end <= buffer.size())
        };
        if size == 0 || !in_range(dst.as_ref(), dst_offset) || !in_range(src.as_ref(), src_offset) {
            return Err(GraphicsError::InvalidRequest(format!(
                "copy of {size} bytes from '{}'+{src_offset} to '{}'+{dst_offset} is out of range",
                src.desc().debug_name,
                dst.desc().debug_name
            )));
        }
        self.require_resource_state(dst, ResourceStates::COPY_DEST)?;
        self.require_resource_state(src, ResourceStates::COPY_SOURCE)?;
        self.record(Command::CopyBuffer {
            dst: Arc::clone(dst),
            dst_offset,
            src: Arc::clone(src),
            src_offset,
            size,
        })
    }

    /// Copies `regions` of `src` into subresources of `dst`.
    pub fn copy_buffer_to_texture(
        &mut self,
        src: &Arc<Buffer>,
        regions: Vec<BufferTextureCopyRegion>,
        dst: &Arc<Texture>,
    ) -> Result<(), GraphicsError> {
        if regions.is_empty() {
            return Err(GraphicsError::InvalidRequest(format!(
                "copy into '{}' without regions",
                dst.desc().debug_name
            )));
        }
        self.require_resource_state(dst, ResourceStates::COPY_DEST)?;
        self.require_resource_state(src, ResourceStates::COPY_SOURCE)?;
        self.record(Command::CopyBufferToTexture {
            src: Arc::clone(src),
            dst: Arc::clone(dst),
            regions,
        })
    }

    /// Clears the attachments of `framebuffer`.
    ///
    /// `colors[i]` applies to color attachment `i`; missing or `None` entries
    /// leave the attachment untouched.
    pub fn clear_framebuffer(
        &mut self,
        framebuffer: &Framebuffer,
        colors: &[Option<[f32; 4]>],
        depth: Option<f32>,
        stencil: Option<u8>,
    ) -> Result<(), GraphicsError> {
        for (attachment, color) in framebuffer.color_attachments.iter().zip(colors) {
            if color.is_some() {
                self.require_resource_state(attachment, ResourceStates::RENDER_TARGET)?;
            }
        }
        if let Some(depth_target) = &framebuffer.depth_attachment {
            if depth.is_some() || stencil.is_some() {
                self.require_resource_state(depth_target, ResourceStates::DEPTH_WRITE)?;
            }
        }
        self.record(Command::ClearFramebuffer {
            framebuffer: framebuffer.clone(),
            colors: colors.to_vec(),
            depth,
            stencil,
        })
    }

    /// Clears a depth-stencil view of `texture` bound at `dsv`.
    pub fn clear_depth_stencil_view(
        &mut self,
        texture: &Arc<Texture>,
        dsv: DescriptorIndex,
        flags: ClearFlags,
        depth: f32,
        stencil: u8,
    ) -> Result<(), GraphicsError> {
        self.require_resource_state(texture, ResourceStates::DEPTH_WRITE)?;
        self.record(Command::ClearDepthStencil {
            texture: Arc::clone(texture),
            dsv,
            flags,
            depth,
            stencil,
        })
    }

    /// Sets a root constant.
    pub fn set_root_constant(&mut self, slot: u32, value: u32) -> Result<(), GraphicsError> {
        self.record(Command::SetRootConstant { slot, value })
    }

    /// Records a non-indexed draw.
    pub fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> Result<(), GraphicsError> {
        self.record(Command::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        })
    }

    /// Records an indexed draw.
    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    ) -> Result<(), GraphicsError> {
        self.record(Command::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            base_vertex,
            first_instance,
        })
    }

    /// Records a compute dispatch.
    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<(), GraphicsError> {
        self.record(Command::Dispatch { x, y, z })
    }

    /// Signals `value` on the executing queue's timeline.
    pub fn queue_signal(&mut self, value: FenceValue) -> Result<(), GraphicsError> {
        self.record(Command::Signal(value))
    }

    /// Makes the executing queue wait until `timeline` reaches `value`.
    pub fn queue_wait(&mut self, timeline: &Arc<Timeline>, value: FenceValue) -> Result<(), GraphicsError> {
        self.record(Command::Wait {
            timeline: Arc::clone(timeline),
            value,
        })
    }

    /// Injects barriers directly, after any pending batch.
    pub fn execute_barriers(&mut self, barriers: Vec<Barrier>) -> Result<(), GraphicsError> {
        if barriers.is_empty() {
            return Ok(());
        }
        self.record(Command::Barriers(barriers))
    }

    /// Ends recording: restores resources tracked as `KeepInitial` and closes
    /// the list. Ending twice is an error.
    pub fn end(&mut self) -> Result<(), GraphicsError> {
        if !self.is_open() {
            return Err(GraphicsError::InvalidRequest(
                "command list already ended".to_string(),
            ));
        }
        self.tracker.on_command_list_closed();
        self.flush_barriers()?;
        self.list_mut()?.close();
        Ok(())
    }

    /// Ends recording if needed and returns the closed list for later
    /// submission.
    pub fn finish(mut self) -> Result<CommandList, GraphicsError> {
        if self.is_open() {
            self.end()?;
        }
        self.tracker.on_command_list_submitted();
        self.list.take().ok_or_else(|| {
            GraphicsError::InvalidRequest("command list already taken".to_string())
        })
    }

    /// Ends recording if needed and submits the list to the queue.
    ///
    /// Returns the resources the list referenced so the caller can keep them
    /// alive until the GPU is done with them.
    pub fn submit(self) -> Result<Vec<Resource>, GraphicsError> {
        let queue = Arc::clone(&self.queue);
        let mut list = self.finish()?;
        let referenced = list.take_referenced_resources();
        log::trace!(
            "CommandRecorder({}): submitting {} commands to '{}'",
            list.name(),
            list.commands().len(),
            queue.name()
        );
        queue.submit(list)?;
        Ok(referenced)
    }
}

impl Drop for CommandRecorder {
    fn drop(&mut self) {
        if let Some(list) = &self.list {
            if !list.commands().is_empty() {
                log::warn!(
                    "CommandRecorder({}): dropped with {} unsubmitted commands",
                    list.name(),
                    list.commands().len()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphics::queue::QueueRole;
    use crate::graphics::resources::{BufferDesc, BufferUsage, NativeBuffer, ResourceId};
    use crate::utils::lock;
    use std::any::Any;
    use std::sync::Mutex;

    #[derive(Debug)]
    struct NullBuffer;

    impl NativeBuffer for NullBuffer {
        fn map(&self, _: u64, _: u64, _: &mut dyn FnMut(&mut [u8])) -> Result<(), GraphicsError> {
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[derive(Debug)]
    struct RecordingQueue {
        timeline: Arc<Timeline>,
        submitted: Mutex<Vec<CommandList>>,
    }

    impl CommandQueue for RecordingQueue {
        fn name(&self) -> &str {
            "recording"
        }

        fn role(&self) -> QueueRole {
            QueueRole::Transfer
        }

        fn timeline(&self) -> &Arc<Timeline> {
            &self.timeline
        }

        fn submit(&self, list: CommandList) -> Result<(), GraphicsError> {
            lock(&self.submitted).push(list);
            Ok(())
        }

        fn signal(&self, value: FenceValue) -> Result<(), GraphicsError> {
            self.timeline.mark_completed(value);
            Ok(())
        }
    }

    fn queue() -> Arc<RecordingQueue> {
        Arc::new(RecordingQueue {
            timeline: Arc::new(Timeline::new("recording")),
            submitted: Mutex::new(Vec::new()),
        })
    }

    fn device_buffer(id: u64) -> Arc<Buffer> {
        Arc::new(Buffer::new(
            ResourceId(id),
            BufferDesc::device_local(256, BufferUsage::STORAGE | BufferUsage::COPY_DST, "dst"),
            Box::new(NullBuffer),
        ))
    }

    fn upload_buffer(id: u64) -> Arc<Buffer> {
        Arc::new(Buffer::new(
            ResourceId(id),
            BufferDesc::upload(256, "staging"),
            Box::new(NullBuffer),
        ))
    }

    #[test]
    fn copy_is_preceded_by_its_barrier_and_followed_by_the_restore() {
        let queue = queue();
        let mut recorder = CommandRecorder::new(queue.clone(), "upload");
        let dst = device_buffer(1);
        let src = upload_buffer(2);

        recorder.copy_buffer(&dst, 0, &src, 0, 64).unwrap();
        let referenced = recorder.submit().unwrap();
        assert_eq!(referenced.len(), 2);

        let submitted = lock(&queue.submitted);
        let commands = submitted[0].commands();
        assert_eq!(commands.len(), 3);
        assert!(matches!(
            &commands[0],
            Command::Barriers(b) if b == &vec![Barrier::Buffer {
                resource: dst.id(),
                before: ResourceStates::COMMON,
                after: ResourceStates::COPY_DEST,
            }]
        ));
        assert!(matches!(&commands[1], Command::CopyBuffer { size: 64, .. }));
        assert!(matches!(
            &commands[2],
            Command::Barriers(b) if b[0] == Barrier::Buffer {
                resource: dst.id(),
                before: ResourceStates::COPY_DEST,
                after: ResourceStates::COMMON,
            }
        ));
        assert!(submitted[0].is_closed());
    }

    #[test]
    fn consecutive_copies_share_one_transition() {
        let queue = queue();
        let mut recorder = CommandRecorder::new(queue.clone(), "upload");
        let dst = device_buffer(1);
        let src = upload_buffer(2);

        recorder.copy_buffer(&dst, 0, &src, 0, 64).unwrap();
        recorder.copy_buffer(&dst, 64, &src, 64, 64).unwrap();
        let list = recorder.finish().unwrap();

        let barrier_batches = list
            .commands()
            .iter()
            .filter(|c| matches!(c, Command::Barriers(_)))
            .count();
        assert_eq!(barrier_batches, 2);
    }

    #[test]
    fn out_of_range_copy_is_rejected() {
        let mut recorder = CommandRecorder::new(queue(), "upload");
        let dst = device_buffer(1);
        let src = upload_buffer(2);
        assert!(recorder.copy_buffer(&dst, 200, &src, 0, 64).is_err());
        assert!(recorder.copy_buffer(&dst, 0, &src, 0, 0).is_err());
    }

    #[test]
    fn recording_after_end_fails() {
        let mut recorder = CommandRecorder::new(queue(), "list");
        recorder.draw(3, 1, 0, 0).unwrap();
        recorder.end().unwrap();
        assert!(recorder.end().is_err());
        assert!(recorder.dispatch(1, 1, 1).is_err());
        let list = recorder.finish().unwrap();
        assert_eq!(list.commands().len(), 1);
    }

    #[test]
    fn signal_and_wait_are_recorded_in_order() {
        let other = Arc::new(Timeline::new("other"));
        let mut recorder = CommandRecorder::new(queue(), "sync");
        recorder.queue_wait(&other, FenceValue(3)).unwrap();
        recorder.queue_signal(FenceValue(1)).unwrap();
        let list = recorder.finish().unwrap();
        assert!(matches!(list.commands()[0], Command::Wait { value: FenceValue(3), .. }));
        assert!(matches!(list.commands()[1], Command::Signal(FenceValue(1))));
    }
}
