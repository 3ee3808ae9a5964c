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

//! The headless implementation of the [`Graphics`] facade.

use super::heap::HeadlessDescriptorHeap;
use super::memory::{HeadlessBuffer, HeadlessTexture};
use super::queue::{ExecutionContext, HeadlessQueue, StateRegistration};
use oxygen_core::graphics::{
    strategy_from_config, BindlessDescriptorAllocator, Buffer, BufferDesc, CommandList,
    CommandQueue, DeferredReclaimer, DescriptorHeapBackend, DescriptorHeapStrategy, Graphics,
    GraphicsError, QueueManager, QueueRole, QueueStrategy, ResourceId, ResourceRegistry,
    ResourceStates, Texture, TextureDesc, TextureType, ViewFactory,
};
use oxygen_core::utils::lock;
use oxygen_core::GraphicsConfig;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// A snapshot of the device counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeadlessStats {
    /// Buffers created since start-up.
    pub buffers_created: u64,
    /// Textures created since start-up.
    pub textures_created: u64,
    /// Bytes of buffer and texture memory allocated since start-up.
    pub bytes_allocated: u64,
    /// Commands executed by every queue.
    pub commands_executed: u64,
    /// Timeline signals executed.
    pub signals_executed: u64,
    /// Executed `CopyBuffer` commands.
    pub buffer_copies: u64,
    /// Executed `CopyBufferToTexture` commands.
    pub texture_copies: u64,
    /// Bytes moved by copies.
    pub bytes_copied: u64,
    /// Executed draws and dispatches.
    pub draws: u64,
    /// Executed barriers.
    pub barriers: u64,
    /// Commands whose resources were in the wrong state, or copies out of range.
    pub validation_errors: u64,
}

/// A [`Graphics`] device whose resources live in host memory.
///
/// Every command queue executes its commands on the CPU and checks that each
/// barrier starts from the state the resource is actually in. Tests read the
/// resulting memory back and inspect [`HeadlessStats`].
pub struct HeadlessGraphics {
    config: GraphicsConfig,
    heap: Arc<HeadlessDescriptorHeap>,
    allocator: Arc<BindlessDescriptorAllocator>,
    registry: Arc<ResourceRegistry>,
    reclaimer: Arc<DeferredReclaimer>,
    queues: QueueManager,
    context: Arc<ExecutionContext>,
    deferred: Mutex<Vec<(Arc<dyn CommandQueue>, CommandList)>>,
    next_resource_id: AtomicU64,
    buffers_created: AtomicU64,
    textures_created: AtomicU64,
    bytes_allocated: AtomicU64,
}

impl std::fmt::Debug for HeadlessGraphics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadlessGraphics")
            .field("queues", &self.queues)
            .field("live_resources", &self.registry.live_resource_count())
            .finish()
    }
}

impl HeadlessGraphics {
    /// Creates a device and the queues `config.queues` asks for.
    ///
    /// # Errors
    ///
    /// Fails if the configuration does not validate or the queue layout is
    /// inconsistent.
    pub fn new(config: GraphicsConfig) -> Result<Arc<Self>, GraphicsError> {
        config.validate()?;

        let heap = Arc::new(HeadlessDescriptorHeap::new());
        let allocator = BindlessDescriptorAllocator::new(
            DescriptorHeapStrategy::from_config(&config.descriptor_heaps),
            Some(Arc::clone(&heap) as Arc<dyn DescriptorHeapBackend>),
        );
        let registry = Arc::new(ResourceRegistry::new(Some(
            Arc::clone(&heap) as Arc<dyn ViewFactory>
        )));
        let reclaimer = Arc::new(DeferredReclaimer::new(config.frames_in_flight));

        let graphics = Arc::new(Self {
            heap,
            allocator,
            registry,
            reclaimer,
            queues: QueueManager::new(),
            context: Arc::new(ExecutionContext::default()),
            deferred: Mutex::new(Vec::new()),
            next_resource_id: AtomicU64::new(1),
            buffers_created: AtomicU64::new(0),
            textures_created: AtomicU64::new(0),
            bytes_allocated: AtomicU64::new(0),
            config,
        });
        let strategy = strategy_from_config(&graphics.config.queues);
        graphics.create_command_queues(strategy.as_ref())?;
        log::info!(
            "HeadlessGraphics: ready with {} queues and {} frames in flight",
            graphics.queues.queue_count(),
            graphics.config.frames_in_flight
        );
        Ok(graphics)
    }

    fn next_id(&self) -> ResourceId {
        ResourceId(self.next_resource_id.fetch_add(1, Ordering::Relaxed))
    }

    /// The descriptor table mirrored from the allocator and the registry.
    pub fn heap(&self) -> &Arc<HeadlessDescriptorHeap> {
        &self.heap
    }

    /// The headless queue named `name`.
    pub fn headless_queue(&self, name: &str) -> Option<Arc<HeadlessQueue>> {
        self.context
            .queues()
            .into_iter()
            .find(|queue| queue.name() == name)
    }

    /// The headless queue the queue manager resolves for `role`.
    pub fn headless_queue_by_role(&self, role: QueueRole) -> Option<Arc<HeadlessQueue>> {
        let queue = self.queues.get_queue_by_role(role)?;
        self.headless_queue(queue.name())
    }

    /// Runs every queue until it is idle or blocked.
    pub fn pump(&self) -> usize {
        self.context.queues().iter().map(|queue| queue.pump()).sum()
    }

    /// Loses the device: every timeline publishes the device-lost marker and
    /// every queue refuses further work.
    pub fn simulate_device_lost(&self) {
        log::error!("HeadlessGraphics: simulating device loss");
        for queue in self.context.queues() {
            queue.mark_lost();
        }
    }

    /// The execution-time state of a resource.
    pub fn resource_state(&self, resource: ResourceId) -> Option<ResourceStates> {
        self.context.state_of(resource)
    }

    /// Reads bytes of any buffer, including device-local ones.
    pub fn read_buffer(&self, buffer: &Buffer, offset: u64, size: u64) -> Option<Vec<u8>> {
        buffer
            .native()
            .as_any()
            .downcast_ref::<HeadlessBuffer>()?
            .read(offset, size)
    }

    /// Reads one subresource of a texture, tightly packed.
    pub fn read_texture_subresource(&self, texture: &Texture, index: u32) -> Option<Vec<u8>> {
        texture
            .native()
            .as_any()
            .downcast_ref::<HeadlessTexture>()?
            .read_subresource(index)
    }

    /// A snapshot of the device counters.
    pub fn stats(&self) -> HeadlessStats {
        let execution = &self.context.stats;
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        HeadlessStats {
            buffers_created: load(&self.buffers_created),
            textures_created: load(&self.textures_created),
            bytes_allocated: load(&self.bytes_allocated),
            commands_executed: load(&execution.commands_executed),
            signals_executed: load(&execution.signals_executed),
            buffer_copies: load(&execution.buffer_copies),
            texture_copies: load(&execution.texture_copies),
            bytes_copied: load(&execution.bytes_copied),
            draws: load(&execution.draws),
            barriers: load(&execution.barriers),
            validation_errors: load(&execution.validation_errors),
        }
    }
}

fn validate_texture(desc: &TextureDesc) -> Result<(), String> {
    if desc.width == 0 || desc.height == 0 || desc.depth == 0 {
        return Err("zero-sized texture".to_string());
    }
    if desc.mip_levels == 0 || desc.array_layers == 0 || desc.sample_count == 0 {
        return Err("a texture needs at least one mip, layer and sample".to_string());
    }
    let largest = desc.width.max(desc.height).max(desc.depth);
    if desc.mip_levels > u32::BITS - largest.leading_zeros() {
        return Err(format!(
            "{} mips requested for a {}x{}x{} texture",
            desc.mip_levels, desc.width, desc.height, desc.depth
        ));
    }
    match desc.texture_type {
        TextureType::TextureCube | TextureType::TextureCubeArray if desc.array_layers % 6 != 0 => {
            Err(format!(
                "cube textures need a multiple of six layers, got {}",
                desc.array_layers
            ))
        }
        TextureType::Texture3D if desc.array_layers != 1 => {
            Err("volume textures cannot have array layers".to_string())
        }
        TextureType::Texture1D if desc.height != 1 || desc.depth != 1 => {
            Err("1D textures must be one texel high and deep".to_string())
        }
        _ => Ok(()),
    }
}

impl Graphics for HeadlessGraphics {
    fn name(&self) -> &str {
        "headless"
    }

    fn config(&self) -> &GraphicsConfig {
        &self.config
    }

    fn create_buffer(&self, desc: BufferDesc) -> Result<Arc<Buffer>, GraphicsError> {
        let failed = |reason: String| GraphicsError::ResourceCreationFailed {
            label: desc.debug_name.clone(),
            reason,
        };
        if desc.size_bytes == 0 {
            return Err(failed("zero-sized buffer".to_string()));
        }
        let id = self.next_id();
        let registration = StateRegistration::new(&self.context, id, desc.initial_state());
        let native = HeadlessBuffer::new(desc.size_bytes, Some(registration)).map_err(failed)?;

        self.buffers_created.fetch_add(1, Ordering::Relaxed);
        self.bytes_allocated
            .fetch_add(desc.size_bytes, Ordering::Relaxed);
        log::trace!(
            "HeadlessGraphics: created buffer '{}' ({} bytes, {:?})",
            desc.debug_name,
            desc.size_bytes,
            desc.memory
        );
        Ok(Arc::new(Buffer::new(id, desc, Box::new(native))))
    }

    fn create_texture(&self, desc: TextureDesc) -> Result<Arc<Texture>, GraphicsError> {
        validate_texture(&desc).map_err(|reason| GraphicsError::ResourceCreationFailed {
            label: desc.debug_name.clone(),
            reason,
        })?;
        let id = self.next_id();
        let registration = StateRegistration::new(&self.context, id, ResourceStates::COMMON);
        let native = HeadlessTexture::new(&desc, Some(registration));

        self.textures_created.fetch_add(1, Ordering::Relaxed);
        let info = desc.format.info();
        let bytes: u64 = (0..desc.mip_levels)
            .map(|mip| {
                let (w, h, d) = desc.mip_extent(mip);
                u64::from(w.div_ceil(info.block_width))
                    * u64::from(h.div_ceil(info.block_height))
                    * u64::from(d)
                    * u64::from(info.block_size)
            })
            .sum::<u64>()
            * u64::from(desc.array_layers);
        self.bytes_allocated.fetch_add(bytes, Ordering::Relaxed);
        log::trace!(
            "HeadlessGraphics: created texture '{}' ({}x{}x{}, {:?})",
            desc.debug_name,
            desc.width,
            desc.height,
            desc.depth,
            desc.format
        );
        Ok(Arc::new(Texture::new(id, desc, Box::new(native))))
    }

    fn descriptor_allocator(&self) -> &Arc<BindlessDescriptorAllocator> {
        &self.allocator
    }

    fn resource_registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    fn deferred_reclaimer(&self) -> &Arc<DeferredReclaimer> {
        &self.reclaimer
    }

    fn queue_manager(&self) -> &QueueManager {
        &self.queues
    }

    fn create_command_queues(&self, strategy: &dyn QueueStrategy) -> Result<(), GraphicsError> {
        let context = Arc::clone(&self.context);
        self.queues.create_queues(strategy, |spec| {
            let queue: Arc<dyn CommandQueue> = HeadlessQueue::new(spec, Arc::clone(&context));
            Ok(queue)
        })
    }

    fn defer_command_list(&self, queue: Arc<dyn CommandQueue>, list: CommandList) {
        lock(&self.deferred).push((queue, list));
    }

    fn submit_deferred_command_lists(&self) -> Result<(), GraphicsError> {
        let deferred = std::mem::take(&mut *lock(&self.deferred));
        if !deferred.is_empty() {
            log::trace!(
                "HeadlessGraphics: submitting {} deferred command lists",
                deferred.len()
            );
        }
        for (queue, list) in deferred {
            queue.submit(list)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxygen_core::graphics::{BufferUsage, CommandRecorder, FenceValue, TextureFormat};

    fn device() -> Arc<HeadlessGraphics> {
        HeadlessGraphics::new(GraphicsConfig::default()).unwrap()
    }

    #[test]
    fn creates_the_configured_queues() {
        let graphics = device();
        assert_eq!(graphics.queue_manager().queue_count(), 3);
        let transfer = graphics.queue_by_role(QueueRole::Transfer).unwrap();
        assert_eq!(transfer.name(), "transfer");
    }

    #[test]
    fn rejects_zero_sized_resources() {
        let graphics = device();
        let buffer = graphics.create_buffer(BufferDesc::upload(0, "empty"));
        assert!(matches!(
            buffer,
            Err(GraphicsError::ResourceCreationFailed { .. })
        ));
        let mut desc = TextureDesc::texture_2d(4, 4, TextureFormat::Rgba8Unorm, "cube");
        desc.texture_type = TextureType::TextureCube;
        assert!(graphics.create_texture(desc).is_err());
    }

    #[test]
    fn executes_copies_with_valid_barriers() {
        let graphics = device();
        let queue = graphics.queue_by_role(QueueRole::Transfer).unwrap();
        let staging = graphics.create_buffer(BufferDesc::upload(16, "staging")).unwrap();
        let target = graphics
            .create_buffer(BufferDesc::device_local(16, BufferUsage::COPY_DST, "target"))
            .unwrap();
        staging
            .with_mapped_range(0, 16, |bytes| bytes.copy_from_slice(&[7; 16]))
            .unwrap();

        let mut recorder = CommandRecorder::new(Arc::clone(&queue), "copy");
        recorder.copy_buffer(&target, 0, &staging, 0, 16).unwrap();
        recorder.queue_signal(FenceValue(1)).unwrap();
        recorder.submit().unwrap();

        assert!(queue.timeline().is_completed(FenceValue(1)));
        assert_eq!(graphics.read_buffer(&target, 0, 16).unwrap(), vec![7; 16]);
        let stats = graphics.stats();
        assert_eq!(stats.buffer_copies, 1);
        assert_eq!(stats.validation_errors, 0);
        assert_eq!(
            graphics.resource_state(target.id()),
            Some(ResourceStates::COMMON)
        );
    }

    #[test]
    fn stalled_queue_holds_signals() {
        let graphics = device();
        let queue = graphics.headless_queue("transfer").unwrap();
        queue.set_stalled(true);
        queue.signal(FenceValue(3)).unwrap();
        assert_eq!(queue.completed_value(), FenceValue(0));
        assert_eq!(queue.pending_count(), 1);

        queue.set_stalled(false);
        assert_eq!(queue.completed_value(), FenceValue(3));
    }

    #[test]
    fn cross_queue_wait_runs_once_the_signal_lands() {
        let graphics = device();
        let transfer = graphics.headless_queue("transfer").unwrap();
        let queue = graphics.queue_by_role(QueueRole::Graphics).unwrap();
        transfer.set_stalled(true);
        transfer.signal(FenceValue(1)).unwrap();

        let mut recorder = CommandRecorder::new(Arc::clone(&queue), "frame");
        recorder
            .queue_wait(transfer.timeline(), FenceValue(1))
            .unwrap();
        recorder.queue_signal(FenceValue(5)).unwrap();
        recorder.submit().unwrap();
        assert!(!queue.timeline().is_completed(FenceValue(5)));

        transfer.set_stalled(false);
        assert!(queue.timeline().is_completed(FenceValue(5)));
    }

    #[test]
    fn device_loss_makes_queues_inert() {
        let graphics = device();
        let queue = graphics.queue_by_role(QueueRole::Graphics).unwrap();
        graphics.simulate_device_lost();
        assert!(queue.timeline().is_device_lost());
        assert_eq!(queue.signal(FenceValue(1)), Err(GraphicsError::DeviceLost));
    }

    #[test]
    fn dropped_resources_leave_the_execution_state() {
        let graphics = device();
        let buffer = graphics.create_buffer(BufferDesc::readback(8, "rb")).unwrap();
        let id = buffer.id();
        assert_eq!(graphics.resource_state(id), Some(ResourceStates::COPY_DEST));
        drop(buffer);
        assert_eq!(graphics.resource_state(id), None);
    }
}
