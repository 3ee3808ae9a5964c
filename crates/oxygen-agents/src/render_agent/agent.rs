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

//! Defines the RenderAgent, the orchestrator of every per-frame subsystem.

use super::error::RenderError;
use super::scene_constants::{BindlessIndices, RendererTag, SceneConstants, SceneConstantsRing};
use oxygen_core::graphics::{
    CommandQueue, CommandRecorder, FenceValue, FrameSequence, FrameSlot, Framebuffer, Graphics,
    GraphicsError, QueueRole, ShaderVisibleIndex, TextureDesc, TextureFormat,
};
use oxygen_data::{LodPolicy, Scene};
use oxygen_lanes::scene_prep::{
    DrawEmitter, GeometryUploader, MaterialBinder, ScenePrepState, TextureBinder, TextureSource,
    TransformUploader, ViewState,
};
use oxygen_lanes::{LightManager, UploadCoordinator};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Root constant carrying the element index of the draw being issued.
pub const DRAW_INDEX_ROOT_CONSTANT: u32 = 0;
/// Root constant carrying the CBV index of the scene constants.
pub const SCENE_CONSTANTS_ROOT_CONSTANT: u32 = 1;

const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// What a frame did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameStats {
    /// The frame.
    pub sequence: FrameSequence,
    /// The slot it occupied.
    pub slot: FrameSlot,
    /// Submeshes extracted from the scene.
    pub items: usize,
    /// Submeshes dropped by frustum culling.
    pub culled: usize,
    /// Items the resolvers could not bind.
    pub skipped: usize,
    /// Draws issued.
    pub draws: usize,
    /// Pass partitions of the draw list.
    pub partitions: usize,
    /// Directional and positional lights.
    pub lights: usize,
    /// Fence the frame's command list signals on the graphics queue.
    pub fence: FenceValue,
}

/// The agent responsible for turning scene snapshots into submitted frames.
///
/// Frames occupy slots of a ring of `frames_in_flight`. A slot is reused only
/// once the graphics queue has passed the fence of its previous frame, which
/// is what lets every subsystem recycle the slot's memory at frame start.
pub struct RenderAgent {
    graphics: Arc<dyn Graphics>,
    // The queue frames are submitted to.
    queue: Arc<dyn CommandQueue>,
    uploads: Arc<UploadCoordinator>,
    // --- Scene preparation ---
    prep: ScenePrepState,
    textures: TextureBinder,
    materials: MaterialBinder,
    transforms: TransformUploader,
    geometry: GeometryUploader,
    emitter: DrawEmitter,
    lights: LightManager,
    // --- Per-frame constants ---
    constants: SceneConstants,
    constants_ring: SceneConstantsRing,
    tag: RendererTag,
    framebuffer: Framebuffer,
    lod_policy: LodPolicy,
    // --- Frame ring ---
    slot_fences: Vec<FenceValue>,
    next_sequence: FrameSequence,
    slot_wait_timeout: Duration,
    started: Instant,
    last_stats: Option<FrameStats>,
}

impl std::fmt::Debug for RenderAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderAgent")
            .field("queue", &self.queue.name())
            .field("next_sequence", &self.next_sequence)
            .field("slot_fences", &self.slot_fences)
            .finish()
    }
}

impl RenderAgent {
    /// Creates the agent and every subsystem it drives.
    ///
    /// Frames go to the graphics queue; uploads go to the queue the
    /// configuration names. Textures are requested from `textures`.
    ///
    /// # Errors
    ///
    /// Fails if a queue is missing or a subsystem cannot create its resources.
    pub fn new(
        graphics: Arc<dyn Graphics>,
        textures: Arc<dyn TextureSource>,
    ) -> Result<Self, RenderError> {
        let config = graphics.config().clone();
        let queue = graphics.queue_by_role(QueueRole::Graphics)?;
        let uploads = Arc::new(UploadCoordinator::new(Arc::clone(&graphics))?);

        let target = config.render_target;
        let color = graphics.create_texture(TextureDesc {
            is_render_target: true,
            ..TextureDesc::texture_2d(target.width, target.height, TextureFormat::Rgba8Unorm, "SceneColor")
        })?;
        let depth = graphics.create_texture(TextureDesc {
            is_render_target: true,
            ..TextureDesc::texture_2d(target.width, target.height, TextureFormat::Depth32Float, "SceneDepth")
        })?;

        log::info!(
            "RenderAgent: {} frames in flight on '{}', uploads on '{}', target {}x{}",
            config.frames_in_flight,
            queue.name(),
            uploads.queue().name(),
            target.width,
            target.height
        );

        Ok(Self {
            prep: ScenePrepState::new(),
            textures: TextureBinder::new(Arc::clone(&graphics), Arc::clone(&uploads), textures)?,
            materials: MaterialBinder::new(Arc::clone(&graphics), Arc::clone(&uploads))?,
            transforms: TransformUploader::new(Arc::clone(&graphics), Arc::clone(&uploads)),
            geometry: GeometryUploader::new(Arc::clone(&graphics), Arc::clone(&uploads)),
            emitter: DrawEmitter::new(Arc::clone(&graphics), Arc::clone(&uploads)),
            lights: LightManager::new(Arc::clone(&graphics)),
            constants: SceneConstants::new(),
            constants_ring: SceneConstantsRing::new(Arc::clone(&graphics))?,
            tag: RendererTag::new(),
            framebuffer: Framebuffer {
                color_attachments: vec![color],
                depth_attachment: Some(depth),
            },
            lod_policy: LodPolicy::from(&config.default_lod_policy),
            slot_fences: vec![FenceValue(0); config.frames_in_flight.max(1) as usize],
            next_sequence: FrameSequence(0),
            slot_wait_timeout: Duration::from_millis(config.slot_wait_timeout_ms),
            started: Instant::now(),
            last_stats: None,
            queue,
            uploads,
            graphics,
        })
    }

    /// Renders one frame of `scene` as seen from `view`.
    ///
    /// A frame that fails after it began still ends: its uploads are retired
    /// and the next frame starts from a clean slot.
    ///
    /// # Errors
    ///
    /// Fails if the slot stays busy past the configured timeout, if the device
    /// is lost, or if a stage cannot create the resources it needs.
    pub fn render_frame(&mut self, scene: &Scene, view: &ViewState) -> Result<FrameStats, RenderError> {
        let sequence = self.next_sequence;
        self.next_sequence = sequence.next();
        let slot = sequence.slot(self.slot_fences.len() as u32);

        self.begin_frame(slot, sequence)?;
        let result = self.run_frame(slot, sequence, scene, view);
        self.end_frame();

        match &result {
            Ok(stats) => {
                log::trace!(
                    "RenderAgent: frame {} (slot {}) issued {} draws in {} partitions",
                    sequence.0,
                    slot.0,
                    stats.draws,
                    stats.partitions
                );
                self.last_stats = Some(*stats);
            }
            Err(e) => log::error!("RenderAgent: frame {} failed: {e}", sequence.0),
        }
        result
    }

    /// Waits for the slot, runs deferred releases and resets every subsystem.
    fn begin_frame(&mut self, slot: FrameSlot, sequence: FrameSequence) -> Result<(), RenderError> {
        let fence = self.slot_fences[slot.index()];
        let timeline = self.queue.timeline();
        if !timeline.is_completed(fence) {
            match timeline.wait_blocking(fence, self.slot_wait_timeout) {
                Ok(()) => {}
                Err(GraphicsError::TimedOut) => {
                    return Err(RenderError::SlotTimeout {
                        slot: slot.0,
                        timeout_ms: self.slot_wait_timeout.as_millis() as u64,
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.graphics.deferred_reclaimer().on_begin_frame(slot);
        self.uploads.on_frame_start(slot);
        self.textures.on_frame_start();
        self.materials.on_frame_start(slot);
        self.transforms.on_frame_start(slot);
        self.emitter.on_frame_start(slot);
        self.prep.on_frame_start();
        self.lights.on_frame_start();

        let tag = self.tag;
        self.constants.set_frame(tag, slot, sequence);
        self.constants
            .set_time_seconds(tag, self.started.elapsed().as_secs_f32());
        Ok(())
    }

    fn run_frame(
        &mut self,
        slot: FrameSlot,
        sequence: FrameSequence,
        scene: &Scene,
        view: &ViewState,
    ) -> Result<FrameStats, RenderError> {
        // 1. Extract
        self.prep.collect(scene, view, &self.lod_policy);
        let extraction = self.prep.stats();

        // 2. Resolve
        let skipped = self.resolve();

        // 3. Emit
        for item in self.prep.items() {
            self.emitter.emit_draw_metadata(item);
        }
        self.emitter.sort_and_partition();
        self.emitter.ensure_frame_resources()?;
        self.transforms.ensure_frame_resources()?;
        self.materials.ensure_frame_resources()?;

        // 4. Lights and constants
        self.lights.collect(scene);
        self.lights.ensure_frame_resources(slot)?;
        let cbv = self.publish_constants(slot, view)?;

        // 5. Record, behind the frame's uploads
        let upload_fence = self.flush_uploads()?;
        let recorder = self.record(sequence, cbv, upload_fence)?;

        // 6. Submit
        let fence = self.submit(slot, recorder)?;

        Ok(FrameStats {
            sequence,
            slot,
            items: self.prep.items().len(),
            culled: extraction.culled,
            skipped,
            draws: self.emitter.draw_count(),
            partitions: self.emitter.partitions().len(),
            lights: self.lights.directional_lights().len() + self.lights.positional_lights().len(),
            fence,
        })
    }

    /// Binds transforms, materials and geometry. Returns the number of items
    /// left without geometry.
    ///
    /// A material that cannot be bound falls back to the default material; an
    /// item without a transform or geometry is not drawn.
    fn resolve(&mut self) -> usize {
        let mut skipped = 0;
        for item in self.prep.items_mut() {
            match self.transforms.get_or_allocate(&item.world) {
                Ok(index) => item.resolved.transform_index = index,
                Err(e) => {
                    log::warn!("RenderAgent: no transform for '{}': {e}", item.mesh.name);
                    item.resolved.mesh = None;
                    skipped += 1;
                    continue;
                }
            }
            item.resolved.material_index = self
                .materials
                .get_or_allocate(item.material.as_ref(), &mut self.textures)
                .unwrap_or_else(|e| {
                    log::warn!(
                        "RenderAgent: material of '{}' unavailable, using the default: {e}",
                        item.mesh.name
                    );
                    MaterialBinder::DEFAULT_MATERIAL
                });
            match self.geometry.get_or_upload(&item.mesh) {
                Ok(binding) => item.resolved.mesh = Some(binding),
                Err(e) => {
                    log::warn!("RenderAgent: skipping '{}': {e}", item.mesh.name);
                    item.resolved.mesh = None;
                    skipped += 1;
                }
            }
        }
        skipped
    }

    fn publish_constants(
        &mut self,
        slot: FrameSlot,
        view: &ViewState,
    ) -> Result<ShaderVisibleIndex, RenderError> {
        let tag = self.tag;
        let transforms = self.transforms.srv_index();
        self.constants.set_view_matrix(tag, view.view);
        self.constants.set_projection_matrix(tag, view.projection);
        self.constants.set_camera_position(tag, view.camera_position);
        self.constants.set_bindless_indices(
            tag,
            BindlessIndices {
                draw_metadata: self.emitter.metadata_srv_index(),
                transforms,
                // Transform entries carry the normal matrix next to the world matrix.
                normals: transforms,
                materials: self.materials.srv_index(),
                env_static: ShaderVisibleIndex::INVALID,
                directional_lights: self.lights.directional_srv_index(),
                directional_shadows: self.lights.shadow_srv_index(),
                positional_lights: self.lights.positional_srv_index(),
                instance_data: self.emitter.instance_srv_index(),
            },
        );
        Ok(self.constants_ring.write(slot, self.constants.snapshot())?)
    }

    /// Submits the open upload batch and returns the transfer fence the frame
    /// must wait for.
    fn flush_uploads(&self) -> Result<FenceValue, RenderError> {
        self.uploads.flush()?;
        Ok(self.uploads.last_submitted_fence())
    }

    fn record(
        &self,
        sequence: FrameSequence,
        cbv: ShaderVisibleIndex,
        upload_fence: FenceValue,
    ) -> Result<CommandRecorder, RenderError> {
        let mut recorder = self
            .graphics
            .acquire_command_recorder(Arc::clone(&self.queue), &format!("Frame[{}]", sequence.0));

        let transfer = self.uploads.queue().timeline();
        if upload_fence.0 > 0 && !Arc::ptr_eq(transfer, self.queue.timeline()) {
            recorder.queue_wait(transfer, upload_fence)?;
        }
        recorder.clear_framebuffer(&self.framebuffer, &[Some(CLEAR_COLOR)], Some(1.0), None)?;
        recorder.set_root_constant(SCENE_CONSTANTS_ROOT_CONSTANT, cbv.get())?;

        let metadata = self.emitter.draw_metadata();
        for partition in self.emitter.partitions() {
            for draw_id in partition.begin..partition.end {
                let Some(element) = self.emitter.draw_element(draw_id) else {
                    continue;
                };
                let draw = &metadata[draw_id as usize];
                recorder.set_root_constant(DRAW_INDEX_ROOT_CONSTANT, element)?;
                if draw.index_count > 0 {
                    recorder.draw_indexed(
                        draw.index_count,
                        1,
                        draw.first_index,
                        draw.base_vertex,
                        0,
                    )?;
                } else {
                    recorder.draw(draw.vertex_count, 1, draw.first_vertex, 0)?;
                }
            }
        }
        Ok(recorder)
    }

    /// Submits the frame and records the fence guarding its slot.
    fn submit(&mut self, slot: FrameSlot, recorder: CommandRecorder) -> Result<FenceValue, RenderError> {
        let referenced = recorder.submit()?;
        let fence = self.queue.signal_next()?;
        self.slot_fences[slot.index()] = fence;
        if !referenced.is_empty() {
            // Released the next time this slot begins, after its fence passed.
            self.graphics
                .deferred_reclaimer()
                .register_deferred_action(move || drop(referenced));
        }
        Ok(fence)
    }

    fn end_frame(&mut self) {
        self.textures.on_frame_end();
        self.uploads.retire_completed();
    }

    /// Waits for every submitted frame and upload, then releases all GPU
    /// objects the agent owns.
    ///
    /// # Errors
    ///
    /// [`GraphicsError::TimedOut`] if the graphics queue does not drain in
    /// time, or the upload coordinator's shutdown error.
    pub async fn shutdown(self, timeout: Duration) -> Result<(), RenderError> {
        let last = self.slot_fences.iter().copied().max().unwrap_or(FenceValue(0));
        log::info!(
            "RenderAgent: shutting down after {} frames (graphics fence {})",
            self.next_sequence.0,
            last.0
        );
        let timeline = Arc::clone(self.queue.timeline());
        match tokio::time::timeout(timeout, timeline.wait(last)).await {
            Err(_) => return Err(GraphicsError::TimedOut.into()),
            Ok(result) => result?,
        }
        self.uploads.shutdown(timeout).await?;

        let graphics = Arc::clone(&self.graphics);
        drop(self);
        graphics.deferred_reclaimer().on_renderer_shutdown();
        Ok(())
    }

    /// Sets the LOD policy of renderables without their own.
    pub fn set_lod_policy(&mut self, policy: LodPolicy) {
        self.lod_policy = policy;
    }

    /// The graphics facade.
    pub fn graphics(&self) -> &Arc<dyn Graphics> {
        &self.graphics
    }

    /// The upload coordinator shared by every subsystem.
    pub fn uploads(&self) -> &Arc<UploadCoordinator> {
        &self.uploads
    }

    /// The extraction state of the last frame.
    pub fn scene_prep(&self) -> &ScenePrepState {
        &self.prep
    }

    /// The texture binder.
    pub fn textures(&self) -> &TextureBinder {
        &self.textures
    }

    /// The material binder.
    pub fn materials(&self) -> &MaterialBinder {
        &self.materials
    }

    /// The transform uploader.
    pub fn transforms(&self) -> &TransformUploader {
        &self.transforms
    }

    /// The geometry uploader.
    pub fn geometry(&self) -> &GeometryUploader {
        &self.geometry
    }

    /// The draw emitter.
    pub fn emitter(&self) -> &DrawEmitter {
        &self.emitter
    }

    /// The light manager.
    pub fn lights(&self) -> &LightManager {
        &self.lights
    }

    /// The scene constants of the last frame.
    pub fn scene_constants(&self) -> &SceneConstants {
        &self.constants
    }

    /// The per-slot scene constant buffers.
    pub fn constants_ring(&self) -> &SceneConstantsRing {
        &self.constants_ring
    }

    /// The offscreen target frames clear and draw into.
    pub fn framebuffer(&self) -> &Framebuffer {
        &self.framebuffer
    }

    /// The fence the last frame in `slot` signals.
    pub fn slot_fence(&self, slot: FrameSlot) -> FenceValue {
        self.slot_fences[slot.index() % self.slot_fences.len()]
    }

    /// Number of frames started so far.
    pub fn frames_started(&self) -> u64 {
        self.next_sequence.0
    }

    /// Stats of the last successful frame.
    pub fn last_stats(&self) -> Option<FrameStats> {
        self.last_stats
    }
}
