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

//! The upload coordinator: turns requests into staged copies on the transfer
//! queue and hands out tickets that complete with the queue's timeline.

use super::planner::{self, PackingPolicy, UploadPlan};
use super::staging::{RingStagingProvider, StagingAllocation, StagingProvider};
use super::tracker::UploadTracker;
use super::types::{
    TicketId, UploadData, UploadError, UploadErrorKind, UploadRequest, UploadResult, UploadTarget,
    UploadTicket,
};
use oxygen_core::config::BatchPolicy;
use oxygen_core::graphics::{
    Buffer, BufferDesc, BufferUsage, CommandQueue, CommandRecorder, FenceValue, FrameSlot,
    Graphics, GraphicsError, Resource, MAX_FRAMES_IN_FLIGHT,
};
use oxygen_core::utils::lock;
use std::collections::HashMap;
use std::pin::pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// The copy list being filled, and the fence it will signal.
struct OpenBatch {
    recorder: CommandRecorder,
    fence: FenceValue,
    tickets: Vec<TicketId>,
}

struct CoordinatorState {
    batch: Option<OpenBatch>,
    /// Resources referenced by submitted batches, kept alive until their fence.
    in_flight: Vec<(FenceValue, Vec<Resource>)>,
    readbacks: HashMap<TicketId, Arc<Buffer>>,
    /// Highest batch fence that used staging from each slot.
    slot_fences: [FenceValue; MAX_FRAMES_IN_FLIGHT],
    active_slot: FrameSlot,
    last_fence: FenceValue,
    shut_down: bool,
    device_lost: bool,
}

/// Stages uploads and readbacks on the transfer queue.
///
/// Requests are validated and planned synchronously, their bytes written
/// into staging memory, and their copies recorded into the open batch. A
/// batch is submitted by [`flush`](Self::flush) (or immediately under
/// [`BatchPolicy::Immediate`]) and signals the fence reserved when it opened.
pub struct UploadCoordinator {
    graphics: Arc<dyn Graphics>,
    queue: Arc<dyn CommandQueue>,
    staging: Arc<RingStagingProvider>,
    tracker: UploadTracker,
    policy: PackingPolicy,
    batch_policy: BatchPolicy,
    slot_wait_timeout: Duration,
    next_ticket: AtomicU64,
    state: Mutex<CoordinatorState>,
}

impl std::fmt::Debug for UploadCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadCoordinator")
            .field("queue", &self.queue.name())
            .field("pending", &self.tracker.pending_count())
            .finish()
    }
}

impl UploadCoordinator {
    /// Creates a coordinator on the queue configured for uploads, with a
    /// staging ring sized from the configuration.
    ///
    /// # Errors
    ///
    /// Fails if no queue serves the upload role or the staging ring cannot
    /// be created.
    pub fn new(graphics: Arc<dyn Graphics>) -> Result<Self, UploadError> {
        let config = graphics.config().clone();
        let queue = graphics.queue_by_role(config.upload.queue_role)?;
        let staging = Arc::new(RingStagingProvider::new(
            graphics.as_ref(),
            config.frames_in_flight,
            config.staging.bytes_per_slot,
            config.staging.alignment,
        )?);
        log::info!(
            "UploadCoordinator: using queue '{}' ({:?} batching)",
            queue.name(),
            config.upload.batch_policy
        );
        Ok(Self {
            graphics,
            queue,
            staging,
            tracker: UploadTracker::new(),
            policy: PackingPolicy {
                placement_alignment: config.staging.alignment.max(512),
                ..PackingPolicy::default()
            },
            batch_policy: config.upload.batch_policy,
            slot_wait_timeout: Duration::from_millis(config.slot_wait_timeout_ms),
            next_ticket: AtomicU64::new(1),
            state: Mutex::new(CoordinatorState {
                batch: None,
                in_flight: Vec::new(),
                readbacks: HashMap::new(),
                slot_fences: [FenceValue(0); MAX_FRAMES_IN_FLIGHT],
                active_slot: FrameSlot(0),
                last_fence: FenceValue(0),
                shut_down: false,
                device_lost: false,
            }),
        })
    }

    /// The queue copies are submitted to.
    pub fn queue(&self) -> &Arc<dyn CommandQueue> {
        &self.queue
    }

    /// The default staging ring.
    pub fn staging(&self) -> &Arc<RingStagingProvider> {
        &self.staging
    }

    /// The fence of the most recently submitted batch.
    pub fn last_submitted_fence(&self) -> FenceValue {
        lock(&self.state).last_fence
    }

    /// Number of tickets that have not finished.
    pub fn pending_count(&self) -> usize {
        self.tracker.pending_count()
    }

    fn next_id(&self) -> TicketId {
        TicketId(self.next_ticket.fetch_add(1, Ordering::Relaxed))
    }

    fn check_accepting(&self) -> Result<(), UploadError> {
        if self.queue.completed_value().is_device_lost() {
            self.on_device_lost();
        }
        let state = lock(&self.state);
        if state.shut_down {
            return Err(UploadError::ShutDown);
        }
        if state.device_lost {
            return Err(UploadError::DeviceLost);
        }
        Ok(())
    }

    fn finished_ticket(&self, name: &str, kind: UploadErrorKind, message: String) -> UploadTicket {
        let id = self.next_id();
        log::warn!("UploadCoordinator: '{name}' failed: {message}");
        self.tracker
            .register_finished(id, name, UploadResult::failed(kind, message));
        UploadTicket {
            id,
            fence: FenceValue(0),
        }
    }

    /// Submits one upload using the default staging ring.
    ///
    /// Staging exhaustion and producer failures do not return an error: they
    /// produce a ticket that is already finished with a failed result.
    ///
    /// # Errors
    ///
    /// [`UploadError::InvalidRequest`] for malformed requests,
    /// [`UploadError::ShutDown`] after shutdown and [`UploadError::DeviceLost`]
    /// once the device is gone.
    pub fn submit(&self, request: UploadRequest<'_>) -> Result<UploadTicket, UploadError> {
        let staging = Arc::clone(&self.staging);
        self.submit_with(request, staging.as_ref())
    }

    /// Submits one upload, taking staging memory from `staging`.
    pub fn submit_with(
        &self,
        request: UploadRequest<'_>,
        staging: &dyn StagingProvider,
    ) -> Result<UploadTicket, UploadError> {
        let immediate = request.batch_policy.unwrap_or(self.batch_policy) == BatchPolicy::Immediate;
        let ticket = self.stage(request, staging)?;
        if immediate && ticket.fence != FenceValue(0) {
            self.flush()?;
        }
        Ok(ticket)
    }

    /// Submits several uploads into the same batch.
    ///
    /// Results are returned in request order. The batch is flushed once at
    /// the end if any request asked for immediate submission.
    pub fn submit_many(
        &self,
        requests: Vec<UploadRequest<'_>>,
    ) -> Vec<Result<UploadTicket, UploadError>> {
        let mut immediate = false;
        let staging = Arc::clone(&self.staging);
        let tickets: Vec<_> = requests
            .into_iter()
            .map(|request| {
                immediate |= request.batch_policy.unwrap_or(self.batch_policy) == BatchPolicy::Immediate;
                self.stage(request, staging.as_ref())
            })
            .collect();
        if immediate {
            if let Err(e) = self.flush() {
                log::error!("UploadCoordinator: flushing a batch of {} failed: {e}", tickets.len());
            }
        }
        tickets
    }

    fn stage(
        &self,
        request: UploadRequest<'_>,
        staging: &dyn StagingProvider,
    ) -> Result<UploadTicket, UploadError> {
        self.check_accepting()?;
        let UploadRequest {
            kind,
            desc,
            data,
            debug_name,
            ..
        } = request;

        // 1. Validate and lay out.
        let source_len = match &data {
            UploadData::View(bytes) => Some(bytes.len()),
            UploadData::Producer(_) => None,
        };
        let plan = planner::plan(kind, &desc, source_len, &self.policy)?;
        let total = plan.total_bytes();

        // 2. Staging.
        let Some(allocation) = staging.allocate(total, self.policy.placement_alignment) else {
            return Ok(self.finished_ticket(
                &debug_name,
                UploadErrorKind::StagingExhausted,
                format!("no staging room for {total} bytes"),
            ));
        };

        // 3. Fill.
        if !Self::fill(&allocation, &plan, data)? {
            return Ok(self.finished_ticket(
                &debug_name,
                UploadErrorKind::ProducerFailed,
                "producer returned false".to_string(),
            ));
        }

        // 4. Record into the open batch; the id is only issued once recorded.
        let mut state = lock(&self.state);
        let state = &mut *state;
        let batch = self.open_batch(&mut state.batch);
        match (&desc, &plan) {
            (UploadTarget::Buffer(buffer), _) => batch.recorder.copy_buffer(
                &buffer.dst,
                buffer.dst_offset,
                &allocation.buffer,
                allocation.offset,
                buffer.size_bytes,
            )?,
            (UploadTarget::Texture(texture), UploadPlan::Texture(layout)) => batch
                .recorder
                .copy_buffer_to_texture(&allocation.buffer, layout.regions(allocation.offset), &texture.dst)?,
            (UploadTarget::Texture(_), UploadPlan::Buffer { .. }) => {
                return Err(UploadError::InvalidRequest(
                    "texture target planned as a buffer".to_string(),
                ));
            }
        }
        let id = self.next_id();
        batch.tickets.push(id);
        let fence = batch.fence;
        let slot = state.active_slot.index() % MAX_FRAMES_IN_FLIGHT;
        state.slot_fences[slot] = state.slot_fences[slot].max(fence);
        self.tracker.register(id, fence, total, &debug_name);
        log::trace!("UploadCoordinator: staged '{debug_name}' ({total} bytes) for fence {}", fence.0);
        Ok(UploadTicket { id, fence })
    }

    fn fill(allocation: &StagingAllocation, plan: &UploadPlan, data: UploadData<'_>) -> Result<bool, UploadError> {
        let filled = match data {
            UploadData::Producer(producer) => allocation.write(producer)?,
            UploadData::View(source) => allocation.write(|staging| {
                match plan {
                    UploadPlan::Buffer { .. } => staging.copy_from_slice(source),
                    UploadPlan::Texture(layout) => layout.pack(source, staging),
                }
                true
            })?,
        };
        Ok(filled)
    }

    fn open_batch<'a>(&self, slot: &'a mut Option<OpenBatch>) -> &'a mut OpenBatch {
        slot.get_or_insert_with(|| {
            let fence = self.queue.timeline().reserve_next();
            OpenBatch {
                recorder: self
                    .graphics
                    .acquire_command_recorder(Arc::clone(&self.queue), &format!("UploadBatch#{}", fence.0)),
                fence,
                tickets: Vec::new(),
            }
        })
    }

    /// Submits the open batch and signals its fence.
    ///
    /// Returns the fence, or `None` when no batch was open.
    ///
    /// # Errors
    ///
    /// Propagates submission failures; the batch's tickets are failed.
    pub fn flush(&self) -> Result<Option<FenceValue>, UploadError> {
        let Some(batch) = lock(&self.state).batch.take() else {
            return Ok(None);
        };
        let OpenBatch {
            recorder,
            fence,
            tickets,
        } = batch;

        match recorder.submit() {
            Ok(referenced) => {
                {
                    let mut state = lock(&self.state);
                    state.in_flight.push((fence, referenced));
                    state.last_fence = state.last_fence.max(fence);
                }
                self.queue.signal(fence)?;
                log::trace!(
                    "UploadCoordinator: submitted {} uploads on '{}' (fence {})",
                    tickets.len(),
                    self.queue.name(),
                    fence.0
                );
                Ok(Some(fence))
            }
            Err(e) => {
                let kind = if e == GraphicsError::DeviceLost {
                    UploadErrorKind::DeviceLost
                } else {
                    UploadErrorKind::InvalidRequest
                };
                self.tracker.fail(&tickets, kind, &e.to_string());
                // Waiters on the reserved value must still be released.
                if let Err(signal_error) = self.queue.signal(fence) {
                    log::warn!("UploadCoordinator: could not signal abandoned fence {}: {signal_error}", fence.0);
                }
                log::error!("UploadCoordinator: batch for fence {} failed: {e}", fence.0);
                Err(e.into())
            }
        }
    }

    /// Completes tickets whose fence the transfer queue has reached and
    /// releases the staging and destination references they held.
    ///
    /// Returns the number of tickets completed.
    pub fn retire_completed(&self) -> usize {
        let completed = self.queue.completed_value();
        if completed.is_device_lost() {
            self.on_device_lost();
            return 0;
        }
        let closed = self.tracker.mark_fence_completed(completed);
        lock(&self.state)
            .in_flight
            .retain(|(fence, _)| *fence > completed);
        closed
    }

    fn on_device_lost(&self) {
        let batch = {
            let mut state = lock(&self.state);
            if state.device_lost {
                return;
            }
            state.device_lost = true;
            state.in_flight.clear();
            state.readbacks.clear();
            state.batch.take()
        };
        if let Some(batch) = batch {
            // The recorder is dropped without submission.
            drop(batch.recorder);
        }
        let failed = self
            .tracker
            .fail_all_pending(UploadErrorKind::DeviceLost, "device lost");
        log::error!("UploadCoordinator: device lost, failed {failed} pending uploads");
    }

    /// The result of a finished ticket, or `None` while it is pending.
    pub fn try_get_result(&self, ticket: UploadTicket) -> Option<UploadResult> {
        self.retire_completed();
        self.tracker.try_get_result(ticket.id)
    }

    /// Returns `true` once the ticket has a result.
    pub fn is_complete(&self, ticket: UploadTicket) -> bool {
        self.try_get_result(ticket).is_some()
    }

    /// Cancels a pending ticket. Its copies may still execute; the ticket
    /// reports [`UploadErrorKind::Canceled`].
    pub fn cancel(&self, ticket: UploadTicket) -> bool {
        let canceled = self.tracker.cancel(ticket.id);
        if canceled {
            lock(&self.state).readbacks.remove(&ticket.id);
        }
        canceled
    }

    /// Waits for a ticket's result, flushing its batch if still open.
    ///
    /// # Errors
    ///
    /// [`UploadError::InvalidRequest`] for unknown tickets; submission errors
    /// from the implicit flush.
    pub async fn wait(&self, ticket: UploadTicket) -> Result<UploadResult, UploadError> {
        loop {
            let mut changed = pin!(self.tracker.changed());
            changed.as_mut().enable();

            self.retire_completed();
            if let Some(result) = self.tracker.try_get_result(ticket.id) {
                return Ok(result);
            }
            if !self.tracker.is_known(ticket.id) {
                return Err(UploadError::InvalidRequest(format!(
                    "unknown upload ticket {}",
                    ticket.id.0
                )));
            }
            let unsubmitted = lock(&self.state)
                .batch
                .as_ref()
                .is_some_and(|batch| batch.fence == ticket.fence);
            if unsubmitted {
                self.flush()?;
                continue;
            }

            let timeline = Arc::clone(self.queue.timeline());
            tokio::select! {
                reached = timeline.wait(ticket.fence) => match reached {
                    Ok(()) | Err(GraphicsError::DeviceLost) => {}
                    Err(e) => return Err(e.into()),
                },
                _ = changed.as_mut() => {}
            }
        }
    }

    /// Waits for several tickets, returning their results in order.
    pub async fn wait_all(&self, tickets: &[UploadTicket]) -> Result<Vec<UploadResult>, UploadError> {
        let mut results = Vec::with_capacity(tickets.len());
        for ticket in tickets {
            results.push(self.wait(*ticket).await?);
        }
        Ok(results)
    }

    /// Copies `size` bytes of `src` at `offset` into a fresh readback buffer.
    ///
    /// Collect the bytes with [`try_take_readback`](Self::try_take_readback)
    /// once the ticket completes.
    pub fn submit_readback(
        &self,
        src: &Arc<Buffer>,
        offset: u64,
        size: u64,
    ) -> Result<UploadTicket, UploadError> {
        self.check_accepting()?;
        let name = &src.desc().debug_name;
        if size == 0 {
            return Err(UploadError::InvalidRequest(format!("zero-sized readback of '{name}'")));
        }
        if !src.desc().usage.contains(BufferUsage::COPY_SRC) {
            return Err(UploadError::InvalidRequest(format!("buffer '{name}' is not a copy source")));
        }
        if !offset.checked_add(size).is_some_and(|end| end <= src.size()) {
            return Err(UploadError::InvalidRequest(format!(
                "readback of {size} bytes at {offset} exceeds '{name}' ({} bytes)",
                src.size()
            )));
        }
        let readback = self
            .graphics
            .create_buffer(BufferDesc::readback(size, format!("Readback({name})")))?;

        let (id, fence) = {
            let mut state = lock(&self.state);
            let batch = self.open_batch(&mut state.batch);
            batch.recorder.copy_buffer(&readback, 0, src, offset, size)?;
            let id = self.next_id();
            batch.tickets.push(id);
            let fence = batch.fence;
            state.readbacks.insert(id, readback);
            (id, fence)
        };
        self.tracker.register(id, fence, size, name);
        if self.batch_policy == BatchPolicy::Immediate {
            self.flush()?;
        }
        Ok(UploadTicket { id, fence })
    }

    /// Takes the bytes of a completed readback. Returns `None` while pending,
    /// after failure, or once taken.
    pub fn try_take_readback(&self, ticket: UploadTicket) -> Option<Vec<u8>> {
        match self.try_get_result(ticket) {
            Some(result) if result.success => {}
            _ => return None,
        }
        let buffer = lock(&self.state).readbacks.remove(&ticket.id)?;
        buffer
            .with_mapped_range(0, buffer.size(), |bytes| bytes.to_vec())
            .map_err(|e| log::error!("UploadCoordinator: mapping '{}' failed: {e}", buffer.desc().debug_name))
            .ok()
    }

    /// Begins `slot`: flushes stragglers, retires completed work, and recycles
    /// the staging partition of `slot` once the batches that used it are done.
    ///
    /// This blocks the calling thread, the cooperative event loop included,
    /// while the transfer queue still holds the slot's staging, for at most
    /// the configured slot wait timeout. On timeout the partition is left
    /// unrecycled for this frame.
    pub fn on_frame_start(&self, slot: FrameSlot) {
        if lock(&self.state).batch.is_some() {
            log::warn!("UploadCoordinator: batch still open at frame start, flushing");
            if let Err(e) = self.flush() {
                log::error!("UploadCoordinator: flush at frame start failed: {e}");
            }
        }
        self.retire_completed();

        let fence = {
            let mut state = lock(&self.state);
            state.active_slot = slot;
            state.slot_fences[slot.index() % MAX_FRAMES_IN_FLIGHT]
        };
        if !self.queue.timeline().is_completed(fence) {
            if let Err(e) = self.queue.timeline().wait_blocking(fence, self.slot_wait_timeout) {
                log::error!(
                    "UploadCoordinator: staging of slot {} still in use by fence {} ({e}); not recycling",
                    slot.0,
                    fence.0
                );
                return;
            }
        }
        self.staging.on_frame_start(slot);
    }

    /// Ends the frame's upload work: submits the open batch.
    pub fn on_frame_end(&self) -> Result<Option<FenceValue>, UploadError> {
        let fence = self.flush()?;
        self.retire_completed();
        Ok(fence)
    }

    /// Stops accepting work, flushes, and waits up to `timeout` for the
    /// transfer queue to drain.
    ///
    /// # Errors
    ///
    /// [`UploadError::TimedOut`] if the queue did not drain in time.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), UploadError> {
        {
            let mut state = lock(&self.state);
            if state.shut_down {
                return Ok(());
            }
            state.shut_down = true;
        }
        log::info!("UploadCoordinator: shutting down ({} pending)", self.pending_count());

        let last = match self.flush()? {
            Some(fence) => fence,
            None => self.last_submitted_fence(),
        };
        let timeline = Arc::clone(self.queue.timeline());
        match tokio::time::timeout(timeout, timeline.wait(last)).await {
            Err(_) => {
                log::warn!(
                    "UploadCoordinator: transfer queue did not reach fence {} within {:?}",
                    last.0,
                    timeout
                );
                Err(UploadError::TimedOut)
            }
            Ok(Err(GraphicsError::DeviceLost)) => {
                self.retire_completed();
                Err(UploadError::DeviceLost)
            }
            Ok(Err(e)) => Err(e.into()),
            Ok(Ok(())) => {
                self.retire_completed();
                Ok(())
            }
        }
    }
}
