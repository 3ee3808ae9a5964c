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

use oxygen_core::config::{BatchPolicy, GraphicsConfig};
use oxygen_core::graphics::{
    Buffer, BufferDesc, BufferUsage, Command, FrameSlot, Graphics, QueueRole, TextureDesc,
    TextureFormat, TextureType,
};
use oxygen_infra::{HeadlessGraphics, HeadlessQueue};
use oxygen_lanes::upload::{
    UploadBufferDesc, UploadData, UploadErrorKind, UploadKind, UploadRequest, UploadTextureDesc,
};
use oxygen_lanes::{UploadCoordinator, UploadError};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Harness {
    graphics: Arc<HeadlessGraphics>,
    transfer: Arc<HeadlessQueue>,
    uploads: UploadCoordinator,
}

fn harness_with(config: GraphicsConfig) -> Harness {
    let graphics = HeadlessGraphics::new(config).unwrap();
    let transfer = graphics.headless_queue_by_role(QueueRole::Transfer).unwrap();
    let uploads = UploadCoordinator::new(graphics.clone()).unwrap();
    Harness {
        graphics,
        transfer,
        uploads,
    }
}

fn harness() -> Harness {
    harness_with(GraphicsConfig::default())
}

fn gpu_buffer(graphics: &HeadlessGraphics, size: u64) -> Arc<Buffer> {
    graphics
        .create_buffer(BufferDesc::device_local(
            size,
            BufferUsage::STORAGE | BufferUsage::COPY_DST | BufferUsage::COPY_SRC,
            "Target",
        ))
        .unwrap()
}

fn buffer_request<'a>(dst: &Arc<Buffer>, bytes: &'a [u8]) -> UploadRequest<'a> {
    UploadRequest::buffer(
        UploadBufferDesc {
            dst: dst.clone(),
            size_bytes: bytes.len() as u64,
            dst_offset: 0,
        },
        UploadData::View(bytes),
    )
}

#[test]
fn buffer_upload_completes_with_one_copy() {
    // --- 1. ARRANGE ---
    let h = harness();
    let target = gpu_buffer(&h.graphics, 256);
    h.transfer.set_capture(true);

    // --- 2. ACT ---
    let ticket = h.uploads.submit(buffer_request(&target, &[0u8; 64])).unwrap();
    h.uploads.flush().unwrap();
    h.uploads.retire_completed();

    // --- 3. ASSERT ---
    assert!(h.uploads.is_complete(ticket));
    let result = h.uploads.try_get_result(ticket).unwrap();
    assert!(result.success);
    assert_eq!(result.bytes_uploaded, 64);
    let copies = h
        .transfer
        .take_captured()
        .into_iter()
        .filter(|c| matches!(c, Command::CopyBuffer { .. }))
        .count();
    assert_eq!(copies, 1);
}

#[test]
fn volume_texture_upload_uses_pitched_staging() {
    // --- 1. ARRANGE ---
    let h = harness();
    let texture = h
        .graphics
        .create_texture(TextureDesc {
            depth: 8,
            texture_type: TextureType::Texture3D,
            ..TextureDesc::texture_2d(32, 16, TextureFormat::Rgba8Unorm, "Volume")
        })
        .unwrap();
    let texels: Vec<u8> = (0..32 * 16 * 8 * 4).map(|i| (i % 251) as u8).collect();
    h.transfer.set_capture(true);

    // --- 2. ACT ---
    let ticket = h
        .uploads
        .submit(UploadRequest::texture(
            UploadKind::Texture3D,
            UploadTextureDesc::full(texture.clone()),
            UploadData::View(&texels),
        ))
        .unwrap();
    h.uploads.flush().unwrap();

    // --- 3. ASSERT ---
    let regions: Vec<_> = h
        .transfer
        .take_captured()
        .into_iter()
        .filter_map(|c| match c {
            Command::CopyBufferToTexture { regions, .. } => Some(regions),
            _ => None,
        })
        .flatten()
        .collect();
    assert_eq!(regions.len(), 1);
    assert_eq!(regions[0].buffer_row_pitch, 256);
    assert_eq!(regions[0].buffer_slice_pitch, 4096);
    assert_eq!(regions[0].buffer_offset % 512, 0);

    let result = h.uploads.try_get_result(ticket).unwrap();
    assert!(result.success);
    assert_eq!(result.bytes_uploaded, 32768);
    assert_eq!(h.graphics.read_texture_subresource(&texture, 0).unwrap(), texels);
}

#[test]
fn failing_producer_records_nothing() {
    // --- 1. ARRANGE ---
    let h = harness();
    let target = gpu_buffer(&h.graphics, 256);
    let request = UploadRequest::buffer(
        UploadBufferDesc {
            dst: target,
            size_bytes: 64,
            dst_offset: 0,
        },
        UploadData::Producer(Box::new(|_| false)),
    );

    // --- 2. ACT ---
    let ticket = h.uploads.submit(request).unwrap();
    let flushed = h.uploads.flush().unwrap();

    // --- 3. ASSERT ---
    assert_eq!(flushed, None);
    let result = h.uploads.try_get_result(ticket).unwrap();
    assert!(!result.success);
    assert_eq!(result.error, UploadErrorKind::ProducerFailed);
    assert_eq!(result.bytes_uploaded, 0);
    assert_eq!(h.graphics.stats().buffer_copies, 0);
}

#[tokio::test]
async fn shutdown_times_out_on_a_stalled_queue() {
    // --- 1. ARRANGE ---
    let h = harness();
    let target = gpu_buffer(&h.graphics, 256);
    h.transfer.set_stalled(true);
    let ticket = h.uploads.submit(buffer_request(&target, &[1u8; 64])).unwrap();

    // --- 2. ACT ---
    let outcome = h.uploads.shutdown(Duration::from_millis(5)).await;

    // --- 3. ASSERT ---
    assert!(matches!(outcome, Err(UploadError::TimedOut)));
    assert!(!h.uploads.is_complete(ticket));
    assert!(matches!(
        h.uploads.submit(buffer_request(&target, &[1u8; 64])),
        Err(UploadError::ShutDown)
    ));
}

#[test]
fn frame_start_blocks_at_most_the_slot_timeout() {
    // --- 1. ARRANGE ---
    let mut config = GraphicsConfig::default();
    config.slot_wait_timeout_ms = 20;
    let h = harness_with(config);
    let target = gpu_buffer(&h.graphics, 64);
    h.transfer.set_stalled(true);
    h.uploads.on_frame_start(FrameSlot(0));
    h.uploads.submit(buffer_request(&target, &[3u8; 64])).unwrap();
    h.uploads.on_frame_end().unwrap();
    h.uploads.on_frame_start(FrameSlot(1));

    // --- 2. ACT ---
    let started = Instant::now();
    h.uploads.on_frame_start(FrameSlot(0));
    let waited = started.elapsed();

    // --- 3. ASSERT ---
    assert!(waited >= Duration::from_millis(20));
    assert!(waited < Duration::from_secs(5));
    // Slot 0 still backs an unfinished copy, so its staging is not recycled.
    assert_eq!(h.uploads.staging().active_slot(), FrameSlot(1));

    h.transfer.set_stalled(false);
    h.uploads.on_frame_start(FrameSlot(0));
    assert_eq!(h.uploads.staging().active_slot(), FrameSlot(0));
}

#[test]
fn readback_returns_uploaded_bytes() {
    // --- 1. ARRANGE ---
    let h = harness();
    let target = gpu_buffer(&h.graphics, 128);
    let bytes: Vec<u8> = (0..128).map(|i| i as u8).collect();

    // --- 2. ACT ---
    h.uploads.submit(buffer_request(&target, &bytes)).unwrap();
    let readback = h.uploads.submit_readback(&target, 32, 64).unwrap();
    h.uploads.flush().unwrap();

    // --- 3. ASSERT ---
    assert_eq!(h.uploads.try_take_readback(readback).unwrap(), bytes[32..96].to_vec());
    assert_eq!(h.uploads.try_take_readback(readback), None);
}

#[test]
fn staging_exhaustion_fails_the_ticket_not_the_call() {
    // --- 1. ARRANGE ---
    let mut config = GraphicsConfig::default();
    config.staging.bytes_per_slot = 1024;
    let h = harness_with(config);
    let target = gpu_buffer(&h.graphics, 4096);

    // --- 2. ACT ---
    let ticket = h.uploads.submit(buffer_request(&target, &[0u8; 2048])).unwrap();

    // --- 3. ASSERT ---
    let result = h.uploads.try_get_result(ticket).unwrap();
    assert_eq!(result.error, UploadErrorKind::StagingExhausted);
    assert_eq!(h.uploads.pending_count(), 0);
}

#[test]
fn malformed_requests_are_rejected() {
    let h = harness();
    let read_only = h
        .graphics
        .create_buffer(BufferDesc::device_local(64, BufferUsage::STORAGE, "ReadOnly"))
        .unwrap();
    assert!(matches!(
        h.uploads.submit(buffer_request(&read_only, &[0u8; 16])),
        Err(UploadError::InvalidRequest(_))
    ));

    let target = gpu_buffer(&h.graphics, 64);
    let overflowing = UploadRequest::buffer(
        UploadBufferDesc {
            dst: target,
            size_bytes: 32,
            dst_offset: 48,
        },
        UploadData::View(&[0u8; 32]),
    );
    assert!(matches!(
        h.uploads.submit(overflowing),
        Err(UploadError::InvalidRequest(_))
    ));
}

#[test]
fn rejected_requests_issue_no_ticket() {
    // --- 1. ARRANGE ---
    let h = harness();
    let target = gpu_buffer(&h.graphics, 64);
    let first = h.uploads.submit(buffer_request(&target, &[1u8; 32])).unwrap();

    // --- 2. ACT ---
    let oversized = h.uploads.submit(buffer_request(&target, &[0u8; 128]));
    let second = h.uploads.submit(buffer_request(&target, &[2u8; 32])).unwrap();
    h.uploads.flush().unwrap();
    h.uploads.retire_completed();

    // --- 3. ASSERT ---
    assert!(matches!(oversized, Err(UploadError::InvalidRequest(_))));
    assert_eq!(second.id.0, first.id.0 + 1);
    assert!(h.uploads.is_complete(first));
    assert!(h.uploads.is_complete(second));
    assert_eq!(h.uploads.pending_count(), 0);
}

#[test]
fn canceled_ticket_reports_canceled() {
    let h = harness();
    let target = gpu_buffer(&h.graphics, 64);
    let ticket = h.uploads.submit(buffer_request(&target, &[0u8; 64])).unwrap();

    assert!(h.uploads.cancel(ticket));
    h.uploads.flush().unwrap();

    let result = h.uploads.try_get_result(ticket).unwrap();
    assert_eq!(result.error, UploadErrorKind::Canceled);
    assert!(!h.uploads.cancel(ticket));
}

#[test]
fn immediate_policy_submits_on_its_own() {
    let h = harness();
    let target = gpu_buffer(&h.graphics, 64);
    let ticket = h
        .uploads
        .submit(buffer_request(&target, &[7u8; 64]).with_batch_policy(BatchPolicy::Immediate))
        .unwrap();

    assert!(h.uploads.is_complete(ticket));
    assert_eq!(h.graphics.read_buffer(&target, 0, 64).unwrap(), vec![7u8; 64]);
}

#[test]
fn device_loss_fails_pending_uploads() {
    // --- 1. ARRANGE ---
    let h = harness();
    let target = gpu_buffer(&h.graphics, 64);
    h.transfer.set_stalled(true);
    let ticket = h.uploads.submit(buffer_request(&target, &[0u8; 64])).unwrap();
    h.uploads.flush().unwrap();

    // --- 2. ACT ---
    h.graphics.simulate_device_lost();
    h.uploads.retire_completed();

    // --- 3. ASSERT ---
    let result = h.uploads.try_get_result(ticket).unwrap();
    assert_eq!(result.error, UploadErrorKind::DeviceLost);
    assert!(matches!(
        h.uploads.submit(buffer_request(&target, &[0u8; 64])),
        Err(UploadError::DeviceLost)
    ));
}

#[tokio::test]
async fn wait_flushes_and_resolves() {
    let h = harness();
    let target = gpu_buffer(&h.graphics, 64);
    let tickets: Vec<_> = (0..3)
        .map(|i| h.uploads.submit(buffer_request(&target, &[i as u8; 64])).unwrap())
        .collect();

    let results = h.uploads.wait_all(&tickets).await.unwrap();
    assert!(results.iter().all(|r| r.success));
    assert_eq!(h.graphics.read_buffer(&target, 0, 64).unwrap(), vec![2u8; 64]);
}
