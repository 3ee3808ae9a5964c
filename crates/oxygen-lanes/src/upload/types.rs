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

//! Requests, tickets, results and errors of the upload pipeline.

use oxygen_core::config::{BatchPolicy, UploadPriority};
use oxygen_core::graphics::{Buffer, FenceValue, GraphicsError, Texture, TextureFormat};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// What an upload writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UploadKind {
    /// A byte range of a buffer.
    Buffer,
    /// Subresources of a 1D texture.
    Texture1D,
    /// Subresources of a 2D texture or 2D array.
    Texture2D,
    /// Subresources of a volume texture.
    Texture3D,
    /// Faces of a cube map or cube array.
    TextureCube,
}

/// A buffer upload target.
#[derive(Debug, Clone)]
pub struct UploadBufferDesc {
    /// The destination buffer; needs `COPY_DST` usage.
    pub dst: Arc<Buffer>,
    /// Bytes written.
    pub size_bytes: u64,
    /// Where the bytes land in `dst`.
    pub dst_offset: u64,
}

/// One destination box of a partial texture upload.
///
/// Zero `width`, `height` or `depth` mean "up to the edge of the
/// subresource". `row_pitch` and `slice_pitch` describe the caller's source
/// bytes; zero means tightly packed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UploadSubresource {
    /// Destination mip.
    pub mip: u32,
    /// Destination array slice (cube face for cube maps).
    pub array_slice: u32,
    /// Destination x in texels.
    pub x: u32,
    /// Destination y in texels.
    pub y: u32,
    /// Destination z in texels.
    pub z: u32,
    /// Width in texels.
    pub width: u32,
    /// Height in texels.
    pub height: u32,
    /// Depth in texels.
    pub depth: u32,
    /// Bytes between rows of blocks in the source data.
    pub row_pitch: u64,
    /// Bytes between depth slices in the source data.
    pub slice_pitch: u64,
}

impl UploadSubresource {
    /// The whole of (`mip`, `array_slice`).
    pub fn full(mip: u32, array_slice: u32) -> Self {
        Self {
            mip,
            array_slice,
            ..Default::default()
        }
    }
}

/// A texture upload target.
#[derive(Debug, Clone)]
pub struct UploadTextureDesc {
    /// The destination texture.
    pub dst: Arc<Texture>,
    /// Width of mip 0; must match the texture.
    pub width: u32,
    /// Height of mip 0; must match the texture.
    pub height: u32,
    /// Depth of mip 0; must match the texture.
    pub depth: u32,
    /// Format of the source data; must match the texture.
    pub format: TextureFormat,
    /// Uploaded boxes; empty uploads every subresource in full.
    pub subresources: Vec<UploadSubresource>,
}

impl UploadTextureDesc {
    /// A full upload of every subresource of `dst`.
    pub fn full(dst: Arc<Texture>) -> Self {
        let desc = dst.desc();
        Self {
            width: desc.width,
            height: desc.height,
            depth: desc.depth,
            format: desc.format,
            dst,
            subresources: Vec::new(),
        }
    }
}

/// The typed destination of a request.
#[derive(Debug, Clone)]
pub enum UploadTarget {
    /// A buffer range.
    Buffer(UploadBufferDesc),
    /// Texture subresources.
    Texture(UploadTextureDesc),
}

/// Where the uploaded bytes come from.
pub enum UploadData<'a> {
    /// Bytes copied into staging memory.
    ///
    /// Texture data is laid out subresource after subresource, each with the
    /// pitches of its [`UploadSubresource`].
    View(&'a [u8]),
    /// A callback filling the staging span directly, in the pitched staging
    /// layout. Returning `false` fails the upload without recording copies.
    Producer(Box<dyn FnOnce(&mut [u8]) -> bool + 'a>),
}

impl fmt::Debug for UploadData<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadData::View(bytes) => write!(f, "View({} bytes)", bytes.len()),
            UploadData::Producer(_) => f.write_str("Producer"),
        }
    }
}

/// One upload.
#[derive(Debug)]
pub struct UploadRequest<'a> {
    /// What is written.
    pub kind: UploadKind,
    /// Where it is written.
    pub desc: UploadTarget,
    /// The source bytes.
    pub data: UploadData<'a>,
    /// Overrides the coordinator's batching.
    pub batch_policy: Option<BatchPolicy>,
    /// Scheduling hint.
    pub priority: UploadPriority,
    /// Label used in logs and tickets.
    pub debug_name: String,
}

impl<'a> UploadRequest<'a> {
    /// A buffer upload.
    pub fn buffer(desc: UploadBufferDesc, data: UploadData<'a>) -> Self {
        let debug_name = format!("Upload({})", desc.dst.desc().debug_name);
        Self {
            kind: UploadKind::Buffer,
            desc: UploadTarget::Buffer(desc),
            data,
            batch_policy: None,
            priority: UploadPriority::default(),
            debug_name,
        }
    }

    /// A texture upload of the given kind.
    pub fn texture(kind: UploadKind, desc: UploadTextureDesc, data: UploadData<'a>) -> Self {
        let debug_name = format!("Upload({})", desc.dst.desc().debug_name);
        Self {
            kind,
            desc: UploadTarget::Texture(desc),
            data,
            batch_policy: None,
            priority: UploadPriority::default(),
            debug_name,
        }
    }

    /// Sets the batching override.
    pub fn with_batch_policy(mut self, policy: BatchPolicy) -> Self {
        self.batch_policy = Some(policy);
        self
    }

    /// Sets the priority hint.
    pub fn with_priority(mut self, priority: UploadPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the label.
    pub fn with_debug_name(mut self, name: impl Into<String>) -> Self {
        self.debug_name = name.into();
        self
    }
}

/// A per-coordinator ticket sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TicketId(pub u64);

/// Names an upload; completes when the transfer queue reaches `fence`.
///
/// Uploads that failed before recording carry `FenceValue(0)` and are already
/// complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UploadTicket {
    /// The ticket id.
    pub id: TicketId,
    /// The transfer-queue value the upload completes on.
    pub fence: FenceValue,
}

/// Why an upload did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UploadErrorKind {
    /// No error.
    #[default]
    None,
    /// The producer callback returned `false`.
    ProducerFailed,
    /// The staging provider had no room.
    StagingExhausted,
    /// The request was malformed.
    InvalidRequest,
    /// The ticket was canceled before completing.
    Canceled,
    /// The device was lost.
    DeviceLost,
}

/// The outcome of a ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResult {
    /// `true` if the bytes reached the destination.
    pub success: bool,
    /// Staging bytes the upload consumed (zero on failure).
    pub bytes_uploaded: u64,
    /// Failure kind.
    pub error: UploadErrorKind,
    /// Failure details.
    pub message: String,
}

impl UploadResult {
    /// A successful upload of `bytes`.
    pub fn completed(bytes: u64) -> Self {
        Self {
            success: true,
            bytes_uploaded: bytes,
            error: UploadErrorKind::None,
            message: String::new(),
        }
    }

    /// A failed upload.
    pub fn failed(error: UploadErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            bytes_uploaded: 0,
            error,
            message: message.into(),
        }
    }
}

/// Errors returned synchronously by the upload pipeline.
#[derive(Debug, Error)]
pub enum UploadError {
    /// The request does not fit its destination.
    #[error("Invalid upload request: {0}")]
    InvalidRequest(String),
    /// The staging provider has no room left.
    #[error("Staging memory exhausted: {requested} bytes requested")]
    StagingExhausted {
        /// Bytes that were requested.
        requested: u64,
    },
    /// The producer callback failed.
    #[error("Upload producer failed: {0}")]
    ProducerFailed(String),
    /// The upload was canceled.
    #[error("Upload canceled")]
    Canceled,
    /// A deadline expired before the uploads completed.
    #[error("Timed out waiting for uploads")]
    TimedOut,
    /// The device was lost.
    #[error("Device lost")]
    DeviceLost,
    /// The coordinator no longer accepts work.
    #[error("Upload coordinator is shut down")]
    ShutDown,
    /// A graphics call failed.
    #[error("Graphics error: {0}")]
    Graphics(#[from] GraphicsError),
}
