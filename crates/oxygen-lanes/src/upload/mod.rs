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

//! The upload pipeline: planning, staging, batching and completion tracking
//! of CPU to GPU copies, plus GPU to CPU buffer readbacks.

mod coordinator;
pub mod planner;
pub mod staging;
mod tracker;
mod types;

pub use coordinator::UploadCoordinator;
pub use planner::{PackingPolicy, SubresourceFootprint, TexturePlan, UploadPlan};
pub use staging::{RingStagingProvider, StagingAllocation, StagingProvider};
pub use tracker::{UploadTracker, RESULT_HISTORY};
pub use types::{
    TicketId, UploadBufferDesc, UploadData, UploadError, UploadErrorKind, UploadKind,
    UploadRequest, UploadResult, UploadSubresource, UploadTarget, UploadTextureDesc, UploadTicket,
};
