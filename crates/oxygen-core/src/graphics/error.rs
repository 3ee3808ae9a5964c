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

//! Defines the error type shared by the graphics contracts.

use super::descriptor::{DescriptorVisibility, ResourceViewType};
use super::resources::ResourceId;
use std::fmt;

/// An error raised by resource creation, descriptor management, state tracking
/// or queue operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphicsError {
    /// The backend could not create a buffer or texture.
    ResourceCreationFailed {
        /// The debug name of the resource being created.
        label: String,
        /// A backend-provided reason.
        reason: String,
    },
    /// A descriptor domain has no capacity left and cannot grow.
    DescriptorAllocationFailed {
        /// The view type of the exhausted domain.
        view_type: ResourceViewType,
        /// The visibility of the exhausted domain.
        visibility: DescriptorVisibility,
    },
    /// A resource or view could not be registered with the resource registry.
    ResourceRegistrationFailed(String),
    /// The request is malformed (bad range, mismatched format, invalid handle).
    InvalidRequest(String),
    /// A state transition was refused by the state tracker.
    InvalidStateTransition {
        /// The resource whose state was being changed.
        resource: ResourceId,
        /// Why the transition was refused.
        reason: String,
    },
    /// The resource is not tracked by the state tracker.
    NotTracked(ResourceId),
    /// No queue matches the requested name or role.
    QueueNotFound(String),
    /// A queue name was declared twice with different specifications.
    DuplicateQueue(String),
    /// The device was lost; all queues are inert.
    DeviceLost,
    /// A wait did not complete within its deadline.
    TimedOut,
    /// Any other backend failure.
    Backend(String),
}

impl fmt::Display for GraphicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphicsError::ResourceCreationFailed { label, reason } => {
                write!(f, "Failed to create resource '{label}': {reason}")
            }
            GraphicsError::DescriptorAllocationFailed {
                view_type,
                visibility,
            } => {
                write!(
                    f,
                    "Descriptor allocation failed: domain ({view_type:?}, {visibility:?}) is exhausted"
                )
            }
            GraphicsError::ResourceRegistrationFailed(msg) => {
                write!(f, "Resource registration failed: {msg}")
            }
            GraphicsError::InvalidRequest(msg) => write!(f, "Invalid request: {msg}"),
            GraphicsError::InvalidStateTransition { resource, reason } => {
                write!(f, "Invalid state transition for {resource:?}: {reason}")
            }
            GraphicsError::NotTracked(resource) => {
                write!(f, "Resource {resource:?} is not tracked")
            }
            GraphicsError::QueueNotFound(key) => write!(f, "No command queue matches '{key}'"),
            GraphicsError::DuplicateQueue(name) => {
                write!(f, "Queue '{name}' was declared twice with different specifications")
            }
            GraphicsError::DeviceLost => write!(f, "The graphics device was lost"),
            GraphicsError::TimedOut => write!(f, "The operation timed out"),
            GraphicsError::Backend(msg) => write!(f, "Backend error: {msg}"),
        }
    }
}

impl std::error::Error for GraphicsError {}
