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

//! The bindless descriptor allocator.

use super::{
    DescriptorHandle, DescriptorHeapStrategy, DescriptorIndex, DescriptorSegment,
    DescriptorVisibility, ResourceViewType, ShaderVisibleIndex,
};
use crate::graphics::error::GraphicsError;
use crate::utils::lock;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Backend hook mirroring allocator segments into native descriptor heaps.
pub trait DescriptorHeapBackend: Send + Sync {
    /// Called once per segment when the allocator provisions it.
    fn on_segment_created(&self, segment: &DescriptorSegment) {
        let _ = segment;
    }

    /// Copies the native descriptor stored at `src` into `dst`.
    fn copy_descriptor(
        &self,
        dst: DescriptorIndex,
        src: DescriptorIndex,
    ) -> Result<(), GraphicsError>;
}

type DomainKey = (ResourceViewType, DescriptorVisibility);

/// Hands out [`DescriptorHandle`]s with stable indices, per domain.
///
/// Each domain starts with one segment and may add up to
/// `growth_segments` more inside its reserved range. Existing handles are
/// never relocated; once the growth budget is spent, allocation fails.
pub struct BindlessDescriptorAllocator {
    strategy: DescriptorHeapStrategy,
    domains: Mutex<HashMap<DomainKey, Vec<DescriptorSegment>>>,
    backend: Option<Arc<dyn DescriptorHeapBackend>>,
}

impl fmt::Debug for BindlessDescriptorAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindlessDescriptorAllocator")
            .field("strategy", &self.strategy)
            .field("has_backend", &self.backend.is_some())
            .finish()
    }
}

impl BindlessDescriptorAllocator {
    /// Creates an allocator for the given strategy.
    ///
    /// # Arguments
    ///
    /// * `strategy` - Sizing and placement of every domain.
    /// * `backend` - Optional native heap mirror.
    pub fn new(
        strategy: DescriptorHeapStrategy,
        backend: Option<Arc<dyn DescriptorHeapBackend>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            strategy,
            domains: Mutex::new(HashMap::new()),
            backend,
        })
    }

    /// The strategy this allocator was built with.
    pub fn strategy(&self) -> &DescriptorHeapStrategy {
        &self.strategy
    }

    /// Allocates a descriptor in the (`view_type`, `visibility`) domain.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::DescriptorAllocationFailed`] if the domain is
    /// not provisioned or is exhausted.
    pub fn allocate(
        self: &Arc<Self>,
        view_type: ResourceViewType,
        visibility: DescriptorVisibility,
    ) -> Result<DescriptorHandle, GraphicsError> {
        let exhausted = GraphicsError::DescriptorAllocationFailed {
            view_type,
            visibility,
        };
        let layout = self
            .strategy
            .domain(view_type, visibility)
            .ok_or_else(|| exhausted.clone())?;

        let mut domains = lock(&self.domains);
        let segments = domains.entry((view_type, visibility)).or_default();

        if let Some(index) = segments.iter().find_map(DescriptorSegment::allocate) {
            return Ok(DescriptorHandle::new(
                Arc::downgrade(self),
                index,
                view_type,
                visibility,
            ));
        }

        if segments.len() as u32 > layout.growth_segments {
            log::error!(
                "BindlessDescriptorAllocator: domain ({view_type:?}, {visibility:?}) exhausted after {} segments",
                segments.len()
            );
            return Err(exhausted);
        }

        let base = layout.base + segments.len() as u32 * layout.segment_capacity;
        let segment =
            DescriptorSegment::new(layout.segment_capacity, base, view_type, visibility);
        if let Some(backend) = &self.backend {
            backend.on_segment_created(&segment);
        }
        if !segments.is_empty() {
            log::debug!(
                "BindlessDescriptorAllocator: domain ({view_type:?}, {visibility:?}) grew to {} segments",
                segments.len() + 1
            );
        }
        let index = segment.allocate().ok_or_else(|| exhausted.clone())?;
        segments.push(segment);

        Ok(DescriptorHandle::new(
            Arc::downgrade(self),
            index,
            view_type,
            visibility,
        ))
    }

    /// Releases a handle. Equivalent to [`DescriptorHandle::release`].
    pub fn release(&self, handle: &mut DescriptorHandle) -> bool {
        handle.release()
    }

    pub(super) fn release_index(
        &self,
        index: DescriptorIndex,
        view_type: ResourceViewType,
        visibility: DescriptorVisibility,
    ) -> bool {
        let domains = lock(&self.domains);
        domains
            .get(&(view_type, visibility))
            .and_then(|segments| segments.iter().find(|s| s.contains(index)))
            .is_some_and(|segment| segment.release(index))
    }

    /// Returns `true` if the handle's index is currently allocated here.
    pub fn contains(&self, handle: &DescriptorHandle) -> bool {
        handle.is_valid()
            && handle.belongs_to(self)
            && lock(&self.domains)
                .get(&(handle.view_type(), handle.visibility()))
                .is_some_and(|segments| segments.iter().any(|s| s.is_allocated(handle.index())))
    }

    /// Returns the index shaders use to reach this descriptor.
    ///
    /// # Errors
    ///
    /// Fails for released handles, for handles of another allocator and for
    /// CPU-only domains.
    pub fn get_shader_visible_index(
        &self,
        handle: &DescriptorHandle,
    ) -> Result<ShaderVisibleIndex, GraphicsError> {
        if !handle.is_valid() {
            return Err(GraphicsError::InvalidRequest(
                "descriptor handle has been released".to_string(),
            ));
        }
        if !handle.belongs_to(self) {
            return Err(GraphicsError::InvalidRequest(format!(
                "descriptor {} was allocated by another allocator",
                handle.index().0
            )));
        }
        if handle.visibility() != DescriptorVisibility::ShaderVisible {
            return Err(GraphicsError::InvalidRequest(format!(
                "descriptor {} lives in a CPU-only {:?} domain",
                handle.index().0,
                handle.view_type()
            )));
        }
        Ok(ShaderVisibleIndex(handle.index().0))
    }

    /// The first index reserved for a domain.
    pub fn get_domain_base_index(
        &self,
        view_type: ResourceViewType,
        visibility: DescriptorVisibility,
    ) -> Result<u32, GraphicsError> {
        self.strategy
            .domain(view_type, visibility)
            .map(|layout| layout.base)
            .ok_or(GraphicsError::DescriptorAllocationFailed {
                view_type,
                visibility,
            })
    }

    /// Number of live descriptors in a domain.
    pub fn get_allocated_descriptors_count(
        &self,
        view_type: ResourceViewType,
        visibility: DescriptorVisibility,
    ) -> u32 {
        lock(&self.domains)
            .get(&(view_type, visibility))
            .map_or(0, |segments| segments.iter().map(|s| s.allocated_count()).sum())
    }

    /// Number of descriptors a domain can still hand out, growth included.
    pub fn get_remaining_descriptors_count(
        &self,
        view_type: ResourceViewType,
        visibility: DescriptorVisibility,
    ) -> u32 {
        let Some(layout) = self.strategy.domain(view_type, visibility) else {
            return 0;
        };
        layout.reserved() - self.get_allocated_descriptors_count(view_type, visibility)
    }

    /// Copies the native descriptor at `src` into `dst`.
    ///
    /// Both handles must be live and of the same view type.
    pub fn copy_descriptor(
        &self,
        dst: &DescriptorHandle,
        src: &DescriptorHandle,
    ) -> Result<(), GraphicsError> {
        if !dst.is_valid() || !src.is_valid() {
            return Err(GraphicsError::InvalidRequest(
                "copy_descriptor with a released handle".to_string(),
            ));
        }
        if dst.view_type() != src.view_type() {
            return Err(GraphicsError::InvalidRequest(format!(
                "copy_descriptor across heap types: {:?} -> {:?}",
                src.view_type(),
                dst.view_type()
            )));
        }
        match &self.backend {
            Some(backend) => backend.copy_descriptor(dst.index(), src.index()),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DescriptorHeapConfig, DomainConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SRV: ResourceViewType = ResourceViewType::StructuredBufferSrv;
    const VISIBLE: DescriptorVisibility = DescriptorVisibility::ShaderVisible;
    const CPU: DescriptorVisibility = DescriptorVisibility::CpuOnly;

    fn allocator(capacity: u32, growth: u32) -> Arc<BindlessDescriptorAllocator> {
        let config = DescriptorHeapConfig {
            domains: vec![
                DomainConfig {
                    view_type: ResourceViewType::TextureSrv,
                    visibility: VISIBLE,
                    capacity: 16,
                    growth_segments: 0,
                },
                DomainConfig {
                    view_type: SRV,
                    visibility: VISIBLE,
                    capacity,
                    growth_segments: growth,
                },
                DomainConfig {
                    view_type: SRV,
                    visibility: CPU,
                    capacity: 4,
                    growth_segments: 0,
                },
            ],
        };
        BindlessDescriptorAllocator::new(DescriptorHeapStrategy::from_config(&config), None)
    }

    #[test]
    fn indices_land_in_the_domain_range() {
        let alloc = allocator(4, 0);
        let base = alloc.get_domain_base_index(SRV, VISIBLE).unwrap();
        let handle = alloc.allocate(SRV, VISIBLE).unwrap();
        let index = alloc.get_shader_visible_index(&handle).unwrap();
        assert!(index.get() >= base && index.get() < base + 4);
    }

    #[test]
    fn shader_visible_index_is_stable_until_release() {
        let alloc = allocator(4, 0);
        let mut handle = alloc.allocate(SRV, VISIBLE).unwrap();
        let first = alloc.get_shader_visible_index(&handle).unwrap();
        let _other = alloc.allocate(SRV, VISIBLE).unwrap();
        assert_eq!(alloc.get_shader_visible_index(&handle).unwrap(), first);

        assert!(alloc.release(&mut handle));
        assert!(alloc.get_shader_visible_index(&handle).is_err());
    }

    #[test]
    fn foreign_handle_has_no_shader_visible_index() {
        let first = allocator(4, 0);
        let second = allocator(4, 0);
        let handle = first.allocate(SRV, VISIBLE).unwrap();
        let _same_index = second.allocate(SRV, VISIBLE).unwrap();

        assert!(first.get_shader_visible_index(&handle).is_ok());
        assert!(matches!(
            second.get_shader_visible_index(&handle),
            Err(GraphicsError::InvalidRequest(_))
        ));
        assert!(!second.contains(&handle));
    }

    #[test]
    fn cpu_only_domain_has_no_shader_visible_index() {
        let alloc = allocator(4, 0);
        let handle = alloc.allocate(SRV, CPU).unwrap();
        assert!(alloc.get_shader_visible_index(&handle).is_err());
    }

    #[test]
    fn drop_releases_the_slot() {
        let alloc = allocator(4, 0);
        {
            let _a = alloc.allocate(SRV, VISIBLE).unwrap();
            let _b = alloc.allocate(SRV, VISIBLE).unwrap();
            assert_eq!(alloc.get_allocated_descriptors_count(SRV, VISIBLE), 2);
        }
        assert_eq!(alloc.get_allocated_descriptors_count(SRV, VISIBLE), 0);
    }

    #[test]
    fn double_release_returns_false() {
        let alloc = allocator(4, 0);
        let mut handle = alloc.allocate(SRV, VISIBLE).unwrap();
        assert!(handle.release());
        assert!(!handle.release());
        assert!(!alloc.release(&mut handle));
        assert_eq!(alloc.get_allocated_descriptors_count(SRV, VISIBLE), 0);
    }

    #[test]
    fn invalidated_handle_keeps_its_slot() {
        let alloc = allocator(4, 0);
        let mut handle = alloc.allocate(SRV, VISIBLE).unwrap();
        handle.invalidate();
        drop(handle);
        assert_eq!(alloc.get_allocated_descriptors_count(SRV, VISIBLE), 1);
    }

    #[test]
    fn domain_grows_then_fails_hard() {
        let alloc = allocator(2, 1);
        let handles: Vec<_> = (0..4).map(|_| alloc.allocate(SRV, VISIBLE).unwrap()).collect();
        assert_eq!(alloc.get_remaining_descriptors_count(SRV, VISIBLE), 0);

        let err = alloc.allocate(SRV, VISIBLE).unwrap_err();
        assert!(matches!(err, GraphicsError::DescriptorAllocationFailed { .. }));

        // Growth segments follow the first one without touching other domains.
        let base = alloc.get_domain_base_index(SRV, VISIBLE).unwrap();
        let mut indices: Vec<u32> = handles.iter().map(|h| h.index().0 - base).collect();
        indices.sort_unstable();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    #[test]
    fn unprovisioned_domain_fails() {
        let alloc = allocator(2, 0);
        assert!(alloc.allocate(ResourceViewType::Sampler, VISIBLE).is_err());
    }

    #[test]
    fn handle_outliving_allocator_is_harmless() {
        let alloc = allocator(2, 0);
        let mut handle = alloc.allocate(SRV, VISIBLE).unwrap();
        drop(alloc);
        assert!(!handle.release());
    }

    struct CountingBackend {
        segments: AtomicUsize,
        copies: AtomicUsize,
    }

    impl DescriptorHeapBackend for CountingBackend {
        fn on_segment_created(&self, _segment: &DescriptorSegment) {
            self.segments.fetch_add(1, Ordering::Relaxed);
        }

        fn copy_descriptor(
            &self,
            _dst: DescriptorIndex,
            _src: DescriptorIndex,
        ) -> Result<(), GraphicsError> {
            self.copies.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    #[test]
    fn copy_descriptor_requires_matching_heap_types() {
        let backend = Arc::new(CountingBackend {
            segments: AtomicUsize::new(0),
            copies: AtomicUsize::new(0),
        });
        let alloc = BindlessDescriptorAllocator::new(
            DescriptorHeapStrategy::default(),
            Some(backend.clone()),
        );
        let a = alloc.allocate(SRV, VISIBLE).unwrap();
        let b = alloc.allocate(SRV, VISIBLE).unwrap();
        let t = alloc
            .allocate(ResourceViewType::TextureSrv, VISIBLE)
            .unwrap();

        assert!(alloc.copy_descriptor(&b, &a).is_ok());
        assert!(alloc.copy_descriptor(&t, &a).is_err());
        assert_eq!(backend.copies.load(Ordering::Relaxed), 1);
        assert_eq!(backend.segments.load(Ordering::Relaxed), 2);
    }
}
