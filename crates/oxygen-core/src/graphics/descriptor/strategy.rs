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

//! Domain sizing policy for the bindless allocator.

use super::{DescriptorVisibility, ResourceViewType};
use crate::config::DescriptorHeapConfig;
use std::collections::BTreeMap;

/// The reserved index range of one descriptor domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainLayout {
    /// First global index reserved for the domain.
    pub base: u32,
    /// Capacity of each segment.
    pub segment_capacity: u32,
    /// How many extra segments the domain may add after the first one.
    pub growth_segments: u32,
}

impl DomainLayout {
    /// Total number of indices reserved for the domain.
    pub fn reserved(&self) -> u32 {
        self.segment_capacity * (1 + self.growth_segments)
    }
}

/// Decides the capacity, growth budget and placement of every descriptor domain.
///
/// Domains are laid out in a fixed order (view type, then visibility) so that
/// two strategies built from the same configuration produce the same indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorHeapStrategy {
    domains: BTreeMap<(ResourceViewType, DescriptorVisibility), DomainLayout>,
    total: u32,
}

impl DescriptorHeapStrategy {
    /// Builds the layout from configuration. Domains absent from the
    /// configuration cannot allocate.
    pub fn from_config(config: &DescriptorHeapConfig) -> Self {
        let mut requested = BTreeMap::new();
        for domain in &config.domains {
            if domain.view_type.is_cpu_only()
                && domain.visibility == DescriptorVisibility::ShaderVisible
            {
                log::warn!(
                    "DescriptorHeapStrategy: ignoring shader-visible domain for CPU-only view type {:?}",
                    domain.view_type
                );
                continue;
            }
            requested.insert(
                (domain.view_type, domain.visibility),
                (domain.capacity, domain.growth_segments),
            );
        }

        let mut domains = BTreeMap::new();
        let mut cursor = 0u32;
        for (key, (capacity, growth_segments)) in requested {
            let layout = DomainLayout {
                base: cursor,
                segment_capacity: capacity,
                growth_segments,
            };
            cursor += layout.reserved();
            domains.insert(key, layout);
        }

        Self {
            domains,
            total: cursor,
        }
    }

    /// The layout of a domain, if it is provisioned.
    pub fn domain(
        &self,
        view_type: ResourceViewType,
        visibility: DescriptorVisibility,
    ) -> Option<DomainLayout> {
        self.domains.get(&(view_type, visibility)).copied()
    }

    /// Iterates every provisioned domain in layout order.
    pub fn domains(
        &self,
    ) -> impl Iterator<Item = (ResourceViewType, DescriptorVisibility, DomainLayout)> + '_ {
        self.domains.iter().map(|(&(vt, vis), &layout)| (vt, vis, layout))
    }

    /// Size of the whole index space reserved by the strategy.
    pub fn total_reserved(&self) -> u32 {
        self.total
    }
}

impl Default for DescriptorHeapStrategy {
    fn default() -> Self {
        Self::from_config(&DescriptorHeapConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DomainConfig;

    #[test]
    fn domains_do_not_overlap() {
        let strategy = DescriptorHeapStrategy::default();
        let mut ranges: Vec<(u32, u32)> = strategy
            .domains()
            .map(|(_, _, l)| (l.base, l.base + l.reserved()))
            .collect();
        ranges.sort_unstable();
        for pair in ranges.windows(2) {
            assert!(pair[0].1 <= pair[1].0, "{pair:?} overlap");
        }
        assert_eq!(ranges.last().map(|r| r.1), Some(strategy.total_reserved()));
    }

    #[test]
    fn cpu_only_view_types_are_never_shader_visible() {
        let config = DescriptorHeapConfig {
            domains: vec![DomainConfig {
                view_type: ResourceViewType::TextureRtv,
                visibility: DescriptorVisibility::ShaderVisible,
                capacity: 8,
                growth_segments: 0,
            }],
        };
        let strategy = DescriptorHeapStrategy::from_config(&config);
        assert!(strategy
            .domain(ResourceViewType::TextureRtv, DescriptorVisibility::ShaderVisible)
            .is_none());
    }

    #[test]
    fn growth_budget_is_reserved() {
        let config = DescriptorHeapConfig {
            domains: vec![
                DomainConfig {
                    view_type: ResourceViewType::TextureSrv,
                    visibility: DescriptorVisibility::ShaderVisible,
                    capacity: 4,
                    growth_segments: 2,
                },
                DomainConfig {
                    view_type: ResourceViewType::Sampler,
                    visibility: DescriptorVisibility::ShaderVisible,
                    capacity: 2,
                    growth_segments: 0,
                },
            ],
        };
        let strategy = DescriptorHeapStrategy::from_config(&config);
        let textures = strategy
            .domain(ResourceViewType::TextureSrv, DescriptorVisibility::ShaderVisible)
            .unwrap();
        let samplers = strategy
            .domain(ResourceViewType::Sampler, DescriptorVisibility::ShaderVisible)
            .unwrap();
        assert_eq!(textures.base, 0);
        assert_eq!(textures.reserved(), 12);
        assert_eq!(samplers.base, 12);
    }
}
