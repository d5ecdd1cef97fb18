//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Tunable constants controlling recorder chunking, descriptor heap sizing,
//! and in-flight frame depth.

/// Default maximum number of render passes packed into a single command-list
/// recorder before a new recorder is started.
pub const MAX_RENDER_PASSES_PER_COMMAND_LIST: usize = 50;

/// Default total capacity of the shader-visible resource descriptor heap.
pub const RESOURCE_DESCRIPTOR_HEAP_SIZE: u32 = 1_000_000;

/// Default size of the bindless SRV partition, `[0, BINDLESS_SRVS_PARTITION_SIZE)`.
pub const BINDLESS_SRVS_PARTITION_SIZE: u32 = 500_000;

/// Default combined size of the two per-frame ping-pong partitions.
pub const PER_FRAME_DESCRIPTORS_PARTITION_SIZE: u32 = 500_000;

/// Default number of frames the GPU may be working on concurrently.
pub const MAX_FRAMES_IN_FLIGHT: u64 = 2;

/// Runtime-overridable configuration for a `FrameGraph` instance.
///
/// Mirrors the compile-time defaults above so a host application (or a test
/// fixture that wants a small heap) can override them without touching the
/// allocator or heap implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGraphConfig {
    pub max_render_passes_per_command_list: usize,
    pub resource_descriptor_heap_size: u32,
    pub bindless_srvs_partition_size: u32,
    pub per_frame_descriptors_partition_size: u32,
    pub max_frames_in_flight: u64,
}

impl FrameGraphConfig {
    pub const fn default() -> Self {
        Self {
            max_render_passes_per_command_list: MAX_RENDER_PASSES_PER_COMMAND_LIST,
            resource_descriptor_heap_size: RESOURCE_DESCRIPTOR_HEAP_SIZE,
            bindless_srvs_partition_size: BINDLESS_SRVS_PARTITION_SIZE,
            per_frame_descriptors_partition_size: PER_FRAME_DESCRIPTORS_PARTITION_SIZE,
            max_frames_in_flight: MAX_FRAMES_IN_FLIGHT,
        }
    }

    /// Size of a single per-frame (even or odd) partition.
    pub const fn per_frame_partition_size(&self) -> u32 {
        self.per_frame_descriptors_partition_size / 2
    }
}

impl Default for FrameGraphConfig {
    fn default() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_documented_constants() {
        let cfg = FrameGraphConfig::default();
        assert_eq!(cfg.max_render_passes_per_command_list, 50);
        assert_eq!(cfg.resource_descriptor_heap_size, 1_000_000);
        assert_eq!(cfg.bindless_srvs_partition_size, 500_000);
        assert_eq!(cfg.per_frame_descriptors_partition_size, 500_000);
        assert_eq!(cfg.per_frame_partition_size(), 250_000);
        assert_eq!(cfg.max_frames_in_flight, 2);
    }
}
