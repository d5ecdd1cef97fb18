//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Partitioning of the shader-visible resource descriptor heap into a
//! persistent bindless-SRV pool and two per-frame bump-allocated tables.
use std::sync::atomic::{AtomicU32, Ordering};

use crossbeam_channel::{bounded, Receiver, Sender};
use framegraph_base::{Error, ErrorKind, Result};

use crate::config::FrameGraphConfig;

/// A single bindless SRV slot, reclaimed to the heap's free queue on drop.
#[derive(Debug)]
pub struct BindlessSrvAllocation {
    index: u32,
    release: Option<Sender<u32>>,
}

impl BindlessSrvAllocation {
    pub fn index(&self) -> u32 {
        self.index
    }
}

impl Drop for BindlessSrvAllocation {
    fn drop(&mut self) {
        if let Some(tx) = self.release.take() {
            // The channel is bounded exactly to the partition size, so this
            // can only fail if the index were double-released, which would
            // itself be a caller bug rather than something to recover from.
            let _ = tx.send(self.index);
        }
    }
}

/// A contiguous range within the current frame's descriptor partition.
#[derive(Debug, Clone, Copy)]
pub struct PerFrameDescriptorTable {
    base_index: u32,
    count: u32,
    frame_number: u64,
}

impl PerFrameDescriptorTable {
    pub fn base_index(&self) -> u32 {
        self.base_index
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }
}

/// The process-wide shader-visible descriptor heap, split into:
///
///  - `[0, bindless_srvs_partition_size)`: free-list allocated bindless SRVs.
///  - `[bindless_srvs_partition_size, .. + per_frame/2)`: even-frame table.
///  - `[.. + per_frame/2, .. + per_frame)`: odd-frame table.
#[derive(Debug)]
pub struct GPUResourceDescriptorHeap {
    config: FrameGraphConfig,
    bindless_free_tx: Sender<u32>,
    bindless_free_rx: Receiver<u32>,
    per_frame_cursor: AtomicU32,
}

impl GPUResourceDescriptorHeap {
    pub fn new(config: FrameGraphConfig) -> Self {
        let (tx, rx) = bounded(config.bindless_srvs_partition_size as usize);
        for i in 0..config.bindless_srvs_partition_size {
            // Infallible: the channel's capacity is exactly this count.
            tx.send(i).unwrap();
        }
        Self {
            config,
            bindless_free_tx: tx,
            bindless_free_rx: rx,
            per_frame_cursor: AtomicU32::new(0),
        }
    }

    pub fn config(&self) -> &FrameGraphConfig {
        &self.config
    }

    /// Draw an unused bindless SRV index from the free queue.
    pub fn allocate_bindless_srv(&self) -> Result<BindlessSrvAllocation> {
        match self.bindless_free_rx.try_recv() {
            Ok(index) => Ok(BindlessSrvAllocation {
                index,
                release: Some(self.bindless_free_tx.clone()),
            }),
            Err(_) => {
                log::error!("bindless SRV pool exhausted");
                Err(Error::new(ErrorKind::CapacityExhausted))
            }
        }
    }

    /// Bump-allocate `descriptor_count` contiguous slots from the partition
    /// belonging to `frame_number`'s parity.
    pub fn allocate_per_frame_table(
        &self,
        descriptor_count: u32,
        frame_number: u64,
    ) -> Result<PerFrameDescriptorTable> {
        let per_frame_size = self.config.per_frame_partition_size();
        let parity_base = self.config.bindless_srvs_partition_size
            + per_frame_size * (frame_number % 2) as u32;

        let start = self
            .per_frame_cursor
            .fetch_add(descriptor_count, Ordering::Relaxed);
        if start + descriptor_count > per_frame_size {
            log::error!("per-frame descriptor partition exhausted for frame {}", frame_number);
            return Err(Error::new(ErrorKind::CapacityExhausted));
        }

        Ok(PerFrameDescriptorTable {
            base_index: parity_base + start,
            count: descriptor_count,
            frame_number,
        })
    }

    /// Reset the per-frame bump cursor. Must only be called once the engine
    /// knows the GPU has finished with the frame whose partition is about to
    /// be reused (i.e. two frames after the partition was last written, per
    /// `MAX_FRAMES_IN_FLIGHT`).
    pub fn reset_per_frame_counter(&self) {
        self.per_frame_cursor.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn bindless_allocations_are_unique_under_concurrency() {
        let _ = env_logger::try_init();
        let heap = Arc::new(GPUResourceDescriptorHeap::new(FrameGraphConfig {
            bindless_srvs_partition_size: 1000,
            ..FrameGraphConfig::default()
        }));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let heap = Arc::clone(&heap);
                thread::spawn(move || {
                    (0..100)
                        .map(|_| heap.allocate_bindless_srv().unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut all_indices = HashSet::new();
        for h in handles {
            for alloc in h.join().unwrap() {
                assert!(all_indices.insert(alloc.index()), "duplicate bindless index");
            }
        }
        assert_eq!(all_indices.len(), 800);
    }

    #[test]
    fn released_bindless_indices_are_reusable() {
        let heap = GPUResourceDescriptorHeap::new(FrameGraphConfig {
            bindless_srvs_partition_size: 4,
            ..FrameGraphConfig::default()
        });
        let allocs: Vec<_> = (0..4).map(|_| heap.allocate_bindless_srv().unwrap()).collect();
        assert!(heap.allocate_bindless_srv().is_err());
        drop(allocs);
        let mut reused = HashSet::new();
        for _ in 0..4 {
            reused.insert(heap.allocate_bindless_srv().unwrap().index());
        }
        assert_eq!(reused.len(), 4);
    }

    #[test]
    fn per_frame_partition_isolation() {
        let cfg = FrameGraphConfig {
            per_frame_descriptors_partition_size: 100, // 50 per parity
            bindless_srvs_partition_size: 1000,
            ..FrameGraphConfig::default()
        };
        let heap = GPUResourceDescriptorHeap::new(cfg);

        let even = heap.allocate_per_frame_table(10, 0).unwrap();
        assert_eq!(even.base_index(), 1000);

        heap.reset_per_frame_counter();
        let odd = heap.allocate_per_frame_table(10, 1).unwrap();
        // odd partition starts right after the even partition (50 slots in).
        assert_eq!(odd.base_index(), 1000 + 50);

        // even's allocation is still logically valid; only the cursor reset,
        // not the previously returned table.
        assert_eq!(even.base_index(), 1000);
    }

    #[test]
    fn per_frame_exhaustion_is_error() {
        let _ = env_logger::try_init();
        let cfg = FrameGraphConfig {
            per_frame_descriptors_partition_size: 20, // 10 per parity
            bindless_srvs_partition_size: 8,
            ..FrameGraphConfig::default()
        };
        let heap = GPUResourceDescriptorHeap::new(cfg);
        assert!(heap.allocate_per_frame_table(10, 0).is_ok());
        assert!(heap.allocate_per_frame_table(1, 0).is_err());
    }
}
