//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! A segregated-fit sub-allocator for transient GPU heap regions.
//!
//! Blocks live in a flat arena (`Vec<Block>`) and reference each other by
//! index rather than by pointer, which keeps the physical-neighbor chain and
//! the free lists representable without raw pointers or `Rc` cycles. Free
//! blocks are bucketed by `⌊log2(size)⌋`; allocation does a first-fit scan
//! starting at the bucket for the requested size. This is the "any family of
//! buckets indexed by size class" scheme rather than a literal two-level
//! bitmap-accelerated TLSF, which keeps the arena small and easy to audit
//! while preserving the block-splitting/coalescing behavior callers depend
//! on.
use framegraph_base::{Error, ErrorKind, Result};

const NUM_BUCKETS: usize = 64;

fn bucket_for(size: u64) -> usize {
    debug_assert!(size > 0);
    (63 - size.leading_zeros()).min(NUM_BUCKETS as u32 - 1) as usize
}

fn align_up(offset: u64, align: u64) -> u64 {
    (offset + align - 1) & !(align - 1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BlockIndex(u32);

#[derive(Debug)]
struct Block {
    size: u64,
    offset: u64,
    free: bool,
    phys_prev: Option<BlockIndex>,
    phys_next: Option<BlockIndex>,
    free_prev: Option<BlockIndex>,
    free_next: Option<BlockIndex>,
}

/// A live allocation returned by [`TlsfHeap::alloc`].
///
/// Must be passed back to the same heap's [`TlsfHeap::free`] exactly once.
#[derive(Debug)]
pub struct TlsfAlloc {
    index: BlockIndex,
    offset: u64,
    size: u64,
}

impl TlsfAlloc {
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

/// A two-level-segregated-fit-style sub-allocator over a single contiguous
/// heap region of fixed capacity.
#[derive(Debug)]
pub struct TlsfHeap {
    blocks: Vec<Block>,
    free_slots: Vec<BlockIndex>,
    free_heads: Vec<Option<BlockIndex>>,
    capacity: u64,
}

impl TlsfHeap {
    /// Create a heap covering `[0, capacity)`, initially a single free block.
    pub fn new(capacity: u64) -> Self {
        assert!(capacity > 0, "heap capacity must be nonzero");
        let root = Block {
            size: capacity,
            offset: 0,
            free: true,
            phys_prev: None,
            phys_next: None,
            free_prev: None,
            free_next: None,
        };
        let mut heap = Self {
            blocks: vec![root],
            free_slots: Vec::new(),
            free_heads: vec![None; NUM_BUCKETS],
            capacity,
        };
        heap.free_link(BlockIndex(0));
        heap
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    fn alloc_slot(&mut self, block: Block) -> BlockIndex {
        if let Some(idx) = self.free_slots.pop() {
            self.blocks[idx.0 as usize] = block;
            idx
        } else {
            let idx = BlockIndex(self.blocks.len() as u32);
            self.blocks.push(block);
            idx
        }
    }

    fn free_unlink(&mut self, idx: BlockIndex) {
        let (prev, next) = {
            let b = &self.blocks[idx.0 as usize];
            (b.free_prev, b.free_next)
        };
        match prev {
            Some(p) => self.blocks[p.0 as usize].free_next = next,
            None => {
                let bucket = bucket_for(self.blocks[idx.0 as usize].size);
                self.free_heads[bucket] = next;
            }
        }
        if let Some(n) = next {
            self.blocks[n.0 as usize].free_prev = prev;
        }
        let b = &mut self.blocks[idx.0 as usize];
        b.free_prev = None;
        b.free_next = None;
    }

    fn free_link(&mut self, idx: BlockIndex) {
        let bucket = bucket_for(self.blocks[idx.0 as usize].size);
        let head = self.free_heads[bucket];
        self.blocks[idx.0 as usize].free_prev = None;
        self.blocks[idx.0 as usize].free_next = head;
        if let Some(h) = head {
            self.blocks[h.0 as usize].free_prev = Some(idx);
        }
        self.free_heads[bucket] = Some(idx);
        self.blocks[idx.0 as usize].free = true;
    }

    /// Allocate a region `size` bytes long, aligned to `align` (which must
    /// be a power of two).
    ///
    /// Returns `Ok(None)` if no free block can satisfy the request; `Err` is
    /// reserved for contract violations.
    pub fn alloc(&mut self, size: u64, align: u64) -> Result<Option<TlsfAlloc>> {
        if size == 0 || !align.is_power_of_two() {
            return Err(Error::new(ErrorKind::InvariantViolation));
        }

        let start_bucket = bucket_for(size);
        let mut found = None;
        'buckets: for bucket in start_bucket..NUM_BUCKETS {
            let mut cur = self.free_heads[bucket];
            while let Some(idx) = cur {
                let b = &self.blocks[idx.0 as usize];
                let aligned_offset = align_up(b.offset, align);
                if aligned_offset + size <= b.offset + b.size {
                    found = Some((idx, aligned_offset));
                    break 'buckets;
                }
                cur = b.free_next;
            }
        }

        let (idx, aligned_offset) = match found {
            Some(x) => x,
            None => return Ok(None),
        };

        self.free_unlink(idx);

        let padding = aligned_offset - self.blocks[idx.0 as usize].offset;
        if padding > 0 {
            let orig_offset = self.blocks[idx.0 as usize].offset;
            let orig_prev = self.blocks[idx.0 as usize].phys_prev;
            let pad_block = Block {
                size: padding,
                offset: orig_offset,
                free: false,
                phys_prev: orig_prev,
                phys_next: Some(idx),
                free_prev: None,
                free_next: None,
            };
            let pad_idx = self.alloc_slot(pad_block);
            if let Some(p) = orig_prev {
                self.blocks[p.0 as usize].phys_next = Some(pad_idx);
            }
            self.blocks[idx.0 as usize].phys_prev = Some(pad_idx);
            self.blocks[idx.0 as usize].offset += padding;
            self.blocks[idx.0 as usize].size -= padding;
            self.free_link(pad_idx);
        }

        let remaining = self.blocks[idx.0 as usize].size - size;
        if remaining > 0 {
            let tail_offset = self.blocks[idx.0 as usize].offset + size;
            let orig_next = self.blocks[idx.0 as usize].phys_next;
            let tail_block = Block {
                size: remaining,
                offset: tail_offset,
                free: false,
                phys_prev: Some(idx),
                phys_next: orig_next,
                free_prev: None,
                free_next: None,
            };
            let tail_idx = self.alloc_slot(tail_block);
            if let Some(n) = orig_next {
                self.blocks[n.0 as usize].phys_prev = Some(tail_idx);
            }
            self.blocks[idx.0 as usize].phys_next = Some(tail_idx);
            self.blocks[idx.0 as usize].size = size;
            self.free_link(tail_idx);
        }

        self.blocks[idx.0 as usize].free = false;
        Ok(Some(TlsfAlloc {
            index: idx,
            offset: aligned_offset,
            size,
        }))
    }

    /// Return `alloc`'s region to the heap, coalescing with free physical
    /// neighbors.
    pub fn free(&mut self, alloc: TlsfAlloc) -> Result<()> {
        let TlsfAlloc { index: mut idx, .. } = alloc;
        if self.blocks[idx.0 as usize].free {
            return Err(Error::new(ErrorKind::InvariantViolation));
        }

        if let Some(next) = self.blocks[idx.0 as usize].phys_next {
            if self.blocks[next.0 as usize].free {
                self.free_unlink(next);
                let next_size = self.blocks[next.0 as usize].size;
                let next_next = self.blocks[next.0 as usize].phys_next;
                self.blocks[idx.0 as usize].size += next_size;
                self.blocks[idx.0 as usize].phys_next = next_next;
                if let Some(nn) = next_next {
                    self.blocks[nn.0 as usize].phys_prev = Some(idx);
                }
                self.free_slots.push(next);
            }
        }

        if let Some(prev) = self.blocks[idx.0 as usize].phys_prev {
            if self.blocks[prev.0 as usize].free {
                self.free_unlink(prev);
                let cur_size = self.blocks[idx.0 as usize].size;
                let cur_next = self.blocks[idx.0 as usize].phys_next;
                self.blocks[prev.0 as usize].size += cur_size;
                self.blocks[prev.0 as usize].phys_next = cur_next;
                if let Some(n) = cur_next {
                    self.blocks[n.0 as usize].phys_prev = Some(prev);
                }
                self.free_slots.push(idx);
                idx = prev;
            }
        }

        self.free_link(idx);
        Ok(())
    }

    /// Returns `true` iff the heap consists of exactly one block spanning
    /// the full capacity (used by tests to check round-trip behavior).
    pub fn is_pristine(&self) -> bool {
        let mut live = self
            .blocks
            .iter()
            .enumerate()
            .filter(|(i, _)| !self.free_slots.iter().any(|f| f.0 as usize == *i))
            .map(|(_, b)| b);
        match (live.next(), live.next()) {
            (Some(b), None) => b.free && b.offset == 0 && b.size == self.capacity,
            _ => false,
        }
    }

    #[cfg(test)]
    fn assert_physical_chain_integrity(&self) {
        let live_indices: std::collections::HashSet<usize> = (0..self.blocks.len())
            .filter(|i| !self.free_slots.iter().any(|f| f.0 as usize == *i))
            .collect();

        let mut start = None;
        for &i in &live_indices {
            if self.blocks[i].phys_prev.is_none() {
                start = Some(i);
                break;
            }
        }
        let mut offset = 0u64;
        let mut total = 0u64;
        let mut cur = start;
        let mut visited = 0;
        let mut last_free = false;
        while let Some(i) = cur {
            let b = &self.blocks[i];
            assert_eq!(b.offset, offset, "physical chain not offset-ordered");
            assert!(!(last_free && b.free), "two adjacent free blocks");
            offset += b.size;
            total += b.size;
            last_free = b.free;
            visited += 1;
            cur = b.phys_next.map(|idx| idx.0 as usize);
        }
        assert_eq!(total, self.capacity, "block sizes do not sum to capacity");
        assert_eq!(visited, live_indices.len(), "physical chain misses a block");
    }
}
