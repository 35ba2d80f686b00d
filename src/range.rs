//! General-purpose allocation over one pre-reserved byte range.
//!
//! The range is tiled by an address-ordered list of blocks. Free blocks are
//! additionally threaded onto segregated free lists (buckets), one per
//! power-of-two size class. Allocation scans buckets upward from the
//! request's class and takes the first block that fits once alignment
//! padding is accounted for, splitting off the tail. Freeing merges with
//! free neighbours straight away, so two adjacent blocks are never both
//! free.
//!
//! Block records live in a [`NodePool`] and refer to each other by slot
//! index. All operations run under one lock.

use std::sync::atomic::{AtomicU64, Ordering::*};

use memcore_pool::{NodePool, SlotId};
use memcore_utils::{
    align::{AlignError, padding_for},
    size_class::SizeClasses,
};
use parking_lot::Mutex;

use crate::error::{Error, Result, fatal};

mod block;
mod heap;
mod stats;

use block::Block;

pub use block::Allocation;
pub use heap::RangeHeap;
pub use stats::Statistics;

static NEXT_ALLOCATOR_ID: AtomicU64 = AtomicU64::new(1);

pub struct RangeAllocator {
    id: u64,
    capacity: u64,
    inner: Mutex<RangeInner>,
}

struct RangeInner {
    blocks: NodePool<Block>,
    head: Option<SlotId>,
    buckets: Vec<Option<SlotId>>,
    classes: SizeClasses,
    stats: Statistics,
}

impl RangeAllocator {
    /// Manages `[0, heap_size)` with the default size classes.
    pub fn new(heap_size: u64) -> Self {
        Self::with_classes(heap_size, SizeClasses::default())
    }

    pub(crate) fn with_classes(heap_size: u64, classes: SizeClasses) -> Self {
        let mut inner = RangeInner {
            blocks: NodePool::new(),
            head: None,
            buckets: vec![None; classes.len()],
            classes,
            stats: Statistics::new(heap_size, classes.len()),
        };

        if heap_size > 0 {
            let id = inner.blocks.make(Block::vacant(0, heap_size));
            inner.head = Some(id);
            inner.push_free(id);
        }

        Self {
            id: NEXT_ALLOCATOR_ID.fetch_add(1, Relaxed),
            capacity: heap_size,
            inner: Mutex::new(inner),
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Reserves `size` bytes whose offset is a multiple of `alignment`.
    ///
    /// Returns [`Error::OutOfMemory`] when no free block fits; the allocator
    /// is left untouched in that case.
    pub fn allocate(&self, size: u64, alignment: u64) -> Result<Allocation> {
        if size == 0 {
            return Err(Error::ZeroSize);
        }
        if !alignment.is_power_of_two() {
            return Err(AlignError::NotPowerOfTwo(alignment).into());
        }

        let mut inner = self.inner.lock();
        let Some((id, padding)) = inner.find_fit(size, alignment) else {
            tracing::debug!(
                "Range allocator has no fit for {} bytes aligned to {}",
                size,
                alignment
            );
            return Err(Error::OutOfMemory { size, alignment });
        };

        let (offset, block_size) = inner.take(id, padding + size, padding);
        Ok(Allocation {
            allocator: self.id,
            block: id,
            offset,
            size,
            block_size,
        })
    }

    /// Returns an allocation's block and merges it with free neighbours.
    ///
    /// # Panics
    ///
    /// Panics if `allocation` was handed out by a different allocator.
    pub fn free(&self, allocation: Allocation) {
        if allocation.allocator != self.id {
            fatal(format_args!(
                "Range allocator {} cannot free a handle from allocator {}",
                self.id, allocation.allocator
            ));
        }

        self.inner.lock().release(allocation.block);
    }

    pub fn statistics(&self) -> Statistics {
        self.inner.lock().stats.clone()
    }

    /// Size of the biggest free block, ignoring alignment.
    pub fn largest_free_block(&self) -> u64 {
        let inner = self.inner.lock();
        inner
            .buckets
            .iter()
            .rev()
            .find_map(|head| {
                head.map(|head| {
                    inner
                        .free_list(head)
                        .map(|id| inner.blocks[id].size)
                        .max()
                        .unwrap_or(0)
                })
            })
            .unwrap_or(0)
    }

    /// Walks every block and bucket and checks them against each other and
    /// against the running statistics.
    pub fn validate(&self) -> Result<()> {
        self.inner.lock().validate(self.capacity)
    }
}

impl Drop for RangeAllocator {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if inner.stats.allocated_blocks > 0 {
            tracing::warn!(
                "Range allocator dropped with {} blocks ({} bytes) allocated",
                inner.stats.allocated_blocks,
                inner.stats.allocated_size
            );
        }
        inner.blocks.clear();
    }
}

impl RangeInner {
    fn find_fit(&self, size: u64, alignment: u64) -> Option<(SlotId, u64)> {
        let first = self.classes.bucket_for(size);

        for &head in &self.buckets[first..] {
            let Some(head) = head else {
                continue;
            };
            for id in self.free_list(head) {
                let block = &self.blocks[id];
                let fit = padding_for(block.start, alignment).ok().and_then(|padding| {
                    let needed = size.checked_add(padding)?;
                    (block.size >= needed).then_some(padding)
                });
                if let Some(padding) = fit {
                    return Some((id, padding));
                }
            }
        }
        None
    }

    fn free_list(&self, head: SlotId) -> impl Iterator<Item = SlotId> + '_ {
        std::iter::successors(Some(head), |&id| self.blocks[id].next_free)
    }

    /// Marks `id` allocated with `needed` bytes and splits off the rest.
    fn take(&mut self, id: SlotId, needed: u64, padding: u64) -> (u64, u64) {
        self.unlink_free(id);

        let block = &mut self.blocks[id];
        block.free = false;
        block.offset = block.start + padding;
        let offset = block.offset;

        if block.size > needed {
            let rest = Block {
                prev_block: Some(id),
                next_block: block.next_block,
                ..Block::vacant(block.start + needed, block.size - needed)
            };
            block.size = needed;
            tracing::debug!(
                "Split block {:?} at {}: kept {} bytes, {} bytes back to free",
                id,
                rest.start,
                needed,
                rest.size
            );

            let next = rest.next_block;
            let rest_id = self.blocks.make(rest);
            self.blocks[id].next_block = Some(rest_id);
            if let Some(next) = next {
                self.blocks[next].prev_block = Some(rest_id);
            }
            self.push_free(rest_id);
        }

        self.stats.record_alloc(needed);
        (offset, needed)
    }

    fn release(&mut self, id: SlotId) {
        let block = &mut self.blocks[id];
        if block.free {
            fatal(format_args!("Range block {id:?} freed twice"));
        }
        block.free = true;
        let size = block.size;
        self.stats.record_free(size);

        let mut current = id;
        if let Some(prev) = self.blocks[current].prev_block {
            if self.blocks[prev].free {
                self.unlink_free(prev);
                self.absorb_next(prev);
                current = prev;
            }
        }
        if let Some(next) = self.blocks[current].next_block {
            if self.blocks[next].free {
                self.unlink_free(next);
                self.absorb_next(current);
            }
        }

        self.push_free(current);
    }

    /// Grows `id` over its successor and recycles the successor's record.
    fn absorb_next(&mut self, id: SlotId) {
        let Some(next) = self.blocks[id].next_block else {
            return;
        };
        let absorbed = self.blocks.destroy(next);

        let block = &mut self.blocks[id];
        block.size += absorbed.size;
        block.next_block = absorbed.next_block;
        tracing::debug!(
            "Merged block {:?} with {:?}: {} bytes at {}",
            id,
            next,
            block.size,
            block.start
        );
        if let Some(after) = absorbed.next_block {
            self.blocks[after].prev_block = Some(id);
        }
    }

    fn push_free(&mut self, id: SlotId) {
        let bucket = self.classes.bucket_for(self.blocks[id].size);
        let head = self.buckets[bucket];

        let block = &mut self.blocks[id];
        block.free = true;
        block.prev_free = None;
        block.next_free = head;
        let size = block.size;

        if let Some(head) = head {
            self.blocks[head].prev_free = Some(id);
        }
        self.buckets[bucket] = Some(id);

        self.stats.free_blocks += 1;
        self.stats.free_size += size;
        self.stats.free_blocks_per_bucket[bucket] += 1;
    }

    fn unlink_free(&mut self, id: SlotId) {
        let block = &mut self.blocks[id];
        let prev = block.prev_free.take();
        let next = block.next_free.take();
        let size = block.size;
        let bucket = self.classes.bucket_for(size);

        match prev {
            Some(prev) => self.blocks[prev].next_free = next,
            None => self.buckets[bucket] = next,
        }
        if let Some(next) = next {
            self.blocks[next].prev_free = prev;
        }

        self.stats.free_blocks -= 1;
        self.stats.free_size -= size;
        self.stats.free_blocks_per_bucket[bucket] -= 1;
    }

    fn validate(&self, capacity: u64) -> Result<()> {
        let corrupt = |msg: String| Err(Error::Corruption(msg));

        let mut expected_start = 0;
        let mut prev: Option<SlotId> = None;
        let mut prev_free = false;
        let (mut free_size, mut free_blocks) = (0, 0);
        let (mut allocated_size, mut allocated_blocks) = (0, 0);

        let mut cursor = self.head;
        while let Some(id) = cursor {
            let block = &self.blocks[id];
            if block.start != expected_start {
                return corrupt(format!(
                    "block {id:?} starts at {}, expected {expected_start}",
                    block.start
                ));
            }
            if block.prev_block != prev {
                return corrupt(format!("block {id:?} has a stale back link"));
            }
            if block.free && prev_free {
                return corrupt(format!("block {id:?} and its predecessor are both free"));
            }

            if block.free {
                free_size += block.size;
                free_blocks += 1;
            } else {
                if block.offset < block.start || block.offset >= block.end() {
                    return corrupt(format!("block {id:?} offset lies outside the block"));
                }
                allocated_size += block.size;
                allocated_blocks += 1;
            }

            expected_start = block.end();
            prev = Some(id);
            prev_free = block.free;
            cursor = block.next_block;
        }

        if expected_start != capacity {
            return corrupt(format!(
                "blocks cover {expected_start} of {capacity} bytes"
            ));
        }

        for (bucket, head) in self.buckets.iter().enumerate() {
            let mut count = 0;
            let mut prev = None;
            for id in head.iter().flat_map(|&head| self.free_list(head)) {
                let block = &self.blocks[id];
                if !block.free {
                    return corrupt(format!("allocated block {id:?} sits in bucket {bucket}"));
                }
                if self.classes.bucket_for(block.size) != bucket {
                    return corrupt(format!(
                        "block {id:?} of {} bytes sits in bucket {bucket}",
                        block.size
                    ));
                }
                if block.prev_free != prev {
                    return corrupt(format!("block {id:?} has a stale bucket back link"));
                }
                prev = Some(id);
                count += 1;
            }
            if self.stats.free_blocks_per_bucket[bucket] != count {
                return corrupt(format!(
                    "bucket {bucket} holds {count} blocks, statistics say {}",
                    self.stats.free_blocks_per_bucket[bucket]
                ));
            }
        }

        let stats = &self.stats;
        if (free_size, free_blocks, allocated_size, allocated_blocks)
            != (
                stats.free_size,
                stats.free_blocks,
                stats.allocated_size,
                stats.allocated_blocks,
            )
        {
            return corrupt(format!(
                "walk found {free_blocks} free ({free_size} bytes) and {allocated_blocks} allocated ({allocated_size} bytes), statistics disagree: {stats:?}"
            ));
        }
        if free_size + allocated_size != capacity {
            return corrupt(format!(
                "{free_size} free + {allocated_size} allocated != {capacity}"
            ));
        }

        Ok(())
    }
}
