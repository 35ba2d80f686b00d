use std::{
    collections::HashMap,
    ptr::{self, NonNull},
};

use memcore_utils::align::MAX_ALIGN;
use parking_lot::Mutex;

use super::{Allocation, RangeAllocator, Statistics};
use crate::{
    allocator::MemAllocator,
    error::{Error, Result, fatal},
    heap::HeapAllocator,
};

/// A [`RangeAllocator`] laid over one real reservation, usable through
/// [`MemAllocator`].
///
/// Unlike the process heap, running dry is not fatal here: `allocate`
/// returns null once no block fits.
pub struct RangeHeap<A: MemAllocator = HeapAllocator> {
    base: NonNull<u8>,
    range: RangeAllocator,
    live: Mutex<HashMap<u64, Allocation>>,
    allocator: A,
}

unsafe impl<A: MemAllocator + Send> Send for RangeHeap<A> {}
unsafe impl<A: MemAllocator + Sync> Sync for RangeHeap<A> {}

impl RangeHeap {
    pub fn new(heap_size: usize) -> Result<Self> {
        Self::new_in(heap_size, HeapAllocator)
    }
}

impl<A: MemAllocator> RangeHeap<A> {
    /// Reserves `heap_size` bytes from `allocator` up front.
    ///
    /// Fails with [`Error::OutOfMemory`] if `allocator` cannot serve the
    /// reservation. An empty heap reserves nothing.
    pub fn new_in(heap_size: usize, allocator: A) -> Result<Self> {
        let base = if heap_size == 0 {
            NonNull::dangling()
        } else {
            NonNull::new(allocator.allocate(heap_size)).ok_or(Error::OutOfMemory {
                size: heap_size as u64,
                alignment: MAX_ALIGN as u64,
            })?
        };

        Ok(Self {
            base,
            range: RangeAllocator::new(heap_size as u64),
            live: Mutex::new(HashMap::new()),
            allocator,
        })
    }

    pub fn range(&self) -> &RangeAllocator {
        &self.range
    }

    pub fn statistics(&self) -> Statistics {
        self.range.statistics()
    }

    fn offset_of(&self, ptr: *mut u8) -> u64 {
        let base = self.base.as_ptr() as usize;
        let addr = ptr as usize;
        match addr.checked_sub(base) {
            Some(offset) if offset < self.range.capacity() as usize => offset as u64,
            _ => fatal(format_args!("Pointer {ptr:p} does not belong to this range heap")),
        }
    }
}

impl<A: MemAllocator> MemAllocator for RangeHeap<A> {
    fn allocate(&self, size: usize) -> *mut u8 {
        if size == 0 {
            return ptr::null_mut();
        }

        match self.range.allocate(size as u64, MAX_ALIGN as u64) {
            Ok(allocation) => {
                let offset = allocation.offset();
                self.live.lock().insert(offset, allocation);
                unsafe { self.base.as_ptr().add(offset as usize) }
            }
            Err(err) => {
                tracing::debug!("Range heap cannot serve {} bytes: {}", size, err);
                ptr::null_mut()
            }
        }
    }

    unsafe fn free(&self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }

        let offset = self.offset_of(ptr);
        let Some(allocation) = self.live.lock().remove(&offset) else {
            fatal(format_args!("Pointer {ptr:p} is not a live range heap allocation"));
        };
        self.range.free(allocation);
    }
}

impl<A: MemAllocator> Drop for RangeHeap<A> {
    fn drop(&mut self) {
        let live = self.live.get_mut();
        if !live.is_empty() {
            tracing::warn!("Range heap dropped with {} live allocations", live.len());
        }
        for (_, allocation) in live.drain() {
            self.range.free(allocation);
        }

        if self.range.capacity() > 0 {
            unsafe { self.allocator.free(self.base.as_ptr()) };
        }
    }
}
