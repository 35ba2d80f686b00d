use std::{
    alloc::Layout,
    ptr,
    sync::atomic::{AtomicI64, Ordering::*},
};

use crossbeam::utils::CachePadded;
use memcore_utils::align::MAX_ALIGN;

use crate::{
    allocator::MemAllocator,
    error::{Error, Result, fatal},
};

static NET_ALLOCATIONS: CachePadded<AtomicI64> = CachePadded::new(AtomicI64::new(0));

// Room in front of every allocation for its size, kept at MAX_ALIGN so the
// returned pointer stays aligned.
const HEADER: usize = MAX_ALIGN;

/// Process heap, zero-filled, with a leak counter outside release builds.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapAllocator;

impl HeapAllocator {
    pub fn new() -> Self {
        Self
    }
}

fn layout_for(size: usize) -> Option<Layout> {
    let total = size.checked_add(HEADER)?;
    Layout::from_size_align(total, MAX_ALIGN).ok()
}

fn record(delta: i64) {
    if cfg!(debug_assertions) {
        NET_ALLOCATIONS.fetch_add(delta, Relaxed);
    }
}

impl MemAllocator for HeapAllocator {
    fn allocate(&self, size: usize) -> *mut u8 {
        if size == 0 {
            return ptr::null_mut();
        }

        let Some(layout) = layout_for(size) else {
            fatal(format_args!("Heap allocation of {size} bytes overflows"));
        };

        let base = unsafe { std::alloc::alloc_zeroed(layout) };
        if base.is_null() {
            tracing::error!("Heap exhausted allocating {} bytes", size);
            std::alloc::handle_alloc_error(layout);
        }

        record(1);
        unsafe {
            base.cast::<usize>().write(size);
            base.add(HEADER)
        }
    }

    unsafe fn free(&self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }

        unsafe {
            let base = ptr.sub(HEADER);
            let size = base.cast::<usize>().read();
            let layout = Layout::from_size_align_unchecked(size + HEADER, MAX_ALIGN);
            std::alloc::dealloc(base, layout);
        }
        record(-1);
    }
}

/// Net heap allocations (allocs minus frees) over the process lifetime.
/// Always zero in release builds.
pub fn net_allocations() -> i64 {
    NET_ALLOCATIONS.load(SeqCst)
}

/// Shutdown diagnostic: reports outstanding heap allocations.
pub fn check_leaks() -> Result<()> {
    match net_allocations() {
        0 => Ok(()),
        net => {
            tracing::warn!("{} heap allocations were never freed", net);
            Err(Error::Leak { net })
        }
    }
}
