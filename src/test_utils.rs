use std::sync::atomic::{AtomicUsize, Ordering::*};

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{allocator::MemAllocator, heap::HeapAllocator};

pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .with(EnvFilter::from_default_env())
        .try_init();
}

/// Heap allocator that counts its own traffic, independent of the
/// process-wide counter other tests share.
#[derive(Debug, Default)]
pub struct CountingAllocator {
    allocs: AtomicUsize,
    frees: AtomicUsize,
}

impl CountingAllocator {
    pub fn allocs(&self) -> usize {
        self.allocs.load(SeqCst)
    }

    pub fn frees(&self) -> usize {
        self.frees.load(SeqCst)
    }
}

impl MemAllocator for CountingAllocator {
    fn allocate(&self, size: usize) -> *mut u8 {
        let ptr = HeapAllocator.allocate(size);
        if !ptr.is_null() {
            self.allocs.fetch_add(1, SeqCst);
        }
        ptr
    }

    unsafe fn free(&self, ptr: *mut u8) {
        if !ptr.is_null() {
            self.frees.fetch_add(1, SeqCst);
        }
        unsafe { HeapAllocator.free(ptr) }
    }
}
