use std::sync::Arc;

/// The contract every allocation strategy implements and every consumer is
/// generic over.
pub trait MemAllocator {
    /// Returns at least `size` bytes aligned to
    /// [`MAX_ALIGN`](memcore_utils::align::MAX_ALIGN).
    ///
    /// Null is returned for `size == 0`. Strategies that can run dry without
    /// it being fatal also return null on exhaustion.
    fn allocate(&self, size: usize) -> *mut u8;

    /// Releases memory handed out by [`MemAllocator::allocate`]. Freeing
    /// null is a no-op.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live pointer returned by `allocate` on this
    /// same allocator instance.
    unsafe fn free(&self, ptr: *mut u8);
}

impl<A: MemAllocator + ?Sized> MemAllocator for &A {
    fn allocate(&self, size: usize) -> *mut u8 {
        (**self).allocate(size)
    }

    unsafe fn free(&self, ptr: *mut u8) {
        unsafe { (**self).free(ptr) }
    }
}

impl<A: MemAllocator + ?Sized> MemAllocator for Arc<A> {
    fn allocate(&self, size: usize) -> *mut u8 {
        (**self).allocate(size)
    }

    unsafe fn free(&self, ptr: *mut u8) {
        unsafe { (**self).free(ptr) }
    }
}
