//! Stack-disciplined bump allocation.
//!
//! A [`Region`] hands out memory by bumping a pointer through a stack of
//! chunks. Memory is never freed one allocation at a time: closing a scope
//! gives back every byte allocated since it was opened, draining chunks
//! newest first. Scopes nest and must close in LIFO order; each one is
//! identified by a [`Brand`] that has to match on close.
//!
//! Each thread owns one implicit region, reached through the free
//! functions in this module ([`begin_scope`], [`alloc`], [`end_scope`], ...)
//! or through a [`RegionScope`] guard. A `Region` can also be built and
//! driven explicitly.

use std::{
    cell::RefCell,
    marker::PhantomData,
    ptr::{self, NonNull},
    sync::atomic::{AtomicU64, Ordering::*},
};

use memcore_utils::align::round_to_max_align;

use crate::{
    allocator::MemAllocator,
    error::fatal,
    heap::HeapAllocator,
    options::{DEFAULT_FIRST_CHUNK_SIZE, DEFAULT_MAX_DEPTH},
};

mod scope;

pub use scope::{RegionScope, with_scope};

// Brand 0 belongs to the base record and is never handed out.
static NEXT_BRAND: AtomicU64 = AtomicU64::new(1);

/// Identifies one open scope.
///
/// Brands are unique across threads and cannot be cloned, so a closed
/// scope can never be closed again. `Brand` is not `Send`: a scope lives
/// and dies on the thread that opened it.
#[derive(Debug)]
#[must_use = "the scope stays open until its brand is passed to end_scope"]
pub struct Brand {
    id: u64,
    _local: PhantomData<*const ()>,
}

impl Brand {
    fn next() -> Self {
        Self {
            id: NEXT_BRAND.fetch_add(1, Relaxed),
            _local: PhantomData,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

struct Chunk {
    ptr: NonNull<u8>,
    capacity: usize,
    used: usize,
}

#[derive(Debug, Clone, Copy)]
struct ScopeRecord {
    brand: u64,
    // cumulative bytes consumed up to and including this depth
    offset: u64,
}

pub struct Region<A: MemAllocator = HeapAllocator> {
    chunks: Vec<Chunk>,
    scopes: Vec<ScopeRecord>,
    first_chunk_size: usize,
    max_depth: usize,
    allocator: A,
}

impl Region {
    pub fn new() -> Self {
        Self::with_parts(HeapAllocator, DEFAULT_FIRST_CHUNK_SIZE, DEFAULT_MAX_DEPTH)
    }
}

impl Default for Region {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: MemAllocator> Region<A> {
    pub(crate) fn with_parts(allocator: A, first_chunk_size: usize, max_depth: usize) -> Self {
        Self {
            chunks: Vec::new(),
            scopes: vec![ScopeRecord {
                brand: 0,
                offset: 0,
            }],
            first_chunk_size,
            max_depth,
            allocator,
        }
    }

    pub fn depth(&self) -> usize {
        self.scopes.len() - 1
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn bytes_in_use(&self) -> u64 {
        self.top().offset
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Total bytes reserved across all chunks.
    pub fn capacity(&self) -> usize {
        self.chunks.iter().map(|c| c.capacity).sum()
    }

    /// Whether `brand` owns the innermost open scope.
    pub fn is_current(&self, brand: &Brand) -> bool {
        self.depth() > 0 && self.top().brand == brand.id
    }

    pub fn begin_scope(&mut self) -> Brand {
        if self.depth() >= self.max_depth {
            fatal(format_args!(
                "Region scope depth exceeds cap of {}",
                self.max_depth
            ));
        }

        let brand = Brand::next();
        let offset = self.top().offset;
        self.scopes.push(ScopeRecord {
            brand: brand.id,
            offset,
        });
        brand
    }

    /// Closes the innermost scope and gives back every byte allocated in it.
    ///
    /// # Panics
    ///
    /// Panics if `brand` does not own the innermost scope.
    pub fn end_scope(&mut self, brand: Brand) {
        self.check(&brand, "close");

        let closed = self.scopes.pop().map_or(0, |s| s.offset);
        let release = closed - self.top().offset;
        self.release(release);
    }

    /// Bump-allocates `size` bytes (rounded up to the maximum alignment)
    /// inside the scope owned by `brand`.
    pub fn alloc(&mut self, brand: &Brand, size: usize) -> *mut u8 {
        self.check(brand, "allocate in");
        if size == 0 {
            return ptr::null_mut();
        }

        let size = round_to_max_align(size);
        let fits = self
            .chunks
            .last()
            .is_some_and(|c| c.capacity - c.used >= size);
        if !fits {
            self.push_chunk(size);
        }

        let Some(chunk) = self.chunks.last_mut() else {
            unreachable!();
        };
        let p = unsafe { chunk.ptr.as_ptr().add(chunk.used) };
        chunk.used += size;

        let Some(top) = self.scopes.last_mut() else {
            unreachable!();
        };
        top.offset += size as u64;
        p
    }

    /// No-op: region memory comes back only when its scope closes.
    pub fn free(&self, brand: &Brand, ptr: *mut u8) {
        let _ = (brand, ptr);
    }

    fn top(&self) -> ScopeRecord {
        // the base record is never popped
        self.scopes[self.scopes.len() - 1]
    }

    #[track_caller]
    fn check(&self, brand: &Brand, action: &str) {
        if !self.is_current(brand) {
            fatal(format_args!(
                "Region brand mismatch: cannot {} scope {} at depth {} (innermost is {})",
                action,
                brand.id,
                self.depth(),
                self.top().brand
            ));
        }
    }

    fn push_chunk(&mut self, size: usize) {
        let capacity = match self.chunks.last() {
            None => size.max(self.first_chunk_size),
            Some(top) => size.max(top.capacity.saturating_mul(2)),
        };
        let capacity = round_to_max_align(capacity);

        let Some(ptr) = NonNull::new(self.allocator.allocate(capacity)) else {
            fatal(format_args!("Region chunk of {capacity} bytes unavailable"));
        };
        tracing::debug!(
            "Region pushed chunk #{} of {} bytes",
            self.chunks.len(),
            capacity
        );

        self.chunks.push(Chunk {
            ptr,
            capacity,
            used: 0,
        });
    }

    fn release(&mut self, mut bytes: u64) {
        while bytes > 0 {
            let last = self.chunks.len() - 1;
            let chunk = &mut self.chunks[last];

            let take = bytes.min(chunk.used as u64);
            chunk.used -= take as usize;
            bytes -= take;

            if chunk.used == 0 && last > 0 {
                let chunk = self.chunks.pop().map(|c| (c.ptr, c.capacity));
                if let Some((ptr, capacity)) = chunk {
                    tracing::debug!("Region drained chunk #{} of {} bytes", last, capacity);
                    unsafe { self.allocator.free(ptr.as_ptr()) };
                }
            } else if bytes > 0 {
                fatal(format_args!(
                    "Region released {bytes} bytes more than it holds"
                ));
            }
        }
    }
}

impl<A: MemAllocator> Drop for Region<A> {
    fn drop(&mut self) {
        if self.depth() > 0 {
            tracing::warn!("Region dropped with {} open scopes", self.depth());
        }
        for chunk in self.chunks.drain(..) {
            unsafe { self.allocator.free(chunk.ptr.as_ptr()) };
        }
    }
}

thread_local! {
    static REGION: RefCell<Region> = RefCell::new(Region::new());
}

/// Opens a scope on this thread's region.
pub fn begin_scope() -> Brand {
    REGION.with_borrow_mut(|r| r.begin_scope())
}

/// Closes the innermost scope on this thread's region.
pub fn end_scope(brand: Brand) {
    REGION.with_borrow_mut(|r| r.end_scope(brand))
}

pub fn alloc(brand: &Brand, size: usize) -> *mut u8 {
    REGION.with_borrow_mut(|r| r.alloc(brand, size))
}

pub fn free(brand: &Brand, ptr: *mut u8) {
    REGION.with_borrow(|r| r.free(brand, ptr))
}

pub fn current_depth() -> usize {
    REGION.with_borrow(|r| r.depth())
}

pub fn bytes_in_use() -> u64 {
    REGION.with_borrow(|r| r.bytes_in_use())
}

pub(crate) fn is_current(brand: &Brand) -> bool {
    REGION.with_borrow(|r| r.is_current(brand))
}

#[cfg(test)]
mod tests {
    use memcore_utils::align::MAX_ALIGN;

    use super::*;
    use crate::{options::RegionOptions, test_utils::CountingAllocator};

    #[test]
    fn test_nested_scopes() {
        let mut region = Region::new();
        assert_eq!(region.depth(), 0);

        let a = region.begin_scope();
        let b = region.begin_scope();
        let c = region.begin_scope();
        assert_eq!(region.depth(), 3);
        assert!(region.is_current(&c));
        assert!(!region.is_current(&a));

        region.end_scope(c);
        region.end_scope(b);
        region.end_scope(a);
        assert_eq!(region.depth(), 0);
    }

    #[test]
    #[should_panic(expected = "brand mismatch")]
    fn test_out_of_order_close() {
        let mut region = Region::new();
        let a = region.begin_scope();
        let b = region.begin_scope();
        let _c = region.begin_scope();
        region.end_scope(b);
        region.end_scope(a);
    }

    #[test]
    #[should_panic(expected = "brand mismatch")]
    fn test_alloc_in_outer_scope() {
        let mut region = Region::new();
        let a = region.begin_scope();
        let _b = region.begin_scope();
        region.alloc(&a, 8);
    }

    #[test]
    #[should_panic(expected = "brand mismatch")]
    fn test_brand_from_other_region() {
        let mut first = Region::new();
        let mut second = Region::new();
        let a = first.begin_scope();
        let _b = second.begin_scope();
        second.end_scope(a);
    }

    #[test]
    #[should_panic(expected = "exceeds cap")]
    fn test_depth_cap() {
        let mut region = RegionOptions::new().max_depth(2).build().unwrap();
        let _a = region.begin_scope();
        let _b = region.begin_scope();
        let _c = region.begin_scope();
    }

    #[test]
    fn test_allocations_are_aligned_and_disjoint() {
        let mut region = Region::new();
        let scope = region.begin_scope();

        let mut ptrs = Vec::new();
        for size in [1, 3, 17, 64, 5, 900] {
            let p = region.alloc(&scope, size);
            assert_eq!(p as usize % MAX_ALIGN, 0);
            unsafe { ptr::write_bytes(p, size as u8, size) };
            ptrs.push((p, size));
        }
        for (p, size) in ptrs {
            let bytes = unsafe { std::slice::from_raw_parts(p, size) };
            assert!(bytes.iter().all(|&b| b == size as u8));
        }

        assert!(region.alloc(&scope, 0).is_null());
        region.end_scope(scope);
    }

    #[test]
    fn test_scope_release_restores_usage() {
        let mut region = Region::new();
        let outer = region.begin_scope();
        region.alloc(&outer, 100);
        let before = region.bytes_in_use();

        let inner = region.begin_scope();
        for _ in 0..50 {
            region.alloc(&inner, 200);
        }
        assert!(region.bytes_in_use() > before);
        region.end_scope(inner);
        assert_eq!(region.bytes_in_use(), before);

        region.alloc(&outer, 10);
        region.end_scope(outer);
        assert_eq!(region.bytes_in_use(), 0);
    }

    #[test]
    fn test_overflow_chunk_drained() {
        let counting = CountingAllocator::default();
        let mut region = RegionOptions::new().build_in(&counting).unwrap();

        let base = region.begin_scope();
        region.alloc(&base, 24);
        assert_eq!(region.chunk_count(), 1);
        assert_eq!(region.capacity(), 1024);

        let scope = region.begin_scope();
        let p = region.alloc(&scope, 4000);
        assert!(!p.is_null());
        assert_eq!(region.chunk_count(), 2);
        assert!(region.capacity() - 1024 >= 4000);
        assert_eq!(counting.allocs(), 2);

        region.end_scope(scope);
        assert_eq!(region.chunk_count(), 1);
        assert_eq!(counting.frees(), 1);
        assert_eq!(region.bytes_in_use(), 32);

        region.end_scope(base);
        assert_eq!(region.bytes_in_use(), 0);
        assert_eq!(region.chunk_count(), 1);

        drop(region);
        assert_eq!(counting.allocs(), counting.frees());
    }

    #[test]
    fn test_chunks_double() {
        let mut region = RegionOptions::new()
            .first_chunk_size(64)
            .build()
            .unwrap();
        let scope = region.begin_scope();
        for _ in 0..9 {
            region.alloc(&scope, 48);
        }
        assert_eq!(region.chunk_count(), 4);
        assert_eq!(region.capacity(), 64 + 128 + 256 + 512);

        region.end_scope(scope);
        assert_eq!(region.chunk_count(), 1);
        assert_eq!(region.capacity(), 64);
    }

    #[test]
    fn test_thread_local_region() {
        crate::test_utils::init_tracing();

        let start = bytes_in_use();
        let depth = current_depth();
        let a = begin_scope();
        alloc(&a, 10);
        let b = begin_scope();
        assert_eq!(current_depth(), depth + 2);
        let p = alloc(&b, 3000);
        free(&b, p);
        end_scope(b);
        assert_eq!(bytes_in_use(), start + 16);
        end_scope(a);
        assert_eq!(current_depth(), depth);
        assert_eq!(bytes_in_use(), start);
    }

    #[test]
    fn test_threads_are_isolated() {
        let depth = current_depth();
        let used = bytes_in_use();
        let outer = begin_scope();
        alloc(&outer, 64);

        crossbeam::scope(|s| {
            for _ in 0..4 {
                s.spawn(|_| {
                    assert_eq!(current_depth(), 0);
                    assert_eq!(bytes_in_use(), 0);
                    for round in 1..50 {
                        let brand = begin_scope();
                        alloc(&brand, round * 16);
                        assert_eq!(current_depth(), 1);
                        end_scope(brand);
                    }
                    assert_eq!(bytes_in_use(), 0);
                });
            }
        })
        .unwrap();

        assert_eq!(current_depth(), depth + 1);
        assert_eq!(bytes_in_use(), used + 64);
        end_scope(outer);
    }
}
