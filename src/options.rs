pub use memcore_utils::size_class::{DEFAULT_BUCKETS, DEFAULT_SIZE_BIAS};
use memcore_utils::size_class::SizeClasses;

use crate::{
    allocator::MemAllocator,
    error::{Error, Result},
    heap::HeapAllocator,
    range::RangeAllocator,
    region::Region,
};

pub const DEFAULT_FIRST_CHUNK_SIZE: usize = 1024;
pub const DEFAULT_MAX_DEPTH: usize = 128;

#[derive(Debug, Clone)]
pub struct RangeOptions {
    buckets: usize,
    size_bias: u32,
}

impl Default for RangeOptions {
    fn default() -> Self {
        Self {
            buckets: DEFAULT_BUCKETS,
            size_bias: DEFAULT_SIZE_BIAS,
        }
    }
}

impl RangeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of size classes.
    pub fn buckets(&mut self, buckets: usize) -> &mut Self {
        self.buckets = buckets;
        self
    }

    /// Bucket 0 holds every block smaller than `2^(size_bias + 1)`.
    pub fn size_bias(&mut self, bias: u32) -> &mut Self {
        self.size_bias = bias;
        self
    }

    pub(crate) fn size_classes(&self) -> Result<SizeClasses> {
        if self.buckets == 0 {
            return Err(Error::Options("range allocator needs at least one bucket".into()));
        }
        if self.size_bias >= u64::BITS {
            return Err(Error::Options(format!(
                "size bias {} exceeds {} bits",
                self.size_bias,
                u64::BITS
            )));
        }
        Ok(SizeClasses::new(self.buckets, self.size_bias))
    }

    pub fn build(&self, heap_size: u64) -> Result<RangeAllocator> {
        Ok(RangeAllocator::with_classes(heap_size, self.size_classes()?))
    }
}

#[derive(Debug, Clone)]
pub struct RegionOptions {
    first_chunk_size: usize,
    max_depth: usize,
}

impl Default for RegionOptions {
    fn default() -> Self {
        Self {
            first_chunk_size: DEFAULT_FIRST_CHUNK_SIZE,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl RegionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capacity of the permanent bottom chunk.
    pub fn first_chunk_size(&mut self, size: usize) -> &mut Self {
        self.first_chunk_size = size;
        self
    }

    /// Deepest scope nesting allowed before opening a scope is fatal.
    pub fn max_depth(&mut self, depth: usize) -> &mut Self {
        self.max_depth = depth;
        self
    }

    pub fn build(&self) -> Result<Region> {
        self.build_in(HeapAllocator)
    }

    pub fn build_in<A: MemAllocator>(&self, allocator: A) -> Result<Region<A>> {
        if self.first_chunk_size == 0 {
            return Err(Error::Options("first chunk size must be non-zero".into()));
        }
        if self.max_depth == 0 {
            return Err(Error::Options("max depth must be non-zero".into()));
        }
        Ok(Region::with_parts(
            allocator,
            self.first_chunk_size,
            self.max_depth,
        ))
    }
}
