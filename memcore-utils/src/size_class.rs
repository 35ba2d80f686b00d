pub const DEFAULT_BUCKETS: usize = 24;
pub const DEFAULT_SIZE_BIAS: u32 = 8;

/// Power-of-two size classes: a size lands in
/// `clamp(floor(log2(size)) - bias, 0, buckets - 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeClasses {
    buckets: usize,
    bias: u32,
}

impl SizeClasses {
    pub const fn new(buckets: usize, bias: u32) -> Self {
        assert!(buckets > 0, "SizeClasses needs at least one bucket.");
        Self { buckets, bias }
    }

    pub fn bucket_for(&self, size: u64) -> usize {
        if size == 0 {
            return 0;
        }
        let log2 = size.ilog2();
        (log2.saturating_sub(self.bias) as usize).min(self.buckets - 1)
    }

    pub fn len(&self) -> usize {
        self.buckets
    }

    pub fn is_empty(&self) -> bool {
        self.buckets == 0
    }
}

impl Default for SizeClasses {
    fn default() -> Self {
        Self::new(DEFAULT_BUCKETS, DEFAULT_SIZE_BIAS)
    }
}
