use crate::error::{Error, Result};

/// Snapshot of a range allocator's running counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Statistics {
    pub capacity: u64,

    pub free_size: u64,
    pub allocated_size: u64,
    pub free_blocks: u64,
    pub allocated_blocks: u64,
    pub free_blocks_per_bucket: Vec<u64>,

    /// Peak of `allocated_size`.
    pub high_water_mark: u64,

    pub total_allocs: u64,
    pub total_frees: u64,
    pub total_alloc_bytes: u64,
    pub total_free_bytes: u64,
}

impl Statistics {
    pub(super) fn new(capacity: u64, buckets: usize) -> Self {
        Self {
            capacity,
            free_blocks_per_bucket: vec![0; buckets],
            ..Default::default()
        }
    }

    pub(super) fn record_alloc(&mut self, bytes: u64) {
        self.allocated_size += bytes;
        self.allocated_blocks += 1;
        self.total_allocs += 1;
        self.total_alloc_bytes += bytes;
        self.high_water_mark = self.high_water_mark.max(self.allocated_size);
    }

    pub(super) fn record_free(&mut self, bytes: u64) {
        self.allocated_size -= bytes;
        self.allocated_blocks -= 1;
        self.total_frees += 1;
        self.total_free_bytes += bytes;
    }

    /// Checks that every allocation has been freed and the range has
    /// coalesced back into a single free block.
    pub fn check_clear(&self) -> Result<()> {
        let expected_free_blocks = u64::from(self.capacity > 0);

        let problems = [
            (
                self.total_allocs != self.total_frees,
                format!("{} allocs vs {} frees", self.total_allocs, self.total_frees),
            ),
            (
                self.total_alloc_bytes != self.total_free_bytes,
                format!(
                    "{} bytes allocated vs {} bytes freed",
                    self.total_alloc_bytes, self.total_free_bytes
                ),
            ),
            (
                self.free_blocks != expected_free_blocks,
                format!(
                    "{} free blocks, expected {}",
                    self.free_blocks, expected_free_blocks
                ),
            ),
            (
                self.free_size != self.capacity,
                format!("{} of {} bytes free", self.free_size, self.capacity),
            ),
            (
                self.allocated_blocks != 0 || self.allocated_size != 0,
                format!(
                    "{} blocks ({} bytes) still allocated",
                    self.allocated_blocks, self.allocated_size
                ),
            ),
        ];

        let problems: Vec<_> = problems
            .into_iter()
            .filter_map(|(failed, msg)| failed.then_some(msg))
            .collect();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::NotClear(problems.join("; ")))
        }
    }

    /// Panicking form of [`Statistics::check_clear`], for tests.
    #[track_caller]
    pub fn assert_clear(&self) {
        if let Err(err) = self.check_clear() {
            panic!("{err}");
        }
    }
}
