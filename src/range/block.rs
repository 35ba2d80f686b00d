use memcore_pool::SlotId;

#[derive(Debug)]
pub(super) struct Block {
    pub(super) start: u64,
    pub(super) size: u64,
    // start + alignment padding; meaningful only while allocated
    pub(super) offset: u64,
    pub(super) free: bool,

    pub(super) prev_block: Option<SlotId>,
    pub(super) next_block: Option<SlotId>,

    // bucket links, only while free
    pub(super) prev_free: Option<SlotId>,
    pub(super) next_free: Option<SlotId>,
}

impl Block {
    pub(super) fn vacant(start: u64, size: u64) -> Self {
        Self {
            start,
            size,
            offset: start,
            free: true,
            prev_block: None,
            next_block: None,
            prev_free: None,
            next_free: None,
        }
    }

    pub(super) fn end(&self) -> u64 {
        self.start + self.size
    }
}

/// A live allocation inside a [`RangeAllocator`](super::RangeAllocator).
///
/// Handles cannot be cloned; passing one to `free` consumes it.
#[derive(Debug)]
#[must_use = "dropping an allocation handle leaks its block"]
pub struct Allocation {
    pub(super) allocator: u64,
    pub(super) block: SlotId,
    pub(super) offset: u64,
    pub(super) size: u64,
    pub(super) block_size: u64,
}

impl Allocation {
    /// Aligned start of the usable bytes.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Bytes requested.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Bytes the block occupies, alignment padding included.
    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}
