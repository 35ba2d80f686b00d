//! Allocation strategies for a systems runtime.
//!
//! - [`heap::HeapAllocator`]: the process heap, zero-filled, leak counted.
//! - [`region`]: thread-local LIFO scopes over a bump-allocated chunk stack.
//! - [`range::RangeAllocator`]: bucketed first-fit allocation with
//!   splitting and coalescing over one reserved range.
//!
//! Every strategy is reachable through [`allocator::MemAllocator`].

pub mod allocator;
pub mod error;
pub mod heap;
pub mod options;
pub mod range;
pub mod region;

#[cfg(test)]
mod test_utils;

pub use memcore_pool as pool;

pub mod prelude {
    pub use crate::{
        allocator::MemAllocator,
        error::{Error, Result},
        heap::{HeapAllocator, check_leaks, net_allocations},
        options::{RangeOptions, RegionOptions},
        range::{Allocation, RangeAllocator, RangeHeap, Statistics},
        region::{Brand, Region, RegionScope, with_scope},
    };
    pub use memcore_pool::prelude::*;
    pub use memcore_utils::align::MAX_ALIGN;
}
