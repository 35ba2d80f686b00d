//! The heap counter is process-wide, so this binary holds a single test.

use memcore::prelude::*;
use rand::{Rng, SeedableRng, rngs::StdRng};

#[test]
fn test_interleaved_alloc_free_balances() -> anyhow::Result<()> {
    const ALLOCS: usize = 500;

    let heap = HeapAllocator::new();
    let start = net_allocations();
    let mut rng = StdRng::seed_from_u64(42);
    let mut live = Vec::new();
    let mut allocs = 0;
    let mut calls = 0;

    while allocs < ALLOCS || !live.is_empty() {
        if allocs < ALLOCS && (live.is_empty() || rng.random_bool(0.5)) {
            let p = heap.allocate(rng.random_range(1..=256));
            assert!(!p.is_null());
            live.push(p);
            allocs += 1;
        } else {
            let at = rng.random_range(0..live.len());
            unsafe { heap.free(live.swap_remove(at)) };
        }
        calls += 1;

        if cfg!(debug_assertions) {
            assert_eq!(net_allocations() - start, live.len() as i64);
        }
    }

    assert_eq!(calls, 2 * ALLOCS);
    assert_eq!(net_allocations(), start);
    check_leaks()?;

    let leaked = heap.allocate(8);
    if cfg!(debug_assertions) {
        assert!(matches!(check_leaks(), Err(Error::Leak { net: 1 })));
    }
    unsafe { heap.free(leaked) };
    check_leaks()?;
    Ok(())
}
