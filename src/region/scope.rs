use scopeguard::ScopeGuard;

use super::{Brand, alloc, begin_scope, end_scope, is_current};
use crate::allocator::MemAllocator;

/// A scope on this thread's region that closes itself when dropped,
/// including on early return and unwinding.
pub struct RegionScope {
    brand: ScopeGuard<Brand, fn(Brand)>,
}

fn close_on_drop(brand: Brand) {
    // A mismatch while already unwinding would abort the process; leave the
    // region as is and let the panic carry on.
    if std::thread::panicking() && !is_current(&brand) {
        tracing::error!("Region scope {} left open during unwinding", brand.id());
        return;
    }
    end_scope(brand);
}

impl RegionScope {
    pub fn open() -> Self {
        Self {
            brand: scopeguard::guard(begin_scope(), close_on_drop as fn(Brand)),
        }
    }

    pub fn brand(&self) -> &Brand {
        &self.brand
    }

    pub fn alloc(&self, size: usize) -> *mut u8 {
        alloc(&self.brand, size)
    }

    /// Closes the scope now instead of at the end of the enclosing block.
    pub fn close(self) {
        drop(self);
    }
}

impl MemAllocator for RegionScope {
    fn allocate(&self, size: usize) -> *mut u8 {
        self.alloc(size)
    }

    unsafe fn free(&self, ptr: *mut u8) {
        super::free(&self.brand, ptr);
    }
}

/// Runs `f` inside a fresh scope and closes it on every exit path.
pub fn with_scope<R>(f: impl FnOnce(&RegionScope) -> R) -> R {
    let scope = RegionScope::open();
    f(&scope)
}
