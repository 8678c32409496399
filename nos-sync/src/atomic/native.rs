//! Native strategy: one read-modify-write instruction per operation.
//!
//! Interlocked operations are full barriers, hence `SeqCst` throughout.

use core::sync::atomic::Ordering;

use super::{AtomicCell, AtomicOps, Interlock, Word};

/// Hardware read-modify-write instructions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Native;

impl AtomicOps for Native {
    const SPIN_FRIENDLY: bool = true;

    fn bind(_interlock: &Interlock) -> Self {
        Native
    }

    #[inline]
    fn load(&self, dest: &AtomicCell) -> Word {
        dest.raw().load(Ordering::SeqCst)
    }

    #[inline]
    fn compare_and_swap(&self, dest: &AtomicCell, exchange: Word, compare: Word) -> Word {
        match dest
            .raw()
            .compare_exchange(compare, exchange, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(previous) | Err(previous) => previous,
        }
    }

    #[inline]
    fn exchange(&self, dest: &AtomicCell, value: Word) -> Word {
        dest.raw().swap(value, Ordering::SeqCst)
    }

    #[inline]
    fn exchange_add(&self, dest: &AtomicCell, delta: Word) -> Word {
        dest.raw().fetch_add(delta, Ordering::SeqCst)
    }
}
