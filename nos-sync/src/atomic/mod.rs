//! Interlocked operations on 32-bit words
//!
//! Every shared [`AtomicCell`] is read and modified through an
//! [`AtomicOps`] strategy:
//!
//! - [`Native`] maps each operation to one read-modify-write instruction.
//! - [`Emulated`] runs each operation under the process [`Interlock`]. All
//!   cells share that one lock, so unrelated counters contend with each
//!   other. That is acceptable for reference counts and flags and nothing
//!   hotter.
//!
//! [`PlatformAtomics`] picks the strategy for the build target. Both
//! strategies return identical values for identical operation sequences.
//!
//! Note the return-value asymmetry: [`exchange_add`](AtomicOps::exchange_add)
//! returns the value *before* the addition, [`increment`](AtomicOps::increment)
//! and [`decrement`](AtomicOps::decrement) return the value *after*. Release
//! paths depend on the latter to spot the last reference.

use core::fmt;
use core::sync::atomic::{AtomicI32, Ordering};

mod emulated;
#[cfg(target_has_atomic = "32")]
mod native;

pub use emulated::{Emulated, Interlock, InterlockGuard};
#[cfg(target_has_atomic = "ptr")]
pub use emulated::SpinInterlock;
#[cfg(target_has_atomic = "32")]
pub use native::Native;

/// The machine word interlocked operations work on
pub type Word = i32;

/// Strategy selected for this build target
#[cfg(all(target_has_atomic = "32", not(feature = "emulated-atomics")))]
pub type PlatformAtomics = Native;

/// Strategy selected for this build target
#[cfg(any(not(target_has_atomic = "32"), feature = "emulated-atomics"))]
pub type PlatformAtomics = Emulated;

/// A naturally aligned word shared between threads.
///
/// Operations on one cell are totally ordered and indivisible whichever
/// [`AtomicOps`] strategy each caller uses; native and emulated callers may
/// update the same cell concurrently.
#[repr(transparent)]
#[derive(Default)]
pub struct AtomicCell(AtomicI32);

impl AtomicCell {
    /// Creates a cell holding `value`
    pub const fn new(value: Word) -> Self {
        Self(AtomicI32::new(value))
    }

    /// Mutable access; exclusive borrow means no other thread can observe it
    pub fn get_mut(&mut self) -> &mut Word {
        self.0.get_mut()
    }

    /// Consumes the cell, returning the value
    pub fn into_inner(self) -> Word {
        self.0.into_inner()
    }

    pub(crate) fn raw(&self) -> &AtomicI32 {
        &self.0
    }
}

impl fmt::Debug for AtomicCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AtomicCell").field(&self.0.load(Ordering::Relaxed)).finish()
    }
}

/// Indivisible read-modify-write operations on an [`AtomicCell`]
pub trait AtomicOps: Clone + Send + Sync {
    /// Whether busy-waiting on a cell through this strategy makes sense.
    ///
    /// Spinning on the emulated strategy would hammer the process-wide
    /// interlock, so locks ignore their spin hint there.
    const SPIN_FRIENDLY: bool;

    /// Builds the strategy for a process that owns `interlock`
    fn bind(interlock: &Interlock) -> Self
    where
        Self: Sized;

    /// Reads the current value
    fn load(&self, dest: &AtomicCell) -> Word;

    /// Stores `exchange` if the cell holds `compare`; returns the value seen
    /// before the attempt either way
    fn compare_and_swap(&self, dest: &AtomicCell, exchange: Word, compare: Word) -> Word;

    /// Stores `value`, returns the previous value
    fn exchange(&self, dest: &AtomicCell, value: Word) -> Word;

    /// Adds `delta` (wrapping), returns the previous value
    fn exchange_add(&self, dest: &AtomicCell, delta: Word) -> Word;

    /// Adds one (wrapping), returns the new value
    fn increment(&self, dest: &AtomicCell) -> Word {
        self.exchange_add(dest, 1).wrapping_add(1)
    }

    /// Subtracts one (wrapping), returns the new value
    fn decrement(&self, dest: &AtomicCell) -> Word {
        self.exchange_add(dest, -1).wrapping_sub(1)
    }
}

static_assertions::assert_eq_size!(AtomicCell, Word);
static_assertions::const_assert_eq!(core::mem::align_of::<AtomicCell>(), core::mem::size_of::<Word>());
static_assertions::assert_impl_all!(AtomicCell: Send, Sync);
