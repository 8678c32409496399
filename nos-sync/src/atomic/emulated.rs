//! Emulated strategy: every operation runs under one process-wide lock.
//!
//! For targets without read-modify-write instructions. The [`Interlock`] is
//! built once at process start and handed to every [`Emulated`] instance;
//! it is never a hidden global, so tests can hand in their own lock.
//!
//! Emulated callers are serialized by the interlock. On targets that do have
//! 32-bit read-modify-write instructions (the `emulated-atomics` feature),
//! each update is additionally a single RMW on the cell, so emulated and
//! native callers may share a cell. Elsewhere only plain atomic loads and
//! stores exist and the interlock alone makes the update indivisible; no
//! native strategy exists there to race with. Because every cell in the
//! process goes through the same lock, throughput collapses under
//! contention on unrelated cells. Keep it to short updates.

#[cfg(target_has_atomic = "ptr")]
use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::Ordering;

use nos_api::sync::SerializationLock;

use super::{AtomicCell, AtomicOps, Word};

#[derive(Clone)]
enum Handle {
    #[cfg(target_has_atomic = "ptr")]
    Shared(Arc<dyn SerializationLock>),
    Static(&'static dyn SerializationLock),
}

/// Handle to the process-wide serialization lock
#[derive(Clone)]
pub struct Interlock {
    handle: Handle,
}

impl Interlock {
    /// Creates the process interlock backed by a spin lock
    #[cfg(target_has_atomic = "ptr")]
    pub fn new() -> Self {
        Self::with_lock(Arc::new(SpinInterlock::new()))
    }

    /// Uses `lock` as the process interlock
    #[cfg(target_has_atomic = "ptr")]
    pub fn with_lock(lock: Arc<dyn SerializationLock>) -> Self {
        Self { handle: Handle::Shared(lock) }
    }

    /// Uses a lock the OS layer keeps alive for the whole process; the only
    /// option on targets without pointer-width atomics
    pub const fn from_static(lock: &'static dyn SerializationLock) -> Self {
        Self { handle: Handle::Static(lock) }
    }

    fn lock_ref(&self) -> &dyn SerializationLock {
        match &self.handle {
            #[cfg(target_has_atomic = "ptr")]
            Handle::Shared(lock) => lock.as_ref(),
            Handle::Static(lock) => *lock,
        }
    }

    /// Takes the interlock until the guard is dropped
    pub fn enter(&self) -> InterlockGuard<'_> {
        let lock = self.lock_ref();
        lock.lock();
        InterlockGuard { lock }
    }
}

#[cfg(target_has_atomic = "ptr")]
impl Default for Interlock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Interlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.handle {
            #[cfg(target_has_atomic = "ptr")]
            Handle::Shared(_) => "shared",
            Handle::Static(_) => "static",
        };
        f.debug_struct("Interlock").field("handle", &kind).finish()
    }
}

/// RAII guard for the process interlock
pub struct InterlockGuard<'a> {
    lock: &'a dyn SerializationLock,
}

impl Drop for InterlockGuard<'_> {
    fn drop(&mut self) {
        // Safety: the guard only exists while the lock is held
        unsafe { self.lock.unlock() }
    }
}

/// Default interlock for hosted targets
#[cfg(target_has_atomic = "ptr")]
#[derive(Default)]
pub struct SpinInterlock {
    inner: spin::Mutex<()>,
}

#[cfg(target_has_atomic = "ptr")]
impl SpinInterlock {
    pub const fn new() -> Self {
        Self { inner: spin::Mutex::new(()) }
    }

    /// Check if the interlock is currently held
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}

#[cfg(target_has_atomic = "ptr")]
impl SerializationLock for SpinInterlock {
    fn lock(&self) {
        // The guard is re-materialized by `unlock`
        core::mem::forget(self.inner.lock());
    }

    unsafe fn unlock(&self) {
        // Safety: forwarded from the caller, who holds the lock
        unsafe { self.inner.force_unlock() }
    }
}

/// Interlocked operations serialized by the process [`Interlock`]
#[derive(Debug, Clone)]
pub struct Emulated {
    interlock: Interlock,
}

impl Emulated {
    pub fn new(interlock: Interlock) -> Self {
        Self { interlock }
    }

    /// The interlock this strategy serializes on
    pub fn interlock(&self) -> &Interlock {
        &self.interlock
    }

    /// Read-modify-write under the interlock.
    ///
    /// Where the target has 32-bit RMW instructions the update itself is one
    /// as well, so it stays indivisible against [`Native`](super::Native)
    /// callers that never take the interlock.
    #[inline]
    fn update(&self, dest: &AtomicCell, f: impl Fn(Word) -> Word) -> Word {
        let _guard = self.interlock.enter();
        #[cfg(target_has_atomic = "32")]
        let previous = match dest
            .raw()
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| Some(f(current)))
        {
            Ok(previous) | Err(previous) => previous,
        };
        #[cfg(not(target_has_atomic = "32"))]
        let previous = {
            let previous = dest.raw().load(Ordering::SeqCst);
            let next = f(previous);
            if next != previous {
                dest.raw().store(next, Ordering::SeqCst);
            }
            previous
        };
        previous
    }
}

impl AtomicOps for Emulated {
    const SPIN_FRIENDLY: bool = false;

    fn bind(interlock: &Interlock) -> Self {
        Self::new(interlock.clone())
    }

    fn load(&self, dest: &AtomicCell) -> Word {
        let _guard = self.interlock.enter();
        dest.raw().load(Ordering::SeqCst)
    }

    fn compare_and_swap(&self, dest: &AtomicCell, exchange: Word, compare: Word) -> Word {
        self.update(dest, |current| if current == compare { exchange } else { current })
    }

    fn exchange(&self, dest: &AtomicCell, value: Word) -> Word {
        self.update(dest, |_| value)
    }

    fn exchange_add(&self, dest: &AtomicCell, delta: Word) -> Word {
        self.update(dest, |current| current.wrapping_add(delta))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static STATIC_INTERLOCK: SpinInterlock = SpinInterlock::new();

    #[test]
    fn guard_releases_interlock() {
        let lock = Arc::new(SpinInterlock::new());
        let interlock = Interlock::with_lock(lock.clone());
        {
            let _guard = interlock.enter();
            assert!(lock.is_locked());
        }
        assert!(!lock.is_locked());
    }

    #[test]
    fn operations_release_interlock() {
        let lock = Arc::new(SpinInterlock::new());
        let ops = Emulated::new(Interlock::with_lock(lock.clone()));
        let cell = AtomicCell::new(5);
        assert_eq!(ops.compare_and_swap(&cell, 10, 5), 5);
        assert_eq!(ops.exchange_add(&cell, 2), 10);
        assert_eq!(ops.decrement(&cell), 11);
        assert!(!lock.is_locked());
    }

    #[test]
    fn static_interlock_works() {
        let ops = Emulated::bind(&Interlock::from_static(&STATIC_INTERLOCK));
        let cell = AtomicCell::new(0);
        assert_eq!(ops.increment(&cell), 1);
        assert_eq!(ops.exchange(&cell, 7), 1);
        assert_eq!(ops.load(&cell), 7);
    }
}
