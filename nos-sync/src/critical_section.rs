//! Recursive critical sections
//!
//! A [`CriticalSection`] is a re-entrant mutex: the owning thread may acquire
//! it again without deadlocking and must release it once per acquire.
//!
//! State lives in an interlocked word, `lock_count`:
//!
//! - `-1`: free
//! - `0`: held, nobody waiting
//! - `n > 0`: held, `n` threads blocked or about to block
//!
//! An uncontended acquire is one compare-and-swap (`-1 -> 0`). A contended
//! acquire optionally spins, then increments `lock_count` and blocks on the
//! wait object. The final release decrements `lock_count`; a result of zero
//! or more means a waiter is queued, and ownership is handed to it directly
//! by waking exactly one thread.
//!
//! The wait object is created on first real contention (or on
//! [`promote_to_global`](CriticalSection::promote_to_global)) through a
//! one-shot cell, so concurrent first-time creators always agree on a single
//! object.

use alloc::boxed::Box;
use core::fmt;
use core::marker::PhantomData;
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use nos_api::error::{self, Error, Fault, Result};
use nos_api::sync::{LockId, SyncProvider, ThreadId, WaitObject};

use crate::atomic::{AtomicCell, AtomicOps, Interlock, PlatformAtomics, Word};
use crate::config::{DEFAULT_SPIN_COUNT, LockConfig, SPIN_COUNT_MASK};
use crate::logging::{sync_debug, sync_error, sync_lock_trace, sync_warn};

const FREE: Word = -1;
const NO_OWNER: usize = 0;

/// Acquisition counters kept per lock
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockStats {
    /// Non-recursive acquisitions
    pub entry_count: u32,
    /// Acquisitions that had to block
    pub contention_count: u32,
}

/// Re-entrant mutual exclusion lock
pub struct CriticalSection<P: SyncProvider, A: AtomicOps> {
    provider: P,
    atomics: A,
    id: LockId,
    lock_count: AtomicCell,
    /// Raw [`ThreadId`] of the owner, [`NO_OWNER`] when free.
    /// Only written by the thread that holds the lock.
    owner: AtomicUsize,
    /// Only touched by the owner
    recursion_count: AtomicU32,
    spin_count: AtomicCell,
    entry_count: AtomicCell,
    contention_count: AtomicCell,
    wait_object: spin::Once<Box<dyn WaitObject>>,
}

/// Constructors on the strategy selected for the build target.
///
/// `interlock` is the process interlock; it is only taken when
/// [`PlatformAtomics`] is the emulated strategy.
impl<P: SyncProvider> CriticalSection<P, PlatformAtomics> {
    /// Initializes a lock with no spin hint.
    ///
    /// Raises a fault if the OS layer cannot register the lock.
    pub fn new(provider: P, interlock: &Interlock) -> Self {
        Self::with_spin_count(provider, interlock, DEFAULT_SPIN_COUNT)
    }

    /// Initializes a lock with a spin hint, raising a fault on failure.
    ///
    /// See [`LockConfig`] for the flag bits accepted in `spin_count`.
    pub fn with_spin_count(provider: P, interlock: &Interlock, spin_count: u32) -> Self {
        Self::with_atomics(provider, PlatformAtomics::bind(interlock), spin_count)
    }

    /// Initializes a lock with a spin hint, reporting failure to the caller
    pub fn try_with_spin_count(provider: P, interlock: &Interlock, spin_count: u32) -> Result<Self> {
        Self::try_with_atomics(provider, PlatformAtomics::bind(interlock), spin_count)
    }
}

impl<P: SyncProvider, A: AtomicOps> CriticalSection<P, A> {
    /// Initializes a lock on an explicit atomics strategy, raising a fault on
    /// failure
    pub fn with_atomics(provider: P, atomics: A, spin_count: u32) -> Self {
        error::or_raise(
            Self::try_with_atomics(provider, atomics, spin_count),
            "critical section initialization",
        )
    }

    /// Initializes a lock on an explicit atomics strategy.
    ///
    /// On failure no lock exists and nothing stays registered with the OS
    /// layer.
    pub fn try_with_atomics(provider: P, atomics: A, spin_count: u32) -> Result<Self> {
        let config = LockConfig::from_raw(spin_count);
        let id = provider.register_lock(config.spin_count)?;
        let lock = Self {
            provider,
            atomics,
            id,
            lock_count: AtomicCell::new(FREE),
            owner: AtomicUsize::new(NO_OWNER),
            recursion_count: AtomicU32::new(0),
            spin_count: AtomicCell::new(config.spin_count as Word),
            entry_count: AtomicCell::new(0),
            contention_count: AtomicCell::new(0),
            wait_object: spin::Once::new(),
        };
        if config.preallocate {
            // Dropping `lock` on failure unregisters it
            lock.wait_object()?;
        }
        sync_debug!("{}: initialized, spin count {}", id, config.spin_count);
        Ok(lock)
    }

    /// Resets the lock unless it already has a wait object.
    ///
    /// With a wait object present this does nothing at all, even if the lock
    /// is currently held. Otherwise it behaves like a fresh initialization:
    /// new registration, no owner, spin count zero.
    pub fn reinitialize(&mut self) {
        if self.wait_object.is_completed() {
            sync_debug!("{}: reinitialize skipped, wait object present", self.id);
            return;
        }
        let id = error::or_raise(
            self.provider.register_lock(DEFAULT_SPIN_COUNT),
            "critical section reinitialization",
        );
        let old = core::mem::replace(&mut self.id, id);
        self.provider.unregister_lock(old);

        *self.lock_count.get_mut() = FREE;
        *self.owner.get_mut() = NO_OWNER;
        *self.recursion_count.get_mut() = 0;
        *self.spin_count.get_mut() = DEFAULT_SPIN_COUNT as Word;
        *self.entry_count.get_mut() = 0;
        *self.contention_count.get_mut() = 0;
        sync_debug!("{}: reinitialized (was {})", id, old);
    }

    /// Replaces the spin hint, returning the previous one.
    ///
    /// Only the [`SPIN_COUNT_MASK`] bits are kept; flag bits are ignored.
    /// The hint is stored even when it cannot be honored (single processor,
    /// emulated atomics); acquisition then blocks without spinning.
    pub fn set_spin_count(&self, spin_count: u32) -> u32 {
        let spin_count = spin_count & SPIN_COUNT_MASK;
        let previous = self.atomics.exchange(&self.spin_count, spin_count as Word) as u32;
        if spin_count != 0 && !self.can_spin() {
            sync_debug!("{}: spin count {} stored but not honored", self.id, spin_count);
        }
        previous
    }

    /// Creates the wait object if needed and makes it usable from other
    /// processes.
    ///
    /// A provider without global objects downgrades this to a no-op. Only a
    /// failure to create the wait object is reported.
    pub fn promote_to_global(&self) -> Result<()> {
        let object = self.wait_object()?;
        if object.is_global() {
            return Ok(());
        }
        match object.make_global() {
            Ok(()) => {
                sync_debug!("{}: wait object promoted to global", self.id);
                Ok(())
            }
            Err(err) if err.is_hint() => {
                sync_warn!("{}: promotion ignored: {}", self.id, err);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Acquires the lock, blocking until it is available.
    ///
    /// Re-acquiring from the owning thread only bumps the recursion count.
    pub fn acquire(&self) {
        let me = self.provider.current_thread();
        if self.owned_by(me) {
            let depth = self.recursion_count.load(Ordering::Relaxed);
            self.recursion_count.store(depth + 1, Ordering::Relaxed);
            return;
        }
        if !self.try_claim() && !self.spin() {
            self.block(me);
        }
        self.take_ownership(me);
    }

    /// Acquires the lock if that does not require waiting
    pub fn try_acquire(&self) -> bool {
        let me = self.provider.current_thread();
        if self.owned_by(me) {
            let depth = self.recursion_count.load(Ordering::Relaxed);
            self.recursion_count.store(depth + 1, Ordering::Relaxed);
            return true;
        }
        if self.try_claim() {
            self.take_ownership(me);
            true
        } else {
            false
        }
    }

    /// Acquires the lock and returns a guard that releases it on drop
    pub fn lock(&self) -> CriticalSectionGuard<'_, P, A> {
        self.acquire();
        CriticalSectionGuard { lock: self, _not_send: PhantomData }
    }

    /// Like [`lock`](Self::lock) but never waits
    pub fn try_lock(&self) -> Option<CriticalSectionGuard<'_, P, A>> {
        self.try_acquire()
            .then(|| CriticalSectionGuard { lock: self, _not_send: PhantomData })
    }

    /// Releases one level of ownership.
    ///
    /// The call must come from the owning thread, once per acquire. A stray
    /// release raises a fault in debug builds and is ignored otherwise.
    pub fn release(&self) {
        let me = self.provider.current_thread();
        if !self.owned_by(me) {
            self.usage_fault("release by a thread that does not own the lock");
            return;
        }
        let depth = self.recursion_count.load(Ordering::Relaxed);
        if depth > 1 {
            self.recursion_count.store(depth - 1, Ordering::Relaxed);
            return;
        }
        self.recursion_count.store(0, Ordering::Relaxed);
        self.owner.store(NO_OWNER, Ordering::Release);
        sync_lock_trace!("{}: released by {}", self.id, me);

        if self.atomics.decrement(&self.lock_count) >= 0 {
            // A waiter is queued; it takes ownership when woken
            let object = error::or_raise(self.wait_object(), "critical section wake");
            object.wake_one();
        }
    }

    /// Tears the lock down.
    ///
    /// The lock must be free with nobody waiting; anything else is a usage
    /// fault.
    pub fn uninitialize(self) {
        if self.atomics.load(&self.lock_count) != FREE {
            self.usage_fault("uninitialize while the lock is held");
        }
        drop(self);
    }

    /// Registration handle from the OS layer
    pub fn id(&self) -> LockId {
        self.id
    }

    /// Current owner, if any
    pub fn owner(&self) -> Option<ThreadId> {
        ThreadId::new(self.owner.load(Ordering::Acquire))
    }

    /// Whether the calling thread owns the lock
    pub fn is_owned_by_current_thread(&self) -> bool {
        self.owned_by(self.provider.current_thread())
    }

    /// Nesting depth; exact only when read by the owner
    pub fn recursion_count(&self) -> u32 {
        self.recursion_count.load(Ordering::Relaxed)
    }

    /// Whether any thread holds the lock
    pub fn is_locked(&self) -> bool {
        self.atomics.load(&self.lock_count) != FREE
    }

    /// Threads blocked, or about to block, on the lock
    pub fn waiters(&self) -> u32 {
        self.atomics.load(&self.lock_count).max(0) as u32
    }

    /// The stored spin hint
    pub fn spin_count(&self) -> u32 {
        self.atomics.load(&self.spin_count) as u32
    }

    /// Whether the wait object has been created
    pub fn has_wait_object(&self) -> bool {
        self.wait_object.is_completed()
    }

    /// Whether the wait object exists and is usable from other processes
    pub fn is_global(&self) -> bool {
        self.wait_object.get().is_some_and(|object| object.is_global())
    }

    /// Acquisition counters
    pub fn stats(&self) -> LockStats {
        LockStats {
            entry_count: self.atomics.load(&self.entry_count) as u32,
            contention_count: self.atomics.load(&self.contention_count) as u32,
        }
    }

    fn owned_by(&self, thread: ThreadId) -> bool {
        self.owner.load(Ordering::Acquire) == thread.as_usize()
    }

    fn try_claim(&self) -> bool {
        self.atomics.compare_and_swap(&self.lock_count, 0, FREE) == FREE
    }

    fn can_spin(&self) -> bool {
        A::SPIN_FRIENDLY && self.provider.processor_count() > 1
    }

    fn spin(&self) -> bool {
        if !self.can_spin() {
            return false;
        }
        let spins = self.atomics.load(&self.spin_count) as u32;
        for _ in 0..spins {
            core::hint::spin_loop();
            if self.atomics.load(&self.lock_count) == FREE && self.try_claim() {
                return true;
            }
        }
        false
    }

    fn block(&self, me: ThreadId) {
        if self.atomics.increment(&self.lock_count) == 0 {
            // Released between the failed claim and the increment
            return;
        }
        self.atomics.increment(&self.contention_count);
        sync_lock_trace!("{}: {} blocking", self.id, me);
        let object = error::or_raise(self.wait_object(), "critical section wait");
        object.wait();
    }

    fn take_ownership(&self, me: ThreadId) {
        self.owner.store(me.as_usize(), Ordering::Release);
        self.recursion_count.store(1, Ordering::Relaxed);
        self.atomics.increment(&self.entry_count);
        sync_lock_trace!("{}: acquired by {}", self.id, me);
    }

    fn wait_object(&self) -> Result<&dyn WaitObject> {
        let object = self.wait_object.try_call_once(|| {
            let object = self.provider.create_wait_object()?;
            sync_debug!("{}: wait object created", self.id);
            Ok::<_, Error>(object)
        })?;
        Ok(&**object)
    }

    #[track_caller]
    fn usage_fault(&self, msg: &'static str) {
        sync_error!("{}: {}", self.id, msg);
        if cfg!(debug_assertions) {
            Fault::new(error::usage_fault(msg), "critical section").raise();
        }
    }
}

impl<P: SyncProvider, A: AtomicOps> Drop for CriticalSection<P, A> {
    fn drop(&mut self) {
        if *self.lock_count.get_mut() != FREE {
            sync_error!("{}: destroyed while held by {:#x}", self.id, *self.owner.get_mut());
        }
        self.provider.unregister_lock(self.id);
        sync_debug!("{}: uninitialized", self.id);
    }
}

impl<P: SyncProvider, A: AtomicOps> fmt::Debug for CriticalSection<P, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CriticalSection")
            .field("id", &self.id)
            .field("owner", &self.owner())
            .field("lock_count", &self.atomics.load(&self.lock_count))
            .field("spin_count", &self.spin_count())
            .field("has_wait_object", &self.has_wait_object())
            .finish()
    }
}

/// RAII guard for [`CriticalSection`]; releases one level on drop.
///
/// Not `Send`: the release must happen on the acquiring thread.
pub struct CriticalSectionGuard<'a, P: SyncProvider, A: AtomicOps> {
    lock: &'a CriticalSection<P, A>,
    _not_send: PhantomData<*const ()>,
}

impl<P: SyncProvider, A: AtomicOps> Drop for CriticalSectionGuard<'_, P, A> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

#[cfg(target_has_atomic = "ptr")]
static_assertions::assert_impl_all!(
    CriticalSection<alloc::sync::Arc<dyn SyncProvider>, crate::atomic::Emulated>: Send, Sync
);
#[cfg(target_has_atomic = "ptr")]
static_assertions::assert_not_impl_any!(
    CriticalSectionGuard<'static, alloc::sync::Arc<dyn SyncProvider>, crate::atomic::Emulated>: Send
);
