//! Synchronization contract between NOS locks and the OS layer
//!
//! Critical sections only need four things from the system underneath them:
//! who the current thread is, a way to register themselves, a blocking wait
//! object, and (on targets without native read-modify-write instructions) a
//! process-wide lock to serialize interlocked operations.

use alloc::boxed::Box;
use core::fmt;
use core::num::NonZeroUsize;

use crate::error::Result;

/// Identity of a thread as seen by the OS layer.
///
/// Never zero, so an atomic word holding `0` can stand for "no thread".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(NonZeroUsize);

impl ThreadId {
    /// Wraps a raw identifier; `None` for zero
    pub const fn new(raw: usize) -> Option<Self> {
        match NonZeroUsize::new(raw) {
            Some(id) => Some(Self(id)),
            None => None,
        }
    }

    /// Raw identifier, never zero
    pub const fn as_usize(self) -> usize {
        self.0.get()
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tid:{}", self.0)
    }
}

/// Handle the OS layer returns when a lock registers itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockId(pub u64);

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cs#{}", self.0)
    }
}

/// A blocking wait object, semaphore-like.
///
/// Wakes are counted: a `wake_one` that arrives before the matching `wait`
/// lets that `wait` return immediately.
pub trait WaitObject: Send + Sync {
    /// Blocks the calling thread until a wake is available, then consumes it
    fn wait(&self);

    /// Makes one wake available, releasing at most one blocked thread
    fn wake_one(&self);

    /// Converts the object into one other processes can open.
    ///
    /// Providers that only have process-local objects return
    /// [`Error::Unsupported`](crate::error::Error::Unsupported).
    fn make_global(&self) -> Result<()>;

    /// Whether [`make_global`](Self::make_global) has succeeded
    fn is_global(&self) -> bool;
}

/// The process-wide lock serializing emulated interlocked operations
pub trait SerializationLock: Send + Sync {
    /// Blocks until the lock is held by the caller
    fn lock(&self);

    /// Releases the lock.
    ///
    /// # Safety
    ///
    /// The caller must hold the lock.
    unsafe fn unlock(&self);
}

/// Services the synchronization layer consumes from the OS layer
pub trait SyncProvider: Send + Sync {
    /// Identity of the calling thread
    fn current_thread(&self) -> ThreadId;

    /// Number of processors that can run threads concurrently
    fn processor_count(&self) -> usize;

    /// Registers a new lock; fails with `ResourceExhausted` when the lock
    /// record cannot be allocated
    fn register_lock(&self, spin_count: u32) -> Result<LockId>;

    /// Drops a registration made by [`register_lock`](Self::register_lock)
    fn unregister_lock(&self, id: LockId);

    /// Creates a process-local wait object
    fn create_wait_object(&self) -> Result<Box<dyn WaitObject>>;
}

impl<P: SyncProvider + ?Sized> SyncProvider for &P {
    fn current_thread(&self) -> ThreadId {
        (**self).current_thread()
    }

    fn processor_count(&self) -> usize {
        (**self).processor_count()
    }

    fn register_lock(&self, spin_count: u32) -> Result<LockId> {
        (**self).register_lock(spin_count)
    }

    fn unregister_lock(&self, id: LockId) {
        (**self).unregister_lock(id)
    }

    fn create_wait_object(&self) -> Result<Box<dyn WaitObject>> {
        (**self).create_wait_object()
    }
}

#[cfg(target_has_atomic = "ptr")]
impl<P: SyncProvider + ?Sized> SyncProvider for alloc::sync::Arc<P> {
    fn current_thread(&self) -> ThreadId {
        (**self).current_thread()
    }

    fn processor_count(&self) -> usize {
        (**self).processor_count()
    }

    fn register_lock(&self, spin_count: u32) -> Result<LockId> {
        (**self).register_lock(spin_count)
    }

    fn unregister_lock(&self, id: LockId) {
        (**self).unregister_lock(id)
    }

    fn create_wait_object(&self) -> Result<Box<dyn WaitObject>> {
        (**self).create_wait_object()
    }
}

static_assertions::assert_eq_size!(ThreadId, Option<ThreadId>);
static_assertions::assert_obj_safe!(WaitObject, SerializationLock, SyncProvider);
