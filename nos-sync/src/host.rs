//! Host implementation of the OS layer on top of std threads
//!
//! Used when nos-sync runs as an ordinary process: thread identities come
//! from a thread-local counter, wait objects are counting semaphores built
//! on `Mutex` + `Condvar`, and promoted wait objects are entered in a
//! process-wide handle table that stands in for the kernel's global object
//! namespace.
//!
//! The provider also owns the process [`Interlock`] that emulated atomics
//! serialize on.
//!
//! The builder knobs exist to drive the failure paths: capping
//! registrations or wait objects produces `ResourceExhausted`, and
//! [`HostProvider::without_global_objects`] makes promotion unsupported.

use alloc::boxed::Box;
use alloc::collections::BTreeSet;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};

use lazy_static::lazy_static;
use nos_api::error::{self, Error, Result};
use nos_api::sync::{LockId, SyncProvider, ThreadId, WaitObject};

use crate::atomic::Interlock;
use crate::logging::sync_debug;

static NEXT_THREAD_ID: AtomicUsize = AtomicUsize::new(1);
static NEXT_GLOBAL_HANDLE: AtomicU32 = AtomicU32::new(1);

std::thread_local! {
    static CURRENT_THREAD: ThreadId = allocate_thread_id();
}

lazy_static! {
    /// Handles of wait objects promoted to process-global scope
    static ref GLOBAL_HANDLES: spin::Mutex<BTreeSet<u32>> = spin::Mutex::new(BTreeSet::new());
}

fn allocate_thread_id() -> ThreadId {
    let raw = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
    match ThreadId::new(raw) {
        Some(id) => id,
        None => error::Fault::new(Error::ResourceExhausted, "host thread ids").raise(),
    }
}

/// Identity of the calling thread
pub fn current_thread() -> ThreadId {
    CURRENT_THREAD.with(|id| *id)
}

/// Whether `handle` names a live global wait object
pub fn is_global_handle(handle: u32) -> bool {
    GLOBAL_HANDLES.lock().contains(&handle)
}

lazy_static! {
    static ref SHARED_PROVIDER: HostProvider = HostProvider::new();
}

/// Counting semaphore used as the host wait object
pub struct HostWaitObject {
    wakes: Mutex<u32>,
    available: Condvar,
    allow_global: bool,
    global_handle: spin::Once<u32>,
    live: Arc<AtomicUsize>,
}

impl HostWaitObject {
    /// Handle in the global table, once promoted
    pub fn global_handle(&self) -> Option<u32> {
        self.global_handle.get().copied()
    }
}

impl WaitObject for HostWaitObject {
    fn wait(&self) {
        let mut wakes = self.wakes.lock().unwrap_or_else(PoisonError::into_inner);
        while *wakes == 0 {
            wakes = self
                .available
                .wait(wakes)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *wakes -= 1;
    }

    fn wake_one(&self) {
        let mut wakes = self.wakes.lock().unwrap_or_else(PoisonError::into_inner);
        *wakes += 1;
        self.available.notify_one();
    }

    fn make_global(&self) -> Result<()> {
        if !self.allow_global {
            return Err(error::unsupported("provider has no global wait objects"));
        }
        let handle = self.global_handle.call_once(|| {
            let handle = NEXT_GLOBAL_HANDLE.fetch_add(1, Ordering::Relaxed);
            GLOBAL_HANDLES.lock().insert(handle);
            handle
        });
        sync_debug!("wait object published as global handle {}", handle);
        Ok(())
    }

    fn is_global(&self) -> bool {
        self.global_handle.is_completed()
    }
}

impl Drop for HostWaitObject {
    fn drop(&mut self) {
        if let Some(handle) = self.global_handle.get() {
            GLOBAL_HANDLES.lock().remove(handle);
        }
        self.live.fetch_sub(1, Ordering::AcqRel);
    }
}

/// OS layer for hosted builds
pub struct HostProvider {
    processors: usize,
    lock_limit: Option<usize>,
    wait_object_limit: Option<usize>,
    allow_global: bool,
    interlock: Interlock,
    next_lock_id: AtomicU64,
    live_locks: AtomicUsize,
    wait_objects_created: AtomicUsize,
    live_wait_objects: Arc<AtomicUsize>,
}

impl HostProvider {
    /// Provider without limits, sized to the machine's parallelism
    pub fn new() -> Self {
        let processors = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            processors,
            lock_limit: None,
            wait_object_limit: None,
            allow_global: true,
            interlock: Interlock::new(),
            next_lock_id: AtomicU64::new(1),
            live_locks: AtomicUsize::new(0),
            wait_objects_created: AtomicUsize::new(0),
            live_wait_objects: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Process-wide provider instance
    pub fn shared() -> &'static HostProvider {
        &SHARED_PROVIDER
    }

    /// Overrides the processor count used for spin decisions
    pub fn with_processor_count(mut self, processors: usize) -> Self {
        self.processors = processors;
        self
    }

    /// Fails registrations beyond `limit` live locks
    pub fn with_lock_limit(mut self, limit: usize) -> Self {
        self.lock_limit = Some(limit);
        self
    }

    /// Fails wait object creation beyond `limit` live objects
    pub fn with_wait_object_limit(mut self, limit: usize) -> Self {
        self.wait_object_limit = Some(limit);
        self
    }

    /// Wait objects stay process-local; promotion becomes unsupported
    pub fn without_global_objects(mut self) -> Self {
        self.allow_global = false;
        self
    }

    /// Replaces the process interlock handed to emulated atomics
    pub fn with_interlock(mut self, interlock: Interlock) -> Self {
        self.interlock = interlock;
        self
    }

    /// The process interlock for locks built on this provider
    pub fn interlock(&self) -> &Interlock {
        &self.interlock
    }

    /// Currently registered locks
    pub fn live_locks(&self) -> usize {
        self.live_locks.load(Ordering::Acquire)
    }

    /// Wait objects created over the provider's lifetime
    pub fn wait_objects_created(&self) -> usize {
        self.wait_objects_created.load(Ordering::Acquire)
    }

    /// Wait objects not yet dropped
    pub fn live_wait_objects(&self) -> usize {
        self.live_wait_objects.load(Ordering::Acquire)
    }
}

impl Default for HostProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Bumps `counter` unless that would exceed `limit`
fn reserve(counter: &AtomicUsize, limit: Option<usize>) -> Result<()> {
    counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| match limit {
            Some(limit) if n >= limit => None,
            _ => Some(n + 1),
        })
        .map(|_| ())
        .map_err(|_| Error::ResourceExhausted)
}

impl SyncProvider for HostProvider {
    fn current_thread(&self) -> ThreadId {
        current_thread()
    }

    fn processor_count(&self) -> usize {
        self.processors
    }

    fn register_lock(&self, spin_count: u32) -> Result<LockId> {
        reserve(&self.live_locks, self.lock_limit)?;
        let id = LockId(self.next_lock_id.fetch_add(1, Ordering::Relaxed));
        sync_debug!("registered {} (spin count {})", id, spin_count);
        Ok(id)
    }

    fn unregister_lock(&self, id: LockId) {
        self.live_locks.fetch_sub(1, Ordering::AcqRel);
        sync_debug!("unregistered {}", id);
    }

    fn create_wait_object(&self) -> Result<Box<dyn WaitObject>> {
        reserve(&self.live_wait_objects, self.wait_object_limit)?;
        self.wait_objects_created.fetch_add(1, Ordering::AcqRel);
        Ok(Box::new(HostWaitObject {
            wakes: Mutex::new(0),
            available: Condvar::new(),
            allow_global: self.allow_global,
            global_handle: spin::Once::new(),
            live: self.live_wait_objects.clone(),
        }))
    }
}
