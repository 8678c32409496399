//! Critical section tests

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use mockall::mock;
use nos_api::error::{Error, Result};
use nos_api::sync::{LockId, SerializationLock, SyncProvider, ThreadId, WaitObject};
use nos_sync::config::PREALLOCATE_WAIT_OBJECT;
use nos_sync::host::HostProvider;
use nos_sync::{AtomicOps, CriticalSection, Emulated, Interlock, LockStats, Native, PlatformAtomics};

mock! {
    pub Provider {}

    impl SyncProvider for Provider {
        fn current_thread(&self) -> ThreadId;
        fn processor_count(&self) -> usize;
        fn register_lock(&self, spin_count: u32) -> Result<LockId>;
        fn unregister_lock(&self, id: LockId);
        fn create_wait_object(&self) -> Result<Box<dyn WaitObject>>;
    }
}

mock! {
    pub Serializer {}

    impl SerializationLock for Serializer {
        fn lock(&self);
        unsafe fn unlock(&self);
    }
}

fn wait_until(condition: impl Fn() -> bool) {
    while !condition() {
        thread::yield_now();
    }
}

fn check_mutual_exclusion<A: AtomicOps>(atomics: A, spin_count: u32) {
    const THREADS: usize = 8;
    const ROUNDS: u64 = 2_000;

    let provider = HostProvider::new();
    let lock = CriticalSection::with_atomics(&provider, atomics, spin_count);
    let counter = AtomicU64::new(0);

    thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                for _ in 0..ROUNDS {
                    let _guard = lock.lock();
                    // Split load/store: only the lock keeps this from losing updates
                    let value = counter.load(Ordering::Relaxed);
                    counter.store(value + 1, Ordering::Relaxed);
                }
            });
        }
    });

    assert_eq!(counter.load(Ordering::Relaxed), THREADS as u64 * ROUNDS);
    assert!(!lock.is_locked());
    assert_eq!(lock.stats().entry_count as u64, THREADS as u64 * ROUNDS);
}

#[test]
fn test_mutual_exclusion_native() {
    check_mutual_exclusion(Native, 0);
}

#[test]
fn test_mutual_exclusion_with_spinning() {
    check_mutual_exclusion(Native, 4_000);
}

#[test]
fn test_mutual_exclusion_emulated() {
    check_mutual_exclusion(Emulated::bind(&Interlock::new()), 0);
}

#[test]
fn test_reentrant_lock_blocks_others_until_fully_released() {
    let provider = HostProvider::new();
    let lock = CriticalSection::new(&provider, provider.interlock());
    let acquired = AtomicBool::new(false);

    lock.acquire();
    lock.acquire();
    lock.acquire();
    assert_eq!(lock.recursion_count(), 3);
    assert!(lock.is_owned_by_current_thread());

    thread::scope(|s| {
        let contender = s.spawn(|| {
            assert!(!lock.try_acquire());
            lock.acquire();
            acquired.store(true, Ordering::SeqCst);
            assert_eq!(lock.recursion_count(), 1);
            lock.release();
        });

        wait_until(|| lock.waiters() == 1);
        lock.release();
        lock.release();
        thread::sleep(Duration::from_millis(20));
        assert!(!acquired.load(Ordering::SeqCst));
        assert_eq!(lock.recursion_count(), 1);

        lock.release();
        contender.join().unwrap();
    });

    assert!(acquired.load(Ordering::SeqCst));
    assert_eq!(lock.owner(), None);
    assert_eq!(
        lock.stats(),
        LockStats { entry_count: 2, contention_count: 1 }
    );
}

#[test]
fn test_wait_object_is_created_on_first_contention_only() {
    let provider = HostProvider::new();
    let lock = CriticalSection::new(&provider, provider.interlock());
    for _ in 0..100 {
        let _guard = lock.lock();
    }
    assert!(!lock.has_wait_object());

    let guard = lock.lock();
    thread::scope(|s| {
        s.spawn(|| drop(lock.lock()));
        wait_until(|| lock.waiters() == 1);
        drop(guard);
    });
    assert!(lock.has_wait_object());
    assert_eq!(provider.wait_objects_created(), 1);
}

#[test]
fn test_try_lock_is_reentrant_for_owner() {
    let host = HostProvider::shared();
    let lock = CriticalSection::new(host, host.interlock());
    let outer = lock.try_lock().expect("free lock");
    let inner = lock.try_lock().expect("owner re-entry");
    assert_eq!(lock.recursion_count(), 2);

    thread::scope(|s| {
        s.spawn(|| assert!(lock.try_lock().is_none()));
    });

    drop(inner);
    drop(outer);
    assert!(!lock.is_locked());
}

#[test]
fn test_spin_count_bookkeeping() {
    let host = HostProvider::shared();
    let lock = CriticalSection::with_spin_count(host, host.interlock(), 50);
    assert_eq!(lock.set_spin_count(200), 50);
    assert_eq!(lock.set_spin_count(0), 200);
    assert_eq!(lock.spin_count(), 0);
}

#[test]
fn test_set_spin_count_drops_flag_bits() {
    let provider = HostProvider::new();
    let lock = CriticalSection::with_spin_count(&provider, provider.interlock(), 50);
    assert_eq!(lock.set_spin_count(PREALLOCATE_WAIT_OBJECT | 300), 50);
    assert_eq!(lock.spin_count(), 300);
    assert!(!lock.has_wait_object());
    assert_eq!(lock.set_spin_count(0), 300);
}

#[test]
fn test_spin_count_kept_when_not_honored() {
    let provider = HostProvider::new().with_processor_count(1);
    let lock = CriticalSection::with_atomics(&provider, Emulated::bind(&Interlock::new()), 50);
    assert_eq!(lock.set_spin_count(200), 50);
    assert_eq!(lock.set_spin_count(0), 200);
}

#[test]
fn test_preallocate_flag_creates_wait_object() {
    let provider = HostProvider::new();
    let lock = CriticalSection::with_spin_count(&provider, provider.interlock(), PREALLOCATE_WAIT_OBJECT | 1_000);
    assert!(lock.has_wait_object());
    assert_eq!(lock.spin_count(), 1_000);
}

#[test]
fn test_try_initialize_reports_resource_exhaustion() {
    let provider = HostProvider::new().with_lock_limit(0);
    let result = CriticalSection::try_with_spin_count(&provider, provider.interlock(), 0);
    assert!(matches!(result, Err(Error::ResourceExhausted)));

    let provider = HostProvider::new().with_wait_object_limit(0);
    let result = CriticalSection::try_with_spin_count(&provider, provider.interlock(), PREALLOCATE_WAIT_OBJECT);
    assert!(matches!(result, Err(Error::ResourceExhausted)));
    assert_eq!(provider.live_locks(), 0);
}

#[test]
#[should_panic(expected = "status 0xc0000017")]
fn test_initialize_aborts_on_resource_exhaustion() {
    let provider = HostProvider::new().with_lock_limit(0);
    let _lock = CriticalSection::new(&provider, provider.interlock());
}

#[test]
fn test_concurrent_promotion_creates_one_wait_object() {
    const THREADS: usize = 8;

    let provider = HostProvider::new();
    let lock = CriticalSection::new(&provider, provider.interlock());
    let barrier = Barrier::new(THREADS);

    thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                barrier.wait();
                lock.promote_to_global().unwrap();
            });
        }
    });

    assert!(lock.is_global());
    assert_eq!(provider.wait_objects_created(), 1);
    assert_eq!(provider.live_wait_objects(), 1);

    lock.uninitialize();
    assert_eq!(provider.live_wait_objects(), 0);
}

#[test]
fn test_promotion_downgrades_when_unsupported() {
    let provider = HostProvider::new().without_global_objects();
    let lock = CriticalSection::new(&provider, provider.interlock());
    assert!(lock.promote_to_global().is_ok());
    assert!(lock.has_wait_object());
    assert!(!lock.is_global());
}

#[test]
fn test_promotion_reports_creation_failure() {
    let provider = HostProvider::new().with_wait_object_limit(0);
    let lock = CriticalSection::new(&provider, provider.interlock());
    assert_eq!(lock.promote_to_global(), Err(Error::ResourceExhausted));
    assert!(!lock.has_wait_object());
}

#[test]
fn test_reinitialize_is_noop_with_wait_object() {
    let provider = HostProvider::new();
    let mut lock = CriticalSection::with_spin_count(&provider, provider.interlock(), PREALLOCATE_WAIT_OBJECT | 30);
    let id = lock.id();
    lock.acquire();

    lock.reinitialize();
    assert_eq!(lock.id(), id);
    assert!(lock.is_owned_by_current_thread());
    assert_eq!(lock.recursion_count(), 1);
    assert_eq!(lock.spin_count(), 30);
    lock.release();
}

#[test]
fn test_reinitialize_resets_lock_without_wait_object() {
    let provider = HostProvider::new();
    let mut lock = CriticalSection::with_spin_count(&provider, provider.interlock(), 30);
    let id = lock.id();
    lock.acquire();
    lock.acquire();

    lock.reinitialize();
    assert_ne!(lock.id(), id);
    assert_eq!(provider.live_locks(), 1);
    assert!(!lock.is_locked());
    assert_eq!(lock.owner(), None);
    assert_eq!(lock.recursion_count(), 0);
    assert_eq!(lock.spin_count(), 0);
    assert_eq!(lock.stats(), LockStats::default());
}

#[test]
fn test_uninitialize_releases_registration() {
    let provider = HostProvider::new();
    let lock = CriticalSection::new(&provider, provider.interlock());
    lock.promote_to_global().unwrap();
    assert_eq!(provider.live_locks(), 1);
    lock.uninitialize();
    assert_eq!(provider.live_locks(), 0);
    assert_eq!(provider.live_wait_objects(), 0);
}

#[cfg(debug_assertions)]
#[test]
#[should_panic(expected = "does not own")]
fn test_release_without_acquire_faults() {
    let host = HostProvider::shared();
    let lock = CriticalSection::new(host, host.interlock());
    lock.release();
}

#[cfg(debug_assertions)]
#[test]
fn test_release_from_other_thread_faults() {
    let host = HostProvider::shared();
    let lock = CriticalSection::new(host, host.interlock());
    lock.acquire();
    let outcome = thread::scope(|s| s.spawn(|| lock.release()).join());
    assert!(outcome.is_err());
    assert!(lock.is_owned_by_current_thread());
    lock.release();
}

#[cfg(debug_assertions)]
#[test]
#[should_panic(expected = "uninitialize while the lock is held")]
fn test_uninitialize_while_held_faults() {
    let host = HostProvider::shared();
    let lock = CriticalSection::new(host, host.interlock());
    lock.acquire();
    lock.uninitialize();
}

#[test]
fn test_platform_strategy_reaches_the_lock() {
    let mut serializer = MockSerializer::new();
    if cfg!(feature = "emulated-atomics") {
        serializer.expect_lock().times(3..).return_const(());
        serializer.expect_unlock().times(3..).return_const(());
    } else {
        serializer.expect_lock().never();
        serializer.expect_unlock().never();
    }

    let provider = HostProvider::new().with_interlock(Interlock::with_lock(Arc::new(serializer)));
    let lock: CriticalSection<_, PlatformAtomics> = CriticalSection::new(&provider, provider.interlock());
    lock.acquire();
    lock.acquire();
    lock.release();
    lock.release();
    assert!(!lock.is_locked());
}

#[cfg(feature = "emulated-atomics")]
#[test]
fn test_emulated_feature_selects_emulated_strategy() {
    assert_eq!(
        std::any::type_name::<PlatformAtomics>(),
        std::any::type_name::<Emulated>()
    );
}

#[test]
fn test_uncontended_lifetime_never_creates_wait_object() {
    let owner = ThreadId::new(7).unwrap();
    let mut provider = MockProvider::new();
    provider.expect_current_thread().return_const(owner);
    provider.expect_processor_count().return_const(4usize);
    provider
        .expect_register_lock()
        .withf(|spin_count| *spin_count == 50)
        .times(1)
        .returning(|_| Ok(LockId(11)));
    provider.expect_create_wait_object().never();
    provider
        .expect_unregister_lock()
        .withf(|id| *id == LockId(11))
        .times(1)
        .return_const(());

    let lock = CriticalSection::with_spin_count(provider, &Interlock::new(), 50);
    lock.acquire();
    assert_eq!(lock.owner(), Some(owner));
    assert!(lock.try_acquire());
    lock.release();
    lock.release();
    assert!(!lock.is_locked());
    lock.uninitialize();
}

#[test]
fn test_fault_from_provider_reaches_try_initialize() {
    let mut provider = MockProvider::new();
    provider
        .expect_register_lock()
        .returning(|_| Err(Error::ResourceExhausted));
    provider.expect_unregister_lock().never();

    let result = CriticalSection::try_with_spin_count(provider, &Interlock::new(), 0);
    assert_eq!(result.err(), Some(Error::ResourceExhausted));
}
