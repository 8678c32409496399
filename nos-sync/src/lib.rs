//! NOS Sync
//!
//! Recursive critical sections and interlocked word operations for the NOS
//! operating system.
//!
//! # Architecture
//!
//! - **Atomic**: interlocked compare-and-swap, exchange, exchange-add,
//!   increment and decrement on [`AtomicCell`]s, with a native strategy and
//!   an emulated one serialized by the process [`Interlock`]
//! - **Critical section**: the re-entrant [`CriticalSection`], built on the
//!   atomic layer and a wait object from the OS layer
//! - **Host** (`std` feature): the OS layer for ordinary processes
//!
//! The OS layer is whatever implements [`nos_api::sync::SyncProvider`].
//!
//! # Usage
//!
//! ```rust
//! use nos_sync::host::HostProvider;
//! use nos_sync::{AtomicCell, AtomicOps, CriticalSection, PlatformAtomics};
//!
//! let host = HostProvider::shared();
//! let lock = CriticalSection::new(host, host.interlock());
//! {
//!     let _outer = lock.lock();
//!     let _inner = lock.lock(); // re-entrant
//!     assert_eq!(lock.recursion_count(), 2);
//! }
//! assert!(!lock.is_locked());
//!
//! let refcount = AtomicCell::new(1);
//! let atomics = PlatformAtomics::bind(host.interlock());
//! assert_eq!(atomics.increment(&refcount), 2);
//! assert_eq!(atomics.decrement(&refcount), 1);
//! ```

#![cfg_attr(not(any(feature = "std", test)), no_std)]

extern crate alloc;

mod logging;

pub mod atomic;
pub mod config;
pub mod critical_section;
#[cfg(feature = "std")]
pub mod host;

// Re-export commonly used items
pub use atomic::{AtomicCell, AtomicOps, Emulated, Interlock, PlatformAtomics, Word};
#[cfg(target_has_atomic = "32")]
pub use atomic::Native;
pub use config::LockConfig;
pub use critical_section::{CriticalSection, CriticalSectionGuard, LockStats};
pub use nos_api::error::{Error, Result};
