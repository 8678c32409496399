//! NOS API - Boundary contract for the NOS synchronization layer
//!
//! This crate describes what the synchronization primitives in `nos-sync`
//! require from the surrounding operating system layer, and nothing more.
//! The OS layer itself (object manager, scheduler, exception dispatch) lives
//! elsewhere and plugs in by implementing these traits.
//!
//! # Architecture
//!
//! - **Error**: status-coded error type, the crate-wide `Result`, and the
//!   [`Fault`](error::Fault) kind used for unrecoverable failures
//! - **Sync**: thread identity, blocking wait objects, the per-process
//!   serialization lock and the [`SyncProvider`](sync::SyncProvider) that
//!   hands them out
//!
//! # Usage
//!
//! ```rust
//! use nos_api::error::{Error, Result};
//!
//! fn reserve(available: usize) -> Result<usize> {
//!     if available == 0 {
//!         return Err(Error::ResourceExhausted);
//!     }
//!     Ok(available - 1)
//! }
//!
//! assert!(reserve(0).is_err());
//! ```

#![no_std]

#[cfg(feature = "std")]
extern crate std;

extern crate alloc;

pub mod error;
pub mod sync;

// Re-export commonly used types
pub use crate::error::{Error, Fault, Result, Status};
pub use crate::sync::{LockId, SerializationLock, SyncProvider, ThreadId, WaitObject};
